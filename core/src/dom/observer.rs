//! Observer registry
//!
//! Passive change notification for the live page. Consumers register an
//! observer, keep the returned [`ObserverId`], and receive [`Notice`]s by
//! draining the document. Nothing here polls: notices are produced by the
//! document operations that cause them.

use super::NodeId;

/// Handle to one registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverKind {
    /// Structural, attribute and text changes anywhere in the target's subtree
    Mutation,
    /// Size changes of the target (window resize for root/body)
    Resize,
    /// Target entering or leaving the viewport
    Intersection,
}

/// A change delivered to one observer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notice {
    Mutation {
        observer: ObserverId,
        /// The node whose children, attributes or text changed
        target: NodeId,
    },
    Resize {
        observer: ObserverId,
        target: NodeId,
    },
    Intersection {
        observer: ObserverId,
        target: NodeId,
        intersecting: bool,
    },
}

impl Notice {
    pub fn observer(&self) -> ObserverId {
        match self {
            Notice::Mutation { observer, .. }
            | Notice::Resize { observer, .. }
            | Notice::Intersection { observer, .. } => *observer,
        }
    }
}

#[derive(Debug)]
struct Registration {
    id: ObserverId,
    kind: ObserverKind,
    target: NodeId,
    /// Last reported intersection state (intersection observers only)
    intersecting: Option<bool>,
}

#[derive(Debug, Default)]
pub(super) struct ObserverRegistry {
    next_id: u64,
    registrations: Vec<Registration>,
    pending: Vec<Notice>,
}

impl ObserverRegistry {
    pub(super) fn len(&self) -> usize {
        self.registrations.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub(super) fn register(
        &mut self,
        kind: ObserverKind,
        target: NodeId,
        initial: Option<bool>,
    ) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.registrations.push(Registration {
            id,
            kind,
            target,
            intersecting: initial,
        });
        if let Some(intersecting) = initial {
            self.pending.push(Notice::Intersection {
                observer: id,
                target,
                intersecting,
            });
        }
        id
    }

    pub(super) fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        self.pending.retain(|n| n.observer() != id);
        before != self.registrations.len()
    }

    pub(super) fn take_pending(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.pending)
    }

    /// `chain` is the mutated node followed by its ancestors
    pub(super) fn record_mutation(&mut self, target: NodeId, chain: &[NodeId]) {
        for reg in &self.registrations {
            if reg.kind == ObserverKind::Mutation && chain.contains(&reg.target) {
                self.pending.push(Notice::Mutation {
                    observer: reg.id,
                    target,
                });
            }
        }
    }

    pub(super) fn record_resize(&mut self, target: NodeId) {
        for reg in &self.registrations {
            if reg.kind == ObserverKind::Resize && reg.target == target {
                self.pending.push(Notice::Resize {
                    observer: reg.id,
                    target,
                });
            }
        }
    }

    pub(super) fn intersection_targets(&self) -> Vec<NodeId> {
        let mut targets: Vec<NodeId> = self
            .registrations
            .iter()
            .filter(|r| r.kind == ObserverKind::Intersection)
            .map(|r| r.target)
            .collect();
        targets.dedup();
        targets
    }

    /// Queue a notice for every intersection observer on `target` whose last
    /// reported state differs from `intersecting`.
    pub(super) fn record_intersection(&mut self, target: NodeId, intersecting: bool) {
        for reg in &mut self.registrations {
            if reg.kind != ObserverKind::Intersection || reg.target != target {
                continue;
            }
            if reg.intersecting == Some(intersecting) {
                continue;
            }
            reg.intersecting = Some(intersecting);
            self.pending.push(Notice::Intersection {
                observer: reg.id,
                target,
                intersecting,
            });
        }
    }
}

//! Ring lifecycle: attach, realign, evict, invoke, detach.

use std::collections::{BTreeMap, HashMap};

use postshot_types::{RingSettings, Settings};
use tracing::{debug, warn};

use super::{Affordance, DismissCallback, OverlayRing, RingAction, RingError, RingHandle, RingOutcome};
use crate::dom::{Document, DomError, NodeId, Notice, ObserverId, Selector, SelectorError};
use crate::timer::TimerQueue;

/// `id` of the body-level container that holds every ring surface
pub const OVERLAY_LAYER_ID: &str = "ts-ring-layer";
/// Class carried by each ring surface
pub const RING_CLASS: &str = "ts-ring-selector";

const BUTTON_CLASS: &str = "ts-ring-button";
const CLOSE_LABEL: &str = "\u{00d7}";

/// Parsed selectors and labels the controller works from
#[derive(Debug, Clone)]
pub struct RingConfig {
    pub mutation_root: Selector,
    pub replies_marker: Selector,
    pub truncation_marker: Selector,
    pub labels: RingSettings,
}

impl RingConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, SelectorError> {
        Ok(Self {
            mutation_root: Selector::parse(&settings.targeting.mutation_root)?,
            replies_marker: Selector::parse(&settings.targeting.replies_marker)?,
            truncation_marker: Selector::parse(&settings.targeting.truncation_marker)?,
            labels: settings.ring.clone(),
        })
    }

    fn feedback_label(&self, action: RingAction) -> Option<&str> {
        match action {
            RingAction::Select => Some(self.labels.selected_label.as_str()),
            RingAction::CopyMarkup => Some(self.labels.copied_label.as_str()),
            _ => None,
        }
    }
}

/// Counters for lifecycle events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub attached: u64,
    pub detached: u64,
    pub realignments: u64,
    pub evictions: u64,
    pub reversions: u64,
}

/// Work coalesced from one batch of notices for one ring
#[derive(Debug, Default, Clone, Copy)]
struct PendingWork {
    realign: bool,
    recheck_replies: bool,
    evict: bool,
}

pub struct RingController {
    config: RingConfig,
    rings: BTreeMap<RingHandle, OverlayRing>,
    by_element: HashMap<NodeId, RingHandle>,
    by_observer: HashMap<ObserverId, RingHandle>,
    timers: TimerQueue<(RingHandle, RingAction)>,
    next_handle: u64,
    stats: RingStats,
}

impl RingController {
    pub fn new(config: RingConfig) -> Self {
        Self {
            config,
            rings: BTreeMap::new(),
            by_element: HashMap::new(),
            by_observer: HashMap::new(),
            timers: TimerQueue::new(),
            next_handle: 0,
            stats: RingStats::default(),
        }
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }

    pub fn get(&self, handle: RingHandle) -> Option<&OverlayRing> {
        self.rings.get(&handle)
    }

    pub fn handle_for(&self, element: NodeId) -> Option<RingHandle> {
        self.by_element.get(&element).copied()
    }

    /// Live rings in attach order
    pub fn rings(&self) -> impl Iterator<Item = &OverlayRing> {
        self.rings.values()
    }

    /// Earliest pending label reversion
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Bind a ring to `element`. Attaching an element that already has a ring
    /// returns the existing handle.
    pub fn attach(&mut self, doc: &mut Document, element: NodeId) -> Result<RingHandle, RingError> {
        if let Some(existing) = self.by_element.get(&element) {
            return Ok(*existing);
        }
        if doc.element(element).is_none() {
            return Err(DomError::NotAnElement(element).into());
        }

        self.next_handle += 1;
        let handle = RingHandle::new(self.next_handle);

        let layer = overlay_layer(doc)?;
        let surface = doc.create_element("div");
        doc.set_attribute(surface, "class", RING_CLASS)?;
        doc.set_attribute(surface, "data-ring", &handle.0.to_string())?;

        let labels = &self.config.labels;
        let truncation = doc.query(element, &self.config.truncation_marker);

        let mut affordances = Vec::with_capacity(5);
        let mut close_replies = build_button(
            doc,
            surface,
            RingAction::CloseReplies,
            BUTTON_CLASS,
            &labels.close_replies_label,
        )?;
        close_replies.visible = false;
        render_affordance(doc, &close_replies)?;
        affordances.push(close_replies);
        if truncation.is_some() {
            affordances.push(build_button(
                doc,
                surface,
                RingAction::ExpandContent,
                "ts-ring-button secondary",
                &labels.expand_label,
            )?);
        }
        affordances.push(build_button(
            doc,
            surface,
            RingAction::Select,
            "ts-ring-button primary",
            &labels.select_label,
        )?);
        affordances.push(build_button(
            doc,
            surface,
            RingAction::CopyMarkup,
            "ts-ring-button primary",
            &labels.copy_label,
        )?);
        affordances.push(build_button(doc, surface, RingAction::Close, BUTTON_CLASS, CLOSE_LABEL)?);

        doc.append_child(layer, surface)?;

        let mut ring = OverlayRing {
            handle,
            element,
            surface,
            affordances,
            truncation,
            observers: Vec::with_capacity(4),
            position: None,
            on_dismiss: Vec::new(),
        };
        align(doc, &mut ring)?;
        sync_replies(doc, &self.config, &mut ring)?;

        // Observers go last so a failed attach leaves nothing registered
        let watch_root = doc
            .query(doc.root(), &self.config.mutation_root)
            .unwrap_or_else(|| doc.root());
        let body = doc.body();
        ring.observers.push(doc.observe_mutations(watch_root));
        ring.observers.push(doc.observe_resize(body));
        ring.observers.push(doc.observe_resize(element));
        ring.observers.push(doc.observe_intersection(element));

        for id in &ring.observers {
            self.by_observer.insert(*id, handle);
        }
        self.by_element.insert(element, handle);
        self.rings.insert(handle, ring);
        self.stats.attached += 1;
        debug!(ring = %handle, element = %element, "ring attached");
        Ok(handle)
    }

    /// Register cleanup to run when the ring is destroyed. Callbacks fire in
    /// registration order, before the ring's observers are released.
    pub fn on_dismiss(
        &mut self,
        handle: RingHandle,
        callback: impl FnOnce(RingHandle) + 'static,
    ) -> Result<(), RingError> {
        let ring = self
            .rings
            .get_mut(&handle)
            .ok_or(RingError::UnknownRing(handle))?;
        let callback: DismissCallback = Box::new(callback);
        ring.on_dismiss.push(callback);
        Ok(())
    }

    /// Destroy a ring: run dismissal callbacks, release its observers and
    /// pending timers, then remove its overlay nodes. Returns false if the
    /// handle was not attached.
    pub fn detach(&mut self, doc: &mut Document, handle: RingHandle) -> bool {
        let Some(mut ring) = self.rings.remove(&handle) else {
            return false;
        };
        self.by_element.remove(&ring.element);

        for callback in ring.on_dismiss.drain(..) {
            callback(handle);
        }
        for id in &ring.observers {
            doc.disconnect(*id);
            self.by_observer.remove(id);
        }
        self.timers.cancel_where(|(owner, _)| *owner == handle);

        if let Err(err) = doc.remove(ring.surface) {
            warn!(ring = %handle, error = %err, "failed to remove ring surface");
        }
        if self.rings.is_empty()
            && let Some(layer) = doc.find_by_id(OVERLAY_LAYER_ID)
            && let Err(err) = doc.remove(layer)
        {
            warn!(error = %err, "failed to remove overlay layer");
        }

        self.stats.detached += 1;
        debug!(ring = %handle, element = %ring.element, "ring detached");
        true
    }

    /// Detach every ring. Returns how many were removed.
    pub fn detach_all(&mut self, doc: &mut Document) -> usize {
        let handles: Vec<RingHandle> = self.rings.keys().copied().collect();
        handles
            .into_iter()
            .filter(|h| self.detach(doc, *h))
            .count()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a batch of observer notices.
    ///
    /// Notices for observers this controller does not own are ignored, as are
    /// notices for rings already torn down. Redundant work within the batch is
    /// coalesced: each ring realigns at most once. Returns the rings evicted
    /// because their element stopped intersecting the viewport.
    pub fn handle_notices(&mut self, doc: &mut Document, notices: &[Notice]) -> Vec<RingHandle> {
        let mut work: BTreeMap<RingHandle, PendingWork> = BTreeMap::new();
        for notice in notices {
            let Some(handle) = self.by_observer.get(&notice.observer()) else {
                continue;
            };
            let entry = work.entry(*handle).or_default();
            match notice {
                Notice::Mutation { .. } => {
                    entry.realign = true;
                    entry.recheck_replies = true;
                }
                Notice::Resize { .. } => entry.realign = true,
                Notice::Intersection {
                    intersecting: false,
                    ..
                } => entry.evict = true,
                Notice::Intersection { .. } => {}
            }
        }

        let mut evicted = Vec::new();
        for (handle, pending) in work {
            if pending.evict {
                if self.detach(doc, handle) {
                    self.stats.evictions += 1;
                    evicted.push(handle);
                }
                continue;
            }
            if let Err(err) = self.refresh(doc, handle, pending) {
                warn!(ring = %handle, error = %err, "ring update failed");
            }
        }
        evicted
    }

    fn refresh(&mut self, doc: &mut Document, handle: RingHandle, pending: PendingWork) -> Result<(), RingError> {
        let ring = self
            .rings
            .get_mut(&handle)
            .ok_or(RingError::UnknownRing(handle))?;
        if pending.realign && align(doc, ring)? {
            self.stats.realignments += 1;
        }
        if pending.recheck_replies {
            sync_replies(doc, &self.config, ring)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Invoke a button on a ring
    pub fn invoke(
        &mut self,
        doc: &mut Document,
        handle: RingHandle,
        action: RingAction,
        now_ms: u64,
    ) -> Result<RingOutcome, RingError> {
        let ring = self.rings.get(&handle).ok_or(RingError::UnknownRing(handle))?;
        let affordance = ring.affordance(action).ok_or(RingError::Unavailable(action))?;
        if !affordance.visible {
            return Err(RingError::Unavailable(action));
        }
        if !affordance.enabled {
            return Err(RingError::Disabled(action));
        }
        let element = ring.element;

        match action {
            RingAction::Select => {
                self.show_feedback(doc, handle, action, now_ms)?;
                Ok(RingOutcome::Selected(element))
            }
            RingAction::CopyMarkup => {
                let markup = doc.outer_html(element);
                self.show_feedback(doc, handle, action, now_ms)?;
                Ok(RingOutcome::CopyMarkup(markup))
            }
            RingAction::CloseReplies => {
                let marker = doc
                    .query(element, &self.config.replies_marker)
                    .ok_or(RingError::Unavailable(action))?;
                doc.activate(marker)?;
                let ring = self
                    .rings
                    .get_mut(&handle)
                    .ok_or(RingError::UnknownRing(handle))?;
                for affordance in &mut ring.affordances {
                    match affordance.action {
                        RingAction::CloseReplies => affordance.visible = false,
                        a if a.blocked_by_replies() => affordance.enabled = true,
                        _ => continue,
                    }
                    render_affordance(doc, affordance)?;
                }
                Ok(RingOutcome::Activated(marker))
            }
            RingAction::ExpandContent => {
                let ring = self
                    .rings
                    .get_mut(&handle)
                    .ok_or(RingError::UnknownRing(handle))?;
                let target = ring.truncation.ok_or(RingError::Unavailable(action))?;
                doc.activate(target)?;
                if let Some(pos) = ring.affordances.iter().position(|a| a.action == action) {
                    let button = ring.affordances.remove(pos);
                    doc.remove(button.node)?;
                }
                ring.truncation = None;
                Ok(RingOutcome::Activated(target))
            }
            RingAction::Close => {
                self.detach(doc, handle);
                Ok(RingOutcome::Closed)
            }
        }
    }

    fn show_feedback(
        &mut self,
        doc: &mut Document,
        handle: RingHandle,
        action: RingAction,
        now_ms: u64,
    ) -> Result<(), RingError> {
        let Some(label) = self.config.feedback_label(action).map(str::to_string) else {
            return Ok(());
        };
        let ring = self
            .rings
            .get_mut(&handle)
            .ok_or(RingError::UnknownRing(handle))?;
        let affordance = ring
            .affordance_mut(action)
            .ok_or(RingError::Unavailable(action))?;
        if affordance.label != label {
            doc.set_text(affordance.node, &label)?;
            affordance.label = label;
        }
        self.timers
            .schedule((handle, action), now_ms, self.config.labels.feedback_reset_ms);
        Ok(())
    }

    /// Revert feedback labels whose quiet period has elapsed. Returns how many
    /// labels were reverted.
    pub fn tick(&mut self, doc: &mut Document, now_ms: u64) -> usize {
        let mut reverted = 0;
        for (handle, action) in self.timers.due(now_ms) {
            let Some(affordance) = self
                .rings
                .get_mut(&handle)
                .and_then(|r| r.affordance_mut(action))
            else {
                continue;
            };
            if affordance.label != affordance.default_label {
                affordance.label = affordance.default_label.clone();
                if let Err(err) = doc.set_text(affordance.node, &affordance.label) {
                    warn!(ring = %handle, %action, error = %err, "failed to reset label");
                }
            }
            reverted += 1;
        }
        self.stats.reversions += reverted as u64;
        reverted
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DOM helpers
// ─────────────────────────────────────────────────────────────────────────────

fn overlay_layer(doc: &mut Document) -> Result<NodeId, DomError> {
    if let Some(layer) = doc.find_by_id(OVERLAY_LAYER_ID) {
        return Ok(layer);
    }
    let layer = doc.create_element("div");
    doc.set_attribute(layer, "id", OVERLAY_LAYER_ID)?;
    let body = doc.body();
    doc.append_child(body, layer)?;
    Ok(layer)
}

fn build_button(
    doc: &mut Document,
    surface: NodeId,
    action: RingAction,
    class: &str,
    label: &str,
) -> Result<Affordance, DomError> {
    let node = doc.create_element("button");
    doc.set_attribute(node, "class", class)?;
    doc.set_attribute(node, "data-action", action.as_str())?;
    doc.set_text(node, label)?;
    doc.append_child(surface, node)?;
    Ok(Affordance {
        action,
        label: label.to_string(),
        default_label: label.to_string(),
        visible: true,
        enabled: true,
        node,
    })
}

fn render_affordance(doc: &mut Document, affordance: &Affordance) -> Result<(), DomError> {
    doc.toggle_class(affordance.node, "hidden", !affordance.visible)?;
    if affordance.enabled {
        doc.remove_attribute(affordance.node, "disabled")
    } else {
        doc.set_attribute(affordance.node, "disabled", "")
    }
}

/// Move the surface onto the element's current document-space rectangle.
/// Returns false when the element has no client rectangle.
fn align(doc: &mut Document, ring: &mut OverlayRing) -> Result<bool, DomError> {
    let Some(client) = doc.bounding_rect(ring.element) else {
        return Ok(false);
    };
    let viewport = doc.viewport();
    let rect = client.translated(viewport.scroll_y, viewport.scroll_x);
    ring.position = Some(rect);
    doc.set_layout(ring.surface, Some(rect))?;
    Ok(true)
}

/// Show "close replies" only while a replies panel is open under the element,
/// and disable select/copy for as long as it is.
fn sync_replies(doc: &mut Document, config: &RingConfig, ring: &mut OverlayRing) -> Result<(), DomError> {
    let open = doc.query(ring.element, &config.replies_marker).is_some();
    for affordance in &mut ring.affordances {
        let (visible, enabled) = match affordance.action {
            RingAction::CloseReplies => (open, affordance.enabled),
            a if a.blocked_by_replies() => (affordance.visible, !open),
            _ => continue,
        };
        if (visible, enabled) != (affordance.visible, affordance.enabled) {
            affordance.visible = visible;
            affordance.enabled = enabled;
            render_affordance(doc, affordance)?;
        }
    }
    Ok(())
}

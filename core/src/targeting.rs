//! Targeting session
//!
//! Owns selection mode and the rings shown while it is on. The mode flag is
//! private: it changes only through [`TargetingSession::enable`],
//! [`TargetingSession::disable`] and [`TargetingSession::toggle`], which the
//! command relay drives.

use postshot_types::Settings;
use tracing::{debug, warn};

use crate::dom::{Document, NodeId, Notice, ObserverId, Selector, SelectorError};
use crate::geometry::{intersects_viewport, is_visible};
use crate::ring::{RingAction, RingConfig, RingController, RingError, RingHandle, RingOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
}

pub struct TargetingSession {
    state: SessionState,
    item_selector: Selector,
    mutation_root: Selector,
    exit_on_select: bool,
    rings: RingController,
    /// Watches page content while active so new items get rings
    page_observer: Option<ObserverId>,
}

impl TargetingSession {
    pub fn new(settings: &Settings) -> Result<Self, SelectorError> {
        Ok(Self {
            state: SessionState::Idle,
            item_selector: Selector::parse(&settings.targeting.item_selector)?,
            mutation_root: Selector::parse(&settings.targeting.mutation_root)?,
            exit_on_select: settings.targeting.exit_on_select,
            rings: RingController::new(RingConfig::from_settings(settings)?),
            page_observer: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn exit_on_select(&self) -> bool {
        self.exit_on_select
    }

    /// Rings currently shown. Always empty while idle.
    pub fn rings(&self) -> &RingController {
        &self.rings
    }

    /// Tracked elements that currently have a ring
    pub fn tracked(&self) -> Vec<NodeId> {
        self.rings.rings().map(|r| r.element()).collect()
    }

    /// Enter selection mode and ring every visible item. Enabling while
    /// already active re-scans. Returns how many rings were added.
    pub fn enable(&mut self, doc: &mut Document) -> Result<usize, RingError> {
        if self.state == SessionState::Idle {
            let watch_root = doc
                .query(doc.root(), &self.mutation_root)
                .unwrap_or_else(|| doc.root());
            self.page_observer = Some(doc.observe_mutations(watch_root));
            self.state = SessionState::Active;
            debug!("targeting enabled");
        }
        self.rescan(doc)
    }

    /// Leave selection mode, destroying every ring. Returns how many were removed.
    pub fn disable(&mut self, doc: &mut Document) -> usize {
        if let Some(observer) = self.page_observer.take() {
            doc.disconnect(observer);
        }
        let removed = self.rings.detach_all(doc);
        if self.state == SessionState::Active {
            debug!(removed, "targeting disabled");
        }
        self.state = SessionState::Idle;
        removed
    }

    pub fn toggle(&mut self, doc: &mut Document) -> Result<SessionState, RingError> {
        match self.state {
            SessionState::Idle => {
                self.enable(doc)?;
            }
            SessionState::Active => {
                self.disable(doc);
            }
        }
        Ok(self.state)
    }

    /// Attach rings to visible items that lack one. No-op while idle.
    pub fn rescan(&mut self, doc: &mut Document) -> Result<usize, RingError> {
        if self.state == SessionState::Idle {
            return Ok(0);
        }
        let viewport_height = doc.viewport().height;
        let visible: Vec<NodeId> = doc
            .query_all(doc.root(), &self.item_selector)
            .into_iter()
            .filter(|item| {
                // An item only touching the top edge would be evicted on the
                // next pump, so it is not ringed either
                doc.bounding_rect(*item).is_some_and(|r| {
                    is_visible(&r, viewport_height) && intersects_viewport(&r, viewport_height)
                })
            })
            .collect();

        let mut added = 0;
        for item in visible {
            if self.rings.handle_for(item).is_some() {
                continue;
            }
            self.rings.attach(doc, item)?;
            added += 1;
        }
        if added > 0 {
            debug!(added, total = self.rings.len(), "rescan attached rings");
        }
        Ok(added)
    }

    /// Route observer notices: ring notices go to the controller, page
    /// mutations trigger one re-scan per batch. Returns evicted rings.
    pub fn handle_notices(&mut self, doc: &mut Document, notices: &[Notice]) -> Vec<RingHandle> {
        let evicted = self.rings.handle_notices(doc, notices);
        let page_changed = self
            .page_observer
            .is_some_and(|id| notices.iter().any(|n| n.observer() == id));
        if page_changed && let Err(err) = self.rescan(doc) {
            warn!(error = %err, "rescan after page change failed");
        }
        evicted
    }

    /// Register cleanup for a ring
    pub fn on_dismiss(
        &mut self,
        handle: RingHandle,
        callback: impl FnOnce(RingHandle) + 'static,
    ) -> Result<(), RingError> {
        self.rings.on_dismiss(handle, callback)
    }

    /// Invoke a ring button. Selecting an item leaves selection mode when
    /// `exit_on_select` is configured.
    pub fn invoke(
        &mut self,
        doc: &mut Document,
        handle: RingHandle,
        action: RingAction,
        now_ms: u64,
    ) -> Result<RingOutcome, RingError> {
        let outcome = self.rings.invoke(doc, handle, action, now_ms)?;
        if self.exit_on_select && matches!(outcome, RingOutcome::Selected(_)) {
            self.disable(doc);
        }
        Ok(outcome)
    }

    /// Advance ring feedback timers
    pub fn tick(&mut self, doc: &mut Document, now_ms: u64) -> usize {
        self.rings.tick(doc, now_ms)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.rings.next_deadline()
    }
}

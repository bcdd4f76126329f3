//! Page agent
//!
//! Everything that lives inside one page: the live document, selection mode,
//! the presentation panel, the capture pipeline and the inbound relay. The
//! host feeds it messages, observer pumps and ring button presses; the agent
//! turns ring outcomes into captures and clipboard writes.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use postshot_types::Settings;
use tracing::{debug, info, warn};
use url::Url;

use crate::capture::{CaptureError, CaptureSummary, CapturePipeline, Rasterizer};
use crate::dom::{Document, NodeId, SelectorError};
use crate::normalize::ResourceFetcher;
use crate::panel::{Clipboard, ClipboardError, PanelError, PanelRegistry, PresentationPanel};
use crate::relay::{CommandRelay, Delivery, InboundMessage, PageCommand, RelayReply, SenderId};
use crate::ring::{RingAction, RingError, RingHandle, RingOutcome};
use crate::targeting::{SessionState, TargetingSession};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid selector in settings: {0}")]
    Selector(#[from] SelectorError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
    #[error("the page is navigating")]
    Navigating,
}

/// What one pump of observers and timers did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub notices: usize,
    pub evicted: Vec<RingHandle>,
    /// Every ring torn down since the previous pump, evicted or not
    pub dismissed: Vec<RingHandle>,
    pub reverted: usize,
}

pub struct PageAgent<F, R, C> {
    doc: Document,
    session: TargetingSession,
    panels: PanelRegistry,
    pipeline: CapturePipeline<F, R>,
    relay: CommandRelay,
    clipboard: C,
    last_capture: Option<CaptureSummary>,
    hooked: BTreeSet<RingHandle>,
    dismissed: Rc<RefCell<Vec<RingHandle>>>,
}

impl<F, R, C> PageAgent<F, R, C>
where
    F: ResourceFetcher,
    R: Rasterizer,
    C: Clipboard,
{
    /// Load into `doc`. The panel is constructed up front, closed.
    pub fn new(
        mut doc: Document,
        address: Option<Url>,
        settings: &Settings,
        pipeline: CapturePipeline<F, R>,
        clipboard: C,
        own_id: SenderId,
    ) -> Result<Self, AgentError> {
        let session = TargetingSession::new(settings)?;
        let mut panels = PanelRegistry::new(settings.capture.export_filename.clone());
        panels.ensure(&mut doc)?;
        let mut agent = Self {
            doc,
            session,
            panels,
            pipeline,
            relay: CommandRelay::new(own_id),
            clipboard,
            last_capture: None,
            hooked: BTreeSet::new(),
            dismissed: Rc::default(),
        };
        agent.pipeline.set_base_url(address);
        info!("page agent loaded");
        Ok(agent)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Host-side access for scrolling, resizing and page script changes
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn session(&self) -> &TargetingSession {
        &self.session
    }

    pub fn panel(&self) -> Option<&PresentationPanel> {
        self.panels.get()
    }

    pub fn panels(&self) -> &PanelRegistry {
        &self.panels
    }

    pub fn pipeline(&self) -> &CapturePipeline<F, R> {
        &self.pipeline
    }

    pub fn relay(&self) -> &CommandRelay {
        &self.relay
    }

    pub fn clipboard(&self) -> &C {
        &self.clipboard
    }

    pub fn last_capture(&self) -> Option<&CaptureSummary> {
        self.last_capture.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle one raw message. `None` means no reply is sent at all.
    pub fn handle_message(
        &mut self,
        sender: &SenderId,
        json: &str,
    ) -> Result<Option<RelayReply>, AgentError> {
        let message = match InboundMessage::from_json(json) {
            Ok(message) => message,
            Err(_) if sender != self.relay.own_id() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let reply = match self.relay.receive(sender, &message) {
            Delivery::Dropped => return Ok(None),
            Delivery::Ping | Delivery::Queued(_) => RelayReply { success: true },
            Delivery::Apply(command) => match self.apply(command) {
                Ok(()) => RelayReply { success: true },
                Err(err) => {
                    warn!(%command, error = %err, "command failed");
                    RelayReply { success: false }
                }
            },
        };
        Ok(Some(reply))
    }

    /// Apply a command to the current document
    pub fn apply(&mut self, command: PageCommand) -> Result<(), AgentError> {
        if self.relay.is_navigating() {
            return Err(AgentError::Navigating);
        }
        debug!(%command, "applying command");
        match command {
            PageCommand::EnterTargeting => {
                self.close_panel()?;
                self.session.enable(&mut self.doc)?;
            }
            PageCommand::ExitTargeting => {
                self.session.disable(&mut self.doc);
            }
            PageCommand::ToggleTargeting => {
                if self.session.toggle(&mut self.doc)? == SessionState::Active {
                    self.close_panel()?;
                }
            }
            PageCommand::TogglePanel => {
                self.panels.ensure(&mut self.doc)?.toggle(&mut self.doc)?;
            }
        }
        self.hook_rings();
        Ok(())
    }

    fn close_panel(&mut self) -> Result<(), AgentError> {
        if let Some(panel) = self.panels.get_mut() {
            panel.close(&mut self.doc)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observers and timers
    // ─────────────────────────────────────────────────────────────────────────

    /// Deliver pending observer notices, then fire due timers
    pub fn pump(&mut self, now_ms: u64) -> PumpReport {
        let notices = self.doc.take_notices();
        let evicted = if notices.is_empty() {
            Vec::new()
        } else {
            self.session.handle_notices(&mut self.doc, &notices)
        };
        let reverted = self.session.tick(&mut self.doc, now_ms);
        self.hook_rings();
        PumpReport {
            notices: notices.len(),
            evicted,
            dismissed: self.drain_dismissed(),
            reverted,
        }
    }

    /// Register a dismissal hook on every ring attached since the last call
    fn hook_rings(&mut self) {
        let fresh: Vec<RingHandle> = self
            .session
            .rings()
            .rings()
            .map(|ring| ring.handle())
            .filter(|handle| !self.hooked.contains(handle))
            .collect();
        for handle in fresh {
            let sink = Rc::clone(&self.dismissed);
            match self
                .session
                .on_dismiss(handle, move |gone| sink.borrow_mut().push(gone))
            {
                Ok(()) => {
                    self.hooked.insert(handle);
                }
                Err(err) => warn!(ring = %handle, error = %err, "could not hook ring"),
            }
        }
    }

    fn drain_dismissed(&mut self) -> Vec<RingHandle> {
        let dismissed: Vec<RingHandle> = self.dismissed.borrow_mut().drain(..).collect();
        for handle in &dismissed {
            self.hooked.remove(handle);
        }
        if !dismissed.is_empty() {
            debug!(count = dismissed.len(), "rings dismissed");
        }
        dismissed
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.session.next_deadline()
    }

    /// Page controls the agent clicked since the last call
    pub fn take_activations(&mut self) -> Vec<NodeId> {
        self.doc.take_activations()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ring actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Press a ring button and carry out what it asks for
    pub async fn invoke(
        &mut self,
        handle: RingHandle,
        action: RingAction,
        now_ms: u64,
    ) -> Result<RingOutcome, AgentError> {
        let outcome = self.session.invoke(&mut self.doc, handle, action, now_ms)?;
        match &outcome {
            RingOutcome::Selected(element) => {
                self.capture(*element).await?;
            }
            RingOutcome::CopyMarkup(markup) => {
                self.clipboard.write_text(markup)?;
            }
            RingOutcome::Activated(_) | RingOutcome::Closed => {}
        }
        Ok(outcome)
    }

    /// Open the panel and capture `element` into it
    pub async fn capture(&mut self, element: NodeId) -> Result<CaptureSummary, AgentError> {
        let panel = self.panels.ensure(&mut self.doc)?;
        panel.open(&mut self.doc)?;
        let summary = self.pipeline.run(&mut self.doc, panel, element).await?;
        self.last_capture = Some(summary);
        Ok(summary)
    }

    /// Save the displayed bitmap under `dir`
    pub fn save_output(&self, dir: &Path) -> Result<PathBuf, AgentError> {
        let panel = self.panels.get().ok_or(PanelError::NoOutput)?;
        Ok(panel.save(dir)?)
    }

    /// Copy the displayed bitmap to the clipboard as an image
    pub fn copy_output(&mut self) -> Result<usize, AgentError> {
        let panel = self.panels.get().ok_or(PanelError::NoOutput)?;
        Ok(panel.copy(&mut self.clipboard)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Navigation
    // ─────────────────────────────────────────────────────────────────────────

    /// The page is unloading. Rings come down now; commands are held.
    pub fn begin_navigation(&mut self) {
        self.session.disable(&mut self.doc);
        self.relay.begin_navigation();
    }

    /// Swap in the newly loaded document and replay held commands in order.
    /// Returns how many were applied successfully.
    pub fn complete_navigation(
        &mut self,
        doc: Document,
        address: Option<Url>,
    ) -> Result<usize, AgentError> {
        self.session.disable(&mut self.doc);
        self.panels.reset();
        self.doc = doc;
        self.pipeline.set_base_url(address);
        self.last_capture = None;
        self.panels.ensure(&mut self.doc)?;

        let mut applied = 0;
        for command in self.relay.complete_navigation() {
            match self.apply(command) {
                Ok(()) => applied += 1,
                Err(err) => warn!(%command, error = %err, "queued command failed"),
            }
        }
        info!(applied, "navigation complete");
        Ok(applied)
    }
}

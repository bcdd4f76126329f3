//! Overlay rings
//!
//! A ring is the floating control surface bound to one tracked page item.
//! [`RingController`] owns every live ring, keeps each one aligned with its
//! item through passive observers, and tears rings down without leaving
//! observers, timers or overlay nodes behind.

mod controller;

#[cfg(test)]
mod controller_tests;

use std::fmt;

use crate::dom::{DomError, NodeId, ObserverId};
use crate::geometry::Rect;

pub use controller::{OVERLAY_LAYER_ID, RING_CLASS, RingConfig, RingController, RingStats};

/// Identifier of one attached ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RingHandle(u64);

impl RingHandle {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring#{}", self.0)
    }
}

/// Buttons a ring can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RingAction {
    CloseReplies,
    ExpandContent,
    Select,
    CopyMarkup,
    Close,
}

impl RingAction {
    /// Value of the button's `data-action` attribute
    pub fn as_str(self) -> &'static str {
        match self {
            RingAction::CloseReplies => "close-replies",
            RingAction::ExpandContent => "expand-content",
            RingAction::Select => "select",
            RingAction::CopyMarkup => "copy-markup",
            RingAction::Close => "close",
        }
    }

    /// Actions that show transient label feedback after being invoked
    pub fn has_feedback(self) -> bool {
        matches!(self, RingAction::Select | RingAction::CopyMarkup)
    }

    /// Actions disabled while the replies panel is open
    fn blocked_by_replies(self) -> bool {
        matches!(self, RingAction::Select | RingAction::CopyMarkup)
    }
}

impl fmt::Display for RingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RingAction {
    type Err = RingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "close-replies" => Ok(RingAction::CloseReplies),
            "expand-content" => Ok(RingAction::ExpandContent),
            "select" => Ok(RingAction::Select),
            "copy-markup" | "copy" => Ok(RingAction::CopyMarkup),
            "close" => Ok(RingAction::Close),
            other => Err(RingError::UnknownAction(other.to_string())),
        }
    }
}

/// What invoking a ring action asks the host to do next
#[derive(Debug, Clone, PartialEq)]
pub enum RingOutcome {
    /// Start a capture of this live element
    Selected(NodeId),
    /// Write this markup to the text clipboard
    CopyMarkup(String),
    /// A page control was activated (click recorded on the document)
    Activated(NodeId),
    /// The ring was closed
    Closed,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RingError {
    #[error("{0} is not attached")]
    UnknownRing(RingHandle),
    #[error("`{0}` is not available on this ring")]
    Unavailable(RingAction),
    #[error("`{0}` is disabled while replies are open")]
    Disabled(RingAction),
    #[error("unknown ring action `{0}`")]
    UnknownAction(String),
    #[error(transparent)]
    Dom(#[from] DomError),
}

/// One button on a ring
#[derive(Debug, Clone, PartialEq)]
pub struct Affordance {
    pub action: RingAction,
    pub label: String,
    pub default_label: String,
    pub visible: bool,
    pub enabled: bool,
    node: NodeId,
}

impl Affordance {
    pub fn node(&self) -> NodeId {
        self.node
    }
}

/// Cleanup hook run when a ring is destroyed
pub type DismissCallback = Box<dyn FnOnce(RingHandle)>;

/// A live ring
pub struct OverlayRing {
    handle: RingHandle,
    element: NodeId,
    surface: NodeId,
    affordances: Vec<Affordance>,
    /// Truncation control found inside the element at attach time
    truncation: Option<NodeId>,
    observers: Vec<ObserverId>,
    position: Option<Rect>,
    on_dismiss: Vec<DismissCallback>,
}

impl fmt::Debug for OverlayRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayRing")
            .field("handle", &self.handle)
            .field("element", &self.element)
            .field("position", &self.position)
            .field("affordances", &self.affordances)
            .field("observers", &self.observers.len())
            .field("on_dismiss", &self.on_dismiss.len())
            .finish()
    }
}

impl OverlayRing {
    pub fn handle(&self) -> RingHandle {
        self.handle
    }

    /// The tracked live element
    pub fn element(&self) -> NodeId {
        self.element
    }

    /// The `div.ts-ring-selector` node in the overlay layer
    pub fn surface(&self) -> NodeId {
        self.surface
    }

    /// Document-space rectangle the ring was last aligned to
    pub fn position(&self) -> Option<Rect> {
        self.position
    }

    pub fn affordances(&self) -> &[Affordance] {
        &self.affordances
    }

    pub fn affordance(&self, action: RingAction) -> Option<&Affordance> {
        self.affordances.iter().find(|a| a.action == action)
    }

    fn affordance_mut(&mut self, action: RingAction) -> Option<&mut Affordance> {
        self.affordances.iter_mut().find(|a| a.action == action)
    }

    /// Whether `action` is currently shown and clickable
    pub fn is_available(&self, action: RingAction) -> bool {
        self.affordance(action).is_some_and(|a| a.visible && a.enabled)
    }
}

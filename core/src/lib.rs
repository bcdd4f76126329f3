pub mod agent;
pub mod capture;
pub mod config;
pub mod control;
pub mod dom;
pub mod geometry;
pub mod normalize;
pub mod panel;
pub mod relay;
pub mod ring;
pub mod targeting;
pub mod timer;


// Re-exports for convenience
pub use agent::{AgentError, PageAgent, PumpReport};
pub use capture::{
    Bitmap, CaptureError, CapturePhase, CapturePipeline, CaptureSummary, Progress, ProgressSlot,
    RasterError, Rasterizer,
};
pub use config::ConfigError;
pub use control::{
    ConnectionStatus, ControlAction, ControlError, ControlIntent, ControlSurface, HostKind,
    PageChannel,
};
pub use dom::{Document, DomError, NodeId, NodeSpec, PageSpec, Selector, SelectorError};
pub use geometry::{Rect, Viewport, is_visible};
pub use normalize::{BlobStore, FetchError, NormalizeReport, Resource, ResourceFetcher};
pub use panel::{
    Clipboard, ClipboardError, MemoryClipboard, PanelError, PanelRegistry, PanelStatus,
    PresentationPanel,
};
pub use relay::{CommandRelay, Delivery, InboundMessage, PageCommand, RelayReply, SenderId};
pub use ring::{RingAction, RingError, RingHandle, RingOutcome};
pub use targeting::{SessionState, TargetingSession};
pub use timer::TimerQueue;

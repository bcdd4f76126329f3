//! Control surface
//!
//! The out-of-page side of the tool: decides whether the active address is a
//! page we can talk to, pings for a listening page agent, and turns button
//! presses into relayed commands or a navigation to the canonical address.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use postshot_types::ControlSettings;
use tracing::{debug, info, warn};
use url::Url;

use crate::relay::{InboundMessage, PageCommand, RelayReply};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("invalid address: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("`{0}` is not a custom-subdomain blog address")]
    NotStyled(String),
    #[error("{0} is not available in the current state")]
    Unavailable(ControlAction),
    #[error("page channel failed: {0}")]
    Channel(String),
    #[error("no reply from the page within {0} ms")]
    Timeout(u64),
}

// ─────────────────────────────────────────────────────────────────────────────
// Address classification
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    /// Not a site we support
    Unsupported,
    /// `<blog>.<domain>.com`, rendered with the blog's own theme
    StyledBlog { blog: String },
    /// The canonical dashboard host
    Canonical,
}

fn host_labels(url: &Url) -> Vec<&str> {
    url.host_str()
        .map(|h| h.split('.').collect())
        .unwrap_or_default()
}

/// Classify an address by its host labels
pub fn classify(url: &Url, settings: &ControlSettings) -> HostKind {
    let labels = host_labels(url);
    if labels.get(1).copied() != Some(settings.supported_domain.as_str()) {
        return HostKind::Unsupported;
    }
    let canonical_label = settings.canonical_host.split('.').next().unwrap_or("www");
    match labels.first() {
        Some(&first) if first != canonical_label => HostKind::StyledBlog {
            blog: first.to_string(),
        },
        _ => HostKind::Canonical,
    }
}

/// Rewrite a custom-subdomain address onto the canonical host, moving the
/// blog label to the front of the path.
///
/// `https://myblog.tumblr.com/post/123` becomes
/// `https://www.tumblr.com/myblog/post/123`.
pub fn canonical_url(address: &str, settings: &ControlSettings) -> Result<Url, ControlError> {
    let mut url = Url::parse(address)?;
    let HostKind::StyledBlog { blog } = classify(&url, settings) else {
        return Err(ControlError::NotStyled(address.to_string()));
    };
    let rest = url.path().trim_start_matches('/');
    let path = if rest.is_empty() {
        format!("/{blog}")
    } else {
        format!("/{blog}/{rest}")
    };
    url.set_host(Some(&settings.canonical_host))?;
    url.set_path(&path);
    Ok(url)
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Invalid,
    Styled,
    Checking,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    /// Status line shown on the control surface
    pub fn text(self) -> &'static str {
        match self {
            ConnectionStatus::Invalid => "Invalid website!",
            ConnectionStatus::Styled => "styled blog, must unstyle",
            ConnectionStatus::Checking => "Checking Connection...",
            ConnectionStatus::Connected => "Connected!",
            ConnectionStatus::Disconnected => "Disconnected...",
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, ConnectionStatus::Invalid | ConnectionStatus::Disconnected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    ScanPosts,
    TogglePanel,
    Unstyle,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::ScanPosts => "scan-posts",
            ControlAction::TogglePanel => "toggle-panel",
            ControlAction::Unstyle => "unstyle-blog",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What pressing a control does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlIntent {
    Relay(PageCommand),
    Navigate(Url),
}

// ─────────────────────────────────────────────────────────────────────────────
// Surface
// ─────────────────────────────────────────────────────────────────────────────

/// Delivers one message to the page agent of the active tab and awaits its reply
#[async_trait(?Send)]
pub trait PageChannel {
    async fn send(&self, message: &InboundMessage) -> Result<RelayReply, ControlError>;
}

pub struct ControlSurface<C> {
    channel: C,
    settings: ControlSettings,
    address: Option<Url>,
    host: HostKind,
    status: ConnectionStatus,
    navigating: bool,
}

impl<C: PageChannel> ControlSurface<C> {
    pub fn new(channel: C, settings: ControlSettings) -> Self {
        Self {
            channel,
            settings,
            address: None,
            host: HostKind::Unsupported,
            status: ConnectionStatus::Invalid,
            navigating: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn host(&self) -> &HostKind {
        &self.host
    }

    pub fn address(&self) -> Option<&Url> {
        self.address.as_ref()
    }

    pub fn is_navigating(&self) -> bool {
        self.navigating
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Extra explanation shown under the status line, if any
    pub fn alert(&self) -> Option<String> {
        (self.status == ConnectionStatus::Invalid)
            .then(|| format!("This is not {}", capitalize(&self.settings.supported_domain)))
    }

    /// Controls the user can press right now
    pub fn actions(&self) -> Vec<ControlAction> {
        match self.status {
            ConnectionStatus::Connected => vec![ControlAction::ScanPosts, ControlAction::TogglePanel],
            ConnectionStatus::Styled => vec![ControlAction::Unstyle],
            _ => Vec::new(),
        }
    }

    /// The active tab's address changed; a load is in flight
    pub fn on_address_changed(&mut self) {
        self.navigating = true;
    }

    /// The active tab finished loading `address`; ping again
    pub async fn on_navigation_complete(&mut self, address: &str) -> ConnectionStatus {
        self.navigating = false;
        self.check_connection(address).await
    }

    /// Classify `address` and, on a canonical host, ping the page agent.
    /// Ignored while a navigation is in flight.
    pub async fn check_connection(&mut self, address: &str) -> ConnectionStatus {
        if self.navigating {
            debug!(address, "navigation in flight, skipping connection check");
            return self.status;
        }
        let url = match Url::parse(address) {
            Ok(url) => url,
            Err(err) => {
                warn!(address, error = %err, "unparseable address");
                self.address = None;
                self.host = HostKind::Unsupported;
                self.status = ConnectionStatus::Invalid;
                return self.status;
            }
        };
        self.host = classify(&url, &self.settings);
        self.address = Some(url);
        self.status = match self.host {
            HostKind::Unsupported => ConnectionStatus::Invalid,
            HostKind::StyledBlog { .. } => ConnectionStatus::Styled,
            HostKind::Canonical => {
                self.status = ConnectionStatus::Checking;
                match self.request(&InboundMessage::ping()).await {
                    Ok(reply) if reply.success => ConnectionStatus::Connected,
                    Ok(_) => ConnectionStatus::Disconnected,
                    Err(err) => {
                        info!(error = %err, "page agent did not answer");
                        ConnectionStatus::Disconnected
                    }
                }
            }
        };
        self.status
    }

    /// Resolve a pressed control into what it does
    pub fn intent(&self, action: ControlAction) -> Result<ControlIntent, ControlError> {
        if !self.actions().contains(&action) {
            return Err(ControlError::Unavailable(action));
        }
        match action {
            ControlAction::ScanPosts => Ok(ControlIntent::Relay(PageCommand::EnterTargeting)),
            ControlAction::TogglePanel => Ok(ControlIntent::Relay(PageCommand::TogglePanel)),
            ControlAction::Unstyle => {
                let address = self
                    .address
                    .as_ref()
                    .ok_or(ControlError::Unavailable(action))?;
                Ok(ControlIntent::Navigate(canonical_url(
                    address.as_str(),
                    &self.settings,
                )?))
            }
        }
    }

    /// Relay `command` to the page and await its acknowledgement
    pub async fn send_command(&self, command: PageCommand) -> Result<bool, ControlError> {
        let reply = self.request(&InboundMessage::command(command)).await?;
        Ok(reply.success)
    }

    async fn request(&self, message: &InboundMessage) -> Result<RelayReply, ControlError> {
        let limit = self.settings.ping_timeout_ms;
        tokio::time::timeout(Duration::from_millis(limit), self.channel.send(message))
            .await
            .map_err(|_| ControlError::Timeout(limit))?
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

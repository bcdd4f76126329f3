//! Browser stand-in
//!
//! Plays the parts a browser would: one tab holding a page agent, a control
//! surface talking to it over the runtime message channel, a clock for ring
//! feedback and the scroll/resize events the page receives.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use async_trait::async_trait;
use postshot_core::{
    CapturePipeline, ConnectionStatus, ControlAction, ControlError, ControlIntent, ControlSurface,
    Document, InboundMessage, PageAgent, PageChannel, PageCommand, PageSpec, PumpReport,
    RelayReply, RingAction, RingHandle, SenderId,
};
use postshot_render::SkiaRasterizer;
use postshot_types::Settings;
use postshot_types::formatting::truncate_label;
use tracing::{debug, info};
use url::Url;

use crate::clipboard::FileClipboard;
use crate::fetch::FsFetcher;

pub type Agent = PageAgent<FsFetcher, SkiaRasterizer, FileClipboard>;

/// Sender identity of our own extension
pub const EXTENSION_ID: &str = "postshot";

/// Read a page fixture
pub fn read_page(path: &Path) -> Result<Document, String> {
    let json = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let spec = PageSpec::from_json(&json).map_err(|e| format!("{}: {e}", path.display()))?;
    spec.build().map_err(|e| e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Message channel
// ─────────────────────────────────────────────────────────────────────────────

/// The active tab's page agent; empty while nothing is loaded
#[derive(Clone, Default)]
pub struct AgentSlot(Rc<RefCell<Option<Agent>>>);

impl AgentSlot {
    fn put(&self, agent: Agent) {
        *self.0.borrow_mut() = Some(agent);
    }

    fn take(&self) -> Option<Agent> {
        self.0.borrow_mut().take()
    }

    /// Run `f` against the loaded agent
    pub fn with<T>(&self, f: impl FnOnce(&mut Agent) -> T) -> Option<T> {
        self.0.borrow_mut().as_mut().map(f)
    }
}

/// Delivers control-surface messages to whatever agent the tab holds
pub struct TabChannel {
    slot: AgentSlot,
    sender: SenderId,
}

#[async_trait(?Send)]
impl PageChannel for TabChannel {
    async fn send(&self, message: &InboundMessage) -> Result<RelayReply, ControlError> {
        let json = message.to_json();
        let reply = self
            .slot
            .with(|agent| agent.handle_message(&self.sender, &json))
            .ok_or_else(|| ControlError::Channel("no receiving end".into()))?
            .map_err(|e| ControlError::Channel(e.to_string()))?;
        reply.ok_or_else(|| ControlError::Channel("message dropped".into()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host
// ─────────────────────────────────────────────────────────────────────────────

pub struct Host {
    settings: Settings,
    assets: PathBuf,
    clipboard_dir: PathBuf,
    slot: AgentSlot,
    control: ControlSurface<TabChannel>,
    address: String,
    page: Option<PathBuf>,
    now_ms: u64,
}

impl Host {
    pub fn new(settings: Settings, assets: PathBuf, clipboard_dir: PathBuf) -> Self {
        let slot = AgentSlot::default();
        let channel = TabChannel {
            slot: slot.clone(),
            sender: SenderId::new(EXTENSION_ID),
        };
        let control = ControlSurface::new(channel, settings.control.clone());
        Self {
            settings,
            assets,
            clipboard_dir,
            slot,
            control,
            address: String::new(),
            page: None,
            now_ms: 0,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn control(&self) -> &ControlSurface<TabChannel> {
        &self.control
    }

    /// Run `f` against the loaded agent
    pub fn with_agent<T>(&self, f: impl FnOnce(&mut Agent) -> T) -> Result<T, String> {
        self.slot.with(f).ok_or_else(|| "no page loaded".to_string())
    }

    /// Navigate the tab to `address`, serving `page` as its content. Commands
    /// sent while the load is in flight are replayed on the new page.
    pub async fn navigate(&mut self, page: &Path, address: &str) -> Result<ConnectionStatus, String> {
        self.control.on_address_changed();
        self.slot.with(|agent| agent.begin_navigation());

        let doc = read_page(page)?;
        let url = Url::parse(address).ok();
        match self.slot.take() {
            Some(mut agent) => {
                let replayed = agent.complete_navigation(doc, url).map_err(|e| e.to_string())?;
                debug!(replayed, "replayed queued commands");
                self.slot.put(agent);
            }
            None => {
                let pipeline = CapturePipeline::new(
                    FsFetcher::new(&self.assets),
                    SkiaRasterizer::from_settings(&self.settings.capture),
                    self.settings.capture.clone(),
                );
                let agent = PageAgent::new(
                    doc,
                    url,
                    &self.settings,
                    pipeline,
                    FileClipboard::new(&self.clipboard_dir),
                    SenderId::new(EXTENSION_ID),
                )
                .map_err(|e| e.to_string())?;
                self.slot.put(agent);
            }
        }
        self.address = address.to_string();
        self.page = Some(page.to_path_buf());
        info!(address, page = %page.display(), "page loaded");
        Ok(self.control.on_navigation_complete(address).await)
    }

    /// Point the tab at `address` without loading anything and ping it
    pub async fn check(&mut self, address: &str) -> ConnectionStatus {
        self.address = address.to_string();
        self.status().await
    }

    /// Ping the tab again
    pub async fn status(&mut self) -> ConnectionStatus {
        let address = self.address.clone();
        self.control.check_connection(&address).await
    }

    /// Press a control-surface button
    pub async fn press_control(&mut self, action: ControlAction) -> Result<String, String> {
        match self.control.intent(action).map_err(|e| e.to_string())? {
            ControlIntent::Relay(command) => self.send(command).await,
            ControlIntent::Navigate(url) => {
                let page = self.page.clone().ok_or("no page loaded")?;
                let status = self.navigate(&page, url.as_str()).await?;
                Ok(format!("navigated to {url} ({status})"))
            }
        }
    }

    /// Relay a command from the control surface and wait for the acknowledgement
    pub async fn send(&mut self, command: PageCommand) -> Result<String, String> {
        let acknowledged = self
            .control
            .send_command(command)
            .await
            .map_err(|e| e.to_string())?;
        self.pump();
        Ok(format!("{command}: success={acknowledged}"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Page events
    // ─────────────────────────────────────────────────────────────────────────

    pub fn pump(&mut self) -> PumpReport {
        let now = self.now_ms;
        self.slot.with(|agent| agent.pump(now)).unwrap_or_default()
    }

    pub fn advance(&mut self, ms: u64) -> PumpReport {
        self.now_ms += ms;
        self.pump()
    }

    pub fn scroll_by(&mut self, dy: f64) -> Result<PumpReport, String> {
        self.with_agent(|agent| agent.document_mut().scroll_by(dy))?;
        Ok(self.pump())
    }

    pub fn resize(&mut self, width: f64, height: f64) -> Result<PumpReport, String> {
        self.with_agent(|agent| agent.document_mut().resize_viewport(width, height))?;
        Ok(self.pump())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rings
    // ─────────────────────────────────────────────────────────────────────────

    /// One line per ring: index, element id, position and buttons
    pub fn describe_rings(&self) -> Result<Vec<String>, String> {
        self.with_agent(|agent| {
            let doc = agent.document();
            agent
                .session()
                .rings()
                .rings()
                .enumerate()
                .map(|(i, ring)| {
                    let id = doc.attribute(ring.element(), "id").unwrap_or("-");
                    let preview = truncate_label(doc.text_content(ring.element()).trim(), 24);
                    let position = ring
                        .position()
                        .map(|r| format!("{:.0},{:.0} {:.0}x{:.0}", r.left, r.top, r.width, r.height))
                        .unwrap_or_else(|| "unplaced".to_string());
                    let buttons: Vec<String> = ring
                        .affordances()
                        .iter()
                        .filter(|a| a.visible)
                        .map(|a| {
                            let state = if a.enabled { "" } else { " (disabled)" };
                            format!("{}[{}]{state}", a.action, a.label)
                        })
                        .collect();
                    format!(
                        "{} {} #{id} \"{preview}\" @ {position}: {}",
                        i + 1,
                        ring.handle(),
                        buttons.join(" ")
                    )
                })
                .collect()
        })
    }

    /// Find a ring by 1-based listing index or by its element's id
    pub fn find_ring(&self, key: &str) -> Result<RingHandle, String> {
        self.with_agent(|agent| {
            let doc = agent.document();
            let rings = agent.session().rings();
            match key.parse::<usize>() {
                Ok(index) => rings.rings().nth(index.saturating_sub(1)).map(|r| r.handle()),
                Err(_) => doc
                    .find_by_id(key.trim_start_matches('#'))
                    .and_then(|element| rings.handle_for(element)),
            }
        })?
        .ok_or_else(|| format!("no ring `{key}`"))
    }

    /// Press a ring button
    pub async fn press(&mut self, key: &str, action: RingAction) -> Result<String, String> {
        let handle = self.find_ring(key)?;
        let mut agent = self.slot.take().ok_or("no page loaded")?;
        let result = agent.invoke(handle, action, self.now_ms).await;
        let activations = agent.take_activations().len();
        let summary = agent.last_capture().copied();
        self.slot.put(agent);
        let report = self.pump();

        let outcome = result.map_err(|e| e.to_string())?;
        let mut message = format!("{handle} {action}: {outcome:?}");
        if activations > 0 {
            message.push_str(&format!(", clicked {activations} page control(s)"));
        }
        if !report.dismissed.is_empty() {
            message.push_str(&format!(", {} ring(s) dismissed", report.dismissed.len()));
        }
        if action == RingAction::Select
            && let Some(summary) = summary
        {
            message.push_str(&format!(
                ", captured {}x{} ({} image(s) resolved, {} failed)",
                summary.width,
                summary.height,
                summary.normalize.images_resolved,
                summary.normalize.images_failed
            ));
        }
        Ok(message)
    }

    /// Make sure `element_id` is on screen and ringed, returning its ring
    pub fn target(&mut self, element_id: &str) -> Result<RingHandle, String> {
        let top = self.with_agent(|agent| {
            let doc = agent.document();
            doc.find_by_id(element_id)
                .ok_or_else(|| format!("no element #{element_id}"))
                .and_then(|node| {
                    doc.layout_rect(node)
                        .map(|r| r.top)
                        .ok_or_else(|| format!("#{element_id} is not laid out"))
                })
        })??;
        self.with_agent(|agent| {
            agent.document_mut().scroll_to(0.0, top);
            agent.apply(PageCommand::EnterTargeting)
        })?
        .map_err(|e| e.to_string())?;
        self.pump();
        self.find_ring(element_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Export
    // ─────────────────────────────────────────────────────────────────────────

    pub fn save(&self, dir: &Path) -> Result<PathBuf, String> {
        self.with_agent(|agent| agent.save_output(dir))?
            .map_err(|e| e.to_string())
    }

    pub fn copy(&self) -> Result<usize, String> {
        self.with_agent(|agent| agent.copy_output())?
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use postshot_core::PanelStatus;

    use super::*;

    const PAGE: &str = r#"{
        "viewport": { "width": 800, "height": 600 },
        "body": [
            { "tag": "div", "attrs": { "id": "root" }, "children": [
                { "tag": "div", "attrs": { "id": "base-container" }, "children": [
                    { "tag": "article", "attrs": { "id": "p1", "style": "background: #eeeeff" },
                      "rect": { "top": 0, "left": 0, "width": 300, "height": 200 },
                      "text": "first post" },
                    { "tag": "article", "attrs": { "id": "p2" },
                      "rect": { "top": 900, "left": 0, "width": 300, "height": 200 },
                      "text": "second post" }
                ]}
            ]}
        ]
    }"#;

    fn host(dir: &Path) -> (Host, PathBuf) {
        let page = dir.join("page.json");
        fs::write(&page, PAGE).unwrap();
        let host = Host::new(Settings::default(), dir.to_path_buf(), dir.join("clip"));
        (host, page)
    }

    #[tokio::test]
    async fn control_surface_drives_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let (mut host, page) = host(dir.path());

        assert_eq!(host.status().await, ConnectionStatus::Invalid);
        let status = host
            .navigate(&page, "https://www.tumblr.com/dashboard")
            .await
            .unwrap();
        assert_eq!(status, ConnectionStatus::Connected);

        host.press_control(ControlAction::ScanPosts).await.unwrap();
        assert_eq!(host.describe_rings().unwrap().len(), 1);

        let message = host.press("p1", RingAction::Select).await.unwrap();
        assert!(message.contains("captured 300x200"), "{message}");
        let ready = host
            .with_agent(|agent| agent.panel().map(|p| p.status().clone()))
            .unwrap();
        assert_eq!(ready, Some(PanelStatus::Ready));

        let closed = host.press("1", RingAction::Close).await.unwrap();
        assert!(closed.ends_with("1 ring(s) dismissed"), "{closed}");

        let saved = host.save(dir.path()).unwrap();
        assert!(saved.exists());
        assert!(host.copy().unwrap() > 0);
        assert!(dir.path().join("clip").join("clipboard.png").exists());
    }

    #[tokio::test]
    async fn empty_tab_reports_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut host, _) = host(dir.path());

        let status = host.check("https://www.tumblr.com/dashboard").await;
        assert_eq!(status, ConnectionStatus::Disconnected);
        assert_eq!(
            host.check("https://example.com/").await,
            ConnectionStatus::Invalid
        );
        assert_eq!(host.control().alert().as_deref(), Some("This is not Tumblr"));
        assert!(host.describe_rings().is_err());
    }

    #[tokio::test]
    async fn styled_blog_unstyles_onto_canonical_host() {
        let dir = tempfile::tempdir().unwrap();
        let (mut host, page) = host(dir.path());

        let status = host
            .navigate(&page, "https://myblog.tumblr.com/post/123")
            .await
            .unwrap();
        assert_eq!(status, ConnectionStatus::Styled);
        assert!(host.press_control(ControlAction::ScanPosts).await.is_err());

        host.press_control(ControlAction::Unstyle).await.unwrap();
        assert_eq!(host.address(), "https://www.tumblr.com/myblog/post/123");
        assert_eq!(host.control().status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn targeting_scrolls_items_into_view() {
        let dir = tempfile::tempdir().unwrap();
        let (mut host, page) = host(dir.path());
        host.navigate(&page, "https://www.tumblr.com/dashboard")
            .await
            .unwrap();

        let handle = host.target("p2").unwrap();
        assert_eq!(host.find_ring("p2").unwrap(), handle);
        assert!(host.target("missing").is_err());
    }
}

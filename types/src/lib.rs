//! Shared configuration types for postshot.
//!
//! Every section deserializes with defaults for missing fields, so a partial
//! TOML file (or none at all) yields a working configuration.

pub mod formatting;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────────────────────────────────────

/// Complete application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub targeting: TargetingSettings,
    pub ring: RingSettings,
    pub capture: CaptureSettings,
    pub control: ControlSettings,
}

// ─────────────────────────────────────────────────────────────────────────────
// Targeting
// ─────────────────────────────────────────────────────────────────────────────

/// Where page items live and which markers drive the conditional affordances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingSettings {
    /// Selector matching every capturable item on the page
    pub item_selector: String,
    /// Selector for the subtree whose mutations trigger ring realignment.
    /// Falls back to the document root when nothing matches.
    pub mutation_root: String,
    /// Selector that matches an expanded replies/notes panel inside an item
    pub replies_marker: String,
    /// Selector that matches a "keep reading" truncation affordance
    pub truncation_marker: String,
    /// Leave targeting mode after the user selects an item
    pub exit_on_select: bool,
}

impl Default for TargetingSettings {
    fn default() -> Self {
        Self {
            item_selector: "#base-container article".to_string(),
            mutation_root: "#root".to_string(),
            replies_marker: "div.ePsyd".to_string(),
            truncation_marker: "[aria-label=\"Keep reading\"]".to_string(),
            exit_on_select: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ring
// ─────────────────────────────────────────────────────────────────────────────

/// Overlay ring labels and feedback timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSettings {
    /// Quiet period before a feedback label reverts, measured from the last invocation
    pub feedback_reset_ms: u64,
    pub select_label: String,
    pub selected_label: String,
    pub copy_label: String,
    pub copied_label: String,
    pub close_replies_label: String,
    pub expand_label: String,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            feedback_reset_ms: 750,
            select_label: "Select".to_string(),
            selected_label: "Selected!".to_string(),
            copy_label: "Copy HTML".to_string(),
            copied_label: "Copied HTML!".to_string(),
            close_replies_label: "Close Notes".to_string(),
            expand_label: "Expand Post".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture
// ─────────────────────────────────────────────────────────────────────────────

/// Which candidate of a multi-resolution image gets fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSelection {
    /// Largest candidate
    Highest,
    /// One step below the largest; bounds payload size while staying sharp
    #[default]
    SecondHighest,
    /// Smallest candidate
    Lowest,
}

/// Capture pipeline and export options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub source_selection: SourceSelection,
    /// chrono format string used to freeze `<time>` elements
    pub timestamp_format: String,
    /// File name used by the save-as-file export
    pub export_filename: String,
    /// Device pixels per layout pixel in the output bitmap
    pub pixel_ratio: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source_selection: SourceSelection::SecondHighest,
            timestamp_format: "%b %-d, %Y".to_string(),
            export_filename: "post.png".to_string(),
            pixel_ratio: 1.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Control surface
// ─────────────────────────────────────────────────────────────────────────────

/// Host recognition and connectivity probing for the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Second host label identifying a supported site (`<blog>.tumblr.com`)
    pub supported_domain: String,
    /// Host that styled custom-subdomain blogs get rewritten to
    pub canonical_host: String,
    /// How long to wait for a page-context listener before reporting "disconnected"
    pub ping_timeout_ms: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            supported_domain: "tumblr".to_string(),
            canonical_host: "www.tumblr.com".to_string(),
            ping_timeout_ms: 1000,
        }
    }
}

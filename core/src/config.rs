//! Settings files
//!
//! An explicit TOML file wins; otherwise the per-user file managed by confy
//! is used (created with defaults on first run). Every selector is parsed up
//! front so a bad setting fails at load time rather than mid-session.

use std::fs;
use std::path::{Path, PathBuf};

use postshot_types::Settings;
use tracing::debug;

use crate::dom::{Selector, SelectorError};

const APP_NAME: &str = "postshot";
const CONFIG_NAME: &str = "settings";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse error in {path:?}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("serialize error for {path:?}: {source}")]
    SerializeError {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("user settings: {0}")]
    Confy(#[from] confy::ConfyError),
    #[error("setting `{field}` = {value:?}: {source}")]
    InvalidSelector {
        field: &'static str,
        value: String,
        source: SelectorError,
    },
}

/// Load a settings file. Missing keys take their defaults.
pub fn load_file(path: &Path) -> Result<Settings, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let settings: Settings = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    validate(&settings)?;
    Ok(settings)
}

/// Save settings as TOML
pub fn save_file(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let contents = toml::to_string_pretty(settings).map_err(|e| ConfigError::SerializeError {
        path: path.to_path_buf(),
        source: e,
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ConfigError::IoError {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::write(path, contents).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Per-user settings location
pub fn user_config_path() -> Result<PathBuf, ConfigError> {
    Ok(confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)?)
}

/// Load per-user settings, writing defaults on first run
pub fn load_user() -> Result<Settings, ConfigError> {
    let settings: Settings = confy::load(APP_NAME, CONFIG_NAME)?;
    validate(&settings)?;
    Ok(settings)
}

pub fn store_user(settings: &Settings) -> Result<(), ConfigError> {
    validate(settings)?;
    confy::store(APP_NAME, CONFIG_NAME, settings)?;
    Ok(())
}

/// Explicit file if given, per-user settings otherwise
pub fn resolve(path: Option<&Path>) -> Result<Settings, ConfigError> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading settings file");
            load_file(path)
        }
        None => load_user(),
    }
}

/// Check that every selector setting parses
pub fn validate(settings: &Settings) -> Result<(), ConfigError> {
    let targeting = &settings.targeting;
    for (field, value) in [
        ("targeting.item_selector", &targeting.item_selector),
        ("targeting.mutation_root", &targeting.mutation_root),
        ("targeting.replies_marker", &targeting.replies_marker),
        ("targeting.truncation_marker", &targeting.truncation_marker),
    ] {
        Selector::parse(value).map_err(|source| ConfigError::InvalidSelector {
            field,
            value: value.clone(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use postshot_types::SourceSelection;

    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            r#"
[targeting]
exit_on_select = true

[capture]
source_selection = "highest"
"#,
        )
        .unwrap();

        let settings = load_file(&path).unwrap();
        assert!(settings.targeting.exit_on_select);
        assert_eq!(settings.capture.source_selection, SourceSelection::Highest);
        assert_eq!(settings.targeting.item_selector, "#base-container article");
        assert_eq!(settings.ring.feedback_reset_ms, 750);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let mut settings = Settings::default();
        settings.capture.pixel_ratio = 2.0;
        settings.control.ping_timeout_ms = 250;

        save_file(&path, &settings).unwrap();
        assert_eq!(load_file(&path).unwrap(), settings);
    }

    #[test]
    fn bad_selector_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[targeting]\nitem_selector = \"article >\"\n").unwrap();

        let err = load_file(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSelector {
                field: "targeting.item_selector",
                ..
            }
        ));
    }

    #[test]
    fn missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_file(&dir.path().join("absent.toml")),
            Err(ConfigError::IoError { .. })
        ));

        let path = dir.path().join("broken.toml");
        fs::write(&path, "[targeting\n").unwrap();
        assert!(matches!(
            resolve(Some(&path)),
            Err(ConfigError::ParseError { .. })
        ));
    }
}

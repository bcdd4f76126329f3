//! File-backed clipboard
//!
//! Image writes land in `clipboard.png`, text writes in `clipboard.txt`.
//! Each write replaces the other kind, like a real clipboard.

use std::fs;
use std::path::{Path, PathBuf};

use postshot_core::{Clipboard, ClipboardError};
use tracing::info;

const IMAGE_FILE: &str = "clipboard.png";
const TEXT_FILE: &str = "clipboard.txt";

#[derive(Debug, Clone)]
pub struct FileClipboard {
    dir: PathBuf,
}

impl FileClipboard {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn replace(&self, keep: &str, drop: &str, contents: &[u8]) -> Result<PathBuf, ClipboardError> {
        fs::create_dir_all(&self.dir).map_err(|e| ClipboardError(e.to_string()))?;
        let stale = self.dir.join(drop);
        if stale.exists() {
            fs::remove_file(&stale).map_err(|e| ClipboardError(e.to_string()))?;
        }
        let path = self.dir.join(keep);
        fs::write(&path, contents).map_err(|e| ClipboardError(e.to_string()))?;
        Ok(path)
    }
}

impl Clipboard for FileClipboard {
    fn write_image(&mut self, png: &[u8]) -> Result<(), ClipboardError> {
        let path = self.replace(IMAGE_FILE, TEXT_FILE, png)?;
        info!(path = %path.display(), bytes = png.len(), "image copied");
        Ok(())
    }

    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        let path = self.replace(TEXT_FILE, IMAGE_FILE, text.as_bytes())?;
        info!(path = %path.display(), chars = text.chars().count(), "text copied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_replace_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let mut clipboard = FileClipboard::new(dir.path().join("clip"));

        clipboard.write_text("<article></article>").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("clip").join(TEXT_FILE)).unwrap(),
            "<article></article>"
        );

        clipboard.write_image(b"\x89PNG").unwrap();
        assert!(dir.path().join("clip").join(IMAGE_FILE).exists());
        assert!(!dir.path().join("clip").join(TEXT_FILE).exists());
    }
}

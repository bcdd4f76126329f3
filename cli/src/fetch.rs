//! Resource fetching from a local mirror
//!
//! `https://host/path` is served from `<root>/host/path`, `file://` URLs and
//! absolute paths are read directly, anything else is relative to `<root>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use postshot_core::{FetchError, Resource, ResourceFetcher};
use tracing::trace;
use url::Url;

#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path serving `url`
    pub fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        match Url::parse(url) {
            Ok(parsed) => match parsed.scheme() {
                "file" => parsed
                    .to_file_path()
                    .map_err(|_| FetchError::InvalidUrl(url.to_string())),
                "http" | "https" => {
                    let host = parsed
                        .host_str()
                        .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
                    let mut path = self.root.join(host);
                    for segment in parsed.path_segments().into_iter().flatten() {
                        if segment == ".." {
                            return Err(FetchError::InvalidUrl(url.to_string()));
                        }
                        if !segment.is_empty() {
                            path.push(segment);
                        }
                    }
                    Ok(path)
                }
                _ => Err(FetchError::InvalidUrl(url.to_string())),
            },
            Err(_) => {
                let path = Path::new(url);
                if path.is_absolute() {
                    Ok(path.to_path_buf())
                } else {
                    Ok(self.root.join(path))
                }
            }
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[async_trait(?Send)]
impl ResourceFetcher for FsFetcher {
    async fn fetch(&self, url: &str) -> Result<Resource, FetchError> {
        let path = self.resolve(url)?;
        trace!(url, path = %path.display(), "fetching");
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Resource::new(bytes, content_type(&path))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(FetchError::NotFound(url.to_string())),
            Err(e) => Err(FetchError::Io {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_urls_into_the_mirror() {
        let fetcher = FsFetcher::new("/srv/mirror");
        assert_eq!(
            fetcher.resolve("https://media.example/img/b.png").unwrap(),
            PathBuf::from("/srv/mirror/media.example/img/b.png")
        );
        assert_eq!(
            fetcher.resolve("assets/a.png").unwrap(),
            PathBuf::from("/srv/mirror/assets/a.png")
        );
        assert!(matches!(
            fetcher.resolve("ftp://host/x"),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn reads_files_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("media.example")).unwrap();
        std::fs::write(dir.path().join("media.example/b.png"), b"png bytes").unwrap();
        let fetcher = FsFetcher::new(dir.path());

        let resource = fetcher.fetch("https://media.example/b.png").await.unwrap();
        assert_eq!(resource.bytes, b"png bytes");
        assert_eq!(resource.content_type, "image/png");

        assert_eq!(
            fetcher.fetch("https://media.example/missing.png").await,
            Err(FetchError::NotFound("https://media.example/missing.png".into()))
        );
    }
}

//! Local directory blob store
//!
//! Layout: `<root>/<container>/<key>`. Keys may contain `/`, which become
//! sub-directories. Writes go to a temporary sibling first and are renamed into
//! place, so readers never observe a partially written object.

use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::BufReader;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{display_location, BlobReader, BlobStore};
use crate::error::{IngestError, IngestResult};

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `(container, key)` to a path below the root
    fn resolve(&self, container: &str, key: &str) -> IngestResult<PathBuf> {
        let mut path = self.container_path(container)?;
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(IngestError::Config(format!("invalid object key '{}'", key)));
        }
        path.push(relative);
        Ok(path)
    }

    fn container_path(&self, container: &str) -> IngestResult<PathBuf> {
        let mut components = Path::new(container).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(container)),
            _ => Err(IngestError::Config(format!(
                "invalid container name '{}'",
                container
            ))),
        }
    }
}

fn not_found_or(
    err: std::io::Error,
    location: String,
    other: impl FnOnce(String, std::io::Error) -> IngestError,
) -> IngestError {
    if err.kind() == IoErrorKind::NotFound {
        IngestError::NotFound { location }
    } else {
        other(location, err)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    async fn ensure_container(&self, container: &str) -> IngestResult<()> {
        let path = self.container_path(container)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| IngestError::write(path.display().to_string(), e))
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> IngestResult<()> {
        let path = self.resolve(container, key)?;
        let location = display_location(container, key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IngestError::write(location.clone(), e))?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(format!(".tmp-{}", Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);

        let written = async {
            tokio::fs::write(&tmp, &data).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(IngestError::write(location, e));
        }

        debug!(path = %path.display(), "Object written");
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> IngestResult<Vec<u8>> {
        let path = self.resolve(container, key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| not_found_or(e, display_location(container, key), IngestError::read))
    }

    async fn open_read(&self, container: &str, key: &str) -> IngestResult<BlobReader> {
        let path = self.resolve(container, key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found_or(e, display_location(container, key), IngestError::read))?;
        Ok(Box::pin(BufReader::with_capacity(READ_BUFFER_SIZE, file)))
    }
}

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use parley_shared::constants::IMAGE_ROUTE_PREFIX;

use crate::error::ServerError;

/// Content types accepted in data URLs, with the extension they are stored
/// under so the type can be recovered on read.
const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".into()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".into()));
    }
    Ok(resolved)
}

/// Split `data:<mime>;base64,<payload>` into its content type and bytes.
fn decode_data_url(url: &str) -> Result<(&'static str, &'static str, Vec<u8>), ServerError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ServerError::BadRequest("Image must be a data URL".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ServerError::BadRequest("Malformed data URL".into()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| ServerError::BadRequest("Image data URL must be base64".into()))?;

    let (mime, ext) = ALLOWED_TYPES
        .iter()
        .find(|(m, _)| m.eq_ignore_ascii_case(mime))
        .copied()
        .ok_or_else(|| ServerError::BadRequest(format!("Unsupported image type: {mime}")))?;

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ServerError::BadRequest(format!("Invalid base64 image: {e}")))?;

    Ok((mime, ext, bytes))
}

/// A stored image read back from disk.
#[derive(Debug)]
pub struct StoredImage {
    pub content_type: &'static str,
    pub data: Vec<u8>,
}

/// On-disk store for images attached to messages and profiles.
#[derive(Debug, Clone)]
pub struct ImageStore {
    base_path: PathBuf,
    max_size: usize,
}

impl ImageStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::ImageStorage(format!(
                "Failed to create image directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Image store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Decode and persist a data URL. Returns the public reference
    /// (`/api/images/<uuid>`) to store alongside the message or profile.
    pub async fn store_data_url(&self, url: &str) -> Result<String, ServerError> {
        let (_, ext, data) = decode_data_url(url)?;

        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty image".into()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::ImageTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let path = self.safe_image_path(&format!("{id}.{ext}"))?;

        fs::write(&path, &data).await.map_err(|e| {
            ServerError::ImageStorage(format!("Failed to write image {id}: {e}"))
        })?;

        debug!(id = %id, size = data.len(), "Stored image");
        Ok(format!("{IMAGE_ROUTE_PREFIX}{id}"))
    }

    pub async fn get(&self, id: Uuid) -> Result<StoredImage, ServerError> {
        let (path, content_type) = self.locate(id).await?.ok_or(ServerError::ImageNotFound(id))?;

        let data = fs::read(&path)
            .await
            .map_err(|e| ServerError::ImageStorage(format!("Failed to read image {id}: {e}")))?;

        debug!(id = %id, size = data.len(), "Retrieved image");
        Ok(StoredImage { content_type, data })
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServerError> {
        let (path, _) = self.locate(id).await?.ok_or(ServerError::ImageNotFound(id))?;

        fs::remove_file(&path).await.map_err(|e| {
            ServerError::ImageStorage(format!("Failed to delete image {id}: {e}"))
        })?;

        debug!(id = %id, "Deleted image");
        Ok(())
    }

    /// Delete by public reference. Anything that is not one of ours is ignored.
    pub async fn delete_reference(&self, reference: &str) -> Result<(), ServerError> {
        match Self::parse_reference(reference) {
            Some(id) => self.delete(id).await,
            None => Ok(()),
        }
    }

    pub fn parse_reference(reference: &str) -> Option<Uuid> {
        reference
            .strip_prefix(IMAGE_ROUTE_PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    async fn locate(&self, id: Uuid) -> Result<Option<(PathBuf, &'static str)>, ServerError> {
        for &(mime, ext) in ALLOWED_TYPES {
            let path = self.safe_image_path(&format!("{id}.{ext}"))?;
            let found = fs::try_exists(&path).await.map_err(|e| {
                ServerError::ImageStorage(format!("Failed to look up image {id}: {e}"))
            })?;
            if found {
                return Ok(Some((path, mime)));
            }
        }
        Ok(None)
    }

    fn safe_image_path(&self, filename: &str) -> Result<PathBuf, ServerError> {
        let raw = self.base_path.join(filename);
        ensure_within(&self.base_path, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // 1x1 transparent PNG.
    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    async fn test_store(max: usize) -> (ImageStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path().to_path_buf(), max).await.unwrap();
        (store, dir)
    }

    fn png_url() -> String {
        format!("data:image/png;base64,{PNG_B64}")
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let (store, _dir) = test_store(1024 * 1024).await;

        let reference = store.store_data_url(&png_url()).await.unwrap();
        assert!(reference.starts_with("/api/images/"));

        let id = ImageStore::parse_reference(&reference).unwrap();
        let image = store.get(id).await.unwrap();
        assert_eq!(image.content_type, "image/png");
        assert_eq!(image.data, STANDARD.decode(PNG_B64).unwrap());
    }

    #[tokio::test]
    async fn test_delete_reference() {
        let (store, _dir) = test_store(1024 * 1024).await;
        let reference = store.store_data_url(&png_url()).await.unwrap();

        store.delete_reference(&reference).await.unwrap();
        let id = ImageStore::parse_reference(&reference).unwrap();
        assert!(matches!(store.get(id).await, Err(ServerError::ImageNotFound(_))));

        // Foreign references are left alone.
        store.delete_reference("https://example.com/a.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_by_any_allowed_extension() {
        let (store, dir) = test_store(1024 * 1024).await;
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id).await, Err(ServerError::ImageNotFound(_))));

        tokio::fs::write(dir.path().join(format!("{id}.webp")), b"RIFF")
            .await
            .unwrap();
        let image = store.get(id).await.unwrap();
        assert_eq!(image.content_type, "image/webp");
        assert_eq!(image.data, b"RIFF");

        store.delete(id).await.unwrap();
        assert!(matches!(store.delete(id).await, Err(ServerError::ImageNotFound(_))));
    }

    #[tokio::test]
    async fn test_too_large_rejected() {
        let (store, _dir) = test_store(8).await;
        assert!(matches!(
            store.store_data_url(&png_url()).await,
            Err(ServerError::ImageTooLarge { max: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_urls_rejected() {
        let (store, _dir) = test_store(1024).await;
        for bad in [
            "not a url",
            "data:image/png;base64",
            "data:image/png,AAAA",
            "data:text/html;base64,PGgxPg==",
            "data:image/png;base64,!!!",
            "data:image/png;base64,",
        ] {
            assert!(
                matches!(store.store_data_url(bad).await, Err(ServerError::BadRequest(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_reference() {
        let id = Uuid::new_v4();
        assert_eq!(
            ImageStore::parse_reference(&format!("/api/images/{id}")),
            Some(id)
        );
        assert_eq!(ImageStore::parse_reference("/api/images/../etc"), None);
    }
}

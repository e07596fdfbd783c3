use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::model::apperror::{ApplicationError, ErrorType};

/**
 * Storage for uploaded avatar images.
 */
#[async_trait]
pub trait AvatarStorage: Send + Sync {
    /**
     * Stores an image for a user.
     *
     * # Arguments
     * `user_id`: Owner of the image.
     * `content_type`: Mime type of the upload. Must be an image type.
     * `content`: The image bytes.
     *
     * # Returns
     * The public url of the stored image.
     */
    async fn store_avatar(&self, user_id: i64, content_type: &str, content: &[u8]) -> Result<String, ApplicationError>;
}

/**
 * Maps a raster image mime type to a file extension. Anything else is rejected.
 */
pub fn image_extension(content_type: &str) -> Result<&'static str, ApplicationError> {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => Ok("png"),
        "image/jpeg" | "image/jpg" => Ok("jpg"),
        "image/gif" => Ok("gif"),
        "image/webp" => Ok("webp"),
        "image/bmp" => Ok("bmp"),
        _ => Err(ApplicationError::new(ErrorType::Validation, "File must be an image".to_string())),
    }
}

/**
 * Avatar storage on the local file system. Files are served statically below `public_path`.
 */
pub struct LocalAvatarStorage {
    upload_dir: PathBuf,
    public_path: String,
}

impl LocalAvatarStorage {
    pub fn new(upload_dir: PathBuf, public_path: &str) -> Self {
        LocalAvatarStorage { upload_dir, public_path: public_path.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl AvatarStorage for LocalAvatarStorage {
    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn store_avatar(&self, user_id: i64, content_type: &str, content: &[u8]) -> Result<String, ApplicationError> {
        let extension = image_extension(content_type)?;
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::Application, format!("Failed to create upload directory: {err}")))?;
        let file_name = format!("avatar_{user_id}_{}.{extension}", uuid::Uuid::new_v4().simple());
        tokio::fs::write(self.upload_dir.join(&file_name), content)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::Application, format!("Failed to store avatar: {err}")))?;
        debug!("Stored avatar {} for user {}", file_name, user_id);
        Ok(format!("{}/{file_name}", self.public_path))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension("image/png").unwrap(), "png");
        assert_eq!(image_extension("image/JPEG; charset=binary").unwrap(), "jpg");
        let err = image_extension("application/pdf").unwrap_err();
        assert_eq!(err.error_type, ErrorType::Validation);
        assert_eq!(err.message, "File must be an image");
    }

    #[test]
    fn test_image_extension_rejects_scriptable_and_unknown_images() {
        for content_type in ["image/svg+xml", "image/x-icon", "image/tiff"] {
            let err = image_extension(content_type).unwrap_err();
            assert_eq!(err.message, "File must be an image", "{content_type}");
        }
    }

    #[tokio::test]
    async fn test_store_avatar() {
        let upload_dir = tempfile::tempdir().unwrap();
        let storage = LocalAvatarStorage::new(upload_dir.path().join("avatars"), "/uploads/");
        let url = storage.store_avatar(7, "image/png", b"\x89PNG").await.unwrap();
        assert!(url.starts_with("/uploads/avatar_7_"));
        assert!(url.ends_with(".png"));
        let file_name = url.trim_start_matches("/uploads/");
        let stored = std::fs::read(upload_dir.path().join("avatars").join(file_name)).unwrap();
        assert_eq!(stored, b"\x89PNG");
    }

    #[tokio::test]
    async fn test_store_avatar_rejects_non_image() {
        let upload_dir = tempfile::tempdir().unwrap();
        let storage = LocalAvatarStorage::new(upload_dir.path().to_path_buf(), "/uploads");
        assert!(storage.store_avatar(7, "text/plain", b"hello").await.is_err());
        assert_eq!(std::fs::read_dir(upload_dir.path()).unwrap().count(), 0);
    }
}

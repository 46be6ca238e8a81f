use crate::models::SelectedFile;
use crate::storage::{self, BlobStore, StorageError};
use futures::future::try_join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A listing carries at most this many images; the first is the cover.
pub const MAX_IMAGES: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("No image selected")]
    EmptySelection,
    #[error("You can only upload 6 images per listing")]
    TooManyImages,
    #[error("Image upload failed (2MB max per image)")]
    Failed,
}

/// Uploads one batch of selected files to the blob store. The batch either
/// produces one retrieval URL per file, in input order, or one declared
/// failure; blobs stored by tasks that finished before a sibling failed are
/// left in the bucket and their URLs discarded.
pub struct UploadCoordinator {
    store: Arc<dyn BlobStore>,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Synchronous batch preconditions, checked before any network work.
    pub fn check_batch(batch_len: usize, current_count: usize) -> Result<(), UploadError> {
        if batch_len == 0 {
            return Err(UploadError::EmptySelection);
        }
        if batch_len + current_count > MAX_IMAGES {
            return Err(UploadError::TooManyImages);
        }
        Ok(())
    }

    pub async fn upload_batch(
        &self,
        files: &[SelectedFile],
        current_count: usize,
    ) -> Result<Vec<String>, UploadError> {
        Self::check_batch(files.len(), current_count)?;

        let total = files.len();
        let uploads = files.iter().enumerate().map(|(index, file)| {
            let store = self.store.clone();
            let key = storage::object_key(&file.name);
            let content_type = file.content_type.clone();
            let bytes = file.bytes.clone();
            async move {
                let url = store.put(&key, &content_type, bytes).await?;
                debug!(
                    target = "bazaar.upload",
                    key = key.as_str(),
                    slot = index + 1,
                    total = total,
                    "image stored"
                );
                Ok::<String, StorageError>(url)
            }
        });

        match try_join_all(uploads).await {
            Ok(urls) => Ok(urls),
            Err(err) => {
                warn!(target = "bazaar.upload", error = %err, "upload batch failed");
                Err(UploadError::Failed)
            }
        }
    }
}

use crate::draft::{DraftController, SubmitError};
use crate::listing_api::ListingBackend;
use crate::models::{FieldEdit, SelectedFile, SessionView, SubmitState};
use crate::security::CurrentUser;
use crate::storage::BlobStore;
use crate::upload::UploadCoordinator;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// One in-progress listing form: the draft controller plus the upload
/// busy/error pair. All operations on a session run behind its own mutex,
/// so the draft never sees a concurrent writer.
pub struct FormSession {
    id: Uuid,
    controller: DraftController,
    uploader: UploadCoordinator,
    uploading: bool,
    upload_error: Option<String>,
}

impl FormSession {
    fn new(id: Uuid, store: Arc<dyn BlobStore>) -> Self {
        Self {
            id,
            controller: DraftController::new(),
            uploader: UploadCoordinator::new(store),
            uploading: false,
            upload_error: None,
        }
    }

    pub fn apply_edit(&mut self, edit: FieldEdit) {
        self.controller.apply(edit);
    }

    /// Uploads one picker batch. The busy flag transitions only after the
    /// preconditions pass; on success the URLs are appended in order, on
    /// any failure the image list is left untouched and one message is
    /// surfaced.
    pub async fn upload_images(&mut self, files: Vec<SelectedFile>) {
        let current = self.controller.draft().image_urls.len();
        if let Err(err) = UploadCoordinator::check_batch(files.len(), current) {
            self.upload_error = Some(err.to_string());
            return;
        }

        self.uploading = true;
        self.upload_error = None;
        let result = self.uploader.upload_batch(&files, current).await;
        self.uploading = false;
        match result {
            Ok(urls) => {
                debug!(
                    target = "bazaar.api",
                    session = %self.id,
                    added = urls.len(),
                    "upload batch merged"
                );
                self.controller.merge_images(urls);
            }
            Err(err) => self.upload_error = Some(err.to_string()),
        }
    }

    pub fn remove_image(&mut self, index: usize) -> bool {
        self.controller.remove_image(index)
    }

    /// Submits the draft; on success the caller is expected to end the
    /// session. The outcome (including any error message) is part of the
    /// session view either way.
    pub async fn submit(
        &mut self,
        backend: &dyn ListingBackend,
        user: &CurrentUser,
    ) -> Result<String, SubmitError> {
        self.controller.submit(backend, user).await
    }

    pub fn view(&self) -> SessionView {
        let location = match self.controller.outcome() {
            SubmitState::Created { listing_id } => Some(format!("/listing/{listing_id}")),
            _ => None,
        };
        SessionView {
            session_id: self.id.to_string(),
            draft: self.controller.draft().clone(),
            uploading: self.uploading,
            upload_error: self.upload_error.clone(),
            outcome: self.controller.outcome().clone(),
            location,
        }
    }
}

/// Registry of open form sessions, one lock per session.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn BlobStore>,
    sessions: Arc<Mutex<HashMap<Uuid, Arc<Mutex<FormSession>>>>>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn open(&self) -> SessionView {
        let id = Uuid::new_v4();
        let session = FormSession::new(id, self.store.clone());
        let view = session.view();
        self.sessions
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(session)));
        view
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Mutex<FormSession>>> {
        self.sessions.lock().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) {
        self.sessions.lock().await.remove(&id);
    }
}

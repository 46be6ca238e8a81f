use crate::listing_api::{ListingApiError, ListingBackend};
use crate::models::{Draft, FieldEdit, SubmitState};
use crate::security::CurrentUser;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Discount price must be lower than regular price")]
    PriceOrder,
    #[error("You must upload at least one image")]
    NoImages,
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Transport(String),
}

/// Owns the mutable draft for one form session: single-field edits, the
/// image list, and the submission workflow with its two hard gates.
pub struct DraftController {
    draft: Draft,
    outcome: SubmitState,
}

impl DraftController {
    pub fn new() -> Self {
        Self {
            draft: Draft::default(),
            outcome: SubmitState::Idle,
        }
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn outcome(&self) -> &SubmitState {
        &self.outcome
    }

    /// Replaces exactly one field. Values land raw: text is not trimmed,
    /// numeric range hints from the form are advisory only.
    pub fn apply(&mut self, edit: FieldEdit) {
        match edit {
            FieldEdit::Name(value) => self.draft.name = value,
            FieldEdit::Description(value) => self.draft.description = value,
            FieldEdit::Unit(value) => self.draft.unit = value,
            FieldEdit::Category(value) => self.draft.category = value.unwrap_or_default(),
            FieldEdit::Inventory(value) => self.draft.inventory = value,
            FieldEdit::RegularPrice(value) => self.draft.regular_price = value,
            FieldEdit::DiscountPrice(value) => self.draft.discount_price = value,
            FieldEdit::Offer(value) => self.draft.offer = value,
        }
    }

    /// Appends retrieval URLs from a fully successful upload batch,
    /// preserving their order behind the existing entries.
    pub fn merge_images(&mut self, urls: Vec<String>) {
        self.draft.image_urls.extend(urls);
    }

    /// Drops one image by position. The stored blob stays in the bucket.
    pub fn remove_image(&mut self, index: usize) -> bool {
        if index >= self.draft.image_urls.len() {
            return false;
        }
        self.draft.image_urls.remove(index);
        true
    }

    /// Runs the submission gates and, when they pass, sends the draft to
    /// the listing backend. Every failure is terminal for this attempt and
    /// leaves the draft unchanged.
    pub async fn submit(
        &mut self,
        backend: &dyn ListingBackend,
        user: &CurrentUser,
    ) -> Result<String, SubmitError> {
        if self.draft.discount_price > self.draft.regular_price {
            return Err(self.fail(SubmitError::PriceOrder));
        }
        if self.draft.image_urls.is_empty() {
            return Err(self.fail(SubmitError::NoImages));
        }

        self.outcome = SubmitState::Pending;
        match backend.create_listing(&self.draft, &user.user_id).await {
            Ok(created) => {
                info!(
                    target = "bazaar.draft",
                    listing_id = %created.id,
                    user = %user.user_id,
                    "listing created"
                );
                self.outcome = SubmitState::Created {
                    listing_id: created.id.clone(),
                };
                Ok(created.id)
            }
            Err(ListingApiError::Rejected(message)) => {
                Err(self.fail(SubmitError::Rejected(message)))
            }
            Err(err) => {
                warn!(target = "bazaar.draft", error = %err, "listing submission failed");
                Err(self.fail(SubmitError::Transport(err.to_string())))
            }
        }
    }

    fn fail(&mut self, err: SubmitError) -> SubmitError {
        self.outcome = SubmitState::failed(err.to_string());
        err
    }
}

impl Default for DraftController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing_api::CreatedListing;
    use async_trait::async_trait;
    use std::sync::Mutex;

    enum Reply {
        Created(&'static str),
        Rejected(&'static str),
        Transport(&'static str),
    }

    struct MockBackend {
        reply: Reply,
        calls: Mutex<usize>,
    }

    impl MockBackend {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ListingBackend for MockBackend {
        async fn create_listing(
            &self,
            _draft: &Draft,
            _user_ref: &str,
        ) -> Result<CreatedListing, ListingApiError> {
            *self.calls.lock().unwrap() += 1;
            match self.reply {
                Reply::Created(id) => Ok(CreatedListing { id: id.to_string() }),
                Reply::Rejected(message) => Err(ListingApiError::Rejected(message.to_string())),
                Reply::Transport(detail) => Err(ListingApiError::Request(detail.to_string())),
            }
        }
    }

    fn seller() -> CurrentUser {
        CurrentUser {
            user_id: "user-7".into(),
            api_key_id: "key-01".into(),
        }
    }

    fn submittable_controller() -> DraftController {
        let mut controller = DraftController::new();
        controller.apply(FieldEdit::Name("Porch swing".into()));
        controller.apply(FieldEdit::RegularPrice(10));
        controller.apply(FieldEdit::DiscountPrice(5));
        controller.merge_images(vec!["https://img.test/a".into()]);
        controller
    }

    #[test]
    fn applying_the_same_edit_twice_is_idempotent() {
        let mut once = DraftController::new();
        once.apply(FieldEdit::Inventory(-1));
        let mut twice = DraftController::new();
        twice.apply(FieldEdit::Inventory(-1));
        twice.apply(FieldEdit::Inventory(-1));
        assert_eq!(once.draft(), twice.draft());
    }

    #[test]
    fn clearing_the_category_stores_an_empty_string() {
        let mut controller = DraftController::new();
        controller.apply(FieldEdit::Category(Some("garden".into())));
        assert_eq!(controller.draft().category, "garden");
        controller.apply(FieldEdit::Category(None));
        assert_eq!(controller.draft().category, "");
    }

    #[test]
    fn remove_image_drops_exactly_one_position() {
        let mut controller = DraftController::new();
        controller.merge_images(vec!["a".into(), "b".into(), "c".into()]);
        assert!(controller.remove_image(1));
        assert_eq!(controller.draft().image_urls, vec!["a", "c"]);
        assert!(!controller.remove_image(5));
        assert_eq!(controller.draft().image_urls.len(), 2);
    }

    #[tokio::test]
    async fn discount_above_regular_price_never_reaches_the_backend() {
        let backend = MockBackend::new(Reply::Created("abc123"));
        let mut controller = DraftController::new();
        controller.apply(FieldEdit::RegularPrice(10));
        controller.apply(FieldEdit::DiscountPrice(15));
        controller.merge_images(vec!["https://img.test/a".into()]);

        let err = controller.submit(&backend, &seller()).await.unwrap_err();
        assert_eq!(err, SubmitError::PriceOrder);
        assert_eq!(backend.calls(), 0);
        assert_eq!(
            controller.outcome(),
            &SubmitState::failed("Discount price must be lower than regular price")
        );
    }

    #[tokio::test]
    async fn missing_images_never_reach_the_backend() {
        let backend = MockBackend::new(Reply::Created("abc123"));
        let mut controller = DraftController::new();
        controller.apply(FieldEdit::RegularPrice(10));
        controller.apply(FieldEdit::DiscountPrice(5));

        let err = controller.submit(&backend, &seller()).await.unwrap_err();
        assert_eq!(err, SubmitError::NoImages);
        assert_eq!(backend.calls(), 0);
        assert_eq!(
            controller.outcome(),
            &SubmitState::failed("You must upload at least one image")
        );
    }

    #[tokio::test]
    async fn equal_prices_pass_the_price_gate() {
        let backend = MockBackend::new(Reply::Created("abc123"));
        let mut controller = submittable_controller();
        controller.apply(FieldEdit::DiscountPrice(10));

        controller.submit(&backend, &seller()).await.unwrap();
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn server_rejection_surfaces_the_server_message() {
        let backend = MockBackend::new(Reply::Rejected("dup name"));
        let mut controller = submittable_controller();

        let err = controller.submit(&backend, &seller()).await.unwrap_err();
        assert_eq!(err, SubmitError::Rejected("dup name".into()));
        assert_eq!(controller.outcome(), &SubmitState::failed("dup name"));
    }

    #[tokio::test]
    async fn created_listing_id_lands_in_the_outcome() {
        let backend = MockBackend::new(Reply::Created("abc123"));
        let mut controller = submittable_controller();

        let id = controller.submit(&backend, &seller()).await.unwrap();
        assert_eq!(id, "abc123");
        assert_eq!(
            controller.outcome(),
            &SubmitState::Created {
                listing_id: "abc123".into()
            }
        );
    }

    #[tokio::test]
    async fn transport_failure_never_leaves_the_outcome_pending() {
        let backend = MockBackend::new(Reply::Transport("connection reset"));
        let mut controller = submittable_controller();

        let err = controller.submit(&backend, &seller()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Transport(_)));
        assert!(matches!(controller.outcome(), SubmitState::Failed { .. }));
    }
}

//! Persistence collaborators: records (`Store`) and original bytes (`BlobStore`).
//!
//! Both are shared behind `Arc<dyn ...>` by every worker, so implementations
//! synchronize internally.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{DirectUpload, Image, SigningKey, Variant};
use crate::pagination::{ListQuery, Page};

pub mod blob;
pub mod memory;
pub mod mongo;

pub use blob::FilesystemBlobStore;
pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Image, variant, signing-key and direct-upload records
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_image(&self, image: &Image) -> Result<()>;
    async fn get_image(&self, account_id: &str, image_id: &str) -> Result<Option<Image>>;
    /// Returns false when the image does not exist.
    async fn update_image(&self, image: &Image) -> Result<bool>;
    async fn delete_image(&self, account_id: &str, image_id: &str) -> Result<bool>;
    async fn count_images(&self, account_id: &str) -> Result<u64>;
    /// Offset listing ordered by upload time; returns the page and the total count.
    async fn list_images_offset(
        &self,
        account_id: &str,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<Image>, u64)>;
    /// Keyset listing, see `crate::pagination`.
    async fn list_images(&self, account_id: &str, query: &ListQuery) -> Result<Page>;

    /// Returns false when a variant with the same id already exists.
    async fn create_variant(&self, variant: &Variant) -> Result<bool>;
    async fn get_variant(&self, account_id: &str, variant_id: &str) -> Result<Option<Variant>>;
    /// Sorted by id.
    async fn list_variants(&self, account_id: &str) -> Result<Vec<Variant>>;
    async fn update_variant(&self, variant: &Variant) -> Result<bool>;
    async fn delete_variant(&self, account_id: &str, variant_id: &str) -> Result<bool>;

    /// Inserts or replaces the key with the same name.
    async fn put_signing_key(&self, key: &SigningKey) -> Result<()>;
    /// Sorted by name.
    async fn list_signing_keys(&self, account_id: &str) -> Result<Vec<SigningKey>>;
    async fn delete_signing_key(&self, account_id: &str, name: &str) -> Result<bool>;

    async fn create_direct_upload(&self, upload: &DirectUpload) -> Result<()>;
    async fn get_direct_upload(&self, upload_id: &str) -> Result<Option<DirectUpload>>;
    async fn complete_direct_upload(&self, upload_id: &str) -> Result<bool>;
}

/// Original image bytes keyed by account and image id
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data`, replacing any previous original. Returns bytes written.
    async fn store(&self, account_id: &str, image_id: &str, data: &[u8]) -> Result<u64>;
    /// `None` when no original exists.
    async fn retrieve(&self, account_id: &str, image_id: &str) -> Result<Option<Vec<u8>>>;
    /// Idempotent.
    async fn delete(&self, account_id: &str, image_id: &str) -> Result<()>;
}

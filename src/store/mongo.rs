//! MongoDB-backed store, used when `DT_MONGODB_URI` is set.
//!
//! Metadata is kept twice on each image document: as the JSON text that is
//! returned to clients and as `meta_pairs`, a `[{k, v}]` array of
//! string-rendered values that listing filters match with `$elemMatch`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::info;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::{FindOptions, IndexOptions, ReplaceOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Store;
use crate::model::{DirectUpload, Image, SigningKey, Variant, VariantOptions};
use crate::pagination::{Cursor, FilterOp, ListQuery, Page, SortOrder};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaPair {
    k: String,
    v: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageDocument {
    account_id: String,
    id: String,
    filename: String,
    creator: String,
    meta: String,
    meta_pairs: Vec<MetaPair>,
    require_signed_urls: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    uploaded: DateTime<Utc>,
    variants: Vec<String>,
    draft: bool,
}

impl From<&Image> for ImageDocument {
    fn from(image: &Image) -> Self {
        ImageDocument {
            account_id: image.account_id.clone(),
            id: image.id.clone(),
            filename: image.filename.clone(),
            creator: image.creator.clone(),
            meta: serde_json::Value::Object(image.meta.clone()).to_string(),
            meta_pairs: image
                .meta_pairs()
                .into_iter()
                .map(|(k, v)| MetaPair { k, v })
                .collect(),
            require_signed_urls: image.require_signed_urls,
            uploaded: image.uploaded,
            variants: image.variants.clone(),
            draft: image.draft,
        }
    }
}

/// Parses metadata stored as JSON text.
fn decode_meta(raw: &str, owner: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw).with_context(|| format!("corrupt stored metadata on {}", owner))
}

impl TryFrom<ImageDocument> for Image {
    type Error = anyhow::Error;

    fn try_from(doc: ImageDocument) -> Result<Self> {
        let meta = decode_meta(&doc.meta, &format!("image {}/{}", doc.account_id, doc.id))?;
        Ok(Image {
            id: doc.id,
            account_id: doc.account_id,
            filename: doc.filename,
            creator: doc.creator,
            meta,
            require_signed_urls: doc.require_signed_urls,
            uploaded: doc.uploaded,
            variants: doc.variants,
            draft: doc.draft,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VariantDocument {
    account_id: String,
    id: String,
    fit: String,
    width: u32,
    height: u32,
    metadata: String,
    never_require_signed_urls: bool,
}

impl From<&Variant> for VariantDocument {
    fn from(variant: &Variant) -> Self {
        VariantDocument {
            account_id: variant.account_id.clone(),
            id: variant.id.clone(),
            fit: variant.options.fit.clone(),
            width: variant.options.width,
            height: variant.options.height,
            metadata: variant.options.metadata.clone(),
            never_require_signed_urls: variant.never_require_signed_urls,
        }
    }
}

impl From<VariantDocument> for Variant {
    fn from(doc: VariantDocument) -> Self {
        Variant {
            id: doc.id,
            account_id: doc.account_id,
            options: VariantOptions {
                fit: doc.fit,
                width: doc.width,
                height: doc.height,
                metadata: doc.metadata,
            },
            never_require_signed_urls: doc.never_require_signed_urls,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SigningKeyDocument {
    account_id: String,
    name: String,
    value: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DirectUploadDocument {
    id: String,
    account_id: String,
    upload_url: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    expiry: DateTime<Utc>,
    metadata: String,
    #[serde(default)]
    require_signed_urls: bool,
    completed: bool,
}

pub struct MongoStore {
    images: Collection<ImageDocument>,
    variants: Collection<VariantDocument>,
    signing_keys: Collection<SigningKeyDocument>,
    direct_uploads: Collection<DirectUploadDocument>,
}

impl MongoStore {
    /// Connects and makes sure the unique and listing indexes exist.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .context("connecting to MongoDB")?;
        let store = Self::with_database(client.database(database));
        store.ensure_indexes().await?;
        info!("Using MongoDB database {}", database);
        Ok(store)
    }

    pub fn with_database(db: Database) -> Self {
        MongoStore {
            images: db.collection("images"),
            variants: db.collection("variants"),
            signing_keys: db.collection("signing_keys"),
            direct_uploads: db.collection("direct_uploads"),
        }
    }

    async fn ensure_indexes(&self) -> Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.images
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "account_id": 1, "id": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await?;
        self.images
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "account_id": 1, "uploaded": 1, "id": 1 })
                    .build(),
                None,
            )
            .await?;
        self.variants
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "account_id": 1, "id": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await?;
        self.signing_keys
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "account_id": 1, "name": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await?;
        Ok(())
    }
}

fn operator(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => "$eq",
        FilterOp::Ne => "$ne",
        FilterOp::Lt => "$lt",
        FilterOp::Gt => "$gt",
        FilterOp::Lte => "$lte",
        FilterOp::Gte => "$gte",
    }
}

fn direction(order: SortOrder) -> i32 {
    match order {
        SortOrder::Asc => 1,
        SortOrder::Desc => -1,
    }
}

/// Query document for one keyset page: account scope, optional metadata
/// filter and the "strictly after the cursor" predicate.
pub fn keyset_filter(account_id: &str, query: &ListQuery) -> Document {
    let mut clauses = vec![doc! { "account_id": account_id }];

    if let Some(filter) = &query.filter {
        let mut value = Document::new();
        value.insert(operator(filter.op), filter.value.as_str());
        clauses.push(doc! {
            "meta_pairs": { "$elemMatch": { "k": filter.key.as_str(), "v": value } }
        });
    }

    if let Some(cursor) = &query.cursor {
        clauses.push(after_cursor(cursor, query.order));
    }

    doc! { "$and": clauses }
}

fn after_cursor(cursor: &Cursor, order: SortOrder) -> Document {
    let cmp = match order {
        SortOrder::Asc => "$gt",
        SortOrder::Desc => "$lt",
    };
    let uploaded = Bson::DateTime(bson::DateTime::from_chrono(cursor.uploaded));

    let mut later = Document::new();
    later.insert(cmp, uploaded.clone());
    let mut later_id = Document::new();
    later_id.insert(cmp, cursor.id.as_str());

    doc! {
        "$or": [
            { "uploaded": later },
            { "uploaded": uploaded, "id": later_id },
        ]
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn create_image(&self, image: &Image) -> Result<()> {
        self.images.insert_one(ImageDocument::from(image), None).await?;
        Ok(())
    }

    async fn get_image(&self, account_id: &str, image_id: &str) -> Result<Option<Image>> {
        let found = self
            .images
            .find_one(doc! { "account_id": account_id, "id": image_id }, None)
            .await?;
        found.map(Image::try_from).transpose()
    }

    async fn update_image(&self, image: &Image) -> Result<bool> {
        let result = self
            .images
            .replace_one(
                doc! { "account_id": &image.account_id, "id": &image.id },
                ImageDocument::from(image),
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_image(&self, account_id: &str, image_id: &str) -> Result<bool> {
        let result = self
            .images
            .delete_one(doc! { "account_id": account_id, "id": image_id }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn count_images(&self, account_id: &str) -> Result<u64> {
        Ok(self
            .images
            .count_documents(doc! { "account_id": account_id }, None)
            .await?)
    }

    async fn list_images_offset(
        &self,
        account_id: &str,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<Image>, u64)> {
        let total = self.count_images(account_id).await?;
        let options = FindOptions::builder()
            .sort(doc! { "uploaded": 1, "id": 1 })
            .skip(page.saturating_sub(1).saturating_mul(per_page) as u64)
            .limit(per_page as i64)
            .build();
        let docs: Vec<ImageDocument> = self
            .images
            .find(doc! { "account_id": account_id }, options)
            .await?
            .try_collect()
            .await?;
        let images = docs
            .into_iter()
            .map(Image::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((images, total))
    }

    async fn list_images(&self, account_id: &str, query: &ListQuery) -> Result<Page> {
        let dir = direction(query.order);
        let options = FindOptions::builder()
            .sort(doc! { "uploaded": dir, "id": dir })
            .limit(query.page_size as i64)
            .build();
        let docs: Vec<ImageDocument> = self
            .images
            .find(keyset_filter(account_id, query), options)
            .await?
            .try_collect()
            .await?;
        let images = docs
            .into_iter()
            .map(Image::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::from_ordered(images, query.page_size))
    }

    async fn create_variant(&self, variant: &Variant) -> Result<bool> {
        if self.get_variant(&variant.account_id, &variant.id).await?.is_some() {
            return Ok(false);
        }
        self.variants
            .insert_one(VariantDocument::from(variant), None)
            .await?;
        Ok(true)
    }

    async fn get_variant(&self, account_id: &str, variant_id: &str) -> Result<Option<Variant>> {
        let found = self
            .variants
            .find_one(doc! { "account_id": account_id, "id": variant_id }, None)
            .await?;
        Ok(found.map(Variant::from))
    }

    async fn list_variants(&self, account_id: &str) -> Result<Vec<Variant>> {
        let options = FindOptions::builder().sort(doc! { "id": 1 }).build();
        let docs: Vec<VariantDocument> = self
            .variants
            .find(doc! { "account_id": account_id }, options)
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(Variant::from).collect())
    }

    async fn update_variant(&self, variant: &Variant) -> Result<bool> {
        let result = self
            .variants
            .replace_one(
                doc! { "account_id": &variant.account_id, "id": &variant.id },
                VariantDocument::from(variant),
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_variant(&self, account_id: &str, variant_id: &str) -> Result<bool> {
        let result = self
            .variants
            .delete_one(doc! { "account_id": account_id, "id": variant_id }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn put_signing_key(&self, key: &SigningKey) -> Result<()> {
        let document = SigningKeyDocument {
            account_id: key.account_id.clone(),
            name: key.name.clone(),
            value: key.value.clone(),
            created_at: key.created_at,
        };
        self.signing_keys
            .replace_one(
                doc! { "account_id": &key.account_id, "name": &key.name },
                document,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    async fn list_signing_keys(&self, account_id: &str) -> Result<Vec<SigningKey>> {
        let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
        let docs: Vec<SigningKeyDocument> = self
            .signing_keys
            .find(doc! { "account_id": account_id }, options)
            .await?
            .try_collect()
            .await?;
        Ok(docs
            .into_iter()
            .map(|d| SigningKey {
                name: d.name,
                value: d.value,
                account_id: d.account_id,
                created_at: d.created_at,
            })
            .collect())
    }

    async fn delete_signing_key(&self, account_id: &str, name: &str) -> Result<bool> {
        let result = self
            .signing_keys
            .delete_one(doc! { "account_id": account_id, "name": name }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn create_direct_upload(&self, upload: &DirectUpload) -> Result<()> {
        let document = DirectUploadDocument {
            id: upload.id.clone(),
            account_id: upload.account_id.clone(),
            upload_url: upload.upload_url.clone(),
            expiry: upload.expiry,
            metadata: serde_json::Value::Object(upload.metadata.clone()).to_string(),
            require_signed_urls: upload.require_signed_urls,
            completed: upload.completed,
        };
        self.direct_uploads.insert_one(document, None).await?;
        Ok(())
    }

    async fn get_direct_upload(&self, upload_id: &str) -> Result<Option<DirectUpload>> {
        let found = self
            .direct_uploads
            .find_one(doc! { "id": upload_id }, None)
            .await?;
        let Some(d) = found else {
            return Ok(None);
        };
        let metadata = decode_meta(&d.metadata, &format!("direct upload {}", d.id))?;
        Ok(Some(DirectUpload {
            id: d.id,
            account_id: d.account_id,
            upload_url: d.upload_url,
            expiry: d.expiry,
            metadata,
            require_signed_urls: d.require_signed_urls,
            completed: d.completed,
        }))
    }

    async fn complete_direct_upload(&self, upload_id: &str) -> Result<bool> {
        let result = self
            .direct_uploads
            .update_one(
                doc! { "id": upload_id },
                doc! { "$set": { "completed": true } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::MetadataFilter;
    use chrono::TimeZone;

    #[test]
    fn test_first_page_filter_is_account_scoped() {
        let query = ListQuery::new(20, SortOrder::Asc);
        let filter = keyset_filter("acct", &query);

        let clauses = filter.get_array("$and").unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(
            clauses[0].as_document().unwrap().get_str("account_id").unwrap(),
            "acct"
        );
    }

    #[test]
    fn test_metadata_filter_uses_elem_match() {
        let query = ListQuery::new(20, SortOrder::Asc)
            .with_filter(Some(MetadataFilter::new("size", FilterOp::Gte, "10")));
        let filter = keyset_filter("acct", &query);

        let clauses = filter.get_array("$and").unwrap();
        let elem = clauses[1]
            .as_document()
            .unwrap()
            .get_document("meta_pairs")
            .unwrap()
            .get_document("$elemMatch")
            .unwrap();
        assert_eq!(elem.get_str("k").unwrap(), "size");
        assert_eq!(elem.get_document("v").unwrap().get_str("$gte").unwrap(), "10");
    }

    #[test]
    fn test_descending_cursor_uses_less_than() {
        let cursor = Cursor {
            uploaded: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            id: "img-7".to_string(),
        };
        let query = ListQuery::new(20, SortOrder::Desc).with_cursor(Some(cursor));
        let filter = keyset_filter("acct", &query);

        let clauses = filter.get_array("$and").unwrap();
        let branches = clauses[1].as_document().unwrap().get_array("$or").unwrap();
        let tie_break = branches[1].as_document().unwrap();
        assert_eq!(tie_break.get_document("id").unwrap().get_str("$lt").unwrap(), "img-7");
        assert!(branches[0]
            .as_document()
            .unwrap()
            .get_document("uploaded")
            .unwrap()
            .contains_key("$lt"));
    }

    #[test]
    fn test_image_document_keeps_metadata_pairs() {
        let mut image = Image::new("acct", "img", "a.png");
        image.meta.insert("size".to_string(), serde_json::json!(12));
        image.meta.insert("tag".to_string(), serde_json::json!("gold"));

        let document = ImageDocument::from(&image);
        assert_eq!(document.meta_pairs.len(), 2);
        assert!(document.meta_pairs.iter().any(|p| p.k == "size" && p.v == "12"));

        let restored = Image::try_from(document).unwrap();
        assert_eq!(restored.meta, image.meta);
        assert_eq!(restored.uploaded, image.uploaded);
    }

    #[test]
    fn test_corrupt_stored_metadata_is_an_error() {
        let mut document = ImageDocument::from(&Image::new("acct", "img", "a.png"));
        document.meta = "{not json".to_string();

        let err = Image::try_from(document).unwrap_err();
        assert!(err.to_string().contains("image acct/img"));
    }
}

/*!
 * Images Emulator - Request Handlers
 *
 * This module contains all HTTP request handlers. It provides endpoints for:
 * - Health check monitoring
 * - Variant delivery under `/cdn`, with optional signed-URL enforcement
 * - Image upload, offset and keyset listing, metadata updates and deletion
 * - Variant and signing-key management
 * - Direct (pre-authorized) uploads
 */

use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{delete, get, patch, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use url::form_urlencoded;

use crate::auth::Authenticated;
use crate::config::Config;
use crate::error::{paginated, success, ApiError, DeliveryError, ResultInfo};
use crate::fit::Fit;
use crate::format::SourceFormat;
use crate::image_processor::ImageProcessor;
use crate::model::{DirectUpload, Image, SigningKey, Variant, VariantOptions};
use crate::pagination::{parse_filters, Cursor, ListQuery, SortOrder, DEFAULT_PAGE_SIZE};
use crate::signing::{delivery_path, requires_signature, verify, SignatureParams};
use crate::store::{BlobStore, FilesystemBlobStore, MemoryStore, Store};
use crate::upload::{fetch_remote, multipart_from_bytes, read_multipart, UploadForm};

/// Largest accepted upload body
pub const MAX_UPLOAD_BYTES: usize = 10 << 20;
/// Variants an account may define
pub const MAX_VARIANTS_PER_ACCOUNT: usize = 100;
/// Offset listing defaults
pub const DEFAULT_V1_PER_PAGE: usize = 1000;
pub const MAX_V1_PER_PAGE: usize = 10_000;
/// Lifetime of a direct upload URL when the caller names none
pub const DEFAULT_DIRECT_UPLOAD_MINUTES: i64 = 30;
/// Key recreated when an account's last signing key is deleted
pub const DEFAULT_KEY_NAME: &str = "default";

/// Shared state of every worker
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub processor: ImageProcessor,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>, config: Config) -> Self {
        Self {
            store,
            blobs,
            processor: ImageProcessor::new(),
            config,
        }
    }

    /// In-memory records with blobs under `config.storage_path`.
    pub fn in_memory(config: Config) -> Self {
        let blobs = FilesystemBlobStore::new(config.storage_path.clone());
        Self::new(Arc::new(MemoryStore::new()), Arc::new(blobs), config)
    }

    fn variant_url(&self, account_id: &str, image_id: &str, variant_id: &str) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            delivery_path(account_id, image_id, variant_id)
        )
    }

    /// Fills in one delivery URL per account variant.
    async fn with_variant_urls(&self, mut images: Vec<Image>) -> Result<Vec<Image>, ApiError> {
        let Some(first) = images.first() else {
            return Ok(images);
        };
        let variants = self.store.list_variants(&first.account_id).await?;
        for image in images.iter_mut() {
            image.variants = variants
                .iter()
                .map(|v| self.variant_url(&image.account_id, &image.id, &v.id))
                .collect();
        }
        Ok(images)
    }

    async fn image_response(&self, image: Image) -> Result<HttpResponse, ApiError> {
        let mut images = self.with_variant_urls(vec![image]).await?;
        Ok(success(images.remove(0)))
    }
}

/// Response structure for health check endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check endpoint handler
#[get("/health")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Delivers an image through a variant.
///
/// Lookup order is image, variant, signature, original. The body is the
/// transformed original in its own format; GIF and SVG pass through
/// unchanged.
#[get("/cdn/{account_id}/{image_id}/{variant_name}")]
pub async fn deliver_image(
    req: HttpRequest,
    path: web::Path<(String, String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, DeliveryError> {
    let (account_id, image_id, variant_name) = path.into_inner();

    let image = state
        .store
        .get_image(&account_id, &image_id)
        .await?
        .ok_or(DeliveryError::ImageNotFound)?;
    let variant = state
        .store
        .get_variant(&account_id, &variant_name)
        .await?
        .ok_or(DeliveryError::VariantNotFound)?;

    if requires_signature(state.config.enforce_signed_urls, &image, &variant) {
        let keys = state.store.list_signing_keys(&account_id).await?;
        let signed_path = delivery_path(&account_id, &image_id, &variant_name);
        let params = SignatureParams::from_query(req.query_string());
        if !verify(&params, &signed_path, &keys, Utc::now().timestamp()) {
            warn!("Denied delivery of {}: missing or invalid signature", signed_path);
            return Err(DeliveryError::Forbidden);
        }
        debug!("Signature accepted for {}", signed_path);
    }

    let original = state
        .blobs
        .retrieve(&account_id, &image_id)
        .await?
        .ok_or(DeliveryError::ImageNotFound)?;

    let processor = state.processor;
    let options = variant.options.clone();
    let processed = web::block(move || processor.transform(&original, &options))
        .await
        .map_err(|e| {
            error!("Transform task failed: {}", e);
            DeliveryError::Internal
        })??;

    debug!(
        "Delivering {}/{} via {} as {} ({} bytes)",
        account_id,
        image_id,
        variant_name,
        processed.format,
        processed.content.len()
    );
    Ok(HttpResponse::Ok()
        .content_type(processed.content_type())
        .insert_header((header::CONTENT_LENGTH, processed.content.len()))
        .body(processed.content))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
}

fn parse_metadata(raw: Option<&str>) -> Result<Map<String, Value>, ApiError> {
    match raw {
        None | Some("") => Ok(Map::new()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| ApiError::BadRequest(format!("invalid metadata JSON: {}", e))),
    }
}

/// Uploads an image from a multipart form.
///
/// Form fields:
/// - file: The image; the part's filename becomes the image filename
/// - url: Remote image fetched when no file part is present
/// - metadata: JSON object
/// - requireSignedURLs: `true` to require signed delivery
#[post("/v1")]
pub async fn upload_image(
    _auth: Authenticated,
    req: HttpRequest,
    path: web::Path<String>,
    payload: Multipart,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let account_id = path.into_inner();
    let form = read_multipart(payload, MAX_UPLOAD_BYTES)
        .await?
        .with_query(req.query_string());

    let meta = parse_metadata(form.value("metadata"))?;
    let require_signed_urls = form.flag("requireSignedURLs");
    let url = form.value("url").map(str::to_string);
    let file = match (form.file, url) {
        (Some(file), _) => file,
        (None, Some(url)) => fetch_remote(&url, MAX_UPLOAD_BYTES).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "missing required field: file or url".to_string(),
            ))
        }
    };

    let image_id = uuid::Uuid::new_v4().to_string();
    state.blobs.store(&account_id, &image_id, &file.data).await?;

    let mut image = Image::new(&account_id, &image_id, &file.filename);
    image.meta = meta;
    image.require_signed_urls = require_signed_urls;
    state.store.create_image(&image).await?;

    info!(
        "Uploaded image {}/{} ({}, {} bytes)",
        account_id,
        image_id,
        file.filename,
        file.data.len()
    );
    state.image_response(image).await
}

/// Query parameters of the v1 offset listing
#[derive(Debug, Default, Deserialize)]
pub struct OffsetListParams {
    pub page: Option<String>,
    pub per_page: Option<String>,
}

fn positive(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|v| v.parse::<usize>().ok()).filter(|v| *v > 0)
}

/// Offset listing
///
/// Query parameters:
/// - page: Page number (default: 1)
/// - per_page: Items per page (default: 1000, max: 10000)
#[get("/v1")]
pub async fn list_images(
    _auth: Authenticated,
    path: web::Path<String>,
    query: web::Query<OffsetListParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let account_id = path.into_inner();
    let page = positive(query.page.as_deref()).unwrap_or(1);
    let per_page = positive(query.per_page.as_deref())
        .unwrap_or(DEFAULT_V1_PER_PAGE)
        .min(MAX_V1_PER_PAGE);

    let (images, total) = state
        .store
        .list_images_offset(&account_id, page, per_page)
        .await?;
    let images = state.with_variant_urls(images).await?;

    let info = ResultInfo {
        page,
        per_page,
        count: images.len(),
        total_count: total,
        total_pages: total.div_ceil(per_page as u64),
    };
    Ok(paginated(json!({ "images": images }), info))
}

/// Image count against the configured allowance
#[get("/v1/stats")]
pub async fn image_stats(
    _auth: Authenticated,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let current = state.store.count_images(&path.into_inner()).await?;
    Ok(success(json!({
        "count": { "current": current, "allowed": state.config.image_allowance }
    })))
}

/// Keyset listing
///
/// Query parameters:
/// - per_page: Items per page (default: 20, max: 100)
/// - sort_order: asc or desc (default: asc)
/// - continuation_token: Token returned by the previous page
/// - metadata[key][op]=value: Metadata filter; only the first one applies
#[get("/v2")]
pub async fn list_images_v2(
    _auth: Authenticated,
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let account_id = path.into_inner();
    let query = parse_list_query(req.query_string())?;
    debug!(
        "Keyset listing for {}: per_page={} order={} filter={:?}",
        account_id,
        query.page_size,
        query.order.as_str(),
        query.filter
    );

    let page = state.store.list_images(&account_id, &query).await?;
    let continuation_token = page.continuation_token();
    let images = state.with_variant_urls(page.images).await?;

    Ok(success(json!({
        "images": images,
        "continuation_token": continuation_token,
    })))
}

/// Builds a keyset query from a raw query string.
pub fn parse_list_query(query_string: &str) -> Result<ListQuery, ApiError> {
    let pairs: Vec<(String, String)> = form_urlencoded::parse(query_string.as_bytes())
        .into_owned()
        .collect();
    let param = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    let page_size = positive(param("per_page")).unwrap_or(DEFAULT_PAGE_SIZE);
    let order = param("sort_order").map(SortOrder::parse).unwrap_or_default();
    let cursor = Cursor::decode(param("continuation_token").unwrap_or(""))?;
    let filter = parse_filters(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .map_err(|e| {
            warn!("Rejected metadata filters: {}", e);
            e
        })?
        .into_iter()
        .next();

    Ok(ListQuery::new(page_size, order)
        .with_cursor(cursor)
        .with_filter(filter))
}

#[get("/v1/{image_id}")]
pub async fn get_image(
    _auth: Authenticated,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (account_id, image_id) = path.into_inner();
    let image = state
        .store
        .get_image(&account_id, &image_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("image not found".to_string()))?;
    state.image_response(image).await
}

/// Body of an image update; absent fields are left unchanged
#[derive(Debug, Default, Deserialize)]
pub struct UpdateImageRequest {
    pub metadata: Option<Map<String, Value>>,
    #[serde(rename = "requireSignedURLs")]
    pub require_signed_urls: Option<bool>,
}

#[patch("/v1/{image_id}")]
pub async fn update_image(
    _auth: Authenticated,
    path: web::Path<(String, String)>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (account_id, image_id) = path.into_inner();
    let mut image = state
        .store
        .get_image(&account_id, &image_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("image not found".to_string()))?;

    let update: UpdateImageRequest = parse_json(&body)?;
    if let Some(metadata) = update.metadata {
        image.meta = metadata;
    }
    if let Some(require) = update.require_signed_urls {
        image.require_signed_urls = require;
    }

    if !state.store.update_image(&image).await? {
        return Err(ApiError::NotFound("image not found".to_string()));
    }
    info!("Updated image {}/{}", account_id, image_id);
    state.image_response(image).await
}

#[delete("/v1/{image_id}")]
pub async fn delete_image(
    _auth: Authenticated,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (account_id, image_id) = path.into_inner();
    if !state.store.delete_image(&account_id, &image_id).await? {
        return Err(ApiError::NotFound("image not found".to_string()));
    }
    if let Err(e) = state.blobs.delete(&account_id, &image_id).await {
        error!("Failed to delete blob of {}/{}: {:#}", account_id, image_id, e);
    }
    info!("Deleted image {}/{}", account_id, image_id);
    Ok(success(json!({})))
}

/// Original bytes of an image
#[get("/v1/{image_id}/blob")]
pub async fn image_blob(
    _auth: Authenticated,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (account_id, image_id) = path.into_inner();
    let image = state
        .store
        .get_image(&account_id, &image_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("image not found".to_string()))?;
    let data = state
        .blobs
        .retrieve(&account_id, &image_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("image blob not found".to_string()))?;

    Ok(HttpResponse::Ok()
        .content_type(SourceFormat::detect(&data).content_type())
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", image.filename),
        ))
        .body(data))
}

fn invalid_fit() -> ApiError {
    ApiError::BadRequest(format!(
        "invalid fit mode: must be one of {}",
        Fit::NAMES.join(", ")
    ))
}

/// Body of a variant creation
#[derive(Debug, Deserialize)]
pub struct CreateVariantRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub options: VariantOptions,
    #[serde(rename = "neverRequireSignedURLs", default)]
    pub never_require_signed_urls: bool,
}

#[post("/v1/variants")]
pub async fn create_variant(
    _auth: Authenticated,
    path: web::Path<String>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let account_id = path.into_inner();
    let request: CreateVariantRequest = parse_json(&body)?;

    if request.id.is_empty() {
        return Err(ApiError::BadRequest("variant id is required".to_string()));
    }
    if Fit::from_name(&request.options.fit).is_none() {
        return Err(invalid_fit());
    }
    if state.store.list_variants(&account_id).await?.len() >= MAX_VARIANTS_PER_ACCOUNT {
        return Err(ApiError::BadRequest(
            "maximum number of variants reached".to_string(),
        ));
    }

    let variant = Variant {
        id: request.id,
        account_id: account_id.clone(),
        options: request.options,
        never_require_signed_urls: request.never_require_signed_urls,
    };
    if !state.store.create_variant(&variant).await? {
        return Err(ApiError::Conflict("variant already exists".to_string()));
    }

    info!(
        "Created variant {}/{} ({} {}x{})",
        account_id, variant.id, variant.options.fit, variant.options.width, variant.options.height
    );
    Ok(success(variant))
}

/// Variants keyed by id
#[get("/v1/variants")]
pub async fn list_variants(
    _auth: Authenticated,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let variants: Map<String, Value> = state
        .store
        .list_variants(&path.into_inner())
        .await?
        .into_iter()
        .map(|v| {
            let id = v.id.clone();
            (id, json!(v))
        })
        .collect();
    Ok(success(json!({ "variants": variants })))
}

#[get("/v1/variants/{variant_id}")]
pub async fn get_variant(
    _auth: Authenticated,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (account_id, variant_id) = path.into_inner();
    let variant = state
        .store
        .get_variant(&account_id, &variant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("variant not found".to_string()))?;
    Ok(success(variant))
}

/// Body of a variant update; zero or empty option fields are left unchanged
#[derive(Debug, Default, Deserialize)]
pub struct UpdateVariantRequest {
    pub options: Option<VariantOptions>,
    #[serde(rename = "neverRequireSignedURLs")]
    pub never_require_signed_urls: Option<bool>,
}

#[patch("/v1/variants/{variant_id}")]
pub async fn update_variant(
    _auth: Authenticated,
    path: web::Path<(String, String)>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (account_id, variant_id) = path.into_inner();
    let mut variant = state
        .store
        .get_variant(&account_id, &variant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("variant not found".to_string()))?;

    let update: UpdateVariantRequest = parse_json(&body)?;
    if let Some(options) = update.options {
        if !options.fit.is_empty() {
            if Fit::from_name(&options.fit).is_none() {
                return Err(invalid_fit());
            }
            variant.options.fit = options.fit;
        }
        if options.width != 0 {
            variant.options.width = options.width;
        }
        if options.height != 0 {
            variant.options.height = options.height;
        }
        if !options.metadata.is_empty() {
            variant.options.metadata = options.metadata;
        }
    }
    if let Some(never) = update.never_require_signed_urls {
        variant.never_require_signed_urls = never;
    }

    if !state.store.update_variant(&variant).await? {
        return Err(ApiError::NotFound("variant not found".to_string()));
    }
    info!("Updated variant {}/{}", account_id, variant_id);
    Ok(success(variant))
}

#[delete("/v1/variants/{variant_id}")]
pub async fn delete_variant(
    _auth: Authenticated,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (account_id, variant_id) = path.into_inner();
    if !state.store.delete_variant(&account_id, &variant_id).await? {
        return Err(ApiError::NotFound("variant not found".to_string()));
    }
    info!("Deleted variant {}/{}", account_id, variant_id);
    Ok(success(json!({})))
}

#[get("/v1/keys")]
pub async fn list_signing_keys(
    _auth: Authenticated,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let keys = state.store.list_signing_keys(&path.into_inner()).await?;
    Ok(success(json!({ "keys": keys })))
}

/// Creates (or rotates) a signing key with a random secret.
#[put("/v1/keys/{key_name}")]
pub async fn put_signing_key(
    _auth: Authenticated,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (account_id, key_name) = path.into_inner();
    let key = SigningKey::generate(&account_id, &key_name);
    state.store.put_signing_key(&key).await?;
    info!("Created signing key {}/{}", account_id, key_name);
    Ok(success(key))
}

#[delete("/v1/keys/{key_name}")]
pub async fn delete_signing_key(
    _auth: Authenticated,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (account_id, key_name) = path.into_inner();
    if !state.store.delete_signing_key(&account_id, &key_name).await? {
        return Err(ApiError::NotFound("signing key not found".to_string()));
    }
    info!("Deleted signing key {}/{}", account_id, key_name);

    // An account always keeps at least one key
    if state.store.list_signing_keys(&account_id).await?.is_empty() {
        let key = SigningKey::generate(&account_id, DEFAULT_KEY_NAME);
        state.store.put_signing_key(&key).await?;
        info!("Recreated {} signing key for {}", DEFAULT_KEY_NAME, account_id);
    }
    Ok(success(json!({})))
}

/// Optional body of a direct upload request
#[derive(Debug, Default, Deserialize)]
pub struct DirectUploadRequest {
    /// RFC 3339
    pub expiry: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    #[serde(rename = "requireSignedURLs", default)]
    pub require_signed_urls: bool,
}

impl DirectUploadRequest {
    /// Reads the request from a JSON body, or else from form fields and the
    /// query string.
    async fn read(req: &HttpRequest, body: web::Bytes) -> Result<Self, ApiError> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type.starts_with("application/json") {
            if body.is_empty() {
                return Ok(Self::default());
            }
            return parse_json(&body);
        }

        let form = if content_type.starts_with("multipart/form-data") {
            let payload = multipart_from_bytes(req.headers(), body);
            read_multipart(payload, MAX_UPLOAD_BYTES)
                .await
                .unwrap_or_else(|e| {
                    debug!("Ignoring unreadable direct upload form: {}", e);
                    UploadForm::default()
                })
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            UploadForm::from_urlencoded(&body)
        } else {
            UploadForm::default()
        };
        let form = form.with_query(req.query_string());

        let metadata = match form.value("metadata") {
            Some(raw) => Some(parse_metadata(Some(raw))?),
            None => None,
        };
        Ok(Self {
            expiry: form.value("expiry").map(str::to_string),
            metadata,
            require_signed_urls: form.flag("requireSignedURLs"),
        })
    }
}

/// Creates a one-time upload URL.
#[post("/v2/direct_upload")]
pub async fn create_direct_upload(
    _auth: Authenticated,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let account_id = path.into_inner();
    let request = DirectUploadRequest::read(&req, body).await?;

    let expiry = match request.expiry.as_deref().filter(|e| !e.is_empty()) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|_| ApiError::BadRequest("invalid expiry format, use RFC3339".to_string()))?
            .with_timezone(&Utc),
        None => Utc::now() + Duration::minutes(DEFAULT_DIRECT_UPLOAD_MINUTES),
    };

    let upload_id = uuid::Uuid::new_v4().to_string();
    let upload = DirectUpload {
        upload_url: format!(
            "{}/upload/{}",
            state.config.base_url.trim_end_matches('/'),
            upload_id
        ),
        id: upload_id,
        account_id,
        expiry,
        metadata: request.metadata.unwrap_or_default(),
        require_signed_urls: request.require_signed_urls,
        completed: false,
    };
    state.store.create_direct_upload(&upload).await?;

    info!("Created direct upload {} for {}", upload.id, upload.account_id);
    Ok(success(json!({ "id": upload.id, "uploadURL": upload.upload_url })))
}

/// Completes a direct upload from a multipart form with a `file` part. The
/// upload id is the only credential.
#[post("/upload/{upload_id}")]
pub async fn complete_direct_upload(
    path: web::Path<String>,
    payload: Multipart,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let upload_id = path.into_inner();
    let upload = state
        .store
        .get_direct_upload(&upload_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("direct upload not found".to_string()))?;

    if Utc::now() > upload.expiry {
        return Err(ApiError::BadRequest("upload URL has expired".to_string()));
    }
    if upload.completed {
        return Err(ApiError::Conflict("upload already completed".to_string()));
    }

    let file = read_multipart(payload, MAX_UPLOAD_BYTES)
        .await?
        .file
        .ok_or_else(|| ApiError::BadRequest("missing required field: file".to_string()))?;

    state
        .blobs
        .store(&upload.account_id, &upload.id, &file.data)
        .await?;

    let mut image = Image::new(&upload.account_id, &upload.id, &file.filename);
    image.meta = upload.metadata.clone();
    image.require_signed_urls = upload.require_signed_urls;
    image.draft = true;
    state.store.create_image(&image).await?;

    if !state.store.complete_direct_upload(&upload.id).await? {
        warn!("Direct upload {} vanished before completion", upload.id);
    }
    info!(
        "Completed direct upload {}/{} ({} bytes)",
        upload.account_id,
        upload.id,
        file.data.len()
    );
    state.image_response(image).await
}

/// Routes under `/accounts/{account_id}/images`. Fixed segments are
/// registered before `/v1/{image_id}` so they are not taken for image ids.
pub fn account_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(upload_image)
        .service(list_images)
        .service(image_stats)
        .service(list_signing_keys)
        .service(put_signing_key)
        .service(delete_signing_key)
        .service(create_variant)
        .service(list_variants)
        .service(get_variant)
        .service(update_variant)
        .service(delete_variant)
        .service(get_image)
        .service(update_image)
        .service(delete_image)
        .service(image_blob)
        .service(list_images_v2)
        .service(create_direct_upload);
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
        .service(health_check)
        .service(deliver_image)
        .service(complete_direct_upload)
        .service(web::scope("/accounts/{account_id}/images").configure(account_routes));
}

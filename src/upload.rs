//! Request bodies of the upload endpoints.
//!
//! Uploads arrive as `multipart/form-data`: the image is the `file` part and
//! everything else is a text field. Text fields may also be passed as query
//! parameters; a body field shadows a query parameter of the same name and the
//! first occurrence of a repeated field wins.

use std::collections::HashMap;
use std::time::Duration;

use actix_multipart::{Multipart, MultipartError};
use actix_web::error::PayloadError;
use actix_web::http::header::HeaderMap;
use actix_web::web::Bytes;
use futures::{stream, TryStreamExt};
use log::{debug, info, warn};
use url::form_urlencoded;

use crate::error::ApiError;

/// Name of the part that carries the image
pub const FILE_FIELD: &str = "file";

const REMOTE_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// The `file` part of a multipart body, or a fetched remote image
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Parsed upload form
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<UploadedFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    /// Fields of an `application/x-www-form-urlencoded` body.
    pub fn from_urlencoded(body: &[u8]) -> Self {
        let mut form = UploadForm::default();
        for (name, value) in form_urlencoded::parse(body) {
            form.insert(&name, value.into_owned());
        }
        form
    }

    /// Adds query parameters the body did not set.
    pub fn with_query(mut self, query_string: &str) -> Self {
        for (name, value) in form_urlencoded::parse(query_string.as_bytes()) {
            self.insert(&name, value.into_owned());
        }
        self
    }

    fn insert(&mut self, name: &str, value: String) {
        self.fields.entry(name.to_string()).or_insert(value);
    }

    /// Value of a text field. Empty values read as absent.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Only the literal `true` enables a flag.
    pub fn flag(&self, name: &str) -> bool {
        self.value(name) == Some("true")
    }
}

fn invalid_form(err: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("invalid multipart form: {}", err))
}

/// Drains a multipart stream, holding at most `limit` bytes of part data.
pub async fn read_multipart(mut payload: Multipart, limit: usize) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    let mut total = 0usize;

    while let Some(mut field) = payload.try_next().await.map_err(invalid_form)? {
        let disposition = field.content_disposition();
        let name = disposition.get_name().unwrap_or_default().to_string();
        let filename = disposition.get_filename().map(str::to_string);

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(invalid_form)? {
            total += chunk.len();
            if total > limit {
                return Err(ApiError::BadRequest(format!(
                    "invalid multipart form: body exceeds {} bytes",
                    limit
                )));
            }
            data.extend_from_slice(&chunk);
        }

        match filename {
            Some(filename) if name == FILE_FIELD => {
                if form.file.is_none() {
                    form.file = Some(UploadedFile { filename, data });
                }
            }
            Some(filename) => debug!("Ignoring file part {} ({})", name, filename),
            None => form.insert(&name, String::from_utf8_lossy(&data).into_owned()),
        }
    }

    Ok(form)
}

/// Multipart view over an already buffered body.
pub fn multipart_from_bytes(headers: &HeaderMap, body: Bytes) -> Multipart {
    Multipart::new(headers, stream::once(async move { Ok::<_, PayloadError>(body) }))
}

/// Last `/`-separated segment of `url`.
pub fn filename_from_url(url: &str) -> String {
    url.rsplit('/').next().unwrap_or_default().to_string()
}

fn fetch_failed(err: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(format!("failed to fetch url: {}", err))
}

/// Downloads a remote image for a `url` upload.
pub async fn fetch_remote(url: &str, limit: usize) -> Result<UploadedFile, ApiError> {
    let client = reqwest::Client::builder()
        .timeout(REMOTE_FETCH_TIMEOUT)
        .build()
        .map_err(|e| ApiError::Internal(format!("failed to create HTTP client: {}", e)))?;

    info!("Fetching remote image {}", url);
    let response = client.get(url).send().await.map_err(|e| {
        warn!("Failed to fetch {}: {}", url, e);
        fetch_failed(e)
    })?;
    if !response.status().is_success() {
        warn!("Fetching {} returned {}", url, response.status());
        return Err(fetch_failed(format!("status {}", response.status())));
    }

    let data = response.bytes().await.map_err(fetch_failed)?;
    if data.len() > limit {
        return Err(fetch_failed(format!("body exceeds {} bytes", limit)));
    }

    Ok(UploadedFile {
        filename: filename_from_url(url),
        data: data.to_vec(),
    })
}

/// One part of a test form body
#[cfg(test)]
pub(crate) struct Part {
    name: String,
    filename: Option<String>,
    data: Vec<u8>,
}

#[cfg(test)]
impl Part {
    pub(crate) fn file(filename: &str, data: &[u8]) -> Self {
        Part {
            name: FILE_FIELD.to_string(),
            filename: Some(filename.to_string()),
            data: data.to_vec(),
        }
    }

    pub(crate) fn text(name: &str, value: &str) -> Self {
        Part {
            name: name.to_string(),
            filename: None,
            data: value.as_bytes().to_vec(),
        }
    }
}

/// Encodes `parts` as `multipart/form-data`, returning the content type and body.
#[cfg(test)]
pub(crate) fn multipart_body(parts: &[Part]) -> (String, Vec<u8>) {
    const BOUNDARY: &str = "emulator-form-boundary";

    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let disposition = match &part.filename {
            Some(filename) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                part.name, filename
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name),
        };
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

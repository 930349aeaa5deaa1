//! HTTP error rendering
//!
//! Account API errors are rendered in the JSON envelope every API response
//! uses. Delivery errors are plain text and carry no detail.

use std::fmt;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde::Serialize;

use crate::image_processor::ImageError;
use crate::pagination::ListError;

#[derive(Debug, Serialize)]
pub struct EnvelopeError {
    pub code: u32,
    pub message: String,
}

/// Offset pagination details of the v1 listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultInfo {
    pub page: usize,
    pub per_page: usize,
    pub count: usize,
    pub total_count: u64,
    pub total_pages: u64,
}

/// `{result, success, errors, messages}` wrapper of every account API response
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub result: Option<T>,
    pub success: bool,
    pub errors: Vec<EnvelopeError>,
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_info: Option<ResultInfo>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(result: T) -> Self {
        Envelope {
            result: Some(result),
            success: true,
            errors: Vec::new(),
            messages: Vec::new(),
            result_info: None,
        }
    }
}

/// Successful envelope response
pub fn success<T: Serialize>(result: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope::ok(result))
}

/// Successful envelope response carrying offset pagination details
pub fn paginated<T: Serialize>(result: T, info: ResultInfo) -> HttpResponse {
    let mut envelope = Envelope::ok(result);
    envelope.result_info = Some(info);
    HttpResponse::Ok().json(envelope)
}

/// Account API errors
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    /// Envelope error code
    pub fn code(&self) -> u32 {
        match self {
            ApiError::BadRequest(_) => 9400,
            ApiError::Unauthorized => 9401,
            ApiError::NotFound(_) => 9404,
            ApiError::Conflict(_) => 9409,
            ApiError::Internal(_) => 9500,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "authentication required"),
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let envelope: Envelope<()> = Envelope {
            result: None,
            success: false,
            errors: vec![EnvelopeError {
                code: self.code(),
                message: self.to_string(),
            }],
            messages: Vec::new(),
            result_info: None,
        };
        HttpResponse::build(self.status_code()).json(envelope)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Storage failure: {:#}", err);
        ApiError::Internal("internal server error".to_string())
    }
}

impl From<ListError> for ApiError {
    fn from(err: ListError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Delivery (`/cdn/...`) errors
#[derive(Debug)]
pub enum DeliveryError {
    ImageNotFound,
    VariantNotFound,
    Forbidden,
    Internal,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DeliveryError::ImageNotFound => "image not found",
            DeliveryError::VariantNotFound => "variant not found",
            DeliveryError::Forbidden => "forbidden",
            DeliveryError::Internal => "internal server error",
        };
        write!(f, "{}", msg)
    }
}

impl ResponseError for DeliveryError {
    fn status_code(&self) -> StatusCode {
        match self {
            DeliveryError::ImageNotFound | DeliveryError::VariantNotFound => StatusCode::NOT_FOUND,
            DeliveryError::Forbidden => StatusCode::FORBIDDEN,
            DeliveryError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

impl From<anyhow::Error> for DeliveryError {
    fn from(err: anyhow::Error) -> Self {
        error!("Storage failure during delivery: {:#}", err);
        DeliveryError::Internal
    }
}

impl From<ImageError> for DeliveryError {
    fn from(err: ImageError) -> Self {
        error!("Transform failed: {}", err);
        DeliveryError::Internal
    }
}

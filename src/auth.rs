//! Credential check for the account API.
//!
//! A request authenticates with either `Authorization: Bearer <token>` or the
//! `X-Auth-Key` + `X-Auth-Email` pair. With no configured token any presented
//! credential is accepted; otherwise the bearer token (or the auth key) must
//! equal it exactly.

use actix_web::dev::Payload;
use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use log::warn;

use crate::error::ApiError;
use crate::handlers::AppState;

const BEARER: &str = "Bearer ";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Checks the request headers against `token`.
pub fn check_credentials(headers: &HeaderMap, token: &str) -> Result<(), ApiError> {
    if let Some(bearer) = header(headers, AUTHORIZATION.as_str()).strip_prefix(BEARER) {
        return if token.is_empty() || bearer == token {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        };
    }

    let key = header(headers, "X-Auth-Key");
    let email = header(headers, "X-Auth-Email");
    if !key.is_empty() && !email.is_empty() && (token.is_empty() || key == token) {
        return Ok(());
    }
    Err(ApiError::Unauthorized)
}

/// Extractor that rejects unauthenticated requests with 401
#[derive(Debug, Clone, Copy)]
pub struct Authenticated;

impl FromRequest for Authenticated {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let token = req
            .app_data::<web::Data<AppState>>()
            .map(|state| state.config.auth_token.as_str())
            .unwrap_or("");
        let result = check_credentials(req.headers(), token).map(|_| Authenticated);
        if result.is_err() {
            warn!("Rejected unauthenticated request to {}", req.path());
        }
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        map
    }

    #[test]
    fn test_open_mode_accepts_any_credential() {
        assert!(check_credentials(&headers(&[("authorization", "Bearer anything")]), "").is_ok());
        assert!(check_credentials(
            &headers(&[("x-auth-key", "k"), ("x-auth-email", "a@b.c")]),
            ""
        )
        .is_ok());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        assert!(check_credentials(&headers(&[]), "").is_err());
        assert!(check_credentials(&headers(&[("x-auth-key", "k")]), "").is_err());
        assert!(check_credentials(&headers(&[("authorization", "Basic abc")]), "").is_err());
    }

    #[test]
    fn test_configured_token_must_match() {
        let token = "s3cret";
        assert!(check_credentials(&headers(&[("authorization", "Bearer s3cret")]), token).is_ok());
        assert!(check_credentials(&headers(&[("authorization", "Bearer nope")]), token).is_err());
        assert!(check_credentials(
            &headers(&[("x-auth-key", "s3cret"), ("x-auth-email", "a@b.c")]),
            token
        )
        .is_ok());
        assert!(check_credentials(
            &headers(&[("x-auth-key", "wrong"), ("x-auth-email", "a@b.c")]),
            token
        )
        .is_err());
    }
}

//! Signed delivery URLs
//!
//! A delivery request is authorized when it carries:
//! - `exp`: a decimal unix timestamp not in the past
//! - `sig`: hex of HMAC-SHA256(secret, path + exp)
//!
//! where `path` is `/cdn/{account}/{image}/{variant}` and `exp` is appended
//! verbatim as it appeared in the query. Any signing key registered to the
//! account may have produced the signature. There is no replay protection
//! beyond expiry.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::form_urlencoded;

use crate::model::{Image, SigningKey, Variant};

type HmacSha256 = Hmac<Sha256>;

/// Signature query parameters of a delivery request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureParams {
    pub sig: Option<String>,
    pub exp: Option<String>,
}

impl SignatureParams {
    /// Reads `sig` and `exp` from a raw query string. A repeated parameter
    /// keeps its first value; nothing here can fail.
    pub fn from_query(query_string: &str) -> Self {
        let mut params = SignatureParams::default();
        for (name, value) in form_urlencoded::parse(query_string.as_bytes()) {
            let slot = match name.as_ref() {
                "sig" => &mut params.sig,
                "exp" => &mut params.exp,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

/// Canonical delivery path that signatures cover.
pub fn delivery_path(account_id: &str, image_id: &str, variant_name: &str) -> String {
    format!("/cdn/{}/{}/{}", account_id, image_id, variant_name)
}

/// Whether a delivery must be verified: enforcement is on, the image asks
/// for signed delivery and the variant does not opt out.
pub fn requires_signature(enforce: bool, image: &Image, variant: &Variant) -> bool {
    enforce && image.require_signed_urls && !variant.never_require_signed_urls
}

/// Signs `path` for expiry `exp` with `secret`, returning lowercase hex.
pub fn sign(secret: &str, path: &str, exp: i64) -> String {
    let mut mac = new_mac(secret);
    mac.update(path.as_bytes());
    mac.update(exp.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a request's signature against every key of the account.
///
/// Fails closed: a missing or unparsable parameter, an expired `exp`, a
/// non-hex `sig` or an empty key set all deny.
pub fn verify(params: &SignatureParams, path: &str, keys: &[SigningKey], now: i64) -> bool {
    let (sig_hex, exp) = match (params.sig.as_deref(), params.exp.as_deref()) {
        (Some(sig), Some(exp)) if !sig.is_empty() && !exp.is_empty() => (sig, exp),
        _ => return false,
    };

    let expires_at = match exp.parse::<i64>() {
        Ok(ts) => ts,
        Err(_) => return false,
    };
    if expires_at < now {
        return false;
    }

    let sig = match hex::decode(sig_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    keys.iter().any(|key| {
        let mut mac = new_mac(&key.value);
        mac.update(path.as_bytes());
        mac.update(exp.as_bytes());
        // verify_slice compares in constant time
        mac.verify_slice(&sig).is_ok()
    })
}

fn new_mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

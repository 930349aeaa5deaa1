/*!
 * Images Emulator - Domain Records
 *
 * Records shared by the persistence collaborators, the delivery path and the
 * listing engine. JSON field names follow the hosted API so existing client
 * test suites can decode responses unchanged.
 */

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Identifier, unique per account
    pub id: String,
    /// Owning account
    #[serde(skip)]
    pub account_id: String,
    /// Original upload filename
    pub filename: String,
    /// Opaque creator identifier
    #[serde(default)]
    pub creator: String,
    /// Arbitrary caller metadata
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    /// Whether delivery requires a signed URL
    #[serde(rename = "requireSignedURLs", default)]
    pub require_signed_urls: bool,
    /// Upload time, the keyset sort key
    pub uploaded: DateTime<Utc>,
    /// Delivery URLs, one per account variant (filled in by the handlers)
    #[serde(default)]
    pub variants: Vec<String>,
    /// Set for images created through a direct upload
    #[serde(default, skip_serializing_if = "is_false")]
    pub draft: bool,
}

impl Image {
    /// Builds a new record stamped with the current time.
    pub fn new(account_id: &str, id: &str, filename: &str) -> Self {
        Self {
            id: id.to_string(),
            account_id: account_id.to_string(),
            filename: filename.to_string(),
            creator: uuid::Uuid::new_v4().to_string(),
            meta: Map::new(),
            require_signed_urls: false,
            uploaded: upload_timestamp(Utc::now()),
            variants: Vec::new(),
            draft: false,
        }
    }

    /// Metadata as (key, string value) pairs, the shape the filter engine
    /// compares against.
    pub fn meta_pairs(&self) -> Vec<(String, String)> {
        self.meta
            .iter()
            .map(|(k, v)| (k.clone(), meta_value_string(v)))
            .collect()
    }

    /// String form of a single metadata key, if present.
    pub fn meta_value(&self, key: &str) -> Option<String> {
        self.meta.get(key).map(meta_value_string)
    }
}

/// Truncates a timestamp to millisecond precision. Every store keeps upload
/// times at this precision so cursors round-trip exactly.
pub fn upload_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

/// Stringifies a metadata value for filtering: strings verbatim, everything
/// else by its JSON text.
pub fn meta_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Transformation parameters of a variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantOptions {
    /// Fit mode name (scale-down, contain, cover, crop, pad)
    #[serde(default)]
    pub fit: String,
    /// Target width, 0 keeps the source width
    #[serde(default)]
    pub width: u32,
    /// Target height, 0 keeps the source height
    #[serde(default)]
    pub height: u32,
    /// Free-text tag
    #[serde(default)]
    pub metadata: String,
}

/// A named transformation preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    #[serde(skip)]
    pub account_id: String,
    pub options: VariantOptions,
    #[serde(rename = "neverRequireSignedURLs", default)]
    pub never_require_signed_urls: bool,
}

/// A secret used to sign delivery URLs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(skip)]
    pub account_id: String,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl SigningKey {
    /// Creates a key with a random secret.
    pub fn generate(account_id: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// A pending direct-upload slot
#[derive(Debug, Clone, PartialEq)]
pub struct DirectUpload {
    pub id: String,
    pub account_id: String,
    pub upload_url: String,
    pub expiry: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    /// Carried over to the image created on completion
    pub require_signed_urls: bool,
    pub completed: bool,
}

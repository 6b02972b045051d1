//! Request fingerprints
//!
//! A request is identified by its template text plus a parameter mapping. The
//! mapping is brought into a canonical JSON form (object keys sorted at every
//! depth, no whitespace) before hashing, so insertion order never changes the
//! fingerprint.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::KeyDerivationError;

/// Parameter mapping passed alongside a request template
pub type Params = Map<String, Value>;

/// Hex-encoded SHA-256 identifier of a logical request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A template, its canonical parameters, and the fingerprint derived from both
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
    template: String,
    params: Params,
    canonical: String,
    fingerprint: Fingerprint,
}

impl RequestKey {
    /// Builds a key from any serializable parameter value.
    ///
    /// Accepts anything that serializes to a JSON object, or to `null` (treated
    /// as an empty mapping, so `&()` works for parameterless requests).
    pub fn new<P>(template: impl Into<String>, params: &P) -> Result<Self, KeyDerivationError>
    where
        P: Serialize + ?Sized,
    {
        let template = template.into();
        let params = to_params(params)?;
        let canonical = canonical_json(&Value::Object(params.clone()));
        let fingerprint = fingerprint_of(&template, &params, &canonical);

        Ok(Self {
            template,
            params,
            canonical,
            fingerprint,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Canonical JSON text of the parameters
    pub fn canonical_params(&self) -> &str {
        &self.canonical
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// Derives the fingerprint for a template and parameter mapping
pub fn derive<P>(template: &str, params: &P) -> Result<Fingerprint, KeyDerivationError>
where
    P: Serialize + ?Sized,
{
    RequestKey::new(template, params).map(|key| key.fingerprint)
}

fn to_params<P>(params: &P) -> Result<Params, KeyDerivationError>
where
    P: Serialize + ?Sized,
{
    match serde_json::to_value(params)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Params::new()),
        Value::Bool(_) => Err(KeyDerivationError::NotAMapping { found: "boolean" }),
        Value::Number(_) => Err(KeyDerivationError::NotAMapping { found: "number" }),
        Value::String(_) => Err(KeyDerivationError::NotAMapping { found: "string" }),
        Value::Array(_) => Err(KeyDerivationError::NotAMapping { found: "array" }),
    }
}

// The template is length-prefixed so the boundary between template and
// parameters is unambiguous. Empty parameters contribute nothing.
fn fingerprint_of(template: &str, params: &Params, canonical: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update((template.len() as u64).to_be_bytes());
    hasher.update(template.as_bytes());
    if !params.is_empty() {
        hasher.update(canonical.as_bytes());
    }

    let hash: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    Fingerprint(hash)
}

/// Encodes a JSON value with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

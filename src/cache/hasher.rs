//! Canonical content hashing of calculation inputs.
//!
//! The digest is SHA-256 over a canonical JSON rendering: object keys sorted by
//! byte order, no insignificant whitespace, integers only. The rendering is
//! produced here rather than by `serde_json`'s writer so that determinism does
//! not depend on map implementation details or feature flags.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::kind::CalculationKind;

/// Explicitly-typed, versioned input of one calculation kind.
///
/// Bump `SCHEMA_VERSION` whenever a field is added, removed or changes meaning:
/// the version is part of the hashed envelope, so old cache slots stop matching.
pub trait CalculationInput: Serialize + Send + Sync + 'static {
    const KIND: CalculationKind;
    const SCHEMA_VERSION: u32;
}

/// Hex digest of a canonicalized calculation input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputHash(String);

impl InputHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for InputHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for InputHash {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Hashing failures. These indicate a malformed input type, never bad data.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("calculation input is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("calculation input holds a floating point number at `{path}`; use fixed-unit integers")]
    FloatingPoint { path: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a, I> {
    kind: CalculationKind,
    schema_version: u32,
    input: &'a I,
}

/// Hash a typed calculation input together with its kind and schema version.
pub fn hash_input<I: CalculationInput>(input: &I) -> Result<InputHash, HashError> {
    let envelope = Envelope {
        kind: I::KIND,
        schema_version: I::SCHEMA_VERSION,
        input,
    };
    hash_value(&serde_json::to_value(&envelope)?)
}

/// Hash a JSON input as if it were the typed input of `kind` at
/// `schema_version`. Used by tooling that has no Rust type at hand.
pub fn hash_untyped(
    kind: CalculationKind,
    schema_version: u32,
    input: &Value,
) -> Result<InputHash, HashError> {
    let envelope = Envelope {
        kind,
        schema_version,
        input,
    };
    hash_value(&serde_json::to_value(&envelope)?)
}

/// Hash an already-built JSON value.
pub fn hash_value(value: &Value) -> Result<InputHash, HashError> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(InputHash(hex::encode(hasher.finalize())))
}

/// Render `value` in canonical form.
pub fn canonical_json(value: &Value) -> Result<String, HashError> {
    let mut out = String::new();
    write_canonical(value, &mut String::from("$"), &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, path: &mut String, out: &mut String) -> Result<(), HashError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(number) => {
            if let Some(unsigned) = number.as_u64() {
                let _ = write!(out, "{unsigned}");
            } else if let Some(signed) = number.as_i64() {
                let _ = write!(out, "{signed}");
            } else {
                return Err(HashError::FloatingPoint { path: path.clone() });
            }
        }
        Value::String(text) => out.push_str(&serde_json::to_string(text)?),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                let len = path.len();
                let _ = write!(path, "[{index}]");
                write_canonical(item, path, out)?;
                path.truncate(len);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                let len = path.len();
                path.push('.');
                path.push_str(key);
                write_canonical(&map[key], path, out)?;
                path.truncate(len);
            }
            out.push('}');
        }
    }
    Ok(())
}

//! Canonical JSON and content hashing.
//!
//! Every hash in the ledger is `hex(SHA256(bytes))`. Payloads are hashed over
//! their canonical JSON form: object keys sorted at every depth, no
//! insignificant whitespace, numbers printed by `serde_json` (integers as
//! integers, floats in shortest round-trip form). The output does not depend
//! on map iteration order or on serde_json feature flags.
//!
//! Artifact checksums are taken over the typed payload after it has been
//! parsed and re-serialized, not over the bytes the generator sent. A number
//! declared as a float keeps its float form (`9` is hashed as `9.0`),
//! defaulted fields such as an empty `runners` list are present, and unknown
//! fields are carried along unchanged. Recomputing a checksum from the raw
//! generator payload will therefore not match; recompute it from
//! [`ArtifactPayload::checksum`](crate::schema::ArtifactPayload::checksum).

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonical serialization of an arbitrary JSON value.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical serialization of any serializable value.
pub fn canonical_json_of<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    Ok(canonical_json(&v))
}

/// `SHA256(canonical_json(value))`
pub fn checksum(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

pub fn checksum_of<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json_of(value)?.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String((*key).clone()), out);
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
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut String) {
    // Scalars (strings, numbers, bools, null) have exactly one serde_json rendering.
    out.push_str(&value.to_string());
}

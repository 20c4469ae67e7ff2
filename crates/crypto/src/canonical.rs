//! Canonical byte encoding used before hashing or signing.
//!
//! Values are lowered to `serde_json::Value`, whose object maps keep keys
//! sorted, then written without whitespace. Two structurally equal payloads
//! therefore always produce the same bytes regardless of field order.

use serde::Serialize;

pub fn canonical_string<T: Serialize + ?Sized>(value: &T) -> crate::Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> crate::Result<Vec<u8>> {
    canonical_string(value).map(String::into_bytes)
}

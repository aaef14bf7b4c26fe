//! Shared JSON parsing helpers.

/// Parse a JSON value (string or number) as `f64`.
///
/// Handles the common exchange pattern where numeric values may be encoded
/// as either JSON strings (`"30000.5"`) or native numbers (`30000.5`).
#[inline]
pub fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse(s.trim()).ok()
    } else {
        v.as_f64()
    }
}

/// String field on a JSON object.
#[inline]
pub fn str_field<'a>(v: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    v.get(key)?.as_str()
}

/// Unwrap a combined-stream envelope (`{"stream": "...", "data": {...}}`),
/// returning the inner payload or the value itself.
#[inline]
pub fn unwrap_envelope(v: &serde_json::Value) -> &serde_json::Value {
    match (v.get("stream"), v.get("data")) {
        (Some(_), Some(data)) if data.is_object() => data,
        _ => v,
    }
}

//! loosely typed wire representation
//!
//! Maps with string keys whose values are strings, booleans, numbers, nested maps or lists.
//! `serde_json` is built with `preserve_order`, so maps serialize in insertion order.

/// A wire value
pub type WireValue = serde_json::Value;

/// A wire map (JSON object)
pub type WireMap = serde_json::Map<String, WireValue>;

/// Human readable name of a wire value's type, used in error messages
pub fn type_name(value: &WireValue) -> &'static str {
    match value {
        WireValue::Null => "null",
        WireValue::Bool(_) => "boolean",
        WireValue::Number(number) if number.is_f64() => "float",
        WireValue::Number(_) => "integer",
        WireValue::String(_) => "string",
        WireValue::Array(_) => "array",
        WireValue::Object(_) => "object",
    }
}

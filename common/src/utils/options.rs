//! Free-form driver options.
//!
//! Connection requests may carry a `driverOptions` bag with driver-specific
//! settings. Setup stays permissive: a bag that is not an object, or an
//! entry whose value has the wrong shape, is skipped instead of failing
//! the connection.

use serde_json::{Map, Value};

/// Normalized options bag.
#[derive(Debug, Clone, Default)]
pub struct DriverOptions(Map<String, Value>);

/// Returns the options bag as an object map, or an empty map.
///
/// Contract:
/// - a JSON object is returned as-is;
/// - a string is parsed as JSON and kept only if it is an object;
/// - anything else (null, arrays, scalars, unparsable text) yields an empty map.
///
/// Never fails.
pub fn merge_options_or_default(raw: Option<&Value>) -> DriverOptions {
    let map = match raw {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => {
                tracing::warn!("忽略无法解析的连接选项");
                Map::new()
            }
        },
        Some(Value::Null) | None => Map::new(),
        Some(_) => {
            tracing::warn!("忽略非对象类型的连接选项");
            Map::new()
        }
    };
    DriverOptions(map)
}

impl DriverOptions {
    /// Whether no entries are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// String entry; numbers and booleans are rendered as text.
    pub fn string(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(scalar_text)
    }

    /// Boolean entry; accepts `true`/`false` and their string forms.
    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Non-negative integer entry; accepts numbers and numeric strings.
    pub fn u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Renders a scalar as text; objects, arrays and null yield `None`.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

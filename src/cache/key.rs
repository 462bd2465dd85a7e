//! Cache key derivation.

use serde_json::Value;

/// Build the cache key for a request: `METHOD-url-<canonical body>`.
///
/// An absent body is keyed as `{}`. Object keys are sorted recursively so
/// logically identical bodies always map to the same entry.
pub fn cache_key(method: &str, url: &str, body: Option<&Value>) -> String {
  let body = match body {
    Some(value) => canonical_json(value),
    None => "{}".to_string(),
  };
  format!("{}-{}-{}", method.to_uppercase(), url, body)
}

/// Serialize JSON with object keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));

      out.push('{');
      for (i, (key, item)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(item, out);
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

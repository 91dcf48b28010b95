//! Query-string folding for GET request data.

use serde_json::Value;

/// Append `data` to `url`'s query string.
///
/// Scalars serialize as `key=value`; arrays repeat as `key[]=value`;
/// nested objects flatten to bracket notation (`filter[name]=x`). Nulls
/// are skipped. Existing query parameters on `url` are kept.
#[must_use]
pub fn append_query(url: &str, data: &Value) -> String {
    let mut pairs = Vec::new();
    collect_pairs(&mut pairs, "", data);
    if pairs.is_empty() {
        return url.to_owned();
    }

    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    let query = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
        .collect::<Vec<_>>()
        .join("&");

    match fragment {
        Some(fragment) => format!("{base}{separator}{query}#{fragment}"),
        None => format!("{base}{separator}{query}"),
    }
}

fn collect_pairs(pairs: &mut Vec<(String, String)>, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}[{key}]")
                };
                collect_pairs(pairs, &name, nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_pairs(pairs, &format!("{prefix}[]"), item);
            }
        }
        Value::Null => {}
        Value::String(text) => pairs.push((prefix.to_owned(), text.clone())),
        scalar => pairs.push((prefix.to_owned(), scalar.to_string())),
    }
}

/// Percent-encode everything outside the query-safe unreserved set.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'[' | b']' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

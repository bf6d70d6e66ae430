// Header lists arrive as untyped values from the notification source. Anything that
// isn't a `{name, value}` object with a string name is dropped rather than rejected.

use crate::types::Header;
use serde_json::Value;

/// Normalizes a raw header list into ordered `(name, value)` pairs.
///
/// Elements without a string `name` are skipped and a missing or non-string
/// `value` becomes the empty string. Input that is not a list yields no headers.
pub fn normalize_headers(raw: &Value) -> Vec<Header> {
    let Some(entries) = raw.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?;
            let value = entry.get("value").and_then(Value::as_str).unwrap_or_default();
            Some(Header::new(name, value))
        })
        .collect()
}

/// Returns the value of the first header whose name matches case-insensitively,
/// or the empty string if there is none.
pub fn header_value<'a>(headers: &'a [Header], name: &str) -> &'a str {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_headers() {
        let raw = json!([
            {"name": "Content-Type", "value": "application/json"},
            {"name": "X-Binary", "binaryValue": [1, 2, 3]},
            {"name": "X-Number", "value": 42},
            {"value": "no name"},
            {"name": 7, "value": "numeric name"},
            null,
            "just a string",
            {"name": "Accept", "value": "*/*"},
        ]);

        let headers = normalize_headers(&raw);
        assert_eq!(
            headers,
            vec![
                Header::new("Content-Type", "application/json"),
                Header::new("X-Binary", ""),
                Header::new("X-Number", ""),
                Header::new("Accept", "*/*"),
            ]
        );
        assert!(headers.len() <= raw.as_array().unwrap().len());
    }

    #[test]
    fn test_non_list_input() {
        for raw in [
            json!(null),
            json!("Content-Type: text/plain"),
            json!({"name": "Content-Type", "value": "text/plain"}),
            json!(12),
        ] {
            assert!(normalize_headers(&raw).is_empty(), "{raw}");
        }
    }

    #[test]
    fn test_header_value() {
        let headers = vec![
            Header::new("content-type", "text/plain"),
            Header::new("Content-Type", "application/json"),
            Header::new("Accept", "*/*"),
        ];

        // first match wins
        assert_eq!(header_value(&headers, "CONTENT-TYPE"), "text/plain");
        assert_eq!(header_value(&headers, "accept"), "*/*");
        assert_eq!(header_value(&headers, "authorization"), "");
        assert_eq!(header_value(&[], "accept"), "");
    }
}

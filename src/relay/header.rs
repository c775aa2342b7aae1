//! Request header parsing.
//!
//! A frame is a JSON object. Its top-level members are kept as headers;
//! only `id` is interpreted. A missing or `null` id reads as 0, booleans as
//! 0 or 1, and fractional numbers are truncated. Parse failures are
//! diagnostics: the caller keeps its previous message id and still answers
//! the client.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

/// Reasons a frame could not be turned into headers.
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request is not a JSON object")]
    NotAnObject,

    #[error("request id {0} is not an integer")]
    InvalidId(Value),
}

/// Header fields of the request currently being served.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RequestHeaders {
    fields: HashMap<String, Value>,
}

impl RequestHeaders {
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Request method, when the client supplied one.
    pub fn method(&self) -> Option<&str> {
        self.get("method").and_then(Value::as_str)
    }
}

/// Parse `frame` into `headers` and return the message id.
///
/// On error `headers` is left untouched.
pub fn parse_request(frame: &[u8], headers: &mut RequestHeaders) -> Result<i64, HeaderError> {
    let value: Value = serde_json::from_slice(frame)?;
    let Value::Object(fields) = value else {
        return Err(HeaderError::NotAnObject);
    };

    let id = match fields.get("id") {
        None => 0,
        Some(id) => message_id(id).ok_or_else(|| HeaderError::InvalidId(id.clone()))?,
    };

    headers.fields = fields.into_iter().collect();
    Ok(id)
}

fn message_id(value: &Value) -> Option<i64> {
    match value {
        Value::Null => Some(0),
        Value::Bool(flag) => Some(i64::from(*flag)),
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_and_fields() {
        let mut headers = RequestHeaders::default();
        let id = parse_request(
            br#"{"id": 7, "method": "mining.subscribe", "params": []}"#,
            &mut headers,
        )
        .unwrap();

        assert_eq!(id, 7);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.method(), Some("mining.subscribe"));
    }

    #[test]
    fn malformed_json_leaves_headers_alone() {
        let mut headers = RequestHeaders::default();
        parse_request(br#"{"id": 1, "method": "a"}"#, &mut headers).unwrap();

        let err = parse_request(b"{\"id\": ", &mut headers).unwrap_err();
        assert!(matches!(err, HeaderError::Json(_)));
        assert_eq!(headers.method(), Some("a"));
    }

    #[test]
    fn non_object_is_rejected() {
        let mut headers = RequestHeaders::default();
        assert!(matches!(
            parse_request(b"[1, 2]", &mut headers),
            Err(HeaderError::NotAnObject)
        ));
    }

    #[test]
    fn absent_or_null_id_reads_as_zero() {
        let mut headers = RequestHeaders::default();
        assert_eq!(parse_request(br#"{"method": "x"}"#, &mut headers).unwrap(), 0);
        assert_eq!(headers.method(), Some("x"));
        assert_eq!(parse_request(br#"{"id": null}"#, &mut headers).unwrap(), 0);
    }

    #[test]
    fn numeric_ids_are_coerced() {
        let mut headers = RequestHeaders::default();
        assert_eq!(parse_request(br#"{"id": 1.9}"#, &mut headers).unwrap(), 1);
        assert_eq!(parse_request(br#"{"id": -2.5}"#, &mut headers).unwrap(), -2);
        assert_eq!(parse_request(br#"{"id": true}"#, &mut headers).unwrap(), 1);
    }

    #[test]
    fn text_id_is_rejected() {
        let mut headers = RequestHeaders::default();
        assert!(matches!(
            parse_request(br#"{"id": "seven"}"#, &mut headers),
            Err(HeaderError::InvalidId(_))
        ));
        assert!(matches!(
            parse_request(br#"{"id": [1]}"#, &mut headers),
            Err(HeaderError::InvalidId(_))
        ));
        assert!(headers.is_empty());
    }
}

//! Media handlers: how `Response::media` serializes a payload for the configured
//! media type.
use serde_json::Value as JsonValue;

use crate::core::error::UnsupportedMediaType;

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain";

/// Serializer bound to a content type.
#[derive(Debug, Clone, Copy)]
pub struct MediaHandler {
    media_type: &'static str,
    encode: fn(&JsonValue) -> Vec<u8>,
}

impl MediaHandler {
    /// Look up the handler registered for `media_type`.
    pub fn for_media_type(media_type: &str) -> Result<Self, UnsupportedMediaType> {
        HANDLERS
            .iter()
            .find(|handler| handler.media_type == media_type)
            .copied()
            .ok_or_else(|| UnsupportedMediaType {
                media_type: media_type.to_string(),
                available: HANDLERS.iter().map(|h| h.media_type.to_string()).collect(),
            })
    }

    pub fn json() -> Self {
        HANDLERS[0]
    }

    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    /// Content-Type header value, with a charset for textual types.
    pub fn content_type(&self) -> String {
        format!("{}; charset=utf-8", self.media_type)
    }

    pub fn encode(&self, value: &JsonValue) -> Vec<u8> {
        (self.encode)(value)
    }
}

impl Default for MediaHandler {
    fn default() -> Self {
        Self::json()
    }
}

const HANDLERS: [MediaHandler; 2] = [
    MediaHandler {
        media_type: APPLICATION_JSON,
        encode: encode_json,
    },
    MediaHandler {
        media_type: TEXT_PLAIN,
        encode: encode_text,
    },
];

fn encode_json(value: &JsonValue) -> Vec<u8> {
    value.to_string().into_bytes()
}

fn encode_text(value: &JsonValue) -> Vec<u8> {
    match value {
        JsonValue::String(text) => text.clone().into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(
            MediaHandler::for_media_type("text/plain").unwrap().media_type(),
            TEXT_PLAIN
        );
        let err = MediaHandler::for_media_type("application/xml").unwrap_err();
        assert_eq!(err.available, vec![APPLICATION_JSON, TEXT_PLAIN]);
    }

    #[test]
    fn test_encoders() {
        let json_handler = MediaHandler::json();
        assert_eq!(json_handler.encode(&json!({"a": 1})), br#"{"a":1}"#.to_vec());
        assert_eq!(json_handler.content_type(), "application/json; charset=utf-8");

        let text = MediaHandler::for_media_type(TEXT_PLAIN).unwrap();
        assert_eq!(text.encode(&json!("hello")), b"hello".to_vec());
    }
}

//! Server-sent events for [`Response::event_stream`](crate::core::Response::event_stream).
use std::fmt;

use bytes::Bytes;
use serde::Serialize;

/// One event of a `text/event-stream` response.
///
/// ```
/// use panino::core::ServerSentEvent;
///
/// let event = ServerSentEvent::new().name("tick").id(3).data("a\nb");
/// assert_eq!(event.to_string(), "id: 3\nevent: tick\ndata: a\ndata: b\n\n");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSentEvent {
    id: Option<String>,
    name: Option<String>,
    data: Option<String>,
}

impl ServerSentEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event payload; each line becomes its own `data:` field.
    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Payload serialized as JSON, replacing any previous data.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> serde_json::Result<Self> {
        Ok(self.data(serde_json::to_string(value)?))
    }

    pub fn id(mut self, id: impl ToString) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Event type, sent as the `event:` field.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for ServerSentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.id {
            writeln!(f, "id: {id}")?;
        }
        if let Some(name) = &self.name {
            writeln!(f, "event: {name}")?;
        }
        if let Some(data) = &self.data {
            for line in data.lines() {
                writeln!(f, "data: {line}")?;
            }
        }
        writeln!(f)
    }
}

impl From<ServerSentEvent> for Bytes {
    fn from(event: ServerSentEvent) -> Self {
        Bytes::from(event.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_fields_in_wire_order() {
        let event = ServerSentEvent::new().data("hello").name("greeting").id("7");
        assert_eq!(event.to_string(), "id: 7\nevent: greeting\ndata: hello\n\n");
    }

    #[test]
    fn test_multiline_data_splits_into_fields() {
        let event = ServerSentEvent::new().data("first\nsecond");
        assert_eq!(event.to_string(), "data: first\ndata: second\n\n");
    }

    #[test]
    fn test_json_payload() {
        let event = ServerSentEvent::new().json(&json!({"count": 2})).unwrap();
        assert_eq!(Bytes::from(event), Bytes::from_static(b"data: {\"count\":2}\n\n"));
    }
}

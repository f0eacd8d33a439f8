use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// A single message travelling through the broker.
///
/// `data` is the payload: raw JSON text that is carried verbatim and never
/// re-encoded, so a subscriber receives exactly the bytes the publisher sent.
/// `source` identifies the publishing client or session and `topic` names the
/// channel the message was published on. The same three fields form the wire
/// frame on both the TCP protocol and the SSE stream.
///
/// A message is immutable once constructed; fan-out clones it into each
/// subscriber channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub data: Box<RawValue>,
    pub source: String,
    pub topic: String,
}

impl Message {
    pub fn new(source: &str, topic: &str, data: Box<RawValue>) -> Self {
        Self {
            data,
            source: source.to_string(),
            topic: topic.to_string(),
        }
    }
}

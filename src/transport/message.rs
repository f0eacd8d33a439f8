use serde::Deserialize;

/// First frame a client sends on the subscribe port.
///
/// Only `topic` is required; when `source` is missing the handler generates a
/// unique subscriber id. Publish-port frames are full
/// [`Message`](crate::broker::Message)s instead.
#[derive(Debug, Deserialize)]
pub struct SubscribeFrame {
    #[serde(default)]
    pub source: Option<String>,
    pub topic: String,
}

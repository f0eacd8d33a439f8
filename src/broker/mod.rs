//! The `broker` module contains the pub/sub engine: the registry mapping
//! topics to subscriber channels and the fan-out logic that copies each
//! published message to every subscriber of its topic.
//!
//! The engine knows nothing about transports. Transports hold the engine
//! behind the narrow [`Publisher`] and [`Subscriber`] traits and only ever
//! receive channel handles, never the registry itself.

pub mod engine;
pub mod message;

pub use engine::{DataChannel, PubSub, Publisher, Subscriber, SubscriberId};
pub use message::Message;

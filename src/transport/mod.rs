//! The `transport` module is responsible for handling network communication
//! with clients and peer brokers.
//!
//! Two front ends share the same engine: an HTTP server exposing publish as
//! POST and subscribe as a server-sent event stream (plus federation to
//! discovered peers), and a pair of raw TCP listeners speaking self-delimiting
//! JSON frames, one for publishers and one for subscribers.

pub mod frame;
pub mod http;
pub mod message;
pub mod tcp;


#[cfg(test)]
mod http_tests;

//! # netsub
//!
//! `netsub` is a lightweight, topic-based publish/subscribe broker built with Rust.
//! Clients can attach over HTTP (publish via POST, subscribe as a server-sent
//! event stream) or over a raw TCP protocol that speaks plain JSON frames.
//! Broker instances on the same network discover each other over UDP broadcast
//! and federate: a message published on one node fans out to subscribers on
//! every known peer.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: The pub/sub engine that manages topics, subscriptions and message fan-out.
//! - `transport`: The HTTP and TCP front ends that translate wire bytes into engine calls.
//! - `discovery`: UDP broadcast peer discovery feeding the federation forwarder.
//! - `config`: Handles loading and managing server configuration.
//! - `utils`: Contains shared utilities, such as error types and logging setup.

pub mod broker;
pub mod config;
pub mod discovery;
pub mod transport;
pub mod utils;

//! Client library for the Lavalink audio node.
//!
//! Owns the node's WebSocket control channel (with reconnection and backoff),
//! a registry of per-guild audio players kept in sync with the voice gateway,
//! the REST track lookup, and the binary track-identifier decoder.

#[macro_use] extern crate log;
#[macro_use] extern crate percent_encoding;
#[macro_use] extern crate serde_derive;

extern crate base64;
extern crate byteorder;
extern crate evzht9h3nznqzwl as websocket;
extern crate futures;
extern crate hyper;
extern crate serde;
extern crate serde_json;
extern crate tokio_core;

pub mod decoder;
pub mod model;
pub mod nodes;
pub mod opcodes;
pub mod player;
pub mod rest;
pub mod stats;

mod error;
mod event_handler;

#[cfg(test)]
mod test_support;

pub use self::decoder::Track;
pub use self::error::Error;
pub use self::event_handler::EventHandler;

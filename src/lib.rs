//! Live mirror of an Ethereum node's mempool.
//!
//! The engine polls `txpool_content` on an upstream node, maintains its own
//! pending and queued pools behind single-writer actors, classifies every
//! transaction it sees (new, stuck, unstuck, confirmed, dropped, duplicate
//! nonce), publishes lifecycle events on a topic bus and gossips raw
//! transactions to peers over a length-prefixed stream protocol.

pub mod config;
pub mod models;
pub mod net;
pub mod poller;
pub mod pool;
pub mod providers;
pub mod pubsub;
pub mod supervisor;

/// Module for the upstream JSON-RPC node client.
pub mod node;

/// Module for the canonical transaction record and its codecs.
pub mod transaction;

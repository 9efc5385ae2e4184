//! dovepub: peer synchronization for a personal append-only log
//!
//! # Usage
//! Run the `dovepub` binary, or build an [`engine::Engine`] from a
//! [`store::RecordStore`] and a [`config::ConfigStore`].

pub mod backoff;
pub mod config;
pub mod engine;
pub mod follows;
pub mod gossip;
pub mod ingest;
pub mod monitor;
pub mod parser {
	pub mod token;
	pub mod yaml;
}
pub mod peer;
pub mod pubs;
pub mod server;
pub mod store;
pub mod sweep;

//! An in-memory key-value server speaking the Redis wire protocol (RESP).
//!
//! - [`resp`] and [`connection`] decode and encode frames.
//! - [`command`] turns request frames into commands and runs them.
//! - [`store`] holds the data, with per-key expiration.
//! - [`peer`] owns one client connection.
//! - [`server`] accepts connections and runs the dispatch loop, the single
//!   task through which every command and connection event flows.
//! - [`config`] is the command-line interface and [`client`] a small client
//!   used by the tests.

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod peer;
pub mod resp;
pub mod server;
pub mod store;

//! fileup: single-port TCP file upload server and client
//!
//! The server multiplexes every connection on one `mio` reactor and runs the
//! per-connection upload steps on a fixed pool of worker threads.

pub mod cli;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod logger;
pub mod pool;
pub mod progress;
pub mod protocol;
pub mod reactor;
pub mod registry;
pub mod server;
pub mod task;
pub mod upload;

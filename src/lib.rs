//! spark: a small static HTTP server for a directory, a file or a literal
//! string, with glob based access denial, CORS and opportunistic HTTPS.

pub mod args;
pub mod bootstrap;
pub mod config;
pub mod deny;
pub mod error;
pub mod fs;
pub mod handler;
pub mod http;
pub mod logging;
pub mod server;
pub mod tls;

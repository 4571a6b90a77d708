use http::StatusCode;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::args::Args;
use crate::deny::DenyList;
use crate::error::Error;

/// Everything the server needs, fixed once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub ssl_port: u16,
    /// URL path prefix, always starting with `/`.
    pub path: String,
    pub deny: DenyList,
    pub status: StatusCode,
    pub origin: String,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub target: OsString,
}

impl Config {
    /// `address:port` for the plain listener.
    pub fn listen_addr(&self) -> String {
        join_host_port(&self.address, self.port)
    }

    /// `address:sslPort` for the TLS listener.
    pub fn tls_listen_addr(&self) -> String {
        join_host_port(&self.address, self.ssl_port)
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl TryFrom<Args> for Config {
    type Error = Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.path.contains(['?', '#']) {
            return Err(Error::InvalidPrefix(args.path));
        }
        let mut path = args.path;
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        Ok(Self {
            address: args.address,
            port: args.port,
            ssl_port: args.ssl_port,
            path,
            deny: DenyList::parse(&args.deny),
            status: args.status,
            origin: args.origin,
            cert: args.cert,
            key: args.key,
            target: args.target,
        })
    }
}

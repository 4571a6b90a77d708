use std::io;
use std::path::PathBuf;

/// Failures that stop a listener from starting or keep running.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read `{}`: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("Listener on {addr} stopped: {source}")]
    Serve { addr: String, source: io::Error },
    #[error("Invalid PEM in `{}`: {source}", path.display())]
    Pem {
        path: PathBuf,
        source: rustls::pki_types::pem::Error,
    },
    #[error("No certificates found in `{}`", .0.display())]
    NoCertificates(PathBuf),
    #[error("TLS configuration rejected: {0}")]
    Tls(#[from] rustls::Error),
    #[error("Invalid path prefix `{0}`: it must not contain `?` or `#`")]
    InvalidPrefix(String),
}

pub type Result<T> = std::result::Result<T, Error>;

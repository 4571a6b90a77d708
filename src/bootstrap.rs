//! Startup: decide what to serve, build the handler chain and start the
//! listeners.

use bytes::Bytes;
use log::info;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::{DirFileSystem, GuardedFileSystem};
use crate::handler::{BodyResponder, Cors, FileServer, Handler, Mount, StripPrefix};
use crate::log_error;
use crate::logging::LoggingExt;
use crate::server::Server;
use crate::tls;

/// What the positional argument turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeTarget {
    Directory(PathBuf),
    File(PathBuf),
    /// Served byte for byte; it need not be UTF-8.
    Literal(Bytes),
}

impl ServeTarget {
    /// Looks at the filesystem once. Anything that is not a directory or a
    /// regular file, including a path that does not exist, is literal text.
    pub fn resolve(arg: impl AsRef<OsStr>) -> Self {
        let arg = arg.as_ref();
        match fs::metadata(arg) {
            Ok(meta) if meta.is_dir() => Self::Directory(PathBuf::from(arg)),
            Ok(meta) if meta.is_file() => Self::File(PathBuf::from(arg)),
            _ => Self::Literal(Bytes::copy_from_slice(arg.as_encoded_bytes())),
        }
    }
}

impl fmt::Display for ServeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(path) => write!(f, "directory {}", path.display()),
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Literal(text) => write!(f, "literal {:?}", String::from_utf8_lossy(text)),
        }
    }
}

pub fn build_handler(config: &Config, target: &ServeTarget) -> Result<Arc<dyn Handler>> {
    let handler: Arc<dyn Handler> = match target {
        ServeTarget::Directory(root) => {
            if config.deny.is_empty() {
                log::warn!("Serving files without any filter!");
            }
            let fs = GuardedFileSystem::new(DirFileSystem::new(root), config.deny.clone());
            let files = StripPrefix::new(&config.path, FileServer::new(fs));
            Arc::new(Mount::new(&config.path, Cors::new(&config.origin, files)))
        }
        ServeTarget::File(path) => {
            let body = path
                .display()
                .log_operation("read", || fs::read(path))
                .map_err(|source| Error::Read {
                    path: path.clone(),
                    source,
                })?;
            let responder = BodyResponder::new(body, config.status);
            Arc::new(Mount::new(&config.path, Cors::new(&config.origin, responder)))
        }
        ServeTarget::Literal(text) => {
            let responder = BodyResponder::new(text.clone(), config.status);
            Arc::new(Mount::new(&config.path, Cors::new(&config.origin, responder)))
        }
    };
    Ok(handler)
}

/// Starts the HTTPS listener in the background when the certificate and key
/// are usable. Every failure here leaves plain HTTP running on its own.
pub fn spawn_tls_listener(config: &Config, handler: Arc<dyn Handler>) -> Option<SocketAddr> {
    if !tls::material_present(&config.cert, &config.key) {
        info!(
            "No TLS material at {} / {}, HTTPS disabled",
            config.cert.display(),
            config.key.display()
        );
        return None;
    }

    let started = tls::load_server_config(&config.cert, &config.key).and_then(|tls_config| {
        let server = Server::bind(config.tls_listen_addr(), handler)?;
        Ok((server, tls_config))
    });
    let (server, tls_config) = match started {
        Ok(started) => started,
        Err(e) => {
            log_error!(e, "HTTPS disabled");
            return None;
        }
    };

    let addr = match server.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            log_error!(e, "HTTPS disabled");
            return None;
        }
    };
    info!("Serving HTTPS on {}{}", addr, config.path);
    thread::spawn(move || {
        if let Err(e) = server.run_tls(tls_config) {
            log_error!(e, "HTTPS listener stopped");
        }
    });
    Some(addr)
}

/// Everything short of accepting plain connections: the returned server is
/// bound and the HTTPS listener, if any, is already running.
pub fn bind(config: &Config) -> Result<Server> {
    let target = ServeTarget::resolve(&config.target);
    let handler = build_handler(config, &target)?;

    spawn_tls_listener(config, handler.clone());

    let server = Server::bind(config.listen_addr(), handler)?;
    info!("Serving {} on {}{}", target, config.listen_addr(), config.path);
    Ok(server)
}

pub fn run(config: &Config) -> Result<()> {
    bind(config)?.run()
}

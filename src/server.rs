use rustls::{ServerConfig, ServerConnection, StreamOwned};
use std::fmt::Display;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use http::Method;

use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::http::{read_request, RequestError, Response};
use crate::{log_error, log_request, log_response};

/// A bound listener that hands every connection to its own thread.
pub struct Server {
    listener: TcpListener,
    addr: String,
    handler: Arc<dyn Handler>,
}

impl Server {
    pub fn bind<A: ToSocketAddrs + Display>(addr: A, handler: Arc<dyn Handler>) -> Result<Self> {
        let listener = TcpListener::bind(&addr).map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            addr: addr.to_string(),
            handler,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves plain HTTP until the listener fails.
    pub fn run(self) -> Result<()> {
        self.accept_loop(|mut stream, handler| handle_connection(&mut stream, &*handler))
    }

    /// Serves HTTPS until the listener fails.
    pub fn run_tls(self, config: Arc<ServerConfig>) -> Result<()> {
        self.accept_loop(move |stream, handler| {
            let conn = ServerConnection::new(config.clone()).map_err(io::Error::other)?;
            let mut tls = StreamOwned::new(conn, stream);
            let served = handle_connection(&mut tls, &*handler);
            tls.conn.send_close_notify();
            served.and(tls.flush())
        })
    }

    fn accept_loop<F>(self, serve: F) -> Result<()>
    where
        F: Fn(TcpStream, Arc<dyn Handler>) -> io::Result<()> + Send + Sync + 'static,
    {
        let serve = Arc::new(serve);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) if is_transient(&e) => {
                    log::warn!("Failed to accept connection on {}: {}", self.addr, e);
                    continue;
                }
                Err(source) => {
                    return Err(Error::Serve {
                        addr: self.addr,
                        source,
                    })
                }
            };

            let peer = stream
                .peer_addr()
                .map_or_else(|_| "unknown peer".to_string(), |a| a.to_string());
            let handler = self.handler.clone();
            let serve = serve.clone();
            thread::spawn(move || {
                log::debug!("New connection from {}", peer);
                if let Err(e) = serve(stream, handler) {
                    log::debug!("Connection from {} ended with an error: {}", peer, e);
                }
            });
        }
        Ok(())
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Reads one request from `stream`, answers it and returns.
pub fn handle_connection<S: Read + Write>(stream: &mut S, handler: &dyn Handler) -> io::Result<()> {
    let start = Instant::now();
    let parsed = {
        let mut reader = BufReader::new(&mut *stream);
        read_request(&mut reader)
    };

    let (response, head_only) = match parsed {
        Ok(request) => {
            log_request!(request);
            (handler.serve(&request), request.method == Method::HEAD)
        }
        Err(RequestError::Closed) => return Ok(()),
        Err(RequestError::Io(e)) => return Err(e),
        Err(e) => {
            log::debug!("Rejecting malformed request: {}", e);
            (Response::bad_request(), false)
        }
    };

    if let Err(e) = response.write_to(&mut *stream, head_only) {
        log_error!(e, "Failed to send response");
        return Err(e);
    }
    log_response!(response.status, start.elapsed(), response.body.len());
    Ok(())
}

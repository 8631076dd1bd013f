use std::io::{self, BufReader, BufWriter};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use http::StatusCode;
use may::coroutine::{self, JoinHandle};
use may::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::exchange::{write_error_response, StreamExchange};
use super::request::{RequestError, RequestLimits};
use crate::dispatcher::Dispatcher;
use crate::exchange::Exchange;
use crate::runtime_config::RuntimeConfig;

/// Minimal HTTP/1.1 server feeding a [`Dispatcher`].
///
/// Each accepted connection gets its own coroutine and carries exactly one
/// request.
pub struct HttpServer {
    dispatcher: Dispatcher,
    limits: RequestLimits,
    stack_size: usize,
}

impl HttpServer {
    /// Server using `BRRTR_STACK_SIZE` for connection coroutines.
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            limits: RequestLimits::default(),
            stack_size: RuntimeConfig::from_env().stack_size,
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Bind `addr` and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let stopping = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stopping);
        let stack_size = self.stack_size;
        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The accept loop owns everything it touches and never blocks the
        // carrier thread outside may's own I/O.
        let handle = unsafe {
            coroutine::Builder::new()
                .name("brrtcore-accept".to_string())
                .stack_size(stack_size)
                .spawn(move || self.accept_loop(&listener, &flag))
        }?;

        // N1: Server listening
        info!(addr = %local_addr, stack_size, "HTTP server listening");
        Ok(ServerHandle {
            addr: local_addr,
            stopping,
            handle,
        })
    }

    fn accept_loop(self, listener: &TcpListener, stopping: &AtomicBool) {
        loop {
            let accepted = listener.accept();
            if stopping.load(Ordering::Acquire) {
                break;
            }
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            };
            let dispatcher = self.dispatcher.clone();
            let limits = self.limits.clone();
            // SAFETY: as above; the connection coroutine owns its stream and
            // a clone of the dispatcher.
            let spawned = unsafe {
                coroutine::Builder::new()
                    .stack_size(self.stack_size)
                    .spawn(move || serve_connection(&dispatcher, &limits, stream, peer))
            };
            if let Err(e) = spawned {
                warn!(peer = %peer, error = %e, "Failed to spawn connection coroutine");
            }
        }
        // N2: Accept loop finished
        info!("HTTP server stopped accepting");
    }
}

/// Read one request from `stream`, dispatch it, then close the connection.
fn serve_connection(
    dispatcher: &Dispatcher,
    limits: &RequestLimits,
    mut stream: TcpStream,
    peer: SocketAddr,
) {
    let halves = stream.try_clone().and_then(|r| Ok((r, stream.try_clone()?)));
    let (reader, writer) = match halves {
        Ok(halves) => halves,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Failed to clone connection");
            return;
        }
    };

    match StreamExchange::read(
        Box::new(BufReader::new(reader)),
        Box::new(BufWriter::new(writer)),
        Some(peer),
        limits,
    ) {
        Ok(mut exchange) => {
            let outcome = dispatcher.dispatch(&mut exchange);
            if let Err(e) = exchange.close() {
                debug!(request_id = %outcome.request_id, error = %e, "Connection flush failed");
            }
        }
        Err(RequestError::Eof) => {}
        Err(e) => {
            let status = rejection_status(&e);
            // N3: Request rejected before dispatch
            debug!(peer = %peer, error = %e, status = ?status, "Rejected request");
            if let Some(status) = status {
                if let Err(e) = write_error_response(&mut stream, status) {
                    debug!(peer = %peer, error = %e, "Failed to write rejection");
                }
            }
        }
    }

    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!(peer = %peer, error = %e, "Connection shutdown failed");
    }
}

fn rejection_status(err: &RequestError) -> Option<StatusCode> {
    match err {
        RequestError::Eof | RequestError::Io(_) => None,
        RequestError::LineTooLong(_) | RequestError::TooManyHeaders(_) => {
            Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE)
        }
        RequestError::BodyTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
        RequestError::UnsupportedEncoding => Some(StatusCode::NOT_IMPLEMENTED),
        RequestError::Malformed(_) => Some(StatusCode::BAD_REQUEST),
    }
}

/// Handle to a running [`HttpServer`].
pub struct ServerHandle {
    addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address; useful after binding port 0.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready to accept connections
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` error if the server doesn't become ready within ~250ms (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if StdTcpStream::connect(self.connect_addr()).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting and wait for the accept loop to exit.
    ///
    /// Connections already being served run to completion.
    pub fn stop(self) {
        self.stopping.store(true, Ordering::Release);
        // wake the blocked accept
        if let Err(e) = StdTcpStream::connect(self.connect_addr()) {
            warn!(addr = %self.addr, error = %e, "Failed to wake accept loop");
        }
        if self.handle.join().is_err() {
            warn!(addr = %self.addr, "Accept loop panicked");
        }
    }

    /// Block until the accept loop finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept loop panicked.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }

    fn connect_addr(&self) -> SocketAddr {
        let mut addr = self.addr;
        if addr.ip().is_unspecified() {
            match addr {
                SocketAddr::V4(_) => addr.set_ip(Ipv4Addr::LOCALHOST.into()),
                SocketAddr::V6(_) => addr.set_ip(Ipv6Addr::LOCALHOST.into()),
            }
        }
        addr
    }
}

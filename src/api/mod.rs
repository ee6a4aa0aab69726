//! WebSocket endpoint serving the frame pipeline.
//!
//! One accept thread hands each connection to its own thread. Connection
//! threads own their `ConnectionContext`; the only shared state is the
//! pipeline (and its detector), the shutdown flag and the connection count.

use anyhow::{anyhow, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::{Message, WebSocket};

use crate::config::RelayConfig;
use crate::pipeline::{ConnectionContext, FramePipeline};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_POLL: Duration = Duration::from_millis(250);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// A client that stops reading fails the send instead of pinning the thread.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub path: String,
    pub max_connections: Option<usize>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            path: "/ws".to_string(),
            max_connections: None,
        }
    }
}

impl From<&RelayConfig> for ApiConfig {
    fn from(cfg: &RelayConfig) -> Self {
        Self {
            addr: cfg.addr.clone(),
            path: cfg.path.clone(),
            max_connections: cfg.max_connections,
        }
    }
}

#[derive(Debug)]
pub struct StreamHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    join: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Signal every loop to exit and wait for them.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    cfg: ApiConfig,
    pipeline: Arc<FramePipeline>,
}

impl StreamServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<FramePipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<StreamHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let server = Server {
            cfg: self.cfg,
            pipeline: self.pipeline,
            shutdown: shutdown.clone(),
            active: active.clone(),
            next_id: AtomicU64::new(1),
        };
        let join = std::thread::spawn(move || {
            if let Err(err) = server.run(listener) {
                log::error!("stream server stopped: {}", err);
            }
        });

        Ok(StreamHandle {
            addr,
            shutdown,
            active,
            join: Some(join),
        })
    }
}

struct Server {
    cfg: ApiConfig,
    pipeline: Arc<FramePipeline>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl Server {
    fn run(&self, listener: TcpListener) -> Result<()> {
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let result = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break Ok(());
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    workers.retain(|worker| !worker.is_finished());
                    match self.spawn_connection(stream, peer) {
                        Ok(worker) => workers.push(worker),
                        Err(err) => log::warn!("connection from {} dropped: {}", peer, err),
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                    continue;
                }
                Err(err) => break Err(err.into()),
            }
        };
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in workers {
            let _ = worker.join();
        }
        result
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<JoinHandle<()>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

        let slot = ConnectionSlot::acquire(self.active.clone());
        let over_capacity = self
            .cfg
            .max_connections
            .is_some_and(|max| slot.position > max);
        let conn = Connection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            peer,
            path: self.cfg.path.clone(),
            over_capacity,
            pipeline: self.pipeline.clone(),
            shutdown: self.shutdown.clone(),
            _slot: slot,
        };
        Ok(std::thread::spawn(move || conn.serve(stream)))
    }
}

/// Counts a live connection until dropped.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
    /// 1-based position among live connections at acquire time.
    position: usize,
}

impl ConnectionSlot {
    fn acquire(active: Arc<AtomicUsize>) -> Self {
        let position = active.fetch_add(1, Ordering::SeqCst) + 1;
        Self { active, position }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Connection {
    id: u64,
    peer: SocketAddr,
    path: String,
    over_capacity: bool,
    pipeline: Arc<FramePipeline>,
    shutdown: Arc<AtomicBool>,
    _slot: ConnectionSlot,
}

impl Connection {
    fn serve(self, stream: TcpStream) {
        let mut websocket = match self.handshake(stream) {
            Ok(websocket) => websocket,
            Err(err) => {
                log::warn!("connection {} from {} rejected: {}", self.id, self.peer, err);
                return;
            }
        };
        log::info!("connection {} opened from {}", self.id, self.peer);

        let mut ctx = self.pipeline.new_context();
        match self.relay(&mut websocket, &mut ctx) {
            Ok(()) => log::info!(
                "connection {} closed after {} frames",
                self.id,
                ctx.frames_decoded()
            ),
            Err(err) => log::warn!(
                "connection {} ended after {} frames: {}",
                self.id,
                ctx.frames_decoded(),
                err
            ),
        }
    }

    fn handshake(&self, stream: TcpStream) -> Result<WebSocket<TcpStream>> {
        let path = self.path.as_str();
        let over_capacity = self.over_capacity;
        let callback = |request: &Request, response: Response| {
            if request.uri().path() != path {
                return Err(error_response(StatusCode::NOT_FOUND, "not found"));
            }
            if over_capacity {
                return Err(error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "too many connections",
                ));
            }
            Ok(response)
        };
        let websocket = tungstenite::accept_hdr(stream, callback)
            .map_err(|e| anyhow!("websocket handshake failed: {}", e))?;
        set_stream_timeouts(websocket.get_ref())?;
        Ok(websocket)
    }

    fn relay(
        &self,
        websocket: &mut WebSocket<TcpStream>,
        ctx: &mut ConnectionContext,
    ) -> Result<()> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                let _ = websocket.close(None);
                let _ = websocket.flush();
                return Ok(());
            }
            let outcome = match websocket.read() {
                Ok(Message::Text(text)) => self.pipeline.process_text(ctx, &text),
                Ok(Message::Binary(bytes)) => self.pipeline.process_bytes(ctx, &bytes),
                // Close replies are queued by tungstenite and flushed on the next read.
                Ok(_) => continue,
                Err(tungstenite::Error::Io(err))
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => return Ok(()),
                Err(err) => return Err(err.into()),
            };

            match outcome {
                Ok(Some(response)) => websocket.send(Message::Text(response.to_json()?))?,
                Ok(None) => {}
                Err(err) => log::warn!("connection {}: frame skipped: {:#}", self.id, err),
            }
        }
    }
}

fn set_stream_timeouts(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_read_timeout(Some(READ_POLL))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))
}

fn error_response(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

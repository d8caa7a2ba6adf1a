//! Protocol server
//!
//! Serves one peer over a pair of byte streams (stdin/stdout in production).
//! Requests are handled strictly one at a time and answered in arrival order.

use crate::dispatch::Dispatcher;
use crate::error::TransportError;
use crate::plugins::Registry;
use crate::protocol::{
    decode_request, encode_frame, FrameError, Handshake, Request, RequestKind, Response,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Handshaking,
    Serving,
    Closed,
}

/// Why a session ended without a transport error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side of the stream
    PeerClosed,
    /// A termination signal arrived while waiting for a request
    Shutdown,
}

pub struct ProtocolServer {
    name: String,
    version: String,
    dispatcher: Dispatcher,
    state: ServerState,
}

impl ProtocolServer {
    pub fn new(name: &str, version: &str, registry: Arc<Registry>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            dispatcher: Dispatcher::new(registry),
            state: ServerState::Idle,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Run one session until EOF, a transport error or `shutdown` resolves.
    ///
    /// `shutdown` is only polled while waiting for the next request, so a
    /// response already in progress is always written out.
    pub async fn run<R, W, S>(
        &mut self,
        reader: R,
        writer: W,
        shutdown: S,
    ) -> Result<CloseReason, TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let outcome = self.serve(reader, writer, shutdown).await;
        self.state = ServerState::Closed;
        outcome
    }

    async fn serve<R, W, S>(
        &mut self,
        reader: R,
        mut writer: W,
        shutdown: S,
    ) -> Result<CloseReason, TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        self.state = ServerState::Handshaking;
        write_frame(&mut writer, &Handshake::new(&self.name, &self.version)).await?;
        self.state = ServerState::Serving;

        info!(
            "Serving {} tools as '{}' v{}",
            self.dispatcher.registry().len(),
            self.name,
            self.version
        );

        let mut reader = BufReader::new(reader);
        let mut frame = Vec::new();
        tokio::pin!(shutdown);

        loop {
            frame.clear();
            // read_until keeps partial input in `frame` if the select drops it
            let read = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing session");
                    return Ok(CloseReason::Shutdown);
                }
                read = reader.read_until(b'\n', &mut frame) => read,
            };

            match read {
                Ok(0) => {
                    info!("Peer closed the stream, shutting down");
                    return Ok(CloseReason::PeerClosed);
                }
                Ok(_) => {}
                Err(e) => return Err(TransportError::Read(e)),
            }

            let response = match std::str::from_utf8(&frame) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    self.handle_line(line).await
                }
                Err(e) => {
                    warn!("Rejected request frame: not valid UTF-8");
                    Response::invalid(FrameError::new(None, format!("Invalid UTF-8: {}", e)))
                }
            };
            write_frame(&mut writer, &response).await?;
        }
    }

    /// Produce the response for one request line
    async fn handle_line(&self, line: &str) -> Response {
        match decode_request(line) {
            Ok(Request {
                id,
                kind: RequestKind::ListTools,
            }) => {
                debug!("Listing tools");
                Response::tools(id, self.dispatcher.registry().list())
            }
            Ok(Request {
                id,
                kind: RequestKind::CallTool(call),
            }) => {
                debug!("Calling tool '{}'", call.tool_name);
                Response::call(id, self.dispatcher.dispatch(call).await)
            }
            Err(e) => {
                warn!("Rejected request frame: {}", e.message);
                Response::invalid(e)
            }
        }
    }
}

async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await.map_err(TransportError::Write)?;
    writer.flush().await.map_err(TransportError::Write)
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

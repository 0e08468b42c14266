//! Chat session API.
//!
//! One session is one tokio task driving one WebSocket channel:
//!
//! ```text
//!   Connecting ──▶ Open ──▶ Closing ──▶ Closed
//!                   │
//!                   ├── receive: frame → KeyExchange → actions
//!                   └── drain:   OutboundQueue → seal → frame
//! ```
//!
//! The two activities race; whichever finishes first ends the session and
//! the other is dropped. A bad frame never ends a session, only transport
//! failures, a peer close, or `stop()` do.
//!
//! # Invariants
//!
//! - The session key flows from receive to drain through a watch channel
//! - The socket sink is shared behind a mutex; frames are never interleaved
//! - `Drop` cancels the session if it was not stopped explicitly
//! - `Disconnected` is always the last status reported

use std::sync::Arc;
use std::time::Duration;

use confy_core::handshake::SEND_BEFORE_ESTABLISHED;
use confy_core::{Action, IdentityKey, KeyExchange, LocalIdentity, SessionKey, SignedCiphertext};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{self, FrameSink, FrameStream};
use crate::config::ChatConfig;
use crate::error::{QueueError, TransportError};
use crate::events::{ConnectionStatus, SessionEvents};
use crate::queue::{OutboundQueue, OutboundReceiver};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the channel.
    Connecting,
    /// Channel open, both activities running.
    Open,
    /// An activity finished, tearing down.
    Closing,
    /// Done. Terminal.
    Closed,
}

/// How an open channel ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    PeerClosed,
    Cancelled,
}

/// A running chat session.
///
/// Does not implement `Clone`. Share [`ChatSession::queue`] handles instead.
pub struct ChatSession {
    identity: Arc<LocalIdentity>,
    queue: OutboundQueue,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Validate `config` and spawn the session on the current tokio runtime.
    ///
    /// Returns as soon as the task is spawned; progress is reported through
    /// `events`. A fresh identity is generated for every session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is rejected, or
    /// `NoRuntime` if called outside a tokio runtime.
    pub fn start(
        config: ChatConfig,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let identity = Arc::new(LocalIdentity::generate());
        let cancel = CancellationToken::new();
        let (queue, outbound) = OutboundQueue::channel(cancel.clone());
        let session = SessionLoop::new(config, Arc::clone(&identity), events, cancel.clone());
        let state = session.subscribe();

        let task = runtime.spawn(async move {
            if let Err(e) = session.connect(outbound).await {
                debug!(error = %e, "session ended with error");
            }
        });

        Ok(Self {
            identity,
            queue,
            cancel,
            state,
            task: Some(task),
        })
    }

    /// A producer handle for the outbound queue.
    pub fn queue(&self) -> OutboundQueue {
        self.queue.clone()
    }

    /// Queue a message for sending.
    ///
    /// # Errors
    ///
    /// Returns `SessionStopped` once the session has stopped.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), QueueError> {
        self.queue.enqueue(text.into())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A receiver that observes lifecycle changes.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Our public key for this session.
    pub fn public_key(&self) -> &IdentityKey {
        self.identity.public_key()
    }

    /// Ask the session to stop. Callable from any thread; returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the session task, at most `timeout`.
    ///
    /// A task that overruns is aborted.
    pub async fn shutdown(mut self, timeout: Duration) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!("session task did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        // Defensive stop; the task winds down on its own.
        self.cancel.cancel();
    }
}

/// The session driver.
///
/// [`ChatSession`] owns one of these inside its task. Use it directly to
/// drive an already-open WebSocket of any transport.
pub struct SessionLoop {
    config: ChatConfig,
    identity: Arc<LocalIdentity>,
    events: Arc<dyn SessionEvents>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl SessionLoop {
    /// Create a driver in the `Connecting` state.
    pub fn new(
        config: ChatConfig,
        identity: Arc<LocalIdentity>,
        events: Arc<dyn SessionEvents>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            config,
            identity,
            events,
            cancel,
            state,
        }
    }

    /// A receiver that observes lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Open the configured channel, then run it.
    ///
    /// # Errors
    ///
    /// Returns the connection or transport error that ended the session.
    /// It has already been reported through `on_error`.
    pub async fn connect(self, outbound: OutboundReceiver) -> Result<(), TransportError> {
        let uri = self.config.channel_uri();
        info!(%uri, "connecting");

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            opened = channel::connect(&uri, self.config.connect_timeout) => Some(opened),
        };

        match opened {
            Some(Ok(ws)) => self.run_channel(ws, outbound).await,
            Some(Err(e)) => {
                warn!(error = %e, "could not open channel");
                self.events.on_error(&e.to_string());
                self.finish();
                Err(e)
            }
            None => {
                debug!("stopped before the channel opened");
                self.finish();
                Ok(())
            }
        }
    }

    /// Run the session over an open WebSocket until it ends.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the session. It has already
    /// been reported through `on_error`.
    pub async fn run_channel<S>(
        self,
        ws: WebSocketStream<S>,
        outbound: OutboundReceiver,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (sink, mut stream) = channel::split(ws);
        let sink = Mutex::new(sink);

        let mut exchange = KeyExchange::new(
            self.config.user_id.as_str(),
            self.config.recipient_id.as_str(),
            Arc::clone(&self.identity),
        )
        .with_plaintext_fallback(self.config.allow_plaintext_fallback);
        exchange.on_open();

        let (key_tx, key_rx) = watch::channel(None);

        self.state.send_replace(SessionState::Open);
        self.events.on_connection_status(ConnectionStatus::Connected);
        info!(peer = %self.config.recipient_id, "channel open");

        let result = tokio::select! {
            r = self.receive(&mut stream, &sink, &mut exchange, &key_tx) => r,
            r = self.drain(outbound, &sink, key_rx) => r,
        };

        self.state.send_replace(SessionState::Closing);
        sink.lock().await.close().await;

        let result = match result {
            Ok(Ended::PeerClosed) => {
                info!("channel closed by peer");
                self.events.on_connection_status(ConnectionStatus::Closed);
                Ok(())
            }
            Ok(Ended::Cancelled) => {
                info!("session stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "transport failure");
                self.events.on_error(&e.to_string());
                Err(e)
            }
        };

        self.finish();
        result
    }

    fn finish(&self) {
        self.events.on_connection_status(ConnectionStatus::Disconnected);
        self.state.send_replace(SessionState::Closed);
    }

    async fn receive<S>(
        &self,
        stream: &mut FrameStream<S>,
        sink: &Mutex<FrameSink<S>>,
        exchange: &mut KeyExchange,
        key_tx: &watch::Sender<Option<SessionKey>>,
    ) -> Result<Ended, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Ended::Cancelled),
                frame = stream.recv_frame() => frame?,
            };
            let Some(frame) = frame else {
                return Ok(Ended::PeerClosed);
            };

            let actions = exchange.on_frame(frame);

            // Follows the exchange both ways: set on establish, cleared when the peer leaves.
            if key_tx.borrow().as_ref() != exchange.session_key() {
                key_tx.send_replace(exchange.session_key().cloned());
            }

            for action in actions {
                match action {
                    Action::Send(frame) => sink.lock().await.send_frame(&frame).await?,
                    Action::Deliver { sender, text } => self.events.on_message(&sender, &text),
                    Action::Notice(text) => self.events.on_system_message(&text),
                    Action::Fault(e) => self.events.on_error(&e.to_string()),
                }
            }
        }
    }

    async fn drain<S>(
        &self,
        mut outbound: OutboundReceiver,
        sink: &Mutex<FrameSink<S>>,
        key_rx: watch::Receiver<Option<SessionKey>>,
    ) -> Result<Ended, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Ended::Cancelled),
                polled = tokio::time::timeout(self.config.poll_interval, outbound.recv()) => {
                    match polled {
                        Err(_) => continue,
                        Ok(Some(item)) => item,
                        Ok(None) => {
                            // Every producer is gone; keep receiving until stopped.
                            self.cancel.cancelled().await;
                            return Ok(Ended::Cancelled);
                        }
                    }
                }
            };

            let sealed = key_rx
                .borrow()
                .as_ref()
                .map(|key| SignedCiphertext::seal(key, &self.identity, item.as_str()));

            match sealed {
                Some(Ok(sealed)) => {
                    sink.lock().await.send_frame(&sealed.into_frame()).await?;
                }
                Some(Err(e)) => self.events.on_error(&e.to_string()),
                None => {
                    debug!("dropping outbound message, no session key yet");
                    self.events.on_system_message(SEND_BEFORE_ESTABLISHED);
                }
            }
        }
    }
}

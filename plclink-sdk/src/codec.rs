//! Message codec: frames messages over a [`Transport`] and routes inbound
//! messages to registered expectations.
//!
//! A single background reader task owns the inbound half of the framed
//! stream. Every decoded message is offered to the pending expectations in
//! registration order; the first whose predicate matches consumes it.
//! Messages nobody expects are forwarded to the default incoming queue.

use crate::{
    error::{CodecError, SpiError},
    transport::{BoxedIo, Transport},
};
use arc_swap::ArcSwapOption;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parking_lot::Mutex as SyncMutex;
use std::{sync::Arc, time::Duration};
use tokio::{
    select,
    sync::{mpsc, oneshot, watch, Mutex},
    time::{sleep_until, Instant},
};
use tokio_util::{
    codec::{Decoder, Encoder, Framed},
    sync::CancellationToken,
};
use tracing::{debug, error, trace, warn};

/// Framing codec usable by [`MessageCodec`].
pub trait FrameCodec<M>:
    Decoder<Item = M, Error = CodecError> + Encoder<M, Error = CodecError> + Clone + Send + Sync + 'static
{
}

impl<M, T> FrameCodec<M> for T where
    T: Decoder<Item = M, Error = CodecError>
        + Encoder<M, Error = CodecError>
        + Clone
        + Send
        + Sync
        + 'static
{
}

type Predicate<M> = Box<dyn Fn(&M) -> bool + Send + Sync>;
type MatchHandler<M> = Box<dyn FnOnce(M) -> Result<(), SpiError> + Send>;
type ErrorHandler = Box<dyn FnOnce(SpiError) + Send>;

/// A pending interest in one inbound message.
pub struct Expectation<M> {
    predicate: Predicate<M>,
    on_match: MatchHandler<M>,
    on_error: ErrorHandler,
    ttl: Duration,
    expires_at: Instant,
    cancel: Option<CancellationToken>,
}

impl<M> Expectation<M> {
    pub fn new<P, H, E>(predicate: P, on_match: H, on_error: E, ttl: Duration) -> Self
    where
        P: Fn(&M) -> bool + Send + Sync + 'static,
        H: FnOnce(M) -> Result<(), SpiError> + Send + 'static,
        E: FnOnce(SpiError) + Send + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            on_match: Box::new(on_match),
            on_error: Box::new(on_error),
            ttl,
            expires_at: Instant::now() + ttl,
            cancel: None,
        }
    }

    /// Drop the expectation (and report `Cancelled`) once `token` fires.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn fail(self, err: SpiError) {
        (self.on_error)(err)
    }
}

impl<M> std::fmt::Debug for Expectation<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expectation")
            .field("ttl", &self.ttl)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

enum Command<M> {
    Register(Expectation<M>),
    /// Re-scan for cancelled expectations
    Prune,
}

#[derive(Debug, Clone)]
pub struct MessageCodecConfig {
    /// Capacity of the queue receiving unmatched inbound messages
    pub incoming_capacity: usize,
}

impl Default for MessageCodecConfig {
    fn default() -> Self {
        Self {
            incoming_capacity: 64,
        }
    }
}

type Sink<M, C> = SplitSink<Framed<BoxedIo, C>, M>;

/// Request/response plumbing over one framed connection.
pub struct MessageCodec<M, C> {
    transport: Arc<dyn Transport>,
    codec: C,
    /// Single-writer discipline for the outbound half
    sink: Mutex<Option<Sink<M, C>>>,
    commands: ArcSwapOption<mpsc::UnboundedSender<Command<M>>>,
    reader_cancel: SyncMutex<Option<CancellationToken>>,
    running_tx: Arc<watch::Sender<bool>>,
    incoming_tx: mpsc::Sender<M>,
    incoming_rx: SyncMutex<Option<mpsc::Receiver<M>>>,
}

impl<M, C> MessageCodec<M, C>
where
    M: Send + 'static,
    C: FrameCodec<M>,
{
    pub fn new(transport: Arc<dyn Transport>, codec: C, config: MessageCodecConfig) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(config.incoming_capacity.max(1));
        let (running_tx, _) = watch::channel(false);
        Self {
            transport,
            codec,
            sink: Mutex::new(None),
            commands: ArcSwapOption::from(None),
            reader_cancel: SyncMutex::new(None),
            running_tx: Arc::new(running_tx),
            incoming_tx,
            incoming_rx: SyncMutex::new(Some(incoming_rx)),
        }
    }

    /// Whether the transport is connected and the reader task is alive.
    #[inline]
    pub fn is_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    /// Watch the running flag; flips to `false` when the reader exits.
    pub fn subscribe_running(&self) -> watch::Receiver<bool> {
        self.running_tx.subscribe()
    }

    /// Take the queue of inbound messages that matched no expectation.
    /// Only the first caller gets it.
    pub fn take_incoming(&self) -> Option<mpsc::Receiver<M>> {
        self.incoming_rx.lock().take()
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Open the transport and start the background reader.
    pub async fn connect(&self) -> Result<(), SpiError> {
        if self.is_running() {
            return Ok(());
        }
        let io = self.transport.connect().await?;
        let (sink, stream) = Framed::new(io, self.codec.clone()).split();
        *self.sink.lock().await = Some(sink);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.commands.store(Some(Arc::new(cmd_tx)));
        let cancel = CancellationToken::new();
        if let Some(previous) = self.reader_cancel.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        self.running_tx.send_replace(true);
        debug!(endpoint = %self.transport.describe(), "transport connected");

        tokio::spawn(run_reader(
            stream,
            cmd_rx,
            self.incoming_tx.clone(),
            Arc::clone(&self.running_tx),
            cancel,
        ));
        Ok(())
    }

    /// Stop the reader, close the outbound half and fail every pending
    /// expectation with [`SpiError::Closed`].
    pub async fn disconnect(&self) {
        if let Some(cancel) = self.reader_cancel.lock().take() {
            cancel.cancel();
        }
        self.commands.store(None);
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.running_tx.send_replace(false);
    }

    /// Serialize and write one message.
    pub async fn send(&self, msg: M) -> Result<(), SpiError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(SpiError::NotConnected)?;
        sink.send(msg).await.map_err(|e| match e {
            CodecError::Io(io) => SpiError::Transport(io),
            other => SpiError::Codec(other),
        })
    }

    /// Register an expectation with the reader.
    pub fn expect(&self, expectation: Expectation<M>) -> Result<(), SpiError> {
        if !self.is_running() {
            return Err(SpiError::NotConnected);
        }
        let guard = self.commands.load();
        let tx = guard.as_ref().ok_or(SpiError::NotConnected)?;
        tx.send(Command::Register(expectation)).map_err(|e| {
            if let Command::Register(exp) = e.0 {
                exp.fail(SpiError::Closed);
            }
            SpiError::Closed
        })
    }

    fn prune(&self) {
        if let Some(tx) = self.commands.load().as_ref() {
            let _ = tx.send(Command::Prune);
        }
    }

    /// Register-then-send and wait for the first message matching
    /// `predicate`.
    ///
    /// Resolves with [`SpiError::Timeout`] once `ttl` elapses and with
    /// [`SpiError::Cancelled`] as soon as `cancel` fires.
    pub async fn send_request<P>(
        &self,
        msg: M,
        predicate: P,
        ttl: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<M, SpiError>
    where
        P: Fn(&M) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<M, SpiError>>();
        let slot = Arc::new(SyncMutex::new(Some(tx)));
        let on_match_slot = Arc::clone(&slot);
        let request_token = cancel.map_or_else(CancellationToken::new, |t| t.child_token());

        let expectation = Expectation::new(
            predicate,
            move |m| {
                if let Some(tx) = on_match_slot.lock().take() {
                    let _ = tx.send(Ok(m));
                }
                Ok(())
            },
            move |e| {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(Err(e));
                }
            },
            ttl,
        )
        .with_cancel(request_token.clone());

        self.expect(expectation)?;
        if let Err(e) = self.send(msg).await {
            request_token.cancel();
            self.prune();
            return Err(e);
        }

        select! {
            res = rx => res.unwrap_or(Err(SpiError::Closed)),
            _ = request_token.cancelled() => {
                self.prune();
                Err(SpiError::Cancelled)
            }
        }
    }
}

impl<M, C> Drop for MessageCodec<M, C> {
    fn drop(&mut self) {
        if let Some(cancel) = self.reader_cancel.lock().take() {
            cancel.cancel();
        }
    }
}

async fn run_reader<M, C>(
    mut stream: SplitStream<Framed<BoxedIo, C>>,
    mut commands: mpsc::UnboundedReceiver<Command<M>>,
    incoming_tx: mpsc::Sender<M>,
    running_tx: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
) where
    M: Send + 'static,
    C: FrameCodec<M>,
{
    let mut pending: Vec<Expectation<M>> = Vec::new();
    let far = Duration::from_secs(3600);
    let deadline_sleep = sleep_until(Instant::now() + far);
    tokio::pin!(deadline_sleep);
    let mut close_reason = SpiError::Closed;

    loop {
        let next_deadline = pending
            .iter()
            .map(|e| e.expires_at)
            .min()
            .unwrap_or_else(|| Instant::now() + far);
        deadline_sleep.as_mut().reset(next_deadline);

        select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("message codec reader cancelled");
                break;
            }
            cmd = commands.recv() => match cmd {
                Some(Command::Register(exp)) => {
                    trace!(pending = pending.len() + 1, "expectation registered");
                    pending.push(exp);
                }
                Some(Command::Prune) => prune_cancelled(&mut pending),
                None => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(msg)) => {
                    expire(&mut pending);
                    dispatch(msg, &mut pending, &incoming_tx);
                }
                Some(Err(CodecError::Io(e))) => {
                    error!(error = %e, "transport read failed");
                    close_reason = SpiError::Transport(e);
                    break;
                }
                Some(Err(e)) => {
                    error!(error = %e, "frame decode failed, closing connection");
                    close_reason = SpiError::Codec(e);
                    break;
                }
                None => {
                    debug!("transport closed by peer");
                    break;
                }
            },
            _ = &mut deadline_sleep => expire(&mut pending),
        }
    }

    running_tx.send_replace(false);
    for exp in pending.drain(..) {
        exp.fail(replicate(&close_reason));
    }
}

/// Errors are not `Clone`; rebuild an equivalent one per waiter.
fn replicate(reason: &SpiError) -> SpiError {
    match reason {
        SpiError::Transport(e) => SpiError::Transport(std::io::Error::new(e.kind(), e.to_string())),
        SpiError::Codec(e) => SpiError::Codec(CodecError::decode(e.to_string())),
        _ => SpiError::Closed,
    }
}

/// Offer `msg` to expectations in registration order.
fn dispatch<M>(msg: M, pending: &mut Vec<Expectation<M>>, incoming_tx: &mpsc::Sender<M>) {
    prune_cancelled(pending);
    match pending.iter().position(|e| (e.predicate)(&msg)) {
        Some(idx) => {
            let exp = pending.remove(idx);
            let Expectation {
                on_match, on_error, ..
            } = exp;
            if let Err(e) = on_match(msg) {
                debug!(error = %e, "expectation handler failed");
                on_error(e);
            }
        }
        None => {
            debug!("inbound message matched no expectation");
            if incoming_tx.try_send(msg).is_err() {
                warn!("incoming queue full or closed, dropping unmatched message");
            }
        }
    }
}

fn expire<M>(pending: &mut Vec<Expectation<M>>) {
    let now = Instant::now();
    let mut i = 0;
    while i < pending.len() {
        if pending[i].expires_at <= now {
            let exp = pending.remove(i);
            debug!(ttl = ?exp.ttl, "expectation expired");
            let ttl = exp.ttl;
            exp.fail(SpiError::Timeout(ttl));
        } else {
            i += 1;
        }
    }
    prune_cancelled(pending);
}

fn prune_cancelled<M>(pending: &mut Vec<Expectation<M>>) {
    let mut i = 0;
    while i < pending.len() {
        if pending[i].is_cancelled() {
            pending.remove(i).fail(SpiError::Cancelled);
        } else {
            i += 1;
        }
    }
}

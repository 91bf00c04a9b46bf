mod handshake;
mod state;

pub use state::{ConnectionState, DriverContext};

use super::{
    codec::TpktCodec,
    error::{Error, Result},
    frame::{ControllerType, S7Message, TpktPacket},
    reader::ReadRequestBuilder,
    tag::TagHandler,
    tpdu::TpduGenerator,
    writer::WriteRequestBuilder,
};
use crate::types::S7Config;
use arc_swap::ArcSwap;
use plclink_sdk::{MessageCodec, MessageCodecConfig, RequestTransactionManager, SpiError, Transport};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pending result of [`Connection::connect`].
#[derive(Debug)]
pub struct ConnectHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl ConnectHandle {
    /// Wait until the connect attempt settles.
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(Error::ErrNotActive))
    }
}

/// One S7 connection: transport, handshake, and request correlation.
///
/// The handshake runs on its own task; reads and writes share the
/// transport through the message codec and are bounded by the
/// transaction manager, whose limit follows the negotiated Max AmQ Callee.
pub struct Connection {
    config: S7Config,
    codec: MessageCodec<TpktPacket, TpktCodec>,
    tm: RequestTransactionManager,
    tpdu: TpduGenerator,
    /// Snapshot of negotiated parameters, replaced per handshake step
    context: ArcSwap<DriverContext>,
    state_tx: watch::Sender<ConnectionState>,
    connected: AtomicBool,
    tag_handler: TagHandler,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.codec.describe())
            .field("state", &self.state())
            .field("context", &self.context.load())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(config: S7Config, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        let context = config.driver_context()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Arc::new(Self {
            codec: MessageCodec::new(
                transport,
                TpktCodec::new(config.frame_error_policy),
                MessageCodecConfig::default(),
            ),
            tm: RequestTransactionManager::new(config.max_concurrent_requests),
            tpdu: TpduGenerator::new(config.initial_tpdu_id),
            context: ArcSwap::from_pointee(context),
            state_tx,
            connected: AtomicBool::new(false),
            tag_handler: TagHandler::new(config.default_string_length),
            config,
        }))
    }

    /// Start connecting and return immediately.
    pub fn connect(self: &Arc<Self>) -> ConnectHandle {
        self.connect_with_cancel(CancellationToken::new())
    }

    /// Like [`Connection::connect`]; firing `cancel` aborts the handshake
    /// with a cancellation error.
    #[instrument(level = "info", skip_all, fields(endpoint = %self.codec.describe()))]
    pub fn connect_with_cancel(self: &Arc<Self>, cancel: CancellationToken) -> ConnectHandle {
        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_connect(tx, cancel).await });
        ConnectHandle { rx }
    }

    async fn run_connect(self: Arc<Self>, tx: oneshot::Sender<Result<()>>, cancel: CancellationToken) {
        self.connected.store(false, Ordering::Release);
        self.set_state(ConnectionState::Disconnected);
        if let Err(e) = self.codec.connect().await {
            error!(error = %e, "failed to open transport");
            self.set_state(ConnectionState::Failed);
            let _ = tx.send(Err(e.into()));
            return;
        }
        self.watch_transport();

        let ctx = self.driver_context();
        if ctx.passive_mode {
            info!("passive mode, skipping connection handshake");
            self.mark_connected();
            let _ = tx.send(Ok(()));
            return;
        }
        if !ctx.await_setup_complete {
            warn!("not awaiting connection setup, requests may be sent before negotiation finished");
            self.mark_connected();
            let _ = tx.send(Ok(()));
            if let Err(e) = self.handshake(&cancel).await {
                error!(error = %e, "connection handshake failed");
                self.fail().await;
            }
            return;
        }

        let result = self.handshake(&cancel).await;
        if let Err(e) = &result {
            error!(error = %e, "connection handshake failed");
            self.fail().await;
        }
        let _ = tx.send(result);
    }

    async fn handshake(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ctx = (*self.driver_context()).clone();

        self.set_state(ConnectionState::CotpConnecting);
        debug!(
            calling_tsap = format_args!("{:#06x}", ctx.calling_tsap),
            called_tsap = format_args!("{:#06x}", ctx.called_tsap),
            tpdu_size = ctx.cotp_tpdu_size.size_in_bytes(),
            "sending COTP connection request"
        );
        let response = self
            .exchange(handshake::connection_request(&ctx), handshake::is_connection_response, cancel)
            .await?;
        handshake::adopt_connection_response(&mut ctx, &response);
        self.context.store(Arc::new(ctx.clone()));
        self.set_state(ConnectionState::CotpConnected);

        self.set_state(ConnectionState::S7SetupSending);
        debug!(pdu_size = ctx.pdu_size, "sending S7 setup communication");
        let response = self
            .exchange(
                handshake::setup_communication_request(&ctx),
                handshake::is_setup_communication_response,
                cancel,
            )
            .await?;
        if let Some((class, code)) = response.s7_message().and_then(S7Message::header_error) {
            if class != 0 || code != 0 {
                return Err(Error::header(class, code));
            }
        }
        let (caller, callee, pdu_size) =
            handshake::negotiated_limits(&response).ok_or(Error::ErrUnexpectedPdu)?;
        ctx.max_amq_caller = caller;
        ctx.max_amq_callee = callee;
        ctx.pdu_size = pdu_size;
        self.tm.set_concurrency_limit(usize::from(callee));
        self.context.store(Arc::new(ctx.clone()));
        info!(
            pdu_size,
            max_amq_caller = caller,
            max_amq_callee = callee,
            "S7 communication negotiated"
        );
        self.set_state(ConnectionState::S7SetupComplete);

        if ctx.controller_type == ControllerType::Any {
            self.set_state(ConnectionState::IdentifyingController);
            let response = self
                .exchange(
                    handshake::identify_remote_request(),
                    handshake::is_identification_response,
                    cancel,
                )
                .await?;
            match handshake::identify_controller(&response) {
                Some(controller) => {
                    info!(controller = ?controller, "controller identified");
                    ctx.controller_type = controller;
                    self.context.store(Arc::new(ctx));
                }
                None if self.config.fail_on_unidentified_controller => {
                    return Err(Error::ErrIdentification("no module identification record"));
                }
                None => warn!("no module identification record, controller type stays unknown"),
            }
        }

        self.mark_connected();
        Ok(())
    }

    /// One handshake step with the handshake TTL.
    async fn exchange<P>(&self, request: TpktPacket, predicate: P, cancel: &CancellationToken) -> Result<TpktPacket>
    where
        P: Fn(&TpktPacket) -> bool + Send + Sync + 'static,
    {
        self.codec
            .send_request(request, predicate, self.config.handshake_timeout(), Some(cancel))
            .await
            .map_err(|e| match e {
                SpiError::Timeout(_) => {
                    warn!("timeout during connection establishing, closing connection");
                    Error::ErrConnectTimeout
                }
                other => other.into(),
            })
    }

    /// Send one S7 job under a fresh TPDU reference and wait for the
    /// response carrying the same reference.
    ///
    /// A transaction slot is held for the whole round trip.
    pub(crate) async fn submit(
        &self,
        build: impl FnOnce(u16) -> S7Message,
        cancel: Option<&CancellationToken>,
    ) -> Result<S7Message> {
        if !self.is_connected() {
            return Err(Error::ErrNotActive);
        }
        let transaction = match cancel {
            Some(token) => select! {
                t = self.tm.start_transaction() => t?,
                _ = token.cancelled() => return Err(SpiError::Cancelled.into()),
            },
            None => self.tm.start_transaction().await?,
        };

        let id = self.tpdu.next_id();
        debug!(transaction = transaction.id(), tpdu = id, "submitting S7 request");
        let result = self
            .codec
            .send_request(
                TpktPacket::data(0, build(id)),
                move |packet: &TpktPacket| {
                    packet
                        .s7_message()
                        .is_some_and(|m| m.is_response() && m.tpdu_reference == id)
                },
                self.config.request_timeout(),
                cancel,
            )
            .await;
        match result {
            Ok(packet) => {
                transaction.end_request();
                packet.into_s7_message().ok_or(Error::ErrUnexpectedPdu)
            }
            Err(e) => {
                transaction.fail_request(&e);
                Err(e.into())
            }
        }
    }

    /// Close the connection. Queued and later requests fail.
    #[instrument(level = "info", skip_all, fields(endpoint = %self.codec.describe()))]
    pub async fn close(&self) {
        self.tm.close();
        self.connected.store(false, Ordering::Release);
        self.codec.disconnect().await;
        self.set_state(ConnectionState::Closed);
        info!("connection closed");
    }

    async fn fail(&self) {
        self.connected.store(false, Ordering::Release);
        self.codec.disconnect().await;
        self.set_state(ConnectionState::Failed);
    }

    fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
        self.set_state(ConnectionState::Connected);
        info!(controller = ?self.driver_context().controller_type, "connection established");
    }

    /// Flip to `Failed` when the reader stops under an established connection.
    fn watch_transport(self: &Arc<Self>) {
        let mut running = self.codec.subscribe_running();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while running.changed().await.is_ok() {
                if *running.borrow() {
                    continue;
                }
                let Some(this) = weak.upgrade() else {
                    return;
                };
                if this.connected.swap(false, Ordering::AcqRel) {
                    warn!("transport lost");
                    this.state_tx.send_if_modified(|s| {
                        let lost = *s == ConnectionState::Connected;
                        if lost {
                            *s = ConnectionState::Failed;
                        }
                        lost
                    });
                }
                return;
            }
        });
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(state = ?state, "connection state");
        self.state_tx.send_replace(state);
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Connected and the transport reader is alive.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.codec.is_running()
    }

    /// Inbound frames no request was waiting for, e.g. PLC alarms.
    pub fn take_incoming(&self) -> Option<mpsc::Receiver<TpktPacket>> {
        self.codec.take_incoming()
    }

    pub fn driver_context(&self) -> Arc<DriverContext> {
        self.context.load_full()
    }

    #[inline]
    pub fn config(&self) -> &S7Config {
        &self.config
    }

    #[inline]
    pub fn tag_handler(&self) -> &TagHandler {
        &self.tag_handler
    }

    #[inline]
    pub fn transaction_manager(&self) -> &RequestTransactionManager {
        &self.tm
    }

    pub fn read_request_builder(self: &Arc<Self>) -> ReadRequestBuilder {
        ReadRequestBuilder::new(Arc::clone(self))
    }

    pub fn write_request_builder(self: &Arc<Self>) -> WriteRequestBuilder {
        WriteRequestBuilder::new(Arc::clone(self))
    }
}

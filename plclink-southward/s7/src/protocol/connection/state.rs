use crate::protocol::frame::{ControllerType, CotpTpduSize};

/// Lifecycle of one connection as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state before any connection attempt
    Disconnected,
    /// COTP connection request sent
    CotpConnecting,
    /// COTP connection response received
    CotpConnected,
    /// S7 setup communication sent
    S7SetupSending,
    /// PDU size and AmQ limits negotiated
    S7SetupComplete,
    /// Reading the module identification SZL
    IdentifyingController,
    /// Ready for read and write requests
    Connected,
    /// Handshake or transport failure
    Failed,
    /// Closed by the user
    Closed,
}

impl ConnectionState {
    /// Whether the state is final for one connect attempt.
    #[inline]
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// Negotiated per-connection parameters.
///
/// Derived from the configuration at construction time and refined by the
/// handshake; readers get immutable snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverContext {
    pub calling_tsap: u16,
    pub called_tsap: u16,
    pub cotp_tpdu_size: CotpTpduSize,
    pub max_amq_caller: u16,
    pub max_amq_callee: u16,
    pub pdu_size: u16,
    pub controller_type: ControllerType,
    pub passive_mode: bool,
    pub await_setup_complete: bool,
}

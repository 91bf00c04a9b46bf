use crate::protocol::{
    codec::FrameErrorPolicy,
    connection::DriverContext,
    error::{Error, Result},
    frame::{
        default_tsap_pair, validate_rack_slot, ControllerType, CotpTpduSize, DeviceGroup, Tsap,
        TsapPair,
    },
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the calling and called TSAPs are derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TsapConfig {
    #[serde(rename_all = "camelCase")]
    RackSlot {
        #[serde(default = "TsapConfig::default_local")]
        local_rack: u8,
        #[serde(default = "TsapConfig::default_local")]
        local_slot: u8,
        #[serde(default)]
        remote_rack: u8,
        #[serde(default)]
        remote_slot: u8,
    },
    /// Raw TSAP ids, `src` is ours and `dst` the controller's
    Tsap { src: u16, dst: u16 },
}

impl TsapConfig {
    fn default_local() -> u8 {
        1
    }

    /// Resolve the TSAP pair for the given controller family.
    pub fn resolve(&self, controller: ControllerType) -> Result<TsapPair> {
        match *self {
            TsapConfig::RackSlot {
                local_rack,
                local_slot,
                remote_rack,
                remote_slot,
            } => {
                validate_rack_slot(local_rack, local_slot)?;
                let pair = default_tsap_pair(controller, remote_rack, remote_slot)?;
                if controller == ControllerType::Logo {
                    return Ok(pair);
                }
                Ok(TsapPair {
                    local: Tsap::from_group(DeviceGroup::PgOrPc, local_rack, local_slot),
                    remote: pair.remote,
                })
            }
            TsapConfig::Tsap { src, dst } => Ok(TsapPair {
                local: src.into(),
                remote: dst.into(),
            }),
        }
    }
}

impl Default for TsapConfig {
    fn default() -> Self {
        TsapConfig::RackSlot {
            local_rack: Self::default_local(),
            local_slot: Self::default_local(),
            remote_rack: 0,
            remote_slot: 0,
        }
    }
}

/// S7 connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S7Config {
    /// TSAP configuration
    #[serde(default)]
    pub tsap: TsapConfig,
    /// Proposed S7 PDU size in bytes
    #[serde(default = "S7Config::default_pdu_size")]
    pub pdu_size: u16,
    /// Proposed Max AmQ Caller
    #[serde(default = "S7Config::default_amq")]
    pub max_amq_caller: u16,
    /// Proposed Max AmQ Callee
    #[serde(default = "S7Config::default_amq")]
    pub max_amq_callee: u16,
    /// Controller family. `ANY` runs identification after setup.
    #[serde(default)]
    pub controller_type: ControllerType,
    /// Skip the handshake and only open the transport
    #[serde(default)]
    pub passive_mode: bool,
    /// Resolve `connect` only after the handshake finished
    #[serde(default = "S7Config::default_true")]
    pub await_setup_complete: bool,
    /// TTL of read and write requests
    #[serde(default = "S7Config::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// TTL of each handshake step
    #[serde(default = "S7Config::default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Transaction slots before the controller announced its own limit
    #[serde(default = "S7Config::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub frame_error_policy: FrameErrorPolicy,
    /// Fail the connection when identification finds no module item
    #[serde(default = "S7Config::default_true")]
    pub fail_on_unidentified_controller: bool,
    #[serde(default = "S7Config::default_initial_tpdu_id")]
    pub initial_tpdu_id: u16,
    /// Length used for STRING/WSTRING tags that don't declare one
    #[serde(default = "S7Config::default_string_length")]
    pub default_string_length: u16,
}

impl S7Config {
    fn default_pdu_size() -> u16 {
        1024
    }

    fn default_amq() -> u16 {
        8
    }

    fn default_true() -> bool {
        true
    }

    fn default_request_timeout_ms() -> u64 {
        1_000
    }

    fn default_handshake_timeout_ms() -> u64 {
        10_000
    }

    fn default_max_concurrent_requests() -> usize {
        8
    }

    fn default_initial_tpdu_id() -> u16 {
        10
    }

    fn default_string_length() -> u16 {
        254
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pdu_size == 0 {
            return Err(Error::InvalidConfiguration("pduSize"));
        }
        if self.max_amq_caller == 0 {
            return Err(Error::InvalidConfiguration("maxAmqCaller"));
        }
        if self.max_amq_callee == 0 {
            return Err(Error::InvalidConfiguration("maxAmqCallee"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(Error::InvalidConfiguration("maxConcurrentRequests"));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfiguration("requestTimeoutMs"));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(Error::InvalidConfiguration("handshakeTimeoutMs"));
        }
        if self.default_string_length == 0 || self.default_string_length > 254 {
            return Err(Error::InvalidConfiguration("defaultStringLength"));
        }
        self.tsap.resolve(self.controller_type).map(|_| ())
    }

    /// Initial negotiated state, refined during the handshake.
    ///
    /// LOGO controllers only accept small PDUs, so the default 1024 is
    /// lowered to 480 for them. The PDU size is then aligned with the
    /// COTP TPDU size that carries it.
    pub fn driver_context(&self) -> Result<DriverContext> {
        self.validate()?;
        let tsaps = self.tsap.resolve(self.controller_type)?;
        let requested = if self.controller_type == ControllerType::Logo && self.pdu_size == 1024 {
            480
        } else {
            self.pdu_size
        };
        let cotp_tpdu_size = CotpTpduSize::nearest_for(requested);
        Ok(DriverContext {
            calling_tsap: tsaps.local.into(),
            called_tsap: tsaps.remote.into(),
            cotp_tpdu_size,
            max_amq_caller: self.max_amq_caller,
            max_amq_callee: self.max_amq_callee,
            pdu_size: cotp_tpdu_size.size_in_bytes() - 16,
            controller_type: self.controller_type,
            passive_mode: self.passive_mode,
            await_setup_complete: self.await_setup_complete,
        })
    }
}

impl Default for S7Config {
    fn default() -> Self {
        Self {
            tsap: TsapConfig::default(),
            pdu_size: Self::default_pdu_size(),
            max_amq_caller: Self::default_amq(),
            max_amq_callee: Self::default_amq(),
            controller_type: ControllerType::default(),
            passive_mode: false,
            await_setup_complete: true,
            request_timeout_ms: Self::default_request_timeout_ms(),
            handshake_timeout_ms: Self::default_handshake_timeout_ms(),
            max_concurrent_requests: Self::default_max_concurrent_requests(),
            frame_error_policy: FrameErrorPolicy::default(),
            fail_on_unidentified_controller: true,
            initial_tpdu_id: Self::default_initial_tpdu_id(),
            default_string_length: Self::default_string_length(),
        }
    }
}

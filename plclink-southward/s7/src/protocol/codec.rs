use super::frame::{TpktPacket, TPKT_HEADER_LEN, TPKT_VERSION};
use bytes::{Buf, BytesMut};
use plclink_sdk::{CodecError, WireDecode, WireEncode};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// What the decoder does with a frame it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameErrorPolicy {
    /// Drop the frame, log it and continue with the next one
    #[default]
    SkipAndLog,
    /// Surface the error; the connection is torn down
    FailConnection,
}

/// RFC1006 framing plus TPKT/COTP/S7 parsing
#[derive(Debug, Default, Clone)]
pub struct TpktCodec {
    policy: FrameErrorPolicy,
}

impl TpktCodec {
    pub fn new(policy: FrameErrorPolicy) -> Self {
        Self { policy }
    }

    #[inline]
    pub fn policy(&self) -> FrameErrorPolicy {
        self.policy
    }
}

/// Offset of the next plausible TPKT header after a corrupted one.
fn resync_offset(src: &BytesMut) -> usize {
    src.iter()
        .skip(1)
        .position(|b| *b == TPKT_VERSION)
        .map_or(src.len(), |p| p + 1)
}

impl Decoder for TpktCodec {
    type Item = TpktPacket;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Ensure we have at least a TPKT header
            if src.len() < TPKT_HEADER_LEN {
                return Ok(None);
            }
            let length = usize::from(u16::from_be_bytes([src[2], src[3]]));
            if src[0] != TPKT_VERSION || src[1] != 0x00 || length < TPKT_HEADER_LEN {
                if self.policy == FrameErrorPolicy::FailConnection {
                    return Err(CodecError::ConstMismatch {
                        field: "protocolId",
                        expected: u64::from(TPKT_VERSION),
                        actual: u64::from(src[0]),
                    });
                }
                let skip = resync_offset(src);
                warn!(skipped = skip, "invalid TPKT header, resynchronizing");
                src.advance(skip);
                continue;
            }
            if src.len() < length {
                src.reserve(length - src.len());
                return Ok(None);
            }

            let frame = src.split_to(length).freeze();
            match TpktPacket::from_bytes(frame, &()) {
                Ok(packet) => {
                    trace!(length, "TPKT frame decoded");
                    return Ok(Some(packet));
                }
                Err(e) if self.policy == FrameErrorPolicy::SkipAndLog => {
                    warn!(error = %e, length, "discarding undecodable frame");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Encoder<TpktPacket> for TpktCodec {
    type Error = CodecError;

    fn encode(&mut self, item: TpktPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.to_bytes(&())?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{CotpPacket, CotpTpduSize, S7Message, S7Parameter};

    fn setup_frame() -> BytesMut {
        let packet = TpktPacket::data(
            1,
            S7Message::request(
                0,
                S7Parameter::SetupCommunication {
                    max_amq_caller: 8,
                    max_amq_callee: 8,
                    pdu_length: 480,
                },
                None,
            ),
        );
        let mut buf = BytesMut::new();
        TpktCodec::default().encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        let full = setup_frame();
        assert_eq!(full.len(), 4 + 3 + 18);
        let mut codec = TpktCodec::default();
        let mut buf = BytesMut::from(&full[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[3..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[10..]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.s7_message().unwrap().tpdu_reference, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn connection_request_frame() {
        let mut buf = BytesMut::new();
        TpktCodec::default()
            .encode(
                TpktPacket::new(CotpPacket::connection_request(
                    0x0100,
                    0x0302,
                    CotpTpduSize::Size1024,
                )),
                &mut buf,
            )
            .unwrap();
        assert_eq!(&buf[..4], &[0x03, 0x00, 0x00, 0x16]);
    }

    #[test]
    fn skip_policy_drops_bad_frame_and_keeps_next() {
        let good = setup_frame();
        // Valid TPKT envelope around an S7 header with a wrong protocol id.
        let mut buf = BytesMut::from(
            &[
                0x03, 0x00, 0x00, 0x11, 0x02, 0xF0, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00,
            ][..],
        );
        buf.extend_from_slice(&good);
        let mut codec = TpktCodec::default();
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert!(packet.s7_message().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn fail_policy_surfaces_error() {
        let mut buf = BytesMut::from(
            &[
                0x03, 0x00, 0x00, 0x11, 0x02, 0xF0, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00,
            ][..],
        );
        let mut codec = TpktCodec::new(FrameErrorPolicy::FailConnection);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn garbage_before_header_is_skipped() {
        let good = setup_frame();
        let mut buf = BytesMut::from(&[0xAA, 0xBB][..]);
        buf.extend_from_slice(&good);
        let packet = TpktCodec::default().decode(&mut buf).unwrap();
        assert!(packet.is_some());
    }
}

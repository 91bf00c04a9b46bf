use super::{S7MessageType, S7Parameter, S7Payload};
use plclink_sdk::{
    wire::field::{read_const, read_discriminator, read_implicit, read_reserved, write_implicit},
    CodecError, ReadBuffer, WireDecode, WireEncode, WriteBuffer,
};

const PROTOCOL_ID: u64 = 0x32;

/// Header variant selected by the ROSCTR byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7MessageKind {
    Request,
    Response { error_class: u8, error_code: u8 },
    ResponseData { error_class: u8, error_code: u8 },
    UserData,
}

/// S7 PDU: header, optional parameter and optional payload
#[derive(Debug, Clone, PartialEq)]
pub struct S7Message {
    pub tpdu_reference: u16,
    pub kind: S7MessageKind,
    pub parameter: Option<S7Parameter>,
    pub payload: Option<S7Payload>,
}

impl S7Message {
    pub fn request(tpdu_reference: u16, parameter: S7Parameter, payload: Option<S7Payload>) -> Self {
        Self {
            tpdu_reference,
            kind: S7MessageKind::Request,
            parameter: Some(parameter),
            payload,
        }
    }

    pub fn response_data(
        tpdu_reference: u16,
        parameter: Option<S7Parameter>,
        payload: Option<S7Payload>,
    ) -> Self {
        Self {
            tpdu_reference,
            kind: S7MessageKind::ResponseData {
                error_class: 0,
                error_code: 0,
            },
            parameter,
            payload,
        }
    }

    pub fn user_data(tpdu_reference: u16, parameter: S7Parameter, payload: S7Payload) -> Self {
        Self {
            tpdu_reference,
            kind: S7MessageKind::UserData,
            parameter: Some(parameter),
            payload: Some(payload),
        }
    }

    pub fn message_type(&self) -> S7MessageType {
        match self.kind {
            S7MessageKind::Request => S7MessageType::Request,
            S7MessageKind::Response { .. } => S7MessageType::Response,
            S7MessageKind::ResponseData { .. } => S7MessageType::ResponseData,
            S7MessageKind::UserData => S7MessageType::UserData,
        }
    }

    /// Header error class and code for Response/ResponseData PDUs.
    pub fn header_error(&self) -> Option<(u8, u8)> {
        match self.kind {
            S7MessageKind::Response {
                error_class,
                error_code,
            }
            | S7MessageKind::ResponseData {
                error_class,
                error_code,
            } => Some((error_class, error_code)),
            _ => None,
        }
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.header_error().is_some()
    }

    fn header_len(&self) -> usize {
        if self.is_response() {
            12
        } else {
            10
        }
    }

    fn parameter_len(&self) -> usize {
        self.parameter.as_ref().map_or(0, |p| p.encoded_len(&()))
    }

    fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.encoded_len(&()))
    }
}

impl WireEncode for S7Message {
    type Context = ();

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        self.header_len() + self.parameter_len() + self.payload_len()
    }

    fn encode_to(&self, dst: &mut WriteBuffer, ctx: &Self::Context) -> Result<(), CodecError> {
        dst.write_u8(8, PROTOCOL_ID as u8)?;
        dst.write_u8(8, self.message_type().code())?;
        dst.write_u16(16, 0x0000)?;
        dst.write_u16(16, self.tpdu_reference)?;
        write_implicit(dst, "parameterLength", 16, self.parameter_len())?;
        write_implicit(dst, "payloadLength", 16, self.payload_len())?;
        if let Some((class, code)) = self.header_error() {
            dst.write_u8(8, class)?;
            dst.write_u8(8, code)?;
        }
        if let Some(parameter) = &self.parameter {
            parameter.encode_to(dst, ctx)?;
        }
        if let Some(payload) = &self.payload {
            payload.encode_to(dst, ctx)?;
        }
        Ok(())
    }
}

impl WireDecode for S7Message {
    type Context = ();

    fn decode(src: &mut ReadBuffer, _ctx: &Self::Context) -> Result<Self, CodecError> {
        read_const(src, "protocolId", 8, PROTOCOL_ID)?;
        let raw_type = read_discriminator(src, 8)?;
        let message_type = S7MessageType::try_from(raw_type)
            .map_err(|_| CodecError::unknown_discriminator("S7Message", raw_type))?;
        read_reserved(src, "reserved", 16, 0x0000)?;
        let tpdu_reference = src.read_u16(16)?;
        let parameter_len = read_implicit(src, 16)? as usize;
        let payload_len = read_implicit(src, 16)? as usize;
        let kind = match message_type {
            S7MessageType::Request => S7MessageKind::Request,
            S7MessageType::Response => S7MessageKind::Response {
                error_class: src.read_u8(8)?,
                error_code: src.read_u8(8)?,
            },
            S7MessageType::ResponseData => S7MessageKind::ResponseData {
                error_class: src.read_u8(8)?,
                error_code: src.read_u8(8)?,
            },
            S7MessageType::UserData => S7MessageKind::UserData,
        };

        let parameter = if parameter_len > 0 {
            let mut section = ReadBuffer::new(src.read_bytes(parameter_len)?);
            Some(S7Parameter::decode(&mut section, &message_type)?)
        } else {
            None
        };
        let payload = if payload_len > 0 {
            let mut section = ReadBuffer::new(src.read_bytes(payload_len)?);
            Some(S7Payload::decode_for(
                &mut section,
                message_type,
                parameter.as_ref(),
            )?)
        } else {
            None
        };

        Ok(Self {
            tpdu_reference,
            kind,
            parameter,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{
        DataTransportErrorCode, DataTransportSize, MemoryArea, S7Address, S7TransportSize,
        S7VarPayloadDataItem,
    };
    use bytes::Bytes;

    #[test]
    fn setup_communication_request_layout() {
        let msg = S7Message::request(
            0,
            S7Parameter::SetupCommunication {
                max_amq_caller: 8,
                max_amq_callee: 8,
                pdu_length: 1024,
            },
            None,
        );
        let bytes = msg.to_bytes(&()).unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x32, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0xF0, 0x00, 0x00,
                0x08, 0x00, 0x08, 0x04, 0x00
            ]
        );
        assert_eq!(S7Message::from_bytes(bytes, &()).unwrap(), msg);
    }

    #[test]
    fn read_var_round_trip() {
        let request = S7Message::request(
            11,
            S7Parameter::ReadVarRequest {
                items: vec![S7Address::any(
                    S7TransportSize::Int,
                    2,
                    1,
                    MemoryArea::DataBlocks,
                    4,
                    0,
                )],
            },
            None,
        );
        let bytes = request.to_bytes(&()).unwrap();
        assert_eq!(bytes.len(), 10 + 2 + 12);
        assert_eq!(S7Message::from_bytes(bytes, &()).unwrap(), request);

        let response = S7Message::response_data(
            11,
            Some(S7Parameter::ReadVarResponse { num_items: 2 }),
            Some(S7Payload::ReadVarResponse {
                items: vec![
                    S7VarPayloadDataItem::new(
                        DataTransportErrorCode::Ok,
                        DataTransportSize::Bit,
                        Bytes::from_static(&[0x01]),
                    ),
                    S7VarPayloadDataItem::new(
                        DataTransportErrorCode::Ok,
                        DataTransportSize::Integer,
                        Bytes::from_static(&[0x00, 0x2A]),
                    ),
                ],
            }),
        );
        let bytes = response.to_bytes(&()).unwrap();
        // header 12, parameter 2, first item 5 + pad, second item 6
        assert_eq!(bytes.len(), 12 + 2 + 6 + 6);
        assert_eq!(S7Message::from_bytes(bytes, &()).unwrap(), response);
    }

    #[test]
    fn error_header_without_parameter() {
        let bytes = Bytes::from_static(&[
            0x32, 0x03, 0x00, 0x00, 0x00, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x81, 0x04,
        ]);
        let msg = S7Message::from_bytes(bytes, &()).unwrap();
        assert_eq!(msg.header_error(), Some((0x81, 0x04)));
        assert!(msg.parameter.is_none());
        assert!(msg.payload.is_none());
    }

    #[test]
    fn wrong_protocol_id_is_a_parse_assert() {
        let bytes = Bytes::from_static(&[0x33, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]);
        let err = S7Message::from_bytes(bytes, &()).unwrap_err();
        assert!(err.is_parse_assert());
    }
}

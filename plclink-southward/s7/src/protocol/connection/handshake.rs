//! Messages and predicates of the connection handshake.

use crate::protocol::frame::{
    ControllerType, CotpPacket, CotpParameter, CotpTpdu, CpuFunctionParameter,
    DataTransportErrorCode, DataTransportSize, S7Message, S7MessageKind, S7Parameter, S7Payload,
    SzlId, SzlModuleTypeClass, SzlSublist, TpktPacket, UserDataPayloadBody, UserDataPayloadItem,
};
use super::DriverContext;
use tracing::{info, warn};

/// SZL item index of the module identification record
const MODULE_IDENTIFICATION_INDEX: u16 = 0x0001;
const CPU_FUNCTION_RESPONSE: u8 = 0x12;
const CPU_FUNCTION_GROUP_SZL: u8 = 0x4;
const READ_SZL_SUBFUNCTION: u8 = 0x01;

pub(super) fn connection_request(ctx: &DriverContext) -> TpktPacket {
    TpktPacket::new(CotpPacket::connection_request(
        ctx.calling_tsap,
        ctx.called_tsap,
        ctx.cotp_tpdu_size,
    ))
}

pub(super) fn is_connection_response(packet: &TpktPacket) -> bool {
    matches!(packet.payload.tpdu, CotpTpdu::ConnectionResponse { .. })
}

/// Take over TSAPs and TPDU size confirmed by the connection response.
pub(super) fn adopt_connection_response(ctx: &mut DriverContext, response: &TpktPacket) {
    for parameter in &response.payload.parameters {
        match parameter {
            CotpParameter::CalledTsap(tsap) => ctx.called_tsap = *tsap,
            CotpParameter::CallingTsap(tsap) => {
                if *tsap != ctx.calling_tsap {
                    warn!(calling_tsap = format_args!("{tsap:#06x}"), "switching calling TSAP id");
                    ctx.calling_tsap = *tsap;
                }
            }
            CotpParameter::TpduSize(size) => ctx.cotp_tpdu_size = *size,
            other => warn!(parameter = ?other.parameter_type(), "ignoring unknown COTP parameter"),
        }
    }
}

pub(super) fn setup_communication_request(ctx: &DriverContext) -> TpktPacket {
    TpktPacket::data(
        1,
        S7Message::request(
            0,
            S7Parameter::SetupCommunication {
                max_amq_caller: ctx.max_amq_caller,
                max_amq_callee: ctx.max_amq_callee,
                pdu_length: ctx.pdu_size,
            },
            None,
        ),
    )
}

pub(super) fn is_setup_communication_response(packet: &TpktPacket) -> bool {
    packet.s7_message().is_some_and(|m| {
        matches!(m.kind, S7MessageKind::ResponseData { .. })
            && matches!(m.parameter, Some(S7Parameter::SetupCommunication { .. }))
    })
}

/// `(max_amq_caller, max_amq_callee, pdu_length)` of a setup response.
pub(super) fn negotiated_limits(packet: &TpktPacket) -> Option<(u16, u16, u16)> {
    match packet.s7_message()?.parameter {
        Some(S7Parameter::SetupCommunication {
            max_amq_caller,
            max_amq_callee,
            pdu_length,
        }) => Some((max_amq_caller, max_amq_callee, pdu_length)),
        _ => None,
    }
}

/// Read SZL 0x0011 (module identification) of the CPU.
pub(super) fn identify_remote_request() -> TpktPacket {
    let parameter = S7Parameter::UserData {
        items: vec![CpuFunctionParameter {
            method: 0x11,
            function_type: 0x4,
            function_group: 0x4,
            subfunction: 0x01,
            sequence_number: 0x00,
            response: None,
        }],
    };
    let payload = S7Payload::UserData {
        items: vec![UserDataPayloadItem {
            return_code: DataTransportErrorCode::Ok,
            transport_size: DataTransportSize::OctetString,
            body: UserDataPayloadBody::ReadSzlRequest {
                szl_id: SzlId {
                    type_class: SzlModuleTypeClass::Cpu,
                    sublist_extract: 0x00,
                    sublist_list: SzlSublist::ModuleIdentification,
                },
                szl_index: 0x0000,
            },
        }],
    };
    TpktPacket::data(2, S7Message::user_data(1, parameter, payload))
}

/// A read-SZL answer; other user-data traffic such as pushed alarms is left
/// for the unmatched queue.
pub(super) fn is_identification_response(packet: &TpktPacket) -> bool {
    let Some(m) = packet.s7_message() else {
        return false;
    };
    let is_read_szl = matches!(&m.parameter, Some(S7Parameter::UserData { items }) if items.iter().any(|p| {
        p.method == CPU_FUNCTION_RESPONSE
            && p.function_group == CPU_FUNCTION_GROUP_SZL
            && p.subfunction == READ_SZL_SUBFUNCTION
    }));
    m.kind == S7MessageKind::UserData
        && is_read_szl
        && matches!(m.payload, Some(S7Payload::UserData { .. }))
}

/// Controller family from the module identification record (index 0x0001).
///
/// `None` when the response carries no such record.
pub(super) fn identify_controller(packet: &TpktPacket) -> Option<ControllerType> {
    let Some(S7Payload::UserData { items }) = packet.s7_message()?.payload.as_ref() else {
        return None;
    };
    let record = items
        .iter()
        .filter_map(|item| match &item.body {
            UserDataPayloadBody::ReadSzlResponse { items, .. } => Some(items),
            _ => None,
        })
        .flatten()
        .find(|r| r.item_index == MODULE_IDENTIFICATION_INDEX)?;

    let article_number = record.article_number();
    let controller = ControllerType::from_article_number(&article_number);
    if controller == ControllerType::Any {
        info!(article_number = %article_number, "looking up unknown article number");
    }
    Some(controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{CotpProtocolClass, CotpTpduSize, SzlDataTreeItem};
    use bytes::Bytes;

    fn ctx() -> DriverContext {
        DriverContext {
            calling_tsap: 0x0100,
            called_tsap: 0x0302,
            cotp_tpdu_size: CotpTpduSize::Size1024,
            max_amq_caller: 8,
            max_amq_callee: 8,
            pdu_size: 1008,
            controller_type: ControllerType::Any,
            passive_mode: false,
            await_setup_complete: true,
        }
    }

    fn szl_response(records: Vec<(u16, &str)>) -> TpktPacket {
        let items = records
            .into_iter()
            .map(|(index, mlfb)| {
                let mut raw = format!("{mlfb:<20}").into_bytes();
                raw.truncate(20);
                SzlDataTreeItem {
                    item_index: index,
                    mlfb: Bytes::from(raw),
                    module_type_id: 0,
                    ausbg: 0,
                    ausbe: 0,
                }
            })
            .collect();
        let parameter = S7Parameter::UserData {
            items: vec![CpuFunctionParameter {
                method: 0x12,
                function_type: 0x8,
                function_group: 0x4,
                subfunction: 0x01,
                sequence_number: 0,
                response: None,
            }],
        };
        let payload = S7Payload::UserData {
            items: vec![UserDataPayloadItem {
                return_code: DataTransportErrorCode::Ok,
                transport_size: DataTransportSize::OctetString,
                body: UserDataPayloadBody::ReadSzlResponse {
                    szl_id: SzlId {
                        type_class: SzlModuleTypeClass::Cpu,
                        sublist_extract: 0,
                        sublist_list: SzlSublist::ModuleIdentification,
                    },
                    szl_index: 0,
                    items,
                },
            }],
        };
        TpktPacket::data(2, S7Message::user_data(1, parameter, payload))
    }

    #[test]
    fn connection_response_parameters_are_adopted() {
        let response = TpktPacket::new(CotpPacket {
            tpdu: CotpTpdu::ConnectionResponse {
                dst_ref: 0x000F,
                src_ref: 0x0001,
                class: CotpProtocolClass::Class0,
            },
            parameters: vec![
                CotpParameter::CalledTsap(0x0301),
                CotpParameter::CallingTsap(0x0101),
                CotpParameter::TpduSize(CotpTpduSize::Size512),
                CotpParameter::Checksum(0),
            ],
            payload: None,
        });
        assert!(is_connection_response(&response));
        let mut c = ctx();
        adopt_connection_response(&mut c, &response);
        assert_eq!(c.called_tsap, 0x0301);
        assert_eq!(c.calling_tsap, 0x0101);
        assert_eq!(c.cotp_tpdu_size, CotpTpduSize::Size512);
    }

    #[test]
    fn setup_response_carries_limits() {
        let response = TpktPacket::data(
            1,
            S7Message::response_data(
                0,
                Some(S7Parameter::SetupCommunication {
                    max_amq_caller: 3,
                    max_amq_callee: 5,
                    pdu_length: 240,
                }),
                None,
            ),
        );
        assert!(is_setup_communication_response(&response));
        assert!(!is_setup_communication_response(&setup_communication_request(&ctx())));
        assert_eq!(negotiated_limits(&response), Some((3, 5, 240)));
    }

    #[test]
    fn identification_uses_module_record_only() {
        let response = szl_response(vec![(0x0006, "6ES7 315-2EH14-0AB0"), (0x0001, "6ES7 511-1AK00-0AB0")]);
        assert!(is_identification_response(&response));
        assert_eq!(identify_controller(&response), Some(ControllerType::S71500));

        let response = szl_response(vec![(0x0006, "6ES7 315-2EH14-0AB0")]);
        assert_eq!(identify_controller(&response), None);

        let response = szl_response(vec![(0x0001, "6ED1 052-1MD00-0BA8")]);
        assert_eq!(identify_controller(&response), Some(ControllerType::Any));

        assert_eq!(identify_controller(&szl_response(vec![])), None);
    }

    #[test]
    fn pushed_user_data_is_not_an_identification_response() {
        let push = |method, subfunction| {
            let parameter = S7Parameter::UserData {
                items: vec![CpuFunctionParameter {
                    method,
                    function_type: 0x0,
                    function_group: 0x4,
                    subfunction,
                    sequence_number: 0,
                    response: None,
                }],
            };
            let payload = S7Payload::UserData {
                items: vec![UserDataPayloadItem {
                    return_code: DataTransportErrorCode::Ok,
                    transport_size: DataTransportSize::OctetString,
                    body: UserDataPayloadBody::ReadSzlResponse {
                        szl_id: SzlId {
                            type_class: SzlModuleTypeClass::Cpu,
                            sublist_extract: 0,
                            sublist_list: SzlSublist::ModuleIdentification,
                        },
                        szl_index: 0,
                        items: vec![],
                    },
                }],
            };
            TpktPacket::data(2, S7Message::user_data(7, parameter, payload))
        };
        assert!(!is_identification_response(&push(0x12, 0x13)));
        assert!(!is_identification_response(&push(0x00, 0x01)));
        assert!(is_identification_response(&push(0x12, 0x01)));
    }

    #[test]
    fn identify_request_is_a_user_data_request() {
        let request = identify_remote_request();
        let message = request.s7_message().unwrap();
        assert_eq!(message.kind, S7MessageKind::UserData);
        assert!(!is_identification_response(&connection_request(&ctx())));
    }
}

//! Scripted in-memory S7 controller for integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use plclink_s7::{
    protocol::frame::{
        CotpPacket, CotpProtocolClass, CotpTpdu, CpuFunctionParameter,
        DataTransportErrorCode, DataTransportSize, S7Address, S7Message, S7MessageKind,
        S7Parameter, S7Payload, S7TransportSize, S7VarPayloadDataItem, SzlDataTreeItem, SzlId,
        SzlModuleTypeClass, SzlSublist, TpktPacket, UserDataPayloadBody, UserDataPayloadItem,
    },
    Connection, S7Config, TpktCodec,
};
use plclink_sdk::{DuplexAcceptor, DuplexTransport};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Once,
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::codec::Framed;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .without_time()
            .with_test_writer()
            .try_init();
    });
}

const AREA_SIZE: usize = 4096;

/// How the simulated controller reacts.
#[derive(Debug, Clone)]
pub struct PlcBehavior {
    pub max_amq_caller: u16,
    pub max_amq_callee: u16,
    pub pdu_size: u16,
    /// Answer the COTP connection request
    pub answer_connect: bool,
    /// Article number reported for SZL 0x0011; `None` sends no record
    pub article_number: Option<&'static str>,
    /// SZL item index the article number is reported under
    pub identification_index: u16,
    /// Header error put on every read/write response
    pub header_error: Option<(u8, u8)>,
    /// Return fewer items than requested
    pub drop_items: usize,
    /// Delay before answering a read/write job
    pub job_delay: Duration,
    /// Do not answer read/write jobs at all
    pub ignore_jobs: bool,
}

impl Default for PlcBehavior {
    fn default() -> Self {
        Self {
            max_amq_caller: 8,
            max_amq_callee: 8,
            pdu_size: 240,
            answer_connect: true,
            article_number: Some("6ES7 511-1AK00-0AB0"),
            identification_index: 0x0001,
            header_error: None,
            drop_items: 0,
            job_delay: Duration::ZERO,
            ignore_jobs: false,
        }
    }
}

/// Shared state observable by the test.
#[derive(Debug, Default)]
pub struct PlcStats {
    pub jobs: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    memory: parking_lot::Mutex<HashMap<(u8, u16), Vec<u8>>>,
}

impl PlcStats {
    pub fn poke(&self, area: u8, db: u16, offset: usize, bytes: &[u8]) {
        let mut memory = self.memory.lock();
        let block = memory.entry((area, db)).or_insert_with(|| vec![0; AREA_SIZE]);
        block[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn peek(&self, area: u8, db: u16, offset: usize, len: usize) -> Vec<u8> {
        let mut memory = self.memory.lock();
        let block = memory.entry((area, db)).or_insert_with(|| vec![0; AREA_SIZE]);
        block[offset..offset + len].to_vec()
    }
}

/// Connection wired to a simulated controller that accepts one session.
pub fn connect_to_plc(config: S7Config, behavior: PlcBehavior) -> (Arc<Connection>, Arc<PlcStats>, JoinHandle<()>) {
    init_tracing();
    let (transport, acceptor) = DuplexTransport::new(64 * 1024);
    let connection = Connection::new(config, Arc::new(transport)).unwrap();
    let stats = Arc::new(PlcStats::default());
    let handle = tokio::spawn(run_plc(acceptor, behavior, Arc::clone(&stats)));
    (connection, stats, handle)
}

async fn run_plc(mut acceptor: DuplexAcceptor, behavior: PlcBehavior, stats: Arc<PlcStats>) {
    let Some(stream) = acceptor.accept().await else {
        return;
    };
    let (mut sink, mut frames) = Framed::new(stream, TpktCodec::default()).split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<TpktPacket>();
    tokio::spawn(async move {
        while let Some(packet) = out_rx.recv().await {
            if sink.send(packet).await.is_err() {
                return;
            }
        }
    });

    while let Some(Ok(packet)) = frames.next().await {
        if let CotpTpdu::ConnectionRequest { .. } = packet.payload.tpdu {
            if behavior.answer_connect {
                let _ = out_tx.send(connection_confirm(&packet));
            }
            continue;
        }
        let Some(message) = packet.into_s7_message() else {
            continue;
        };
        match &message.parameter {
            Some(S7Parameter::SetupCommunication { .. }) => {
                let _ = out_tx.send(TpktPacket::data(
                    1,
                    S7Message::response_data(
                        message.tpdu_reference,
                        Some(S7Parameter::SetupCommunication {
                            max_amq_caller: behavior.max_amq_caller,
                            max_amq_callee: behavior.max_amq_callee,
                            pdu_length: behavior.pdu_size,
                        }),
                        None,
                    ),
                ));
            }
            Some(S7Parameter::UserData { .. }) => {
                let _ = out_tx.send(szl_response(
                    message.tpdu_reference,
                    behavior.article_number,
                    behavior.identification_index,
                ));
            }
            Some(S7Parameter::ReadVarRequest { .. }) | Some(S7Parameter::WriteVarRequest { .. }) => {
                stats.jobs.fetch_add(1, Ordering::SeqCst);
                if behavior.ignore_jobs {
                    continue;
                }
                let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
                let stats = Arc::clone(&stats);
                let behavior = behavior.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    if !behavior.job_delay.is_zero() {
                        tokio::time::sleep(behavior.job_delay).await;
                    }
                    let response = answer_job(&message, &behavior, &stats);
                    stats.in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = out_tx.send(TpktPacket::data(0, response));
                });
            }
            _ => {}
        }
    }
}

fn connection_confirm(request: &TpktPacket) -> TpktPacket {
    let src_ref = match request.payload.tpdu {
        CotpTpdu::ConnectionRequest { src_ref, .. } => src_ref,
        _ => 0,
    };
    TpktPacket::new(CotpPacket {
        tpdu: CotpTpdu::ConnectionResponse {
            dst_ref: src_ref,
            src_ref: 0x0044,
            class: CotpProtocolClass::Class0,
        },
        parameters: request.payload.parameters.clone(),
        payload: None,
    })
}

fn szl_response(tpdu_reference: u16, article_number: Option<&str>, item_index: u16) -> TpktPacket {
    let items = article_number
        .map(|article| {
            let mut mlfb = format!("{article:<20}").into_bytes();
            mlfb.truncate(20);
            vec![SzlDataTreeItem {
                item_index,
                mlfb: Bytes::from(mlfb),
                module_type_id: 0,
                ausbg: 1,
                ausbe: 1,
            }]
        })
        .unwrap_or_default();
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
    TpktPacket::data(2, S7Message::user_data(tpdu_reference, parameter, payload))
}

fn element_size(size: S7TransportSize) -> usize {
    match size {
        S7TransportSize::Word | S7TransportSize::Int => 2,
        S7TransportSize::DWord | S7TransportSize::DInt | S7TransportSize::Real => 4,
        _ => 1,
    }
}

fn data_transport_size(size: S7TransportSize) -> DataTransportSize {
    match size {
        S7TransportSize::Bit => DataTransportSize::Bit,
        S7TransportSize::Int | S7TransportSize::DInt => DataTransportSize::Integer,
        S7TransportSize::Real => DataTransportSize::Real,
        _ => DataTransportSize::ByteWordDword,
    }
}

fn answer_job(request: &S7Message, behavior: &PlcBehavior, stats: &PlcStats) -> S7Message {
    let id = request.tpdu_reference;
    if let Some((error_class, error_code)) = behavior.header_error {
        return S7Message {
            tpdu_reference: id,
            kind: S7MessageKind::ResponseData {
                error_class,
                error_code,
            },
            parameter: None,
            payload: None,
        };
    }
    match (&request.parameter, &request.payload) {
        (Some(S7Parameter::ReadVarRequest { items }), _) => {
            let count = items.len().saturating_sub(behavior.drop_items);
            let data: Vec<_> = items
                .iter()
                .take(count)
                .map(|S7Address::Any(a)| {
                    let offset = a.byte_address as usize;
                    let n = usize::from(a.number_of_elements);
                    let bytes = if a.transport_size == S7TransportSize::Bit {
                        let raw = stats.peek(a.area.code(), a.db_number, offset, 1)[0];
                        vec![(raw >> a.bit_address) & 0x01]
                    } else {
                        stats.peek(a.area.code(), a.db_number, offset, n * element_size(a.transport_size))
                    };
                    S7VarPayloadDataItem::new(
                        DataTransportErrorCode::Ok,
                        data_transport_size(a.transport_size),
                        Bytes::from(bytes),
                    )
                })
                .collect();
            S7Message::response_data(
                id,
                Some(S7Parameter::ReadVarResponse {
                    num_items: data.len() as u8,
                }),
                Some(S7Payload::ReadVarResponse { items: data }),
            )
        }
        (
            Some(S7Parameter::WriteVarRequest { items }),
            Some(S7Payload::WriteVarRequest { items: data }),
        ) => {
            let count = items.len().saturating_sub(behavior.drop_items);
            let codes: Vec<_> = items
                .iter()
                .zip(data)
                .take(count)
                .map(|(S7Address::Any(a), item)| {
                    let offset = a.byte_address as usize;
                    if a.area.code() == 0x81 {
                        return DataTransportErrorCode::AccessDenied;
                    }
                    if a.transport_size == S7TransportSize::Bit {
                        let mut raw = stats.peek(a.area.code(), a.db_number, offset, 1)[0];
                        if item.data.first().is_some_and(|b| *b & 0x01 != 0) {
                            raw |= 1 << a.bit_address;
                        } else {
                            raw &= !(1 << a.bit_address);
                        }
                        stats.poke(a.area.code(), a.db_number, offset, &[raw]);
                    } else {
                        stats.poke(a.area.code(), a.db_number, offset, &item.data);
                    }
                    DataTransportErrorCode::Ok
                })
                .collect();
            S7Message::response_data(
                id,
                Some(S7Parameter::WriteVarResponse {
                    num_items: codes.len() as u8,
                }),
                Some(S7Payload::WriteVarResponse { items: codes }),
            )
        }
        _ => S7Message::response_data(id, None, None),
    }
}

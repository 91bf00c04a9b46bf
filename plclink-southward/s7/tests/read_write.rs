mod common;

use common::{connect_to_plc, PlcBehavior, PlcStats};
use plclink_s7::{Connection, PlcResponseCode, PlcValue, S7Config, S7Error};
use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

const DATA_BLOCKS: u8 = 0x84;

async fn connected(config: S7Config, behavior: PlcBehavior) -> (Arc<Connection>, Arc<PlcStats>) {
    let (connection, stats, _) = connect_to_plc(config, behavior);
    connection.connect().wait().await.unwrap();
    (connection, stats)
}

#[tokio::test]
async fn written_values_read_back() {
    let (connection, stats) = connected(S7Config::default(), PlcBehavior::default()).await;

    let written = connection
        .write_request_builder()
        .add_tag_address("speed", "%DB1.DBW0:INT", -1234i16)
        .unwrap()
        .add_tag_address("ratio", "%DB1.DBD2:REAL", 0.5f32)
        .unwrap()
        .add_tag_address("run", "%DB1.DBX6.3:BOOL", true)
        .unwrap()
        .add_tag_address("label", "%DB1.DBB8:STRING(8)", "pump")
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert!(written.all_ok());
    assert_eq!(written.tag_names().collect::<Vec<_>>(), ["speed", "ratio", "run", "label"]);
    assert_eq!(stats.peek(DATA_BLOCKS, 1, 0, 2), (-1234i16).to_be_bytes());
    assert_eq!(stats.peek(DATA_BLOCKS, 1, 6, 1), [0b0000_1000]);

    let read = connection
        .read_request_builder()
        .add_tag_address("speed", "%DB1.DBW0:INT")
        .unwrap()
        .add_tag_address("ratio", "%DB1.DBD2:REAL")
        .unwrap()
        .add_tag_address("run", "%DB1.DBX6.3:BOOL")
        .unwrap()
        .add_tag_address("idle", "%DB1.DBX6.4:BOOL")
        .unwrap()
        .add_tag_address("label", "%DB1.DBB8:STRING(8)")
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(read.value("speed"), Some(&PlcValue::Int(-1234)));
    assert_eq!(read.value("ratio"), Some(&PlcValue::Real(0.5)));
    assert_eq!(read.value("run"), Some(&PlcValue::Bool(true)));
    assert_eq!(read.value("idle"), Some(&PlcValue::Bool(false)));
    assert_eq!(read.value("label"), Some(&PlcValue::String("pump".into())));
    assert!(read.iter().all(|i| i.code == PlcResponseCode::Ok));
}

#[tokio::test]
async fn arrays_are_read_element_wise() {
    let (connection, stats) = connected(S7Config::default(), PlcBehavior::default()).await;
    stats.poke(DATA_BLOCKS, 3, 0, &[0x00, 0x01, 0x00, 0x02, 0xFF, 0xFF]);

    let read = connection
        .read_request_builder()
        .add_tag_address("values", "%DB3:0:INT[3]")
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(
        read.value("values"),
        Some(&PlcValue::List(vec![
            PlcValue::Int(1),
            PlcValue::Int(2),
            PlcValue::Int(-1)
        ]))
    );
}

#[tokio::test]
async fn disabled_put_get_denies_every_tag() {
    let behavior = PlcBehavior {
        header_error: Some((0x81, 0x04)),
        ..Default::default()
    };
    let (connection, _) = connected(S7Config::default(), behavior).await;

    let read = connection
        .read_request_builder()
        .add_tag_address("a", "%DB1.DBW0:INT")
        .unwrap()
        .add_tag_address("b", "%M0.0:BOOL")
        .unwrap()
        .execute()
        .await
        .unwrap();
    for item in read.iter() {
        assert_eq!(item.code, PlcResponseCode::AccessDenied);
        assert_eq!(item.value, None);
    }
}

#[tokio::test]
async fn other_header_errors_are_internal() {
    let behavior = PlcBehavior {
        header_error: Some((0x85, 0x00)),
        ..Default::default()
    };
    let (connection, _) = connected(S7Config::default(), behavior).await;

    let written = connection
        .write_request_builder()
        .add_tag_address("a", "%DB1.DBW0:INT", 1i16)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(written.response_code("a"), Some(PlcResponseCode::InternalError));
}

#[tokio::test]
async fn item_count_mismatch_fails_request() {
    let behavior = PlcBehavior {
        drop_items: 1,
        ..Default::default()
    };
    let (connection, _) = connected(S7Config::default(), behavior).await;

    let err = connection
        .read_request_builder()
        .add_tag_address("a", "%DB1.DBW0:INT")
        .unwrap()
        .add_tag_address("b", "%DB1.DBW2:INT")
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        S7Error::ErrItemCountMismatch {
            expected: 2,
            actual: 1
        }
    ));
    assert_eq!(connection.transaction_manager().active_requests(), 0);
}

#[tokio::test]
async fn per_item_codes_do_not_abort_batch() {
    let (connection, _) = connected(S7Config::default(), PlcBehavior::default()).await;

    let written = connection
        .write_request_builder()
        .add_tag_address("input", "%I0.0:BOOL", true)
        .unwrap()
        .add_tag_address("marker", "%M0.0:BOOL", true)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(written.response_code("input"), Some(PlcResponseCode::AccessDenied));
    assert_eq!(written.response_code("marker"), Some(PlcResponseCode::Ok));
}

#[tokio::test]
async fn requests_beyond_limit_wait_for_a_slot() {
    let behavior = PlcBehavior {
        max_amq_callee: 2,
        job_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let (connection, stats) = connected(S7Config::default(), behavior).await;
    assert_eq!(connection.transaction_manager().concurrency_limit(), 2);

    let reads: Vec<_> = (0..6)
        .map(|i| {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move {
                connection
                    .read_request_builder()
                    .add_tag_address("v", &format!("%DB1.DBW{}:INT", i * 2))
                    .unwrap()
                    .execute()
                    .await
            })
        })
        .collect();
    for read in reads {
        let response = read.await.unwrap().unwrap();
        assert_eq!(response.response_code("v"), Some(PlcResponseCode::Ok));
    }
    assert_eq!(stats.jobs.load(Ordering::SeqCst), 6);
    assert!(stats.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(connection.transaction_manager().active_requests(), 0);
}

#[tokio::test]
async fn unanswered_request_times_out_and_frees_slot() {
    let config = S7Config {
        request_timeout_ms: 100,
        ..Default::default()
    };
    let behavior = PlcBehavior {
        ignore_jobs: true,
        ..Default::default()
    };
    let (connection, _) = connected(config, behavior).await;

    let err = connection
        .read_request_builder()
        .add_tag_address("a", "%DB1.DBW0:INT")
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(connection.transaction_manager().active_requests(), 0);
    assert!(connection.is_connected());
}

#[tokio::test]
async fn cancelled_read_returns_promptly() {
    let behavior = PlcBehavior {
        ignore_jobs: true,
        ..Default::default()
    };
    let (connection, _) = connected(S7Config::default(), behavior).await;
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = connection
        .read_request_builder()
        .add_tag_address("a", "%DB1.DBW0:INT")
        .unwrap()
        .execute_with_cancel(&cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(connection.transaction_manager().active_requests(), 0);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_sending() {
    let (connection, stats) = connected(S7Config::default(), PlcBehavior::default()).await;

    let err = connection
        .read_request_builder()
        .add_tag_address("a", "%DB1.DBX5:BOOL")
        .unwrap_err();
    assert!(matches!(err, S7Error::ErrInvalidAddress(_)));

    let err = connection
        .write_request_builder()
        .add_tag_address("small", "%DB1.DBB0:SINT", 300i32)
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, S7Error::ErrInvalidValue { ref tag, .. } if tag == "small"));
    assert_eq!(stats.jobs.load(Ordering::SeqCst), 0);
}

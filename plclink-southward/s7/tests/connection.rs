mod common;

use common::{connect_to_plc, PlcBehavior};
use plclink_s7::{ConnectionState, ControllerType, S7Config, S7Error};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn negotiated_callee_becomes_concurrency_limit() {
    let behavior = PlcBehavior {
        max_amq_callee: 5,
        max_amq_caller: 3,
        pdu_size: 480,
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(S7Config::default(), behavior);
    connection.connect().wait().await.unwrap();

    assert!(connection.is_connected());
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connection.transaction_manager().concurrency_limit(), 5);
    let ctx = connection.driver_context();
    assert_eq!(ctx.max_amq_callee, 5);
    assert_eq!(ctx.max_amq_caller, 3);
    assert_eq!(ctx.pdu_size, 480);
    assert_eq!(ctx.controller_type, ControllerType::S71500);
}

#[tokio::test]
async fn configured_controller_skips_identification() {
    let config = S7Config {
        controller_type: ControllerType::S7300,
        ..Default::default()
    };
    let behavior = PlcBehavior {
        article_number: None,
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(config, behavior);
    connection.connect().wait().await.unwrap();
    assert_eq!(connection.driver_context().controller_type, ControllerType::S7300);
}

#[tokio::test]
async fn missing_identification_record_fails_connect() {
    let behavior = PlcBehavior {
        article_number: None,
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(S7Config::default(), behavior);
    let err = connection.connect().wait().await.unwrap_err();
    assert!(matches!(err, S7Error::ErrIdentification(_)));
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn records_other_than_module_identification_are_ignored() {
    let behavior = PlcBehavior {
        article_number: Some("6ES7 315-2EH14-0AB0"),
        identification_index: 0x0006,
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(S7Config::default(), behavior);
    let err = connection.connect().wait().await.unwrap_err();
    assert!(matches!(err, S7Error::ErrIdentification(_)), "{err}");
    assert_eq!(connection.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn missing_identification_record_can_be_tolerated() {
    let config = S7Config {
        fail_on_unidentified_controller: false,
        ..Default::default()
    };
    let behavior = PlcBehavior {
        article_number: None,
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(config, behavior);
    connection.connect().wait().await.unwrap();
    assert_eq!(connection.driver_context().controller_type, ControllerType::Any);
}

#[tokio::test]
async fn unknown_article_number_keeps_any() {
    let behavior = PlcBehavior {
        article_number: Some("6ES7 999-0XX00-0AB0"),
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(S7Config::default(), behavior);
    connection.connect().wait().await.unwrap();
    assert_eq!(connection.driver_context().controller_type, ControllerType::Any);
}

#[tokio::test]
async fn passive_mode_skips_handshake() {
    let config = S7Config {
        passive_mode: true,
        ..Default::default()
    };
    let behavior = PlcBehavior {
        answer_connect: false,
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(config, behavior);
    connection.connect().wait().await.unwrap();
    assert!(connection.is_connected());
    // limits stay at their configured values
    assert_eq!(connection.transaction_manager().concurrency_limit(), 8);
}

#[tokio::test]
async fn silent_peer_times_out_handshake() {
    let config = S7Config {
        handshake_timeout_ms: 100,
        ..Default::default()
    };
    let behavior = PlcBehavior {
        answer_connect: false,
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(config, behavior);
    let err = connection.connect().wait().await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn fire_and_forget_resolves_before_handshake() {
    let config = S7Config {
        await_setup_complete: false,
        handshake_timeout_ms: 100,
        ..Default::default()
    };
    let behavior = PlcBehavior {
        answer_connect: false,
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(config, behavior);
    let mut states = connection.subscribe_state();
    connection.connect().wait().await.unwrap();

    // handshake failure is only observable through the state
    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s == ConnectionState::Failed),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn cancellation_aborts_handshake() {
    let behavior = PlcBehavior {
        answer_connect: false,
        ..Default::default()
    };
    let (connection, _, _) = connect_to_plc(S7Config::default(), behavior);
    let cancel = CancellationToken::new();
    let handle = connection.connect_with_cancel(cancel.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    let err = handle.wait().await.unwrap_err();
    assert!(err.is_cancelled(), "{err}");
}

#[tokio::test]
async fn closed_connection_rejects_requests() {
    let (connection, _, _) = connect_to_plc(S7Config::default(), PlcBehavior::default());
    connection.connect().wait().await.unwrap();
    connection.close().await;
    assert_eq!(connection.state(), ConnectionState::Closed);

    let err = connection
        .read_request_builder()
        .add_tag_address("a", "%DB1.DBW0:INT")
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, S7Error::ErrNotActive));
}

#[tokio::test]
async fn peer_disconnect_marks_connection_failed() {
    let (connection, _, plc) = connect_to_plc(S7Config::default(), PlcBehavior::default());
    connection.connect().wait().await.unwrap();
    let mut states = connection.subscribe_state();
    plc.abort();

    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s == ConnectionState::Failed),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!connection.is_connected());
}

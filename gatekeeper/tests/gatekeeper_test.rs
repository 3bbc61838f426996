//! Sync orchestration against an in-process keymaster.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use gatekeeper::channel::{MockKeymaster, MockReply, DEFAULT_TTL};
use gatekeeper::door::{MemoryDoorController, SimulatedDevice};
use gatekeeper::{
    messages, Change, ChannelKey, CheckIn, ConfigurationError, ControllerRegistry, DoorCode, DoorEvent,
    DoorEventType, DoorType, ErrorKind, Gatekeeper, GatekeeperConfig, GatekeeperError, SecureChannel,
};
use serde_json::{json, Value};

fn door(name: &str, door_type: &str) -> Value {
    json!({
        "name": name,
        "door_type": door_type,
        "ip_address": "10.0.0.1",
        "username": "admin",
        "password": "secret",
    })
}

fn config_reply(doors: Vec<Value>) -> MockReply {
    MockReply::Message(Value::Array(doors).to_string())
}

fn gatekeeper_with(mock: MockKeymaster, key: &ChannelKey, registry: ControllerRegistry) -> (Gatekeeper, Arc<MockKeymaster>) {
    let mock = Arc::new(mock);
    let channel = SecureChannel::new(key, DEFAULT_TTL).with_transport(mock.clone());
    (Gatekeeper::new(channel, registry), mock)
}

/// Registry whose `maypi` doors all drive one simulated device.
fn simulated_registry(device: &SimulatedDevice) -> ControllerRegistry {
    let device = device.clone();
    ControllerRegistry::default().with(DoorType::Maypi, move |endpoint| {
        Box::new(MemoryDoorController::new(endpoint.clone(), device.clone()))
    })
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_handshake_accepts_keymaster() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::TEST_QUESTION, MockReply::Message(messages::TEST_RESPONSE.into()));
    let (gatekeeper, _) = gatekeeper_with(mock, &key, ControllerRegistry::default());

    gatekeeper.test_keymaster_connection().await.unwrap();
}

#[tokio::test]
async fn test_handshake_wrong_reply() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::TEST_QUESTION, MockReply::Message("Who?".into()));
    let (gatekeeper, _) = gatekeeper_with(mock, &key, ControllerRegistry::default());

    let err = gatekeeper.test_keymaster_connection().await.unwrap_err();
    assert!(matches!(err, GatekeeperError::Handshake { ref reply } if reply == "Who?"));
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_configure_single_test_door() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Front", "test")]));
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, ControllerRegistry::default());

    gatekeeper.configure_doors().await.unwrap();

    let names: Vec<_> = gatekeeper.get_doors().unwrap().keys().cloned().collect();
    assert_eq!(names, vec!["Front"]);

    let front = gatekeeper.get_door("Front").unwrap();
    assert_eq!(front.door_type(), DoorType::Test);
    assert_eq!(front.config().endpoint.ip_address, "10.0.0.1");
    assert!(matches!(
        gatekeeper.get_door("Back").unwrap_err(),
        GatekeeperError::DoorNotFound(ref name) if name == "Back"
    ));
}

#[tokio::test]
async fn test_configuration_may_arrive_as_data() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL).with_reply(
        messages::PULL_CONFIGURATION,
        MockReply::WithData(messages::SUCCESS_RESPONSE.into(), json!([door("Front", "test")])),
    );
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, ControllerRegistry::default());

    gatekeeper.configure_doors().await.unwrap();
    assert!(gatekeeper.get_door("Front").is_ok());
}

#[tokio::test]
async fn test_unsupported_door_type_keeps_previous_doors() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Front", "test")]));
    let (mut gatekeeper, mock) = gatekeeper_with(mock, &key, ControllerRegistry::default());
    gatekeeper.configure_doors().await.unwrap();

    mock.set_reply(
        messages::PULL_CONFIGURATION,
        config_reply(vec![door("Side", "test"), door("Garage", "hid")]),
    )
    .await;
    let err = gatekeeper.configure_doors().await.unwrap_err();

    assert!(matches!(
        err,
        GatekeeperError::Configuration(ConfigurationError::UnsupportedDoorType { ref door, .. }) if door == "Garage"
    ));
    let names: Vec<_> = gatekeeper.get_doors().unwrap().keys().cloned().collect();
    assert_eq!(names, vec!["Front"]);
}

#[tokio::test]
async fn test_failed_first_configuration_stays_unconfigured() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Lab", "laser")]));
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, ControllerRegistry::default());

    let err = gatekeeper.configure_doors().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!gatekeeper.is_configured());
    assert!(matches!(gatekeeper.get_doors().unwrap_err(), GatekeeperError::State { .. }));
}

#[tokio::test]
async fn test_empty_and_duplicate_configurations_rejected() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![]));
    let (mut gatekeeper, mock) = gatekeeper_with(mock, &key, ControllerRegistry::default());

    let err = gatekeeper.configure_doors().await.unwrap_err();
    assert!(matches!(err, GatekeeperError::Configuration(ConfigurationError::NoDoors)));

    mock.set_reply(
        messages::PULL_CONFIGURATION,
        config_reply(vec![door("Front", "test"), door("Front", "test")]),
    )
    .await;
    let err = gatekeeper.configure_doors().await.unwrap_err();
    assert!(matches!(err, GatekeeperError::Configuration(ConfigurationError::DuplicateDoor(_))));
}

#[tokio::test]
async fn test_configuration_that_is_not_json() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, MockReply::Message("doors please".into()));
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, ControllerRegistry::default());

    let err = gatekeeper.configure_doors().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn test_configure_loads_credentials_eagerly() {
    let key = ChannelKey::generate();
    let device = SimulatedDevice::new();
    device.seed(&[DoorCode::new("alice", "1111")]).await;

    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Front", "maypi")]));
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, simulated_registry(&device));

    gatekeeper.configure_doors().await.unwrap();

    let front = gatekeeper.get_door("Front").unwrap();
    let alice = front.controller().cardholders().get_by_username("alice").unwrap();
    assert_eq!(alice.get("code"), Some("1111"));
}

// =============================================================================
// Door operations
// =============================================================================

#[tokio::test]
async fn test_pull_event_logs_lists_every_door() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL).with_reply(
        messages::PULL_CONFIGURATION,
        config_reply(vec![door("Front", "test"), door("Back", "test")]),
    );
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, ControllerRegistry::default());
    gatekeeper.configure_doors().await.unwrap();

    let logs = gatekeeper.pull_event_logs(5).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs["Front"].is_empty());
    assert!(logs["Back"].is_empty());
}

#[tokio::test]
async fn test_pull_door_codes_reconciles_device() {
    let key = ChannelKey::generate();
    let device = SimulatedDevice::new();
    device
        .seed(&[DoorCode::new("carol", "3333"), DoorCode::new("bob", "2222")])
        .await;

    let codes = json!([
        {"username": "alice", "code": "1111", "first_name": "Alice", "last_name": "Smith"},
        {"username": "bob", "code": "2222"},
    ]);
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Front", "maypi")]))
        .with_reply(messages::PULL_DOOR_CODES, MockReply::Message(codes.to_string()));
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, simulated_registry(&device));
    gatekeeper.configure_doors().await.unwrap();

    let applied = gatekeeper.pull_door_codes().await.unwrap();
    assert_eq!(
        applied["Front"],
        vec![
            Change::Remove {
                username: "carol".to_string()
            },
            Change::Add {
                code: DoorCode::new("alice", "1111").with_name("Alice", "Smith")
            },
        ]
    );
    assert_eq!(device.usernames().await, vec!["alice", "bob"]);

    // Nothing left to do on the second pass.
    let applied = gatekeeper.pull_door_codes().await.unwrap();
    assert!(applied["Front"].is_empty());
}

#[tokio::test]
async fn test_clock_sync_and_clear() {
    let key = ChannelKey::generate();
    let device = SimulatedDevice::new();
    device.seed(&[DoorCode::new("alice", "1111")]).await;

    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Front", "maypi")]));
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, simulated_registry(&device));
    gatekeeper.configure_doors().await.unwrap();

    gatekeeper.sync_clocks().await.unwrap();
    gatekeeper.load_data().await.unwrap();
    gatekeeper.clear_all_codes().await.unwrap();

    let state = device.state().await;
    assert!(state.clock.is_some());
    assert!(state.codes.is_empty());
}

#[tokio::test]
async fn test_offline_door_fails_the_operation() {
    let key = ChannelKey::generate();
    let device = SimulatedDevice::new();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Front", "maypi")]));
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, simulated_registry(&device));
    gatekeeper.configure_doors().await.unwrap();

    device.set_online(false).await;
    let err = gatekeeper.sync_clocks().await.unwrap_err();

    assert!(matches!(
        err,
        GatekeeperError::Door { ref door, operation: "set_time", .. } if door == "Front"
    ));
}

#[tokio::test]
async fn test_slow_door_times_out() {
    let key = ChannelKey::generate();
    let device = SimulatedDevice::new();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Front", "maypi")]));
    let (gatekeeper, _) = gatekeeper_with(mock, &key, simulated_registry(&device));
    let mut gatekeeper = gatekeeper.with_config(GatekeeperConfig {
        door_timeout: Duration::from_millis(50),
    });
    gatekeeper.configure_doors().await.unwrap();

    device.set_latency(Duration::from_secs(2)).await;
    let err = gatekeeper.pull_event_logs(10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Door);
    assert!(err.to_string().contains("Timed out"));
}

// =============================================================================
// Event log push, check-in
// =============================================================================

#[tokio::test]
async fn test_push_event_logs_ok_reconfigures() {
    let key = ChannelKey::generate();
    let device = SimulatedDevice::new();
    let timestamp = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    device
        .record_event(DoorEvent::new(timestamp, DoorEventType::Denied).with_username("mallory"))
        .await;

    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Front", "maypi")]))
        .with_reply(messages::PUSH_EVENT_LOGS, MockReply::Message(messages::SUCCESS_RESPONSE.into()));
    let (mut gatekeeper, mock) = gatekeeper_with(mock, &key, simulated_registry(&device));
    gatekeeper.configure_doors().await.unwrap();

    gatekeeper.push_event_logs(100).await.unwrap();

    assert_eq!(
        mock.received_tags().await,
        vec![
            messages::PULL_CONFIGURATION,
            messages::PUSH_EVENT_LOGS,
            messages::PULL_CONFIGURATION
        ]
    );
    let pushed = mock.received().await[1].data.clone().unwrap();
    assert_eq!(pushed["Front"][0]["username"], "mallory");
    assert_eq!(pushed["Front"][0]["event_type"], "3");
}

#[tokio::test]
async fn test_push_event_logs_fail_does_not_reconfigure() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, config_reply(vec![door("Front", "test")]))
        .with_reply(messages::PUSH_EVENT_LOGS, MockReply::Message("FAIL".into()));
    let (mut gatekeeper, mock) = gatekeeper_with(mock, &key, ControllerRegistry::default());
    gatekeeper.configure_doors().await.unwrap();

    let err = gatekeeper.push_event_logs(100).await.unwrap_err();

    assert!(matches!(err, GatekeeperError::Sync { ref reply, .. } if reply == "FAIL"));
    assert_eq!(mock.call_count(messages::PULL_CONFIGURATION).await, 1);
}

#[tokio::test]
async fn test_check_in_and_mark_success() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::CHECK_IN, MockReply::Message(messages::NEW_DATA.into()))
        .with_reply(messages::MARK_SUCCESS, MockReply::Message(messages::SUCCESS_RESPONSE.into()));
    let (gatekeeper, mock) = gatekeeper_with(mock, &key, ControllerRegistry::default());

    assert_eq!(gatekeeper.check_in().await.unwrap(), CheckIn::NewData);
    gatekeeper.mark_success().await.unwrap();

    mock.set_reply(messages::CHECK_IN, MockReply::Message(messages::NO_NEW_DATA.into()))
        .await;
    assert_eq!(gatekeeper.check_in().await.unwrap(), CheckIn::NoNewData);

    mock.set_reply(messages::CHECK_IN, MockReply::Message("maybe".into())).await;
    assert_eq!(gatekeeper.check_in().await.unwrap_err().kind(), ErrorKind::Protocol);

    mock.set_reply(messages::MARK_SUCCESS, MockReply::Error("No pending data".into()))
        .await;
    assert_eq!(gatekeeper.mark_success().await.unwrap_err().kind(), ErrorKind::Remote);
}

#[tokio::test]
async fn test_transport_failure_surfaces_with_tag() {
    let key = ChannelKey::generate();
    let mock = MockKeymaster::new(&key, DEFAULT_TTL)
        .with_reply(messages::PULL_CONFIGURATION, MockReply::Status(500));
    let (mut gatekeeper, _) = gatekeeper_with(mock, &key, ControllerRegistry::default());

    let err = gatekeeper.configure_doors().await.unwrap_err();
    assert!(matches!(
        err,
        GatekeeperError::Transport { ref tag, status: Some(500), .. } if tag == messages::PULL_CONFIGURATION
    ));
}

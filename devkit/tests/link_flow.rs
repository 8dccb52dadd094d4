//! Scénarios bout en bout : carte simulée ↔ lien ↔ règles ↔ stockage

use edge_devkit::test_utils::{fast_link_config, MOCK_PORT};
use edge_devkit::{MockDevice, TestHarness};
use edge_kernel::serial::command::ChannelState;
use edge_kernel::serial::LinkConfig;
use edge_kernel::EdgeError;
use std::time::Duration;

#[tokio::test]
async fn test_gas_alert_sends_buzzer_and_persists_alert() {
    let harness = TestHarness::new().with_default_rules().unwrap();
    harness.connect().await.unwrap();

    harness.device.send_telemetry(750, 500, 10, 0).unwrap();
    let commands = harness.wait_for_commands(1).await.unwrap();
    assert_eq!(commands, vec!["BUZZER_ON"]);

    harness.wait_for_buffered(1).await.unwrap();
    assert_eq!(harness.link.flush_buffer().unwrap(), 1);

    let stored = harness.store.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].gas, 750);
    assert_eq!(stored[0].alerts, vec!["Gas Danger Alert: gas > 700 (current: 750)"]);

    harness.link.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_noise_never_reaches_rules_or_buffer() {
    let harness = TestHarness::new().with_default_rules().unwrap();
    harness.connect().await.unwrap();

    harness.device.send_line("GAS:0,LIGHT:0,SOIL:0,WATER:0,INFRAR:1").unwrap();
    harness.device.send_telemetry(100, 500, 10, 0).unwrap();
    harness.wait_for_buffered(1).await.unwrap();

    // la ligne nulle aurait déclenché "light < 300"
    assert!(harness.device.received_commands().is_empty());
    assert_eq!(harness.link.status().buffered, 1);
    harness.link.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_rule_actions_wait_for_ack_in_order() {
    let device = MockDevice::new().with_manual_ack();
    let harness = TestHarness::with_device(device, fast_link_config())
        .with_default_rules()
        .unwrap();
    harness.connect().await.unwrap();

    // gaz > 700 et lumière < 300 : deux actions, la seconde en file
    harness.device.send_telemetry(900, 100, 10, 0).unwrap();
    assert_eq!(harness.wait_for_commands(1).await.unwrap(), vec!["BUZZER_ON"]);

    let link = harness.link.clone();
    harness
        .wait_until("queued action", || link.status().queued == 1)
        .await
        .unwrap();
    assert_eq!(harness.link.status().channel, ChannelState::Busy);

    harness.device.ack().unwrap();
    assert_eq!(
        harness.wait_for_commands(2).await.unwrap(),
        vec!["BUZZER_ON", "WHITE_LIGHT_ON"]
    );

    harness.device.ack().unwrap();
    let link = harness.link.clone();
    harness
        .wait_until("ready channel", || link.status().channel == ChannelState::Ready)
        .await
        .unwrap();
    harness.link.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_failed_flush_keeps_batch_ahead_of_new_data() {
    let harness = TestHarness::new();
    harness.connect().await.unwrap();

    harness.device.send_telemetry(1, 500, 10, 0).unwrap();
    harness.device.send_telemetry(2, 500, 10, 0).unwrap();
    harness.wait_for_buffered(2).await.unwrap();

    harness.store.fail_next_inserts(1);
    let err = harness.link.flush_buffer().unwrap_err();
    assert!(matches!(err, EdgeError::PersistenceFailure(_)));
    assert_eq!(harness.link.status().buffered, 2);

    harness.device.send_telemetry(3, 500, 10, 0).unwrap();
    harness.wait_for_buffered(3).await.unwrap();
    assert_eq!(harness.link.flush_buffer().unwrap(), 3);

    let gases: Vec<i32> = harness.store.stored().iter().map(|r| r.gas).collect();
    assert_eq!(gases, vec![1, 2, 3]);
    harness.link.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_periodic_flush_persists_without_disconnect() {
    let config = LinkConfig {
        flush_interval: Duration::from_millis(20),
        ..fast_link_config()
    };
    let harness = TestHarness::with_device(MockDevice::new(), config);
    harness.connect().await.unwrap();

    harness.device.send_telemetry(42, 500, 10, 0).unwrap();
    let store = harness.store.clone();
    harness
        .wait_until("periodic flush", || store.stored().len() == 1)
        .await
        .unwrap();
    assert_eq!(harness.link.status().buffered, 0);
    harness.link.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_drains_pending_telemetry() {
    let harness = TestHarness::new();
    harness.connect().await.unwrap();

    harness.device.send_telemetry(5, 500, 10, 0).unwrap();
    harness.wait_for_buffered(1).await.unwrap();
    harness.link.disconnect().await.unwrap();

    assert_eq!(harness.store.stored().len(), 1);
    assert!(!harness.link.is_connected());
    assert!(harness.link.disconnect().await.is_ok());
}

#[tokio::test]
async fn test_command_echo_updates_actuator_shadow() {
    let harness = TestHarness::new();
    harness.connect().await.unwrap();

    harness.link.send_command("WHITE_LIGHT_ON").await.unwrap();
    harness.device.send_line("Door opened 90").unwrap();

    let link = harness.link.clone();
    harness
        .wait_until("actuator echoes", || {
            link.actuator_state()
                .map(|s| s.white_light && s.door_angle == 90)
                .unwrap_or(false)
        })
        .await
        .unwrap();
    harness.link.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_unplugged_device_disconnects_link() {
    let harness = TestHarness::new();
    harness.connect().await.unwrap();

    harness.device.unplug().unwrap();
    let link = harness.link.clone();
    harness
        .wait_until("link teardown", || !link.is_connected())
        .await
        .unwrap();

    assert!(matches!(
        harness.link.send_command("FAN_ON").await,
        Err(EdgeError::NotConnected)
    ));
    harness.connect().await.unwrap();
    assert_eq!(harness.device.open_count(), 2);
    harness.link.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_open_failure_surfaces_transport_error() {
    let harness = TestHarness::new();
    harness.device.fail_next_open();

    let err = harness.link.connect(MOCK_PORT, 9600).await.unwrap_err();
    assert!(matches!(err, EdgeError::TransportFailure { .. }));
    assert!(!harness.link.is_connected());

    harness.connect().await.unwrap();
    assert!(harness.link.is_connected());
    harness.link.disconnect().await.unwrap();
}

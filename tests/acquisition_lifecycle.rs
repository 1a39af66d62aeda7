//! End-to-end tests of the assembled acquisition pipeline over the mock probe

mod common;

use common::builders::{acquisition_config, probe_a_with_temp, VariableBuilder};
use common::{count_user_errors, wait_until, TABLE_ADDRESS};
use mcu_link::acquisition::{drain, AcquisitionEvent, ConnectRequest, WindowSpec};
use mcu_link::backend::{ConnectFailures, MockTransport};
use mcu_link::types::{ConnectionState, VarType};
use mcu_link::Acquisition;
use std::time::{Duration, Instant};

const TEMP: u64 = 0x2000_0000;

#[tokio::test(start_paused = true)]
async fn test_startup_detect_connect_discover_and_poll() {
    let acq = Acquisition::new(probe_a_with_temp(), &acquisition_config(100));
    let events = acq.subscribe();
    acq.start();

    let probes = acq.detect_probes().await.unwrap().unwrap();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].name, "ProbeA");

    // Startup detection connects once and discovers the table
    assert_eq!(acq.connection().state(), ConnectionState::Connected);
    assert_eq!(acq.transport().connect_calls(), 1);
    assert_eq!(acq.registry().len(), 1);
    assert!(acq.registry().get(TEMP).is_some());

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(acq.poller().buffer_len(TEMP) >= 3);
    assert!(acq.registry().value(TEMP).is_some());

    let events = drain(&events);
    assert!(events
        .iter()
        .any(|e| matches!(e, AcquisitionEvent::ConnectionChanged(Some(_)))));
    assert!(events
        .iter()
        .any(|e| matches!(e, AcquisitionEvent::DiscoveryCompleted(vars) if vars.len() == 1)));

    acq.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_rate_change_clears_series() {
    let acq = Acquisition::new(probe_a_with_temp(), &acquisition_config(100));
    acq.start();
    acq.detect_probes().await.unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(acq.poller().buffer_len(TEMP) >= 3);

    acq.poller().set_rate(10);
    assert_eq!(acq.poller().buffer_len(TEMP), 0);
    assert_eq!(acq.poller().interval_ms(), 10);

    tokio::time::sleep(Duration::from_millis(105)).await;
    let len = acq.poller().buffer_len(TEMP);
    assert!(len >= 5, "expected fast polling, got {} samples", len);

    acq.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_polling_and_clears_state() {
    let acq = Acquisition::new(probe_a_with_temp(), &acquisition_config(100));
    let events = acq.subscribe();
    acq.start();
    acq.detect_probes().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    acq.disconnect().await.unwrap();
    assert_eq!(acq.connection().state(), ConnectionState::Idle);
    assert!(acq.session().is_none());
    assert!(acq.registry().is_empty());
    assert!(acq.poller().tracked_addresses().is_empty());

    let reads = acq.transport().read_calls();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(acq.transport().read_calls(), reads);

    let events = drain(&events);
    assert!(events
        .iter()
        .any(|e| matches!(e, AcquisitionEvent::ConnectionChanged(None))));

    acq.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_pause_freezes_series() {
    let acq = Acquisition::new(probe_a_with_temp(), &acquisition_config(100));
    acq.start();
    acq.detect_probes().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    acq.poller().pause();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let frozen = acq.poller().samples(TEMP);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(acq.poller().samples(TEMP).len(), frozen.len());
    assert_eq!(acq.poller().interval_ms(), 100);

    acq.poller().resume();
    assert!(
        wait_until(Duration::from_millis(500), || acq.poller().buffer_len(TEMP) > frozen.len()).await
    );

    acq.shutdown();
}

#[tokio::test]
async fn test_write_then_poll_reads_back_value() {
    let transport = MockTransport::new().with_probe("ProbeA").with_descriptor_table(
        TABLE_ADDRESS,
        vec![
            VariableBuilder::new("setpoint")
                .address(0x2000_0010)
                .var_type(VarType::I16)
                .writable()
                .category("Controls")
                .build(),
            VariableBuilder::new("temp")
                .address(TEMP)
                .var_type(VarType::F32)
                .build(),
        ],
    );
    let acq = Acquisition::new(transport, &acquisition_config(100));
    let events = acq.subscribe();
    acq.detect_probes().await.unwrap();

    acq.write(0x2000_0010, -250.0).await.unwrap();
    assert_eq!(acq.registry().value(0x2000_0010), Some(-250.0));
    assert_eq!(acq.transport().peek(0x2000_0010, 2), Some((-250i16).to_le_bytes().to_vec()));

    // Writable variables never get a series
    acq.poller().poll_once().await.unwrap();
    assert_eq!(acq.poller().tracked_addresses(), vec![TEMP]);
    assert_eq!(count_user_errors(&events), 0);
}

#[tokio::test(start_paused = true)]
async fn test_initial_connect_failure_is_silent_then_manual_retry_succeeds() {
    let transport = probe_a_with_temp().with_connect_failures(ConnectFailures::Always);
    let acq = Acquisition::new(transport, &acquisition_config(100));
    let events = acq.subscribe();

    acq.detect_probes().await.unwrap();
    assert_eq!(acq.connection().state(), ConnectionState::Idle);
    assert_eq!(acq.transport().connect_calls(), 3);
    assert_eq!(count_user_errors(&events), 0);

    acq.transport().set_connect_failures(ConnectFailures::None);
    let session = acq
        .connect(ConnectRequest::new(0).manual(true))
        .await
        .unwrap();
    assert!(session.is_some());
    assert_eq!(acq.connection().state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_manual_connect_failure_is_reported() {
    let transport = probe_a_with_temp().with_connect_failures(ConnectFailures::Always);
    let acq = Acquisition::new(transport, &acquisition_config(100));
    let events = acq.subscribe();

    let result = acq
        .connect(ConnectRequest::new(0).manual(true).with_max_attempts(1))
        .await;
    assert!(result.is_err());
    assert_eq!(count_user_errors(&events), 1);
    assert!(acq.session().is_none());
}

#[tokio::test]
async fn test_count_window_over_live_series() {
    let acq = Acquisition::new(probe_a_with_temp(), &acquisition_config(100));
    acq.detect_probes().await.unwrap();
    for _ in 0..20 {
        acq.poller().poll_once().await.unwrap();
    }

    let now = Instant::now();
    let last_five = acq.poller().project(TEMP, &WindowSpec::count(5), now);
    let all = acq.poller().samples(TEMP);
    assert_eq!(last_five.len(), 5);
    assert_eq!(&all[all.len() - 5..], last_five.as_slice());

    let everything = acq.poller().project(TEMP, &WindowSpec::count(1000), now);
    assert_eq!(everything.len(), 20);
}

//! Telemetry-driven start/stop through the wired orchestrator

mod common;

use common::{device, Harness};
use std::sync::atomic::Ordering;
use std::time::Duration;
use stream_orchestrator::device_state::LivenessState;
use stream_orchestrator::lifecycle_controller::LifecycleOutcome;
use stream_orchestrator::registry_client::StreamStatusUpdate;

#[tokio::test(start_paused = true)]
async fn test_camera_presence_starts_then_absence_stops() {
    let h = Harness::new(vec![device("BC001", &["camA"])]);
    h.bootstrap().await;

    let outcome = h.publish("BC001", &["camA"]).await;
    let url = match outcome {
        Some(LifecycleOutcome::Started { url }) => url,
        other => panic!("expected start, got {:?}", other),
    };
    assert_eq!(url, "rtmp://gateway.local/live/BC001/camA/normal-0");
    assert_eq!(
        h.orchestrator.states().liveness("BC001").await,
        LivenessState::Streaming
    );
    assert_eq!(
        h.registry.updates_for("BC001"),
        vec![StreamStatusUpdate::on(url.as_str())]
    );

    let (token, request) = h.stream.requests().remove(0);
    assert_eq!(token, "token-1");
    assert_eq!(request.url, "userName=viewer&password=secret&port=8554");
    assert_eq!(request.url_type, 2);
    assert_eq!(request.video_quality, 0);

    assert_eq!(
        h.publish("BC001", &[]).await,
        Some(LifecycleOutcome::Stopped)
    );
    assert_eq!(
        h.orchestrator.states().liveness("BC001").await,
        LivenessState::Idle
    );

    // Repeated absence is a no-op
    assert_eq!(
        h.publish("BC001", &[]).await,
        Some(LifecycleOutcome::Unchanged)
    );
    assert_eq!(
        h.registry.updates_for("BC001"),
        vec![StreamStatusUpdate::on(url.as_str()), StreamStatusUpdate::off()]
    );
    assert_eq!(h.stream.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_presence_while_streaming_does_not_restart() {
    let h = Harness::new(vec![device("BC001", &["camA"])]);
    h.bootstrap().await;

    h.publish("BC001", &["camA"]).await;
    for _ in 0..3 {
        assert_eq!(
            h.publish("BC001", &["camA"]).await,
            Some(LifecycleOutcome::Unchanged)
        );
    }

    assert_eq!(h.stream.calls(), 1);
    assert_eq!(h.registry.updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_absence_while_idle_makes_no_calls() {
    let h = Harness::new(vec![device("BC001", &["camA"])]);
    h.bootstrap().await;

    assert_eq!(
        h.publish("BC001", &[]).await,
        Some(LifecycleOutcome::Unchanged)
    );
    assert_eq!(h.stream.calls(), 0);
    assert!(h.registry.updates().is_empty());
    assert_eq!(h.auth.login_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_only_first_camera_drives_liveness() {
    let h = Harness::new(vec![device("BC001", &["camA", "camB"])]);
    h.bootstrap().await;

    assert_eq!(
        h.publish("BC001", &["camB"]).await,
        Some(LifecycleOutcome::Unchanged)
    );
    assert_eq!(h.stream.calls(), 0);

    assert!(matches!(
        h.publish("BC001", &["camA", "camB"]).await,
        Some(LifecycleOutcome::Started { .. })
    ));
    // camB alone means camA went away
    assert_eq!(
        h.publish("BC001", &["camB"]).await,
        Some(LifecycleOutcome::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_presence_yields_single_start() {
    let h = Harness::new(vec![device("BC001", &["camA"])]);
    h.bootstrap().await;
    h.stream.set_delay(Duration::from_secs(2));

    let (first, second, third) = tokio::join!(
        h.publish("BC001", &["camA"]),
        h.publish("BC001", &["camA"]),
        h.publish("BC001", &["camA"]),
    );

    assert!(matches!(first, Some(LifecycleOutcome::Started { .. })));
    assert_eq!(second, Some(LifecycleOutcome::StartInFlight));
    assert_eq!(third, Some(LifecycleOutcome::StartInFlight));
    assert_eq!(h.stream.calls(), 1);
    assert_eq!(h.registry.updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gateway_failure_leaves_device_idle_and_retries_on_next_message() {
    let h = Harness::new(vec![device("BC001", &["camA"])]);
    h.bootstrap().await;
    h.stream.fail.store(true, Ordering::SeqCst);

    assert_eq!(
        h.publish("BC001", &["camA"]).await,
        Some(LifecycleOutcome::StartFailed)
    );
    assert_eq!(
        h.orchestrator.states().liveness("BC001").await,
        LivenessState::Idle
    );
    assert!(h.registry.updates().is_empty());

    h.stream.fail.store(false, Ordering::SeqCst);
    assert!(matches!(
        h.publish("BC001", &["camA"]).await,
        Some(LifecycleOutcome::Started { .. })
    ));
    assert_eq!(h.stream.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credential_relogs_and_retries_once() {
    let h = Harness::new(vec![device("BC001", &["camA"])]);
    h.bootstrap().await;
    h.stream.reject_next.store(1, Ordering::SeqCst);

    assert!(matches!(
        h.publish("BC001", &["camA"]).await,
        Some(LifecycleOutcome::Started { .. })
    ));
    assert_eq!(h.auth.login_calls.load(Ordering::SeqCst), 2);

    let tokens: Vec<String> = h.stream.requests().into_iter().map(|(t, _)| t).collect();
    assert_eq!(tokens, vec!["token-1", "token-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_second_rejection_fails_the_start() {
    let h = Harness::new(vec![device("BC001", &["camA"])]);
    h.bootstrap().await;
    h.stream.reject_next.store(2, Ordering::SeqCst);

    assert_eq!(
        h.publish("BC001", &["camA"]).await,
        Some(LifecycleOutcome::StartFailed)
    );
    assert_eq!(h.stream.calls(), 2);
    assert!(h.registry.updates().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_token_reused_across_starts() {
    let h = Harness::new(vec![device("BC001", &["camA"]), device("BC002", &["camX"])]);
    h.bootstrap().await;

    h.publish("BC001", &["camA"]).await;
    h.publish("BC002", &["camX"]).await;

    assert_eq!(h.stream.calls(), 2);
    assert_eq!(h.auth.login_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_status_report_keeps_stream_and_next_stop_reports_off() {
    let h = Harness::new(vec![device("BC001", &["camA"])]);
    h.bootstrap().await;
    h.registry.fail_update.store(true, Ordering::SeqCst);

    assert!(matches!(
        h.publish("BC001", &["camA"]).await,
        Some(LifecycleOutcome::Started { .. })
    ));
    assert_eq!(
        h.orchestrator.states().liveness("BC001").await,
        LivenessState::Streaming
    );

    // No second gateway stream for the same presence
    h.publish("BC001", &["camA"]).await;
    assert_eq!(h.stream.calls(), 1);

    h.registry.fail_update.store(false, Ordering::SeqCst);
    assert_eq!(
        h.publish("BC001", &[]).await,
        Some(LifecycleOutcome::Stopped)
    );
    assert_eq!(
        h.registry.updates_for("BC001"),
        vec![StreamStatusUpdate::off()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_start_times_out_and_releases_guard() {
    let h = Harness::new(vec![device("BC001", &["camA"])]);
    h.bootstrap().await;
    h.stream.set_delay(Duration::from_secs(120));

    assert_eq!(
        h.publish("BC001", &["camA"]).await,
        Some(LifecycleOutcome::StartFailed)
    );
    let snapshot = h.orchestrator.controller().snapshot("BC001").await.unwrap();
    assert!(!snapshot.start_in_flight);
    assert_eq!(snapshot.liveness, LivenessState::Idle);

    h.stream.set_delay(Duration::ZERO);
    assert!(matches!(
        h.publish("BC001", &["camA"]).await,
        Some(LifecycleOutcome::Started { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_device_without_cameras_never_starts() {
    let h = Harness::new(vec![device("BC001", &[])]);
    h.bootstrap().await;

    assert_eq!(
        h.publish("BC001", &["camA"]).await,
        Some(LifecycleOutcome::Unchanged)
    );
    assert_eq!(h.stream.calls(), 0);
}

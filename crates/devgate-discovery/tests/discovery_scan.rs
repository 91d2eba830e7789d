mod common;

use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FakeProber, config, small_office};
use devgate_core::DeviceType;
use devgate_discovery::{DiscoveryConfig, DiscoveryError, DiscoveryService, TaskStatus};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_scan_small_office() {
    let service = DiscoveryService::new(config(4), small_office());
    let task = service.run_scan("10.0.0.0/29").await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.devices.len(), 8);
    assert_eq!(task.progress.total, 8);
    assert_eq!(task.progress.completed, 8);
    assert!(task.started_at.is_some() && task.finished_at.is_some());
    assert!(task.error.is_none());

    let summary = task.summary.as_ref().unwrap();
    assert_eq!(summary.total_hosts, 8);
    assert_eq!(summary.reachable, 3);
    assert_eq!(summary.identified, 2);
    assert_eq!(summary.success_rate, 3.0 / 8.0);
    assert_eq!(summary.by_protocol["ACCESS_ENTROPY_V4.8"], 1);
    assert_eq!(summary.by_protocol["VIDEO_HIKVISION_ISAPI"], 1);

    let access = task.devices.iter().find(|d| d.ip == ip("10.0.0.1")).unwrap();
    assert_eq!(access.device_type, Some(DeviceType::AccessController));
    assert_eq!(access.vendor.as_deref(), Some("Entropy"));
    assert_eq!(access.confidence, 60);
    assert_eq!(access.mac.as_deref(), Some("00:17:61:10:aa:05"));
    assert_eq!(access.open_ports.len(), 2);

    let other = task.devices.iter().find(|d| d.ip == ip("10.0.0.3")).unwrap();
    assert!(other.reachable);
    assert_eq!(other.confidence, 0);
    assert!(other.protocol_type.is_none());

    let silent = task.devices.iter().find(|d| d.ip == ip("10.0.0.7")).unwrap();
    assert!(!silent.reachable);
    assert!(silent.open_ports.is_empty());
}

#[tokio::test]
async fn test_onvif_answers_identify_cameras() {
    let prober = FakeProber::new()
        .host("10.0.1.1", &[(80, Some("HTTP/1.1 200 OK\r\nServer: lighttpd"))])
        .onvif("10.0.1.1", 80, "Acme NVT-100")
        .host("10.0.1.2", &[(80, None)])
        .onvif("10.0.1.2", 80, "Dahua IPC-HFW2431S")
        .host("10.0.1.3", &[(80, Some("HTTP/1.1 200 OK\r\nServer: lighttpd"))]);
    let service = DiscoveryService::new(config(4), prober);
    let task = service.run_scan("10.0.1.1-3").await.unwrap();
    let device = |s: &str| task.devices.iter().find(|d| d.ip == ip(s)).unwrap();

    let generic = device("10.0.1.1");
    assert_eq!(generic.protocol_type.as_ref().unwrap().as_str(), "VIDEO_ONVIF");
    assert_eq!(generic.device_type, Some(DeviceType::Camera));
    assert_eq!(generic.confidence, 5 + 40);
    assert_eq!(generic.open_ports[&80].onvif.as_deref(), Some("Acme NVT-100"));

    let dahua = device("10.0.1.2");
    assert_eq!(dahua.vendor.as_deref(), Some("Dahua"));
    assert_eq!(dahua.protocol_type.as_ref().unwrap().as_str(), "VIDEO_DAHUA_V1");

    // Same web server, no ONVIF service: port 80 alone only hints Hikvision.
    let plain = device("10.0.1.3");
    assert_eq!(plain.vendor.as_deref(), Some("Hikvision"));
    assert_eq!(plain.confidence, 10);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_is_bounded() {
    let prober = small_office().delay(Duration::from_millis(50));
    let service = DiscoveryService::new(config(2), prober);
    let task = service.run_scan("10.0.0.0/28").await.unwrap();

    assert_eq!(task.devices.len(), 16);
    assert_eq!(service.prober().probed.load(Ordering::SeqCst), 16);
    assert!(service.prober().peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_partial_results() {
    let prober = small_office().delay(Duration::from_millis(100));
    let service = DiscoveryService::new(config(1), prober);
    let id = service.start_scan("10.0.0.0/28");

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(service.task(id).unwrap().status, TaskStatus::Running);
    service.cancel(id).unwrap();

    let task = service.wait(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(!task.devices.is_empty());
    assert!(task.devices.len() < 16);
    assert_eq!(task.progress.completed, task.devices.len());
    assert_eq!(task.progress.total, 16);
    assert!(task.summary.is_some());
    assert_eq!(
        service.prober().probed.load(Ordering::SeqCst),
        task.devices.len()
    );
}

#[tokio::test(start_paused = true)]
async fn test_host_timeout_marks_unreachable() {
    let prober = small_office().delay(Duration::from_secs(10));
    let service = DiscoveryService::new(
        DiscoveryConfig {
            host_timeout_ms: 1000,
            ..config(8)
        },
        prober,
    );
    let task = service.run_scan("10.0.0.1-3").await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.devices.len(), 3);
    assert!(task.devices.iter().all(|d| !d.reachable));
}

#[tokio::test]
async fn test_invalid_range_fails_task() {
    let service = DiscoveryService::new(config(4), small_office());
    let task = service.run_scan("10.0.0.0/33").await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("prefix"));
    assert!(task.devices.is_empty());
}

#[tokio::test]
async fn test_range_over_limit_fails_task() {
    let service = DiscoveryService::new(
        DiscoveryConfig {
            max_hosts: 16,
            ..config(4)
        },
        small_office(),
    );
    let task = service.run_scan("10.0.0.0/24").await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("256"));
    assert_eq!(service.prober().probed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_preflight_failure_fails_task() {
    let service = DiscoveryService::new(config(4), small_office().failing_preflight());
    let task = service.run_scan("10.0.0.0/29").await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("no usable interface"));
    assert_eq!(task.progress.total, 8);
    assert_eq!(service.prober().probed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_terminal_task_ignores_cancel() {
    let service = DiscoveryService::new(config(4), small_office());
    let task = service.run_scan("10.0.0.1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    assert_eq!(service.cancel(task.id).unwrap(), TaskStatus::Completed);
    assert_eq!(service.task(task.id).unwrap(), task);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_spares_running_tasks() {
    let service = DiscoveryService::new(config(1), FakeProber::new().delay(Duration::from_secs(1)));

    let done = service.run_scan("10.0.0.1").await.unwrap();
    let running = service.start_scan("10.0.0.0/28");
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(service.tasks().len(), 2);
    assert_eq!(service.cleanup(Duration::ZERO), 1);
    assert!(matches!(service.task(done.id), Err(DiscoveryError::TaskNotFound(_))));
    assert_eq!(service.task(running).unwrap().status, TaskStatus::Running);

    service.cancel(running).unwrap();
    let finished = service.wait(running).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Cancelled);
    assert_eq!(service.cleanup(Duration::ZERO), 1);
    assert!(service.tasks().is_empty());
}

#[tokio::test]
async fn test_unknown_task() {
    let service = DiscoveryService::new(config(4), small_office());
    let id = "6f1c1f36-0f5e-4cf1-9d0f-3a41d0d3e0b1".parse().unwrap();
    assert!(matches!(service.task(id), Err(DiscoveryError::TaskNotFound(_))));
    assert!(matches!(service.wait(id).await, Err(DiscoveryError::TaskNotFound(_))));
    assert!(matches!(service.cancel(id), Err(DiscoveryError::TaskNotFound(_))));
}

use std::sync::Arc;
use std::time::Duration;

use tapewatch::api::{Backend, HttpBackend};
use tapewatch::core::{CommandDispatcher, CommandOutcome, TaskState};
use tapewatch::error::ApiError;
use tapewatch::sim::{SimServer, SimulatedBackend};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

struct Harness {
    sim: SimulatedBackend,
    client: Arc<HttpBackend>,
    server: Arc<SimServer>,
}

impl Harness {
    async fn start() -> Self {
        let sim = SimulatedBackend::demo().with_task_duration(Duration::from_millis(500));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Arc::new(SimServer::new(Arc::new(sim.clone()), addr));
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let client = HttpBackend::new(
            &format!("http://{addr}"),
            "localhost",
            Duration::from_secs(5),
            false,
        )
        .unwrap();

        Self {
            sim,
            client: Arc::new(client),
            server,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

#[tokio::test]
async fn test_drive_list_and_status_over_http() {
    let h = Harness::start().await;

    let drives = h.client.list_drives().await.unwrap();
    let names: Vec<_> = drives.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["drv0", "drv1"]);
    assert!(drives.iter().all(|d| !d.is_locked()));

    let status = h.client.drive_status("drv0").await.unwrap();
    assert!(status.status.split_whitespace().any(|f| f == "ONLINE"));
    assert!(status.bytes_written.is_some());
}

#[tokio::test]
async fn test_errors_carry_status_and_message() {
    let h = Harness::start().await;

    match h.client.drive_status("drv9").await {
        Err(ApiError::Status {
            status, message, ..
        }) => {
            assert_eq!(status, 404);
            assert!(message.contains("drv9"), "{message}");
        }
        other => panic!("expected 404, got {other:?}"),
    }

    match h.client.run_command("drv1", "read-label", None).await {
        Err(ApiError::Status { status, .. }) => assert_eq!(status, 400),
        other => panic!("expected 400, got {other:?}"),
    }

    h.sim.set_unreachable(true);
    match h.client.list_drives().await {
        Err(ApiError::Status { status, .. }) => assert_eq!(status, 503),
        other => panic!("expected 503, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sync_command_payload_over_http() {
    let h = Harness::start().await;

    let stats = h
        .client
        .run_command("drv0", "volume-statistics", None)
        .await
        .unwrap();
    assert_eq!(stats["volume-mounts"], 12);
    assert_eq!(h.sim.finished_tasks(), 0);
}

#[tokio::test]
async fn test_task_round_trip_over_http() {
    let h = Harness::start().await;
    let dispatcher = CommandDispatcher::new(h.client.clone(), Duration::from_millis(50));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = dispatcher
        .issue(
            "drv0",
            "label-media",
            Some(serde_json::json!({ "label-text": "TAPE42L8" })),
            CancellationToken::new(),
            move |completion| {
                let _ = tx.send(completion);
            },
        )
        .await
        .unwrap();
    let CommandOutcome::Started(handle) = outcome else {
        panic!("label-media should start a task");
    };
    assert_eq!(handle.upid.worker_type, "label-media");
    assert_eq!(h.sim.drive_state("drv0").as_deref(), Some(handle.upid.as_str()));

    let running = h.client.list_tasks(true, 10).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].upid, handle.upid.as_str());

    let completion = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout waiting for task")
        .expect("observer dropped");
    assert_eq!(completion.state, TaskState::Ok);

    let label = h.client.run_command("drv0", "read-label", None).await.unwrap();
    assert_eq!(label["label-text"], "TAPE42L8");

    let all = h.client.list_tasks(false, 10).await.unwrap();
    assert_eq!(all[0].status.as_deref(), Some("OK"));
    assert!(h.client.list_tasks(true, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let h = Harness::start().await;
    let upid = "UPID:localhost:00000001:00000000:000000FF:65A0B1C0:catalog-media:drv0:root@pam:";

    match h.client.task_status(upid).await {
        Err(ApiError::Status { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected 404, got {other:?}"),
    }
}

#[tokio::test]
async fn test_drive_names_are_escaped_in_paths() {
    let h = Harness::start().await;
    h.sim.add_drive("lib/drv#2");
    h.sim.load_media("lib/drv#2", "TAPE77L8");

    let status = h.client.drive_status("lib/drv#2").await.unwrap();
    assert!(status.status.split_whitespace().any(|f| f == "ONLINE"));

    let label = h
        .client
        .run_command("lib/drv#2", "read-label", None)
        .await
        .unwrap();
    assert_eq!(label["label-text"], "TAPE77L8");
}

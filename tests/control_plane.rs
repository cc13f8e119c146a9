//! End-to-end control-plane tests: a supervisor-built set of runners driven
//! over a real TCP socket, one command per connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use quevisor::{
    config::{ConfigFile, ConnectionConfig, JobConfig},
    ControlServer, Coordinator, JobStatus, Supervisor,
};

fn job(name: &str, groups: &[&str]) -> JobConfig {
    JobConfig {
        name: name.to_string(),
        groups: groups.iter().map(|g| g.to_string()).collect(),
        sleep_time: 30,
        sleep_increment: 5,
        max_sleep: 60,
        min_messages: 10, // far above the test probe's backlog of one
        working_dir: None,
        user: None,
        command: "/bin/echo idle".to_string(),
        spawn: 1,
        connection: "main".to_string(),
        queue: "work".to_string(),
        error_log_path: String::new(),
        error_log_max_kb_size: 0.0,
        error_log_max_files: 0,
        max_execution: 0,
    }
}

fn config(jobs: Vec<JobConfig>) -> ConfigFile {
    ConfigFile {
        connections: vec![ConnectionConfig {
            name: "main".to_string(),
            endpoint: "http://localhost:15672".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
        }],
        jobs,
    }
}

struct Harness {
    supervisor: Supervisor,
    coordinator: Arc<Coordinator>,
    port: u16,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

/// Builds runners in test mode, starts them, and serves the control plane on
/// an ephemeral loopback port.
async fn start(jobs: Vec<JobConfig>) -> Harness {
    let supervisor = Supervisor::new(Vec::new());
    let runners = supervisor.build_runners(&config(jobs), true);
    let handles = runners.iter().map(|runner| Arc::clone(runner).start()).collect();

    let coordinator = supervisor.coordinator();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = ControlServer::new(Arc::clone(&coordinator), CancellationToken::new());
    tokio::spawn(server.serve(listener));

    Harness {
        supervisor,
        coordinator,
        port,
        handles,
    }
}

async fn send(port: u16, command: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(command.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn stop(harness: Harness) {
    harness.supervisor.shutdown();
    for handle in harness.handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("runner did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn status_renders_all_jobs() {
    let harness = start(vec![job("worker_a", &["batch"]), job("worker_b", &[])]).await;

    let response = send(harness.port, "status").await;
    assert!(response.contains("Job"));
    assert!(response.contains("Groups"));
    assert!(response.contains("worker_a"));
    assert!(response.contains("worker_b"));
    assert!(response.contains('|'));

    stop(harness).await;
}

#[tokio::test]
async fn zero_length_payload_returns_help() {
    let harness = start(vec![job("worker_a", &[])]).await;

    let response = send(harness.port, "").await;
    assert!(response.contains("Commands available"));

    stop(harness).await;
}

#[tokio::test]
async fn unknown_job_is_reported() {
    let harness = start(Vec::new()).await;

    let response = send(harness.port, "status-of ghost").await;
    assert_eq!(response, "Can't find job called ghost\n");

    stop(harness).await;
}

#[tokio::test]
async fn pause_and_unpause_round_trip() {
    // Short sleeps: pause is only observed at a loop boundary.
    let mut quick = job("worker_a", &["batch"]);
    quick.sleep_time = 1;
    quick.max_sleep = 2;
    let harness = start(vec![quick]).await;

    let paused = send(harness.port, "pause worker_a").await;
    assert!(paused.starts_with("Job will be paused"));

    // The runner observes the request at its next loop boundary.
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let snapshot = harness.coordinator.find_by_name("worker_a").unwrap().snapshot();
        if snapshot.status == JobStatus::Paused {
            break;
        }
        assert!(Instant::now() < deadline, "runner never paused");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let resumed = send(harness.port, "unpause worker_a").await;
    assert!(resumed.contains("worker_a"));
    assert!(!harness
        .coordinator
        .find_by_name("worker_a")
        .unwrap()
        .pause_requested());

    stop(harness).await;
}

#[tokio::test]
async fn pause_group_touches_members_only() {
    let harness = start(vec![job("member", &["batch"]), job("outsider", &[])]).await;

    let response = send(harness.port, "pause-group batch").await;
    assert!(response.starts_with("Jobs will be paused"));
    assert!(harness.coordinator.find_by_name("member").unwrap().pause_requested());
    assert!(!harness
        .coordinator
        .find_by_name("outsider")
        .unwrap()
        .pause_requested());

    stop(harness).await;
}

#[tokio::test]
async fn kill_all_terminates_every_runner() {
    let harness = start(vec![job("worker_a", &[]), job("worker_b", &[])]).await;

    let response = send(harness.port, "kill-all").await;
    assert!(response.contains("Job"));

    for handle in harness.handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("runner did not stop after kill-all")
            .unwrap();
    }
    for name in ["worker_a", "worker_b"] {
        assert_eq!(
            harness.coordinator.find_by_name(name).unwrap().snapshot().status,
            JobStatus::Terminated
        );
    }
}

#[tokio::test]
async fn update_job_mutates_and_validates_over_tcp() {
    let harness = start(vec![job("worker_a", &[])]).await;

    let ok = send(harness.port, "update-job worker_a max_sleep 120").await;
    assert!(ok.starts_with("Job updated successfully."));
    assert_eq!(
        harness
            .coordinator
            .find_by_name("worker_a")
            .unwrap()
            .snapshot()
            .max_sleep,
        120
    );

    let rejected = send(harness.port, "update-job worker_a spawn 0").await;
    assert_eq!(rejected, "You cannot set a negative value or 0");

    stop(harness).await;
}

#[tokio::test]
async fn version_round_trips_through_forward() {
    let harness = start(Vec::new()).await;

    let response = quevisor::forward(harness.port, "version").await.unwrap();
    assert_eq!(response, format!("v{}", quevisor::VERSION));

    stop(harness).await;
}

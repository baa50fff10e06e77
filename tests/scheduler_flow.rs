use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use plate_scheduler::SchedulerCore;
use plate_scheduler::config::{RobotSetup, SchedulerConfig};
use plate_scheduler::peer_sim::{PeerOptions, PeerSimulator};
use plate_scheduler::status::Connectivity;
use plate_scheduler::store::StateStore;
use plate_scheduler::watcher::AdmissionWatcher;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};

const DEADLINE: Duration = Duration::from_secs(10);

fn config(dir: &Path, robots: &[(&str, u16)]) -> SchedulerConfig {
    let setup: Vec<_> = robots
        .iter()
        .map(|(name, port)| serde_json::json!({"name": name, "host": "127.0.0.1", "port": port}))
        .collect();
    let setup_file = dir.join("setup.json");
    std::fs::write(&setup_file, serde_json::to_string(&setup).unwrap()).unwrap();

    SchedulerConfig {
        input_dir: dir.join("input"),
        state_file: dir.join("state.json"),
        robot_setup_file: setup_file,
        transporter_name: "EM".into(),
        transporter_latency_ms: 10,
        poll_interval_ms: 20,
        shutdown_grace_ms: 500,
        log_file: None,
    }
}

/// Setup entries pointing at the ports the links actually bound.
fn bound_setup(core: &SchedulerCore, names: &[&str]) -> Vec<RobotSetup> {
    names
        .iter()
        .map(|name| {
            let addr = core.registry().link(name).unwrap().local_addr().unwrap();
            RobotSetup {
                name: name.to_string(),
                host: addr.ip().to_string(),
                port: addr.port(),
            }
        })
        .collect()
}

fn fast_peers() -> PeerOptions {
    PeerOptions {
        response_delay: Duration::from_millis(10),
        retry_delay: Duration::from_millis(20),
    }
}

async fn until_idle(core: &SchedulerCore) {
    let deadline = Instant::now() + DEADLINE;
    while core.active_count() > 0 {
        assert!(Instant::now() < deadline, "paths never finished");
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn dropped_document_is_driven_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &[("UR_HPLC", 0), ("UR_NMR", 0)]);
    let core = SchedulerCore::start(&config).await.unwrap();
    let peers = PeerSimulator::spawn(bound_setup(&core, &["UR_HPLC", "UR_NMR"]), fast_peers());
    let watcher =
        AdmissionWatcher::start(&config.input_dir, &core, Duration::from_millis(50)).unwrap();
    core.attach_watcher(watcher);

    std::fs::write(
        config.input_dir.join("batch.json"),
        r#"{"paths": [{"ID": 1, "Name": "Plate 1", "StartPosition": "HPLC",
                       "EndPosition": "NMR", "Action": "Analyse", "PlateNumber": 1}]}"#,
    )
    .unwrap();

    let deadline = Instant::now() + DEADLINE;
    while peers.received().len() < 2 || core.active_count() > 0 {
        assert!(Instant::now() < deadline, "path never finished");
        sleep(Duration::from_millis(20)).await;
    }

    let mut sent: Vec<(std::time::Instant, String)> = core.registry().transporter().timeline();
    sent.extend(
        peers
            .timeline()
            .into_iter()
            .map(|(at, _, label)| (at, label)),
    );
    sent.sort_by_key(|(at, _)| *at);
    let order: Vec<_> = sent.into_iter().map(|(_, label)| label).collect();
    assert_eq!(order, ["EM_to_HPLC", "Place", "EM_HPLC_to_NMR", "Pick"]);
    assert_eq!(
        peers.received(),
        vec![
            ("UR_HPLC".to_string(), "Place".to_string()),
            ("UR_NMR".to_string(), "Pick".to_string()),
        ]
    );
    assert!(StateStore::read_snapshots(&config.state_file).unwrap().is_empty());

    core.shutdown().await;
    peers.stop().await;
}

#[tokio::test]
async fn in_flight_step_is_awaited_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &[("UR_HPLC", 0), ("UR_NMR", 0)]);
    std::fs::write(
        &config.state_file,
        r#"[{"ID": 4, "Name": "Plate 4", "StartPosition": "HPLC", "EndPosition": "NMR",
             "Action": "Analyse", "PlateNumber": 4,
             "TaskQueue": [["UR_HPLC", "Place", "IsDoing"],
                           ["EM", "EM_HPLC_to_NMR", "NotDone"],
                           ["UR_NMR", "Pick", "NotDone"]]}]"#,
    )
    .unwrap();

    let core = SchedulerCore::start(&config).await.unwrap();
    assert_eq!(core.active_count(), 1);

    // The HPLC controller finished "Place" while the scheduler was down and
    // reports it as soon as it reconnects.
    let hplc = core.registry().link("UR_HPLC").unwrap().local_addr().unwrap();
    let mut controller = TcpStream::connect(hplc).await.unwrap();
    controller
        .write_all(b"Task Place done by UR_HPLC")
        .await
        .unwrap();
    let peers = PeerSimulator::spawn(bound_setup(&core, &["UR_NMR"]), fast_peers());

    until_idle(&core).await;

    assert_eq!(
        peers.received(),
        vec![("UR_NMR".to_string(), "Pick".to_string())]
    );
    assert_eq!(
        core.registry().transporter().history(),
        vec!["EM_HPLC_to_NMR"]
    );
    let mut buf = [0u8; 64];
    let resent = timeout(Duration::from_millis(100), controller.read(&mut buf)).await;
    assert!(resent.is_err(), "Place must not be dispatched again");

    core.shutdown().await;
    peers.stop().await;
}

#[tokio::test]
async fn unbindable_robot_stays_registered() {
    let dir = tempfile::tempdir().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let config = config(dir.path(), &[("UR_HPLC", 0), ("UR_NMR", port)]);

    let core = SchedulerCore::start(&config).await.unwrap();
    let nmr = core.registry().link("UR_NMR").unwrap();
    assert!(nmr.local_addr().is_none());

    let rows = core.status();
    let nmr_row = rows.iter().find(|r| r.robot == "UR_NMR").unwrap();
    assert_eq!(nmr_row.connectivity, Connectivity::NotConnected);
    assert_eq!(rows.last().unwrap().connectivity, Connectivity::Simulated);

    core.shutdown().await;
}

#[tokio::test]
async fn shutdown_then_restart_resumes_where_it_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &[("UR_HPLC", 0), ("UR_NMR", 0)]);

    let core = SchedulerCore::start(&config).await.unwrap();
    core.admit_file(&{
        let file = dir.path().join("doc.json");
        std::fs::write(
            &file,
            r#"{"paths": [{"ID": "p-9", "Name": "Plate 9", "StartPosition": "NMR",
                           "EndPosition": "HPLC", "Action": "Store", "PlateNumber": "9"}]}"#,
        )
        .unwrap();
        file
    })
    .await
    .unwrap();

    // No controller is connected, so the path parks on "Place" at UR_NMR.
    let deadline = Instant::now() + DEADLINE;
    loop {
        let saved = StateStore::read_snapshots(&config.state_file).unwrap_or_default();
        if saved.first().is_some_and(|s| s.task_queue.len() == 3) {
            break;
        }
        assert!(Instant::now() < deadline, "transporter move never checkpointed");
        sleep(Duration::from_millis(20)).await;
    }
    core.shutdown().await;
    drop(core);

    let restarted: Arc<SchedulerCore> = SchedulerCore::start(&config).await.unwrap();
    let paths = restarted.active_paths();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].spec.id, serde_json::json!("p-9"));
    assert_eq!(paths[0].task_queue[0].0, "UR_NMR");
    assert_eq!(paths[0].task_queue[0].1, "Place");

    let peers = PeerSimulator::spawn(bound_setup(&restarted, &["UR_HPLC", "UR_NMR"]), fast_peers());
    until_idle(&restarted).await;
    assert_eq!(
        peers.received(),
        vec![
            ("UR_NMR".to_string(), "Place".to_string()),
            ("UR_HPLC".to_string(), "Pick".to_string()),
        ]
    );

    restarted.shutdown().await;
    peers.stop().await;
}

#[tokio::test]
async fn malformed_checkpoint_survives_new_admissions() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &[("UR_HPLC", 0), ("UR_NMR", 0)]);
    let damaged = r#"[{"ID": 1, "Name": "Plate 1", "StartPosition": "HPLC", "EndPosition": "NMR",
        "Action": "Analyse", "PlateNumber": 1,
        "TaskQueue": [["UR_HPLC", "Place", "InFlite"]]}]"#;
    std::fs::write(&config.state_file, damaged).unwrap();

    let core = SchedulerCore::start(&config).await.unwrap();
    assert_eq!(core.active_count(), 0);
    core.admit_file(&{
        let file = dir.path().join("doc.json");
        std::fs::write(
            &file,
            r#"{"paths": [{"ID": 2, "Name": "Plate 2", "StartPosition": "HPLC",
                           "EndPosition": "NMR", "Action": "Analyse", "PlateNumber": 2}]}"#,
        )
        .unwrap();
        file
    })
    .await
    .unwrap();

    let deadline = Instant::now() + DEADLINE;
    while StateStore::read_snapshots(&config.state_file)
        .unwrap_or_default()
        .is_empty()
    {
        assert!(Instant::now() < deadline, "new path never checkpointed");
        sleep(Duration::from_millis(20)).await;
    }
    core.shutdown().await;

    let kept: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| p.to_string_lossy().contains("state.json.corrupt-"))
        .collect();
    assert_eq!(kept.len(), 1);
    assert_eq!(std::fs::read_to_string(&kept[0]).unwrap(), damaged);
}

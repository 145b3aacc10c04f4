//! End-to-end behaviour against the `procvisor-fixture` program.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use procvisor::{
    AbortPolicy, BackoffPolicy, Config, Event, EventKind, EventStream, ProcessSpec, Status,
    Supervisor, WorkerStatus,
};
use serde_json::json;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(15);

fn fixture() -> ProcessSpec {
    ProcessSpec::new(PathBuf::from(env!("CARGO_BIN_EXE_procvisor-fixture")))
}

fn config(dir: &TempDir) -> Config {
    Config {
        grace: Duration::from_secs(5),
        rundir: dir.path().join("run"),
        confdir: dir.path().join("conf"),
        handshake_timeout: Duration::from_secs(5),
        kill_timeout: Duration::from_secs(2),
        abort: AbortPolicy {
            threshold: 3,
            min_uptime: Duration::ZERO,
        },
        backoff: BackoffPolicy::constant(Duration::from_millis(50)),
        ..Config::default()
    }
}

fn harness() -> (Arc<Supervisor>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (Supervisor::new(config(&dir)), dir)
}

async fn next(stream: &mut EventStream) -> Arc<Event> {
    tokio::time::timeout(WAIT, stream.recv())
        .await
        .expect("timed out waiting for event")
        .expect("stream closed")
}

async fn next_for(stream: &mut EventStream, id: &str) -> Arc<Event> {
    loop {
        let ev = next(stream).await;
        if ev.process.as_ref().is_some_and(|p| p.id.as_str() == id) {
            return ev;
        }
    }
}

/// Kinds of the queued events for `id` whose kind is in `wanted`, without waiting.
fn drain_kinds(stream: &mut EventStream, id: &str, wanted: &[EventKind]) -> Vec<Arc<Event>> {
    let mut out = Vec::new();
    while let Some(ev) = stream.try_recv() {
        let ours = ev.process.as_ref().is_some_and(|p| p.id.as_str() == id);
        if ours && wanted.contains(&ev.kind) {
            out.push(ev);
        }
    }
    out
}

async fn wait_workers(sup: &Supervisor, id: &str, count: usize) {
    tokio::time::timeout(WAIT, async {
        while sup.find_process(id).await.unwrap().workers.len() != count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for worker count");
}

async fn wait_status(sup: &Supervisor, id: &str, status: Status) {
    tokio::time::timeout(WAIT, async {
        while sup.find_process(id).await.unwrap().status != status {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for status");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn started_process_becomes_ready() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");

    let info = sup.start_process(fixture().with_name("web")).await.unwrap();
    assert_eq!(info.status, Status::Starting);
    assert_eq!(info.name, "web");

    let ev = next_for(&mut ready, info.id.as_str()).await;
    assert_eq!(ev.kind, EventKind::ProcessReady);

    let now = sup.find_process(info.id.as_str()).await.unwrap();
    assert_eq!(now.status, Status::Ready);
    assert_eq!(now.pid, info.pid);
    assert!(now.socket.as_ref().is_some_and(|s| s.exists()));
    assert_eq!(now.restarts, 0);
}

#[tokio::test]
async fn invalid_starts_leave_nothing_behind() {
    let (sup, _dir) = harness();

    let err = sup
        .start_process(fixture().with_user("procvisor-no-such-user"))
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "boss_validation");
    assert!(err.to_string().contains("user"));

    let err = sup
        .start_process(fixture().with_group("procvisor-no-such-group"))
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "boss_validation");
    assert!(err.to_string().contains("group"));

    let err = sup
        .start_process(ProcessSpec::new("/definitely/not/here"))
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "boss_spawn");

    assert!(sup.list_processes().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kill_through_a_session_stops_without_restart() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");
    let mut exit = sup.subscribe("process:exit");
    let info = sup.start_process(fixture()).await.unwrap();
    let id = info.id.as_str();
    next_for(&mut ready, id).await;
    let socket = sup.find_process(id).await.unwrap().socket.unwrap();

    let session = sup.connect_to_process(id).await.unwrap();
    session.kill().unwrap();

    let ev = next_for(&mut exit, id).await;
    assert!(!socket.exists());
    assert_eq!(ev.exit.and_then(|e| e.code), Some(0));
    assert_eq!(ev.exit.and_then(|e| e.signal), None);
    let now = sup.find_process(id).await.unwrap();
    assert_eq!(now.status, Status::Stopped);
    assert_eq!(now.restarts, 0);
    assert_eq!(now.pid, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_replaces_the_instance() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");
    let mut lifecycle = sup.subscribe("process:*");
    let info = sup.start_process(fixture()).await.unwrap();
    let id = info.id.as_str();
    next_for(&mut ready, id).await;

    let after = sup.restart_process(id).await.unwrap();
    assert_eq!(after.status, Status::Ready);
    assert_eq!(after.restarts, 1);
    assert_ne!(after.pid, info.pid);

    let rounds = drain_kinds(
        &mut lifecycle,
        id,
        &[EventKind::ProcessRestarting, EventKind::ProcessRestarted],
    );
    let seen: Vec<_> = rounds.iter().map(|ev| (ev.kind, ev.old_pid)).collect();
    assert_eq!(
        seen,
        vec![
            (EventKind::ProcessRestarting, info.pid),
            (EventKind::ProcessRestarted, info.pid),
        ]
    );
    assert_eq!(sup.list_processes().await[0].restarts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crash_after_ready_is_restarted() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");
    let mut restarted = sup.subscribe("process:restarted");
    let info = sup.start_process(fixture()).await.unwrap();
    let id = info.id.as_str();
    next_for(&mut ready, id).await;

    let session = sup.connect_to_process(id).await.unwrap();
    session.request("custom:euthanise", None).await.unwrap();

    let ev = next_for(&mut restarted, id).await;
    assert_eq!(ev.old_pid, info.pid);
    let process = ev.process.as_ref().unwrap();
    assert_ne!(process.pid, info.pid);
    assert_eq!(process.restarts, 1);
    assert_eq!(process.consecutive_fast_failures, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_kill_on_a_closed_session_does_not_mask_a_crash() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");
    let mut restarted = sup.subscribe("process:restarted");
    let info = sup.start_process(fixture()).await.unwrap();
    let id = info.id.as_str();
    next_for(&mut ready, id).await;

    let closed = sup.connect_to_process(id).await.unwrap();
    closed.disconnect();
    assert!(closed.kill().is_err());

    let live = sup.connect_to_process(id).await.unwrap();
    live.request("custom:euthanise", None).await.unwrap();

    let ev = next_for(&mut restarted, id).await;
    assert_eq!(ev.old_pid, info.pid);
    let now = sup.find_process(id).await.unwrap();
    assert_ne!(now.status, Status::Stopped);
    assert_eq!(now.restarts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crash_loop_aborts() {
    let (sup, _dir) = harness();
    let mut aborted = sup.subscribe("process:aborted");
    let info = sup
        .start_process(fixture().with_arg("crash-on-start"))
        .await
        .unwrap();
    let id = info.id.as_str();

    let ev = next_for(&mut aborted, id).await;
    assert_eq!(ev.exit.and_then(|e| e.code), Some(1));
    let now = sup.find_process(id).await.unwrap();
    assert_eq!(now.status, Status::Aborted);
    assert_eq!(now.consecutive_fast_failures, 3);

    let err = sup.restart_process(id).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_invalid_state");
    let err = sup.set_cluster_workers(id, 2).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_not_clustered");

    sup.remove_process(id).await.unwrap();
    assert!(sup.list_processes().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_are_answered_concurrently() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");
    let mut gc = sup.subscribe("process:gc:*");
    let mut heap_events = sup.subscribe("process:heapdump:*");
    let info = sup.start_process(fixture()).await.unwrap();
    let id = info.id.as_str();
    next_for(&mut ready, id).await;

    let session = sup.connect_to_process(id).await.unwrap();
    let (hello, echo, heap, collected) = tokio::join!(
        session.request("custom:hello", None),
        session.request("custom:echo", Some(json!({"n": 7}))),
        session.dump_heap(),
        session.force_gc(),
    );
    assert_eq!(hello.unwrap(), json!("hello world"));
    assert_eq!(echo.unwrap(), json!({"n": 7}));
    assert!(heap.unwrap().exists());
    collected.unwrap();

    assert_eq!(next_for(&mut gc, id).await.topic(), "process:gc:start");
    assert_eq!(next_for(&mut gc, id).await.topic(), "process:gc:complete");
    assert_eq!(
        next_for(&mut heap_events, id).await.topic(),
        "process:heapdump:start"
    );
    assert_eq!(
        next_for(&mut heap_events, id).await.topic(),
        "process:heapdump:complete"
    );

    let err = session.request("custom:nope", None).await.unwrap_err();
    assert_eq!(err.as_label(), "control_remote");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn output_and_events_are_relayed() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");
    let mut stdout = sup.subscribe("process:log:info");
    let mut greeting = sup.subscribe("process:greeting");
    let info = sup.start_process(fixture()).await.unwrap();
    let id = info.id.as_str();
    next_for(&mut ready, id).await;

    let line = next_for(&mut stdout, id).await;
    let text = line.payload.as_ref().and_then(|p| p.as_str()).unwrap();
    assert!(text.contains("up"), "unexpected line {text:?}");

    let session = sup.connect_to_process(id).await.unwrap();
    session
        .request("custom:emit", Some(json!({"name": "greeting", "payload": {"hi": 1}})))
        .await
        .unwrap();
    let ev = next_for(&mut greeting, id).await;
    assert_eq!(ev.kind, EventKind::ProcessCustom);
    assert_eq!(ev.payload, Some(json!({"hi": 1})));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debug_start_waits_for_resume() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");
    let info = sup
        .start_process(fixture().with_debug(true))
        .await
        .unwrap();
    let id = info.id.as_str();
    assert_eq!(info.status, Status::Paused);
    assert!(info.debug_port.is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(ready.try_recv().is_none());

    let resumed = sup.resume_process(id).await.unwrap();
    assert_ne!(resumed.status, Status::Paused);
    next_for(&mut ready, id).await;

    let err = sup.resume_process(id).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_invalid_state");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cluster_comes_online_and_scales() {
    let (sup, _dir) = harness();
    let mut online = sup.subscribe("cluster:online");
    let info = sup
        .start_process(fixture().with_instances(2))
        .await
        .unwrap();
    let id = info.id.as_str();
    assert_eq!(info.workers.len(), 2);
    next_for(&mut online, id).await;

    let now = sup.find_process(id).await.unwrap();
    assert_eq!(now.status, Status::Ready);
    assert!(now.workers.iter().all(|w| w.status == WorkerStatus::Ready));

    let up = sup.set_cluster_workers(id, 3).await.unwrap();
    assert_eq!(up.instances, 3);
    assert_eq!(up.workers.len(), 3);
    let indices: Vec<usize> = up.workers.iter().map(|w| w.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    let fresh = next_for(&mut online, id).await;
    assert_eq!(fresh.process.as_ref().unwrap().workers.len(), 3);

    let down = sup.set_cluster_workers(id, 1).await.unwrap();
    assert_eq!(down.workers.len(), 1);
    assert_eq!(down.workers[0].index, 0);
    assert_eq!(sup.find_process(id).await.unwrap().instances, 1);
    next_for(&mut online, id).await;

    let mut churn = sup.subscribe("worker:*");
    let same = sup.set_cluster_workers(id, 1).await.unwrap();
    assert_eq!(same.workers, down.workers);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(churn.try_recv().is_none());
    assert!(online.try_recv().is_none());

    let err = sup.set_cluster_workers(id, 0).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_validation");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workers_walk_every_stage_in_order() {
    let (sup, _dir) = harness();
    let mut online = sup.subscribe("cluster:online");
    let mut stages = sup.subscribe("worker:*");
    let info = sup
        .start_process(fixture().with_instances(2))
        .await
        .unwrap();
    let id = info.id.as_str();
    next_for(&mut online, id).await;

    let events = drain_kinds(
        &mut stages,
        id,
        &[
            EventKind::WorkerForked,
            EventKind::WorkerStarting,
            EventKind::WorkerStarted,
            EventKind::WorkerReady,
        ],
    );
    for index in [0, 1] {
        let topics: Vec<&str> = events
            .iter()
            .filter(|ev| ev.worker.as_ref().is_some_and(|w| w.index == index))
            .map(|ev| ev.topic())
            .collect();
        assert_eq!(
            topics,
            vec!["worker:forked", "worker:starting", "worker:started", "worker:ready"],
            "worker {index}"
        );
    }
    assert!(events.iter().all(|ev| ev.process.is_some() && ev.worker.is_some()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_killed_by_session_is_replaced_by_the_next_scale() {
    let (sup, _dir) = harness();
    let mut online = sup.subscribe("cluster:online");
    let mut exits = sup.subscribe("worker:exit");
    let info = sup
        .start_process(fixture().with_instances(2))
        .await
        .unwrap();
    let id = info.id.as_str();
    next_for(&mut online, id).await;

    let victim = sup.find_process(id).await.unwrap().workers[0].pid.unwrap();
    let session = sup.connect_to_worker(id, victim).await.unwrap();
    session.kill().unwrap();

    let ev = next_for(&mut exits, id).await;
    assert_eq!(ev.worker.as_ref().and_then(|w| w.pid), Some(victim));
    wait_workers(&sup, id, 1).await;
    let now = sup.find_process(id).await.unwrap();
    assert_eq!(now.instances, 2);
    assert!(now.workers.iter().all(|w| w.pid != Some(victim)));

    let healed = tokio::time::timeout(WAIT, sup.set_cluster_workers(id, 2))
        .await
        .expect("scale never settled")
        .unwrap();
    assert_eq!(healed.workers.len(), 2);
    assert!(healed.workers.iter().all(|w| w.status == WorkerStatus::Ready));
    let ev = next_for(&mut online, id).await;
    assert_eq!(ev.process.as_ref().unwrap().workers.len(), 2);

    let grown = tokio::time::timeout(WAIT, sup.set_cluster_workers(id, 3))
        .await
        .expect("scale never settled")
        .unwrap();
    assert_eq!(grown.workers.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_restarted_by_session_announces_the_round() {
    let (sup, _dir) = harness();
    let mut online = sup.subscribe("cluster:online");
    let mut restarting = sup.subscribe("process:restarting");
    let mut restarted = sup.subscribe("process:restarted");
    let info = sup
        .start_process(fixture().with_instances(2))
        .await
        .unwrap();
    let id = info.id.as_str();
    next_for(&mut online, id).await;

    let old = sup.find_process(id).await.unwrap().workers[1].clone();
    let old_pid = old.pid.unwrap();
    let session = sup.connect_to_worker(id, old_pid).await.unwrap();
    session.restart().unwrap();

    let going = next_for(&mut restarting, id).await;
    assert_eq!(going.old_pid, Some(old_pid));
    assert_eq!(going.worker.as_ref().map(|w| w.index), Some(old.index));

    let back = next_for(&mut restarted, id).await;
    assert_eq!(back.old_pid, Some(old_pid));
    let worker = back.worker.as_ref().unwrap();
    assert_eq!(worker.index, old.index);
    assert!(worker.pid.is_some_and(|pid| pid != old_pid));
    assert_eq!(back.process.as_ref().unwrap().restarts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workers_are_reachable_individually() {
    let (sup, _dir) = harness();
    let mut online = sup.subscribe("cluster:online");
    let info = sup
        .start_process(fixture().with_instances(2))
        .await
        .unwrap();
    let id = info.id.as_str();
    next_for(&mut online, id).await;

    let now = sup.find_process(id).await.unwrap();
    let second = now.workers[1].pid.unwrap();
    let session = sup.connect_to_worker(id, second).await.unwrap();
    assert_eq!(session.pid(), second);
    assert_eq!(
        session.request("custom:hello", None).await.unwrap(),
        json!("hello world")
    );

    let err = sup.connect_to_worker(id, u32::MAX).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_connection");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cluster_restart_is_one_round() {
    let (sup, _dir) = harness();
    let mut online = sup.subscribe("cluster:online");
    let info = sup
        .start_process(fixture().with_instances(2))
        .await
        .unwrap();
    let id = info.id.as_str();
    next_for(&mut online, id).await;
    let before: Vec<_> = sup
        .find_process(id)
        .await
        .unwrap()
        .workers
        .iter()
        .map(|w| w.pid)
        .collect();

    let after = sup.restart_process(id).await.unwrap();
    assert_eq!(after.status, Status::Ready);
    assert_eq!(after.restarts, 1);
    assert!(after.workers.iter().all(|w| !before.contains(&w.pid)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dump_and_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let first = Supervisor::new(config(&dir));
    let mut ready = first.subscribe("process:ready");
    let info = first
        .start_process(fixture().with_name("super-fun").with_arg("--flag"))
        .await
        .unwrap();
    next_for(&mut ready, info.id.as_str()).await;

    let path = first.dump_processes().await.unwrap();
    assert!(path.ends_with("processes.json"));
    first.shutdown().await.unwrap();

    let second = Supervisor::new(config(&dir));
    let restored = second.restore_processes().await.unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].name, "super-fun");
    assert_eq!(restored[0].args, vec!["--flag".to_string()]);
    assert_ne!(restored[0].id, info.id);
    second.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_requires_a_terminal_status() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");
    let info = sup.start_process(fixture()).await.unwrap();
    let id = info.id.as_str();
    next_for(&mut ready, id).await;

    let err = sup.remove_process(id).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_invalid_state");

    let stopped = sup.stop_process(id).await.unwrap();
    assert_eq!(stopped.status, Status::Stopped);
    // stopping twice is a no-op
    sup.stop_process(id).await.unwrap();

    let err = sup.connect_to_process(id).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_connection");

    sup.remove_process(id).await.unwrap();
    let err = sup.find_process(id).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_not_found");
    let err = sup.connect_to_process(id).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_not_found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_process_can_be_restarted() {
    let (sup, _dir) = harness();
    let mut ready = sup.subscribe("process:ready");
    let info = sup.start_process(fixture()).await.unwrap();
    let id = info.id.as_str();
    next_for(&mut ready, id).await;

    sup.stop_process(id).await.unwrap();
    let again = sup.restart_process(id).await.unwrap();
    assert_eq!(again.status, Status::Ready);
    assert!(again.pid.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_everything() {
    let (sup, _dir) = harness();
    let mut shutdown = sup.subscribe("boss:shutdown");
    let a = sup.start_process(fixture()).await.unwrap();
    let b = sup.start_process(fixture()).await.unwrap();
    wait_status(&sup, a.id.as_str(), Status::Ready).await;
    wait_status(&sup, b.id.as_str(), Status::Ready).await;

    sup.shutdown().await.unwrap();
    assert_eq!(next(&mut shutdown).await.kind, EventKind::BossShutdown);
    for p in sup.list_processes().await {
        assert_eq!(p.status, Status::Stopped);
    }

    let err = sup.start_process(fixture()).await.unwrap_err();
    assert_eq!(err.as_label(), "boss_closed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unresponsive_process_exceeds_grace() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        grace: Duration::from_millis(200),
        handshake_timeout: Duration::ZERO,
        kill_timeout: Duration::from_secs(30),
        ..config(&dir)
    };
    let sup = Supervisor::new(cfg);
    sup.start_process(fixture().with_name("stuck").with_arg("never-ready"))
        .await
        .unwrap();

    let err = sup.shutdown().await.unwrap_err();
    assert_eq!(err.as_label(), "boss_grace_exceeded");
    assert!(err.to_string().contains("stuck"));
}

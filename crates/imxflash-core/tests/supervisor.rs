//! Supervisor tests against real shell scripts

use imxflash_core::supervisor::OUTPUT_GRACE;
use imxflash_core::{
    ArchLabel, CancelStatus, ChannelSink, FlashError, FlashJob, JobState, OutputSink,
    RunOutcome, SinkEvent, Supervisor, DEFAULT_DRAM_CONFIG,
};
use serial_test::serial;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Write an executable script named like the real one into a fresh directory
fn script(body: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run_container.sh");
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    (dir, path)
}

fn job(image: &str, arch: ArchLabel) -> FlashJob {
    FlashJob::new(Some(PathBuf::from(image)), arch, DEFAULT_DRAM_CONFIG).unwrap()
}

fn next_line(rx: &Receiver<SinkEvent>) -> String {
    match rx.recv_timeout(TIMEOUT).unwrap() {
        SinkEvent::Line(line) => line,
        other => panic!("expected a line, got {:?}", other),
    }
}

fn collect(rx: &Receiver<SinkEvent>) -> Vec<SinkEvent> {
    let mut events = Vec::new();
    loop {
        let event = rx.recv_timeout(TIMEOUT).unwrap();
        let done = matches!(event, SinkEvent::Outcome(_));
        events.push(event);
        if done {
            return events;
        }
    }
}

fn lines(events: &[SinkEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            SinkEvent::Line(line) => Some(line.as_str()),
            SinkEvent::Outcome(_) => None,
        })
        .collect()
}

#[test]
#[serial]
fn test_lines_then_success() {
    let (_dir, path) = script("echo L1\necho L2\necho L3\nexit 0");
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();

    let handle = supervisor.start(job("board.img", ArchLabel::X86), sink).unwrap();
    let outcome = handle.wait().unwrap();
    assert_eq!(outcome, RunOutcome::Success);

    let events: Vec<SinkEvent> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![
            SinkEvent::Line("L1".into()),
            SinkEvent::Line("L2".into()),
            SinkEvent::Line("L3".into()),
            SinkEvent::Outcome(RunOutcome::Success),
        ]
    );
    assert_eq!(supervisor.state(), JobState::Completed);
}

#[test]
#[serial]
fn test_failure_carries_stderr() {
    let (_dir, path) = script("echo working\necho 'disk full' >&2\nexit 2");
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();

    let handle = supervisor.start(job("board.img", ArchLabel::X86), sink).unwrap();
    let expected = RunOutcome::Failure {
        code: 2,
        stderr: "disk full".into(),
    };
    assert_eq!(handle.wait().unwrap(), expected);

    let events = collect(&rx);
    assert_eq!(lines(&events), ["working"]);
    assert_eq!(events.last(), Some(&SinkEvent::Outcome(expected.clone())));
    assert_eq!(supervisor.state(), JobState::Failed);

    let err = expected.into_result().unwrap_err();
    assert!(matches!(
        err,
        FlashError::ProcessExit { code: 2, ref stderr } if stderr == "disk full"
    ));
}

#[test]
#[serial]
fn test_arguments_and_working_directory() {
    let (dir, path) = script("pwd\nfor arg in \"$@\"; do echo \"$arg\"; done");
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();
    let image = "/images/My Board; echo pwned.img";

    let handle = supervisor.start(job(image, ArchLabel::Armv8), sink).unwrap();
    assert_eq!(handle.wait().unwrap(), RunOutcome::Success);

    let events = collect(&rx);
    let lines = lines(&events);
    let cwd = fs::canonicalize(dir.path()).unwrap();
    assert_eq!(Path::new(lines[0]), cwd.as_path());
    assert_eq!(&lines[1..], ["-d", "d2d4", "-i", image, "-a", "armv8"]);
}

#[test]
#[serial]
fn test_unknown_arch_is_omitted() {
    let (_dir, path) = script("echo \"$#\"");
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();

    let handle = supervisor
        .start(job("board.img", ArchLabel::Unknown("riscv64".into())), sink)
        .unwrap();
    handle.wait().unwrap();
    assert_eq!(next_line(&rx), "4");
}

#[test]
#[serial]
fn test_second_start_is_rejected() {
    let (_dir, path) = script("echo started\nsleep 1\necho finished");
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();

    let first = supervisor.start(job("a.img", ArchLabel::X86), sink).unwrap();
    assert_eq!(next_line(&rx), "started");

    let (other_sink, other_rx) = ChannelSink::channel();
    let err = supervisor
        .start(job("b.img", ArchLabel::X86), other_sink)
        .unwrap_err();
    assert!(matches!(err, FlashError::AlreadyRunning));
    assert_eq!(supervisor.state(), JobState::Running);
    assert_eq!(first.state(), JobState::Running);

    // The first job carries on undisturbed
    assert_eq!(first.wait().unwrap(), RunOutcome::Success);
    assert_eq!(next_line(&rx), "finished");
    assert!(other_rx.try_recv().is_err());
}

#[test]
#[serial]
fn test_new_job_after_terminal_state() {
    let (_dir, path) = script("echo \"$4\"\n[ \"$4\" = ok.img ]");
    let supervisor = Supervisor::new(&path);

    let (sink, _rx) = ChannelSink::channel();
    let outcome = supervisor
        .start(job("bad.img", ArchLabel::X86), sink)
        .unwrap()
        .wait()
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Failure { code: 1, .. }));

    let (sink, rx) = ChannelSink::channel();
    let handle = supervisor.start(job("ok.img", ArchLabel::X86), sink).unwrap();
    assert_eq!(handle.wait().unwrap(), RunOutcome::Success);
    assert_eq!(next_line(&rx), "ok.img");
}

#[test]
#[serial]
fn test_cancel_running_job() {
    let (_dir, path) = script("echo ready\nsleep 30\necho unreachable");
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();

    let started = Instant::now();
    let handle = supervisor.start(job("board.img", ArchLabel::X86), sink).unwrap();
    assert_eq!(next_line(&rx), "ready");

    assert_eq!(supervisor.cancel(), CancelStatus::Signalled);
    assert_eq!(handle.wait().unwrap(), RunOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));

    let events = collect(&rx);
    assert_eq!(events, vec![SinkEvent::Outcome(RunOutcome::Cancelled)]);
    assert_eq!(supervisor.state(), JobState::Cancelled);
    assert_eq!(supervisor.cancel(), CancelStatus::NothingToCancel);
}

#[test]
#[serial]
fn test_cancel_ignored_signal_still_cancelled() {
    // The script shrugs off SIGTERM and finishes successfully later
    let (_dir, path) = script("trap '' TERM\necho ready\nsleep 2\necho done\nexit 0");
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();

    let handle = supervisor.start(job("board.img", ArchLabel::X86), sink).unwrap();
    assert_eq!(next_line(&rx), "ready");

    let before = Instant::now();
    assert_eq!(handle.cancel(), CancelStatus::Signalled);
    assert!(before.elapsed() < Duration::from_millis(500));
    assert_eq!(supervisor.state(), JobState::Running);

    assert_eq!(handle.wait().unwrap(), RunOutcome::Cancelled);
    let events = collect(&rx);
    assert_eq!(lines(&events), ["done"]);
    assert_eq!(events.last(), Some(&SinkEvent::Outcome(RunOutcome::Cancelled)));
}

#[test]
#[serial]
fn test_cancel_idle() {
    let (_dir, path) = script("exit 0");
    let supervisor = Supervisor::new(&path);

    assert_eq!(supervisor.cancel(), CancelStatus::NothingToCancel);
    assert_eq!(supervisor.state(), JobState::Idle);
}

#[test]
#[serial]
fn test_stale_handle_does_not_cancel_next_job() {
    let (_dir, path) = script("echo ready\nsleep 1");
    let supervisor = Supervisor::new(&path);

    let (sink, rx) = ChannelSink::channel();
    let first = supervisor.start(job("a.img", ArchLabel::X86), sink).unwrap();
    assert_eq!(next_line(&rx), "ready");
    assert_eq!(supervisor.cancel(), CancelStatus::Signalled);
    let first_id = first.id();
    assert_eq!(first.wait().unwrap(), RunOutcome::Cancelled);

    let (sink, rx) = ChannelSink::channel();
    let second = supervisor.start(job("b.img", ArchLabel::X86), sink).unwrap();
    assert_ne!(second.id(), first_id);
    assert_eq!(next_line(&rx), "ready");
    assert_eq!(second.wait().unwrap(), RunOutcome::Success);
}

#[test]
#[serial]
fn test_spawn_error_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("run_container.sh");
    let supervisor = Supervisor::new(&missing);

    let (sink, rx) = ChannelSink::channel();
    let err = supervisor
        .start(job("board.img", ArchLabel::X86), sink)
        .unwrap_err();
    match err {
        FlashError::Spawn { script, source } => {
            assert_eq!(script, missing);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected spawn error, got {:?}", other),
    }
    assert_eq!(supervisor.state(), JobState::Idle);
    assert!(rx.try_recv().is_err());

    // Still usable afterwards
    let (sink, _rx) = ChannelSink::channel();
    assert!(matches!(
        supervisor.start(job("board.img", ArchLabel::X86), sink),
        Err(FlashError::Spawn { .. })
    ));
}

#[test]
#[serial]
fn test_partial_last_line_and_crlf() {
    let (_dir, path) = script("printf 'one\\r\\ntwo\\nlast'");
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();

    supervisor
        .start(job("board.img", ArchLabel::X86), sink)
        .unwrap()
        .wait()
        .unwrap();
    let events = collect(&rx);
    assert_eq!(lines(&events), ["one", "two", "last"]);
}

#[test]
#[serial]
fn test_chatty_stderr_does_not_block() {
    // Far more than a pipe buffer's worth of stderr before any stdout
    let (_dir, path) = script(
        "i=0\n\
         while [ $i -lt 5000 ]; do\n\
         echo \"progress line $i of the flashing run\" >&2; i=$((i+1))\n\
         done\n\
         echo done",
    );
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();

    let handle = supervisor.start(job("board.img", ArchLabel::X86), sink).unwrap();
    assert_eq!(next_line(&rx), "done");
    assert_eq!(handle.wait().unwrap(), RunOutcome::Success);
}

#[test]
#[serial]
fn test_background_holder_does_not_delay_outcome() {
    // The script is done, but what it left behind keeps stdout open
    let (_dir, path) = script("sleep 4 &\necho done\nexit 0");
    let supervisor = Supervisor::new(&path);
    let (sink, rx) = ChannelSink::channel();

    let started = Instant::now();
    let handle = supervisor.start(job("board.img", ArchLabel::X86), sink).unwrap();
    assert_eq!(next_line(&rx), "done");

    assert_eq!(handle.wait().unwrap(), RunOutcome::Success);
    assert!(started.elapsed() < OUTPUT_GRACE + Duration::from_secs(2));
    assert_eq!(supervisor.state(), JobState::Completed);
    assert_eq!(supervisor.cancel(), CancelStatus::NothingToCancel);

    assert_eq!(
        rx.try_iter().collect::<Vec<_>>(),
        vec![SinkEvent::Outcome(RunOutcome::Success)]
    );
}

/// Panics on every line, reports the outcome over a channel
struct PanickingSink(Sender<RunOutcome>);

impl OutputSink for PanickingSink {
    fn on_line(&mut self, line: &str) {
        panic!("cannot display {:?}", line);
    }

    fn on_outcome(&mut self, outcome: &RunOutcome) {
        let _ = self.0.send(outcome.clone());
    }
}

#[test]
#[serial]
fn test_panicking_sink_keeps_job_supervised() {
    let (dir, path) = script("echo first\nsleep 1\necho second\ntouch finished\nexit 0");
    let supervisor = Supervisor::new(&path);
    let (tx, outcomes) = mpsc::channel();

    let handle = supervisor
        .start(job("board.img", ArchLabel::X86), PanickingSink(tx))
        .unwrap();
    std::thread::sleep(Duration::from_millis(300));

    // Still one live script, no second one alongside it
    assert_eq!(supervisor.state(), JobState::Running);
    let (sink, _rx) = ChannelSink::channel();
    assert!(matches!(
        supervisor.start(job("other.img", ArchLabel::X86), sink),
        Err(FlashError::AlreadyRunning)
    ));

    // Output keeps being drained, so the script runs to completion
    assert_eq!(handle.wait().unwrap(), RunOutcome::Success);
    assert!(dir.path().join("finished").exists());
    assert_eq!(supervisor.state(), JobState::Completed);
    assert_eq!(outcomes.recv_timeout(TIMEOUT).unwrap(), RunOutcome::Success);
}

#[test]
#[serial]
fn test_cancel_racing_exit_is_consistent() {
    let (_dir, path) = script("echo ready\nexit 0");
    let supervisor = Supervisor::new(&path);

    for _ in 0..20 {
        let (sink, rx) = ChannelSink::channel();
        let handle = supervisor.start(job("board.img", ArchLabel::X86), sink).unwrap();
        assert_eq!(next_line(&rx), "ready");

        let status = supervisor.cancel();
        let outcome = handle.wait().unwrap();
        match status {
            CancelStatus::Signalled => assert_eq!(outcome, RunOutcome::Cancelled),
            CancelStatus::NothingToCancel => assert_eq!(outcome, RunOutcome::Success),
        }

        // Exactly one outcome, and it is the last event
        let events: Vec<SinkEvent> = rx.try_iter().collect();
        assert_eq!(events, vec![SinkEvent::Outcome(outcome.clone())]);
        assert_eq!(supervisor.state(), outcome.state());
    }
}

//! End-to-end runs of the coordinator against real child processes.

use noutaja::logging::init_test_logging;
use noutaja::progress::DownloadState;
use noutaja::{
    CommandSpec, ExecutionCoordinator, FileKind, ProgressEvent, RunError, RunOptions,
    channel_sink,
};
use std::time::{Duration, Instant};

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("/bin/sh").args(["-c", script])
}

#[tokio::test]
async fn nonexistent_executable_is_the_only_err_path() {
    init_test_logging();
    let coordinator = ExecutionCoordinator::new();
    let spec = CommandSpec::new("/nonexistent/tool/binary");
    let err = coordinator
        .run(spec, RunOptions::default())
        .await
        .expect_err("spawn must fail");
    assert!(matches!(err, RunError::Spawn(_)));
    assert!(err.is_pre_start());
}

#[tokio::test]
async fn failing_child_yields_a_result_not_an_err() {
    init_test_logging();
    let coordinator = ExecutionCoordinator::new();
    let result = coordinator
        .run(sh("echo 'ERROR: video unavailable' >&2; exit 1"), RunOptions::default())
        .await
        .expect("post-spawn failures are in-band");
    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(
        result.error_message.as_deref(),
        Some("ERROR: video unavailable")
    );
    let diagnostics = result.diagnostics.expect("failures carry diagnostics");
    assert!(diagnostics.starts_with("$ /bin/sh"));
    assert!(diagnostics.contains("ERROR: video unavailable"));
}

#[tokio::test]
async fn successful_scripted_download_produces_completed_result() {
    init_test_logging();
    let coordinator = ExecutionCoordinator::new();
    let script = "printf '%s\\n' \
        '[youtube] dQw4w9WgXcQ: Downloading webpage' \
        '[info] dQw4w9WgXcQ: Downloading 1 format(s): 137+140' \
        'download:1000|2000|500.0|4' \
        '[download] Destination: out.mp4' \
        'download:2000|2000|500.0|0' \
        '[download] 100% of out.mp4'";
    let (sink, mut rx) = channel_sink();
    let result = coordinator
        .run(sh(script), RunOptions::default().with_sink(sink))
        .await
        .expect("run");

    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.error_message.is_none());
    assert!(result.diagnostics.is_none());
    assert_eq!(result.content_id.as_deref(), Some("dQw4w9WgXcQ"));
    assert_eq!(result.final_file, Some("out.mp4".into()));
    let media: Vec<_> = result
        .tracked_files
        .iter()
        .filter(|f| f.kind == FileKind::Media)
        .collect();
    assert_eq!(media.len(), 1);
    assert!(result.output.contains("download:1000|2000|500.0|4\n"));

    // Event stream: Started first, Finished last, progress in between.
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Finished { result } ) if result.success
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Progress { percentage: 100, .. })));
}

#[tokio::test]
async fn timeout_shuts_the_child_down_and_reports_in_band() {
    init_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("child.pid");
    let coordinator = ExecutionCoordinator::new().with_grace_period(Duration::from_millis(200));
    let script = format!("echo $$ > '{}'; sleep 30", pid_file.display());
    let spec = sh(&script).with_timeout(Duration::from_millis(300));
    let started = Instant::now();
    let result = coordinator
        .run(spec, RunOptions::default())
        .await
        .expect("timeout is in-band");
    // Timeout + grace + drain, with headroom; nowhere near the 30s sleep.
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!result.success);
    let message = result.error_message.expect("timeout message");
    assert!(message.contains("timed out"), "message: {message}");

    // The shell is confirmed dead once the run has returned.
    let pid: i32 = std::fs::read_to_string(&pid_file)
        .expect("pid file")
        .trim()
        .parse()
        .expect("pid");
    #[cfg(unix)]
    {
        use nix::sys::signal;
        use nix::unistd::Pid;
        // Signal 0 probes liveness without delivering anything.
        assert!(
            signal::kill(Pid::from_raw(pid), None).is_err(),
            "child {pid} still running after the run returned"
        );
    }
}

#[tokio::test]
async fn run_returns_even_when_a_grandchild_holds_the_output_pipe() {
    init_test_logging();
    let coordinator = ExecutionCoordinator::new();
    // The background sleep inherits the pipe and keeps it open well past the
    // bounded drain window after the shell itself has exited.
    let script = "echo first; sleep 5 & exit 0";
    let (sink, mut rx) = channel_sink();
    let started = Instant::now();
    let result = coordinator
        .run(sh(script), RunOptions::default().with_sink(sink))
        .await
        .expect("run");
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "drain was not bounded"
    );
    assert!(result.success);
    assert!(result.output.contains("first\n"));

    // The reader is aborted on drain overrun, so nothing follows the
    // terminal event.
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let finished_at = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::Finished { .. }))
        .expect("terminal event present");
    assert_eq!(finished_at, events.len() - 1, "events after the terminal one");
}

#[tokio::test]
async fn mid_run_cancel_via_handle_ends_the_run_cancelled() {
    init_test_logging();
    let coordinator = ExecutionCoordinator::new().with_grace_period(Duration::from_millis(500));
    let script = "echo 'download:100|1000|NA|NA'; sleep 30";
    let handle = coordinator.spawn(sh(script), RunOptions::default());

    // Wait for the first progress line to land, then cancel.
    let started = Instant::now();
    loop {
        let snap = handle.progress_snapshot();
        if snap.state >= DownloadState::Downloading {
            break;
        }
        assert!(started.elapsed() < Duration::from_secs(5), "no progress seen");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.cancel();

    let result = handle.wait().await.expect("cancel is in-band");
    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("operation was cancelled"));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(result.output.contains("download:100|1000|NA|NA\n"));
}

#[tokio::test]
async fn stderr_only_output_is_still_captured() {
    init_test_logging();
    let coordinator = ExecutionCoordinator::new();
    let result = coordinator
        .run(sh("echo 'WARNING: no thumbnail' >&2; exit 0"), RunOptions::default())
        .await
        .expect("run");
    assert!(result.success);
    assert!(result.output.contains("WARNING: no thumbnail\n"));
}

#[tokio::test]
async fn finalize_stats_real_files_in_the_working_dir() {
    init_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = ExecutionCoordinator::new();
    let script = "printf 'data' > clip.mp4; echo 'Destination: clip.mp4'";
    let spec = sh(script).with_working_dir(dir.path());
    let result = coordinator
        .run(spec, RunOptions::default())
        .await
        .expect("run");
    assert!(result.success);
    let tracked = result
        .tracked_files
        .iter()
        .find(|f| f.path == std::path::Path::new("clip.mp4"))
        .expect("clip tracked");
    assert_eq!(tracked.size, Some(4));
    assert!(tracked.created.is_some());
}

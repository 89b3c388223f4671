//! Parser pipeline behavior on scripted line sequences, no child process.

use noutaja::progress::{DownloadProgress, DownloadState};
use noutaja::{FileKind, LineClass, LineClassifier, ProgressParser};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

fn parser() -> ProgressParser {
    ProgressParser::new(Arc::new(Mutex::new(DownloadProgress::new())))
}

#[test]
fn reference_sequence_walks_the_state_machine_forward() {
    let p = parser();
    let lines = [
        ("[info] extracting info", DownloadState::ExtractingInfo),
        ("download:1000|2000|500.0|4", DownloadState::Downloading),
        ("Destination: out.mp4", DownloadState::Downloading),
        ("[download] 100% of out.mp4", DownloadState::Completed),
    ];
    for (line, expected_state) in lines {
        p.apply(line);
        assert_eq!(p.snapshot().state, expected_state, "after line: {line}");
    }

    let snap = p.snapshot();
    assert_eq!(snap.percentage, 100);
    let media: Vec<_> = snap
        .tracked_files
        .iter()
        .filter(|f| f.kind == FileKind::Media)
        .collect();
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].path, PathBuf::from("out.mp4"));
}

#[test]
fn full_session_with_post_processing_and_subtitles() {
    let p = parser();
    for line in [
        "[youtube] Extracting URL: https://example.com/watch?v=aBcDeFgHiJk",
        "[youtube] aBcDeFgHiJk: Downloading webpage",
        "[info] aBcDeFgHiJk: Downloading 2 format(s): 137+140",
        "[info] Writing video subtitles to: clip.en.srt",
        "Destination: clip.en.srt",
        "[download] Destination: clip.f137.mp4",
        "download:500000|1000000|250000.0|2",
        "download:1000000|1000000|250000.0|0",
        "[download] Destination: clip.f140.m4a",
        "download:NA|NA|NA|NA",
        "[Merger] Merging formats into \"clip.mp4\"",
        "Deleting original file clip.f137.mp4 (pass -k to keep)",
    ] {
        p.apply(line);
    }

    let snap = p.snapshot();
    assert_eq!(snap.content_id.as_deref(), Some("aBcDeFgHiJk"));
    assert_eq!(snap.final_file, Some(PathBuf::from("clip.mp4")));
    assert_eq!(snap.state, DownloadState::PostProcessing);
    assert_eq!(snap.status, "Merging formats");
    // Subtitle + three media paths, each tracked once.
    assert_eq!(snap.tracked_files.len(), 4);
    assert_eq!(
        snap.tracked_files
            .iter()
            .filter(|f| f.kind == FileKind::Subtitle)
            .count(),
        1
    );
    // The all-NA progress token changed nothing.
    assert_eq!(snap.percentage, 100);
}

#[test]
fn error_line_wins_over_later_completion_chatter() {
    let p = parser();
    p.apply("download:10|100|NA|NA");
    p.apply("ERROR: unable to download video data: HTTP Error 403");
    p.apply("[download] 100% of out.mp4");

    let snap = p.snapshot();
    assert_eq!(snap.state, DownloadState::Failed);
    assert_eq!(snap.percentage, 10);
    assert!(snap
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("HTTP Error 403")));
}

#[test]
fn classification_and_parsing_agree_on_the_progress_token() {
    let classifier = LineClassifier::shared();
    let line = "download:1000|2000|500.0|4";
    assert_eq!(classifier.classify(line), LineClass::DownloadProgress);

    let p = parser();
    let (percentage, status) = p.apply(line);
    assert_eq!(percentage, 50);
    assert!(status.contains("1.0 KB"), "status: {status}");
    assert!(status.contains("2.0 KB"), "status: {status}");
}

#[test]
fn prelude_collects_diagnostics_until_download_starts() {
    let p = parser();
    p.apply("[youtube] aBcDeFgHiJk: Downloading webpage");
    p.apply("WARNING: unable to extract channel id");
    p.apply("download:1|100|NA|NA");
    p.apply("WARNING: late warning");

    let snap = p.snapshot();
    assert_eq!(
        snap.prelude,
        vec![
            "[youtube] aBcDeFgHiJk: Downloading webpage".to_string(),
            "WARNING: unable to extract channel id".to_string(),
        ]
    );
}

//! Progress state machine for one downloader run.
//!
//! The [`ProgressParser`] consumes classified output lines in arrival order
//! and mutates a shared [`DownloadProgress`] under a single per-run mutex.
//! State transitions are monotonic forward; once a terminal state is reached
//! no further transitions fire. Malformed progress fields are tolerated
//! field-by-field: a bad field is a no-op on that field, never on the line.

use crate::classifier::{LineClass, LineClassifier, field_is_available, progress_fields};
use crate::constants::{CONTENT_ID_LEN, INDETERMINATE_PERCENT};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

// ---------------------------------------------------------------------------
// DownloadState
// ---------------------------------------------------------------------------

/// The state machine for one run. Ordinal order is transition order; the
/// parser only ever moves to a strictly greater state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Initializing,
    CheckingInput,
    ExtractingInfo,
    PreparingDownload,
    Downloading,
    PostProcessing,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    /// Check if this state is terminal. Terminal states absorb all further
    /// transitions for the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// Tracked files
// ---------------------------------------------------------------------------

/// Role inferred for a file path mentioned in the tool's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Media,
    Subtitle,
    Metadata,
    Thumbnail,
}

impl FileKind {
    /// Infer the role from the file extension. Unrecognized extensions are
    /// treated as media, matching the tool's habit of inventing container
    /// suffixes.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "srt" | "vtt" | "ass" | "ssa" | "lrc" => FileKind::Subtitle,
            "json" | "description" | "xml" | "nfo" => FileKind::Metadata,
            "jpg" | "jpeg" | "png" | "webp" | "gif" => FileKind::Thumbnail,
            _ => FileKind::Media,
        }
    }
}

/// One file path discovered in the tool's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub kind: FileKind,
    /// Filled in at run end, when the file is stat'ed on disk.
    pub size: Option<u64>,
    pub created: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// DownloadProgress
// ---------------------------------------------------------------------------

/// The mutable progress model for one run. Mutated exclusively by the parser
/// under the run's mutex; read by callbacks and pollers under the same mutex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub state: DownloadState,
    /// 0..=100, or [`INDETERMINATE_PERCENT`] when the total size is unknown.
    pub percentage: i64,
    pub status: String,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub tracked_files: Vec<TrackedFile>,
    /// 11-character content identifier, captured once from info-extraction
    /// lines.
    pub content_id: Option<String>,
    pub error_message: Option<String>,
    /// Diagnostic lines gathered before the download proper starts.
    pub prelude: Vec<String>,
    /// Best current candidate for the final output file. Last write wins so a
    /// post-processing rename supersedes an earlier temp name.
    pub final_file: Option<PathBuf>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            state: DownloadState::Initializing,
            percentage: 0,
            status: String::new(),
            speed: None,
            eta: None,
            tracked_files: Vec::new(),
            content_id: None,
            error_message: None,
            prelude: Vec::new(),
            final_file: None,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }

    /// The media files among the tracked files, in discovery order.
    pub fn media_files(&self) -> impl Iterator<Item = &TrackedFile> {
        self.tracked_files
            .iter()
            .filter(|f| f.kind == FileKind::Media)
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Human-readable unit formatting
// ---------------------------------------------------------------------------

/// Format a byte count with a binary-free decimal unit, B through GB.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Format a transfer rate in bytes per second, B/s through GB/s.
pub fn format_speed(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Format a duration in seconds as `H:MM:SS`.
pub fn format_eta(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours}:{minutes:02}:{secs:02}")
}

// ---------------------------------------------------------------------------
// ProgressParser
// ---------------------------------------------------------------------------

/// The outcome the coordinator observed for the process, folded into the
/// progress model at run end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunVerdict {
    Completed,
    Failed,
    Cancelled,
}

/// Matches the extractor phrasing `[tag] <id>: action`, so an ordinary
/// 11-letter word elsewhere in the line cannot masquerade as the id.
fn content_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[[^\]]+\]\s+([0-9A-Za-z_-]{11}):")
            .expect("content id pattern must compile")
    })
}

/// Stateful parser that classifies lines and mutates the shared progress
/// model. Cheap to clone; clones share the same progress instance.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    progress: Arc<Mutex<DownloadProgress>>,
}

impl ProgressParser {
    pub fn new(progress: Arc<Mutex<DownloadProgress>>) -> Self {
        Self { progress }
    }

    pub fn progress(&self) -> &Arc<Mutex<DownloadProgress>> {
        &self.progress
    }

    /// Consume one line: classify it, apply its category handler, and return
    /// a `(percentage, status)` snapshot for callbacks.
    pub fn apply(&self, line: &str) -> (i64, String) {
        let class = LineClassifier::shared().classify(line);
        let mut progress = self.lock();
        if !progress.state.is_terminal() {
            Self::apply_classified(&mut progress, line, class);
        }
        (progress.percentage, progress.status.clone())
    }

    /// Snapshot of the current progress model.
    pub fn snapshot(&self) -> DownloadProgress {
        self.lock().clone()
    }

    /// Fold the process outcome into the model at run end: resolve the final
    /// output file, then move to the terminal state via `Finalizing`.
    ///
    /// The final file is the most-recently-created tracked media file on
    /// disk, falling back to the last explicitly recorded destination. File
    /// stats are recorded even when a completion line already put the model
    /// in a terminal state; only the state transition is absorbed then.
    pub async fn finalize(&self, base_dir: Option<&Path>, verdict: RunVerdict) {
        // Stat outside the lock; paths are copied out first.
        let media_paths: Vec<PathBuf> = {
            let progress = self.lock();
            progress.media_files().map(|f| f.path.clone()).collect()
        };

        let mut stats = Vec::with_capacity(media_paths.len());
        for path in &media_paths {
            let resolved = match base_dir {
                Some(base) if path.is_relative() => base.join(path),
                _ => path.clone(),
            };
            match tokio::fs::metadata(&resolved).await {
                Ok(meta) => {
                    let created = meta
                        .created()
                        .or_else(|_| meta.modified())
                        .ok()
                        .map(DateTime::<Utc>::from);
                    stats.push((path.clone(), Some(meta.len()), created));
                }
                Err(_) => stats.push((path.clone(), None, None)),
            }
        }

        let mut progress = self.lock();

        for (path, size, created) in &stats {
            if let Some(entry) = progress.tracked_files.iter_mut().find(|f| &f.path == path) {
                entry.size = *size;
                entry.created = *created;
            }
        }

        let newest_media = stats
            .iter()
            .filter(|(_, _, created)| created.is_some())
            .max_by_key(|(_, _, created)| *created)
            .map(|(path, _, _)| path.clone());
        if let Some(path) = newest_media {
            progress.final_file = Some(path);
        }

        // A terminal state reached from the line stream absorbs the verdict.
        if progress.state.is_terminal() {
            return;
        }
        progress.state = DownloadState::Finalizing;

        match verdict {
            RunVerdict::Completed => {
                progress.state = DownloadState::Completed;
                progress.percentage = 100;
                if progress.status.is_empty() {
                    progress.status = "Completed".to_string();
                }
            }
            RunVerdict::Failed => progress.state = DownloadState::Failed,
            RunVerdict::Cancelled => progress.state = DownloadState::Cancelled,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DownloadProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_classified(progress: &mut DownloadProgress, line: &str, class: LineClass) {
        match class {
            LineClass::DownloadProgress => Self::handle_progress(progress, line),
            LineClass::Error => Self::handle_error(progress, line),
            LineClass::Warning => Self::handle_prelude(progress, line),
            LineClass::InfoExtraction => Self::handle_info_extraction(progress, line),
            LineClass::FormatSelection => {
                advance(progress, DownloadState::PreparingDownload);
                Self::handle_prelude(progress, line);
            }
            LineClass::FileDestination => {
                advance(progress, DownloadState::Downloading);
                Self::handle_destination(progress, line);
            }
            LineClass::PostProcessing => Self::handle_post_processing(progress, line),
            LineClass::Completion => {
                progress.percentage = 100;
                advance(progress, DownloadState::Completed);
            }
            LineClass::Debug | LineClass::Unknown => {
                advance(progress, DownloadState::CheckingInput);
            }
        }
    }

    /// Parse the four pipe-delimited fields. Each field is handled
    /// independently; a malformed field is skipped without discarding the
    /// other three.
    fn handle_progress(progress: &mut DownloadProgress, line: &str) {
        let Some([downloaded, total, speed, eta]) = progress_fields(line) else {
            return;
        };
        advance(progress, DownloadState::Downloading);

        let downloaded_bytes = field_is_available(downloaded)
            .then(|| downloaded.parse::<f64>().ok())
            .flatten()
            .filter(|v| *v >= 0.0)
            .map(|v| v as u64);
        let total_bytes = field_is_available(total)
            .then(|| total.parse::<f64>().ok())
            .flatten()
            .filter(|v| *v > 0.0)
            .map(|v| v as u64);

        match (downloaded_bytes, total_bytes) {
            (Some(d), Some(t)) => {
                progress.percentage = ((d as u128 * 100 / t as u128) as i64).min(100);
                progress.status = format!(
                    "Downloading {} of {}",
                    format_bytes(d),
                    format_bytes(t)
                );
            }
            (Some(d), None) => {
                progress.percentage = INDETERMINATE_PERCENT;
                progress.status = format!("Downloaded {}", format_bytes(d));
            }
            _ => {}
        }

        if field_is_available(speed)
            && let Ok(rate) = speed.parse::<f64>()
            && rate > 0.0
        {
            progress.speed = Some(format_speed(rate));
        }
        if field_is_available(eta)
            && let Ok(secs) = eta.parse::<f64>()
            && secs > 0.0
        {
            progress.eta = Some(format_eta(secs as u64));
        }
    }

    fn handle_error(progress: &mut DownloadProgress, line: &str) {
        progress.error_message = Some(line.trim().to_string());
        progress.state = DownloadState::Failed;
    }

    fn handle_info_extraction(progress: &mut DownloadProgress, line: &str) {
        advance(progress, DownloadState::ExtractingInfo);
        if progress.content_id.is_none()
            && let Some(captures) = content_id_pattern().captures(line.trim())
        {
            let id = &captures[1];
            debug_assert_eq!(id.len(), CONTENT_ID_LEN);
            progress.content_id = Some(id.to_string());
        }
        Self::handle_prelude(progress, line);
    }

    fn handle_destination(progress: &mut DownloadProgress, line: &str) {
        if let Some(path) = extract_destination(line) {
            Self::record_file(progress, path);
        }
    }

    fn handle_post_processing(progress: &mut DownloadProgress, line: &str) {
        advance(progress, DownloadState::PostProcessing);
        progress.status = post_processing_label(line);
        // The merged/converted output path may be announced on the same line.
        Self::handle_destination(progress, line);
    }

    /// Lines seen before the download proper starts are kept as diagnostics.
    fn handle_prelude(progress: &mut DownloadProgress, line: &str) {
        if progress.state < DownloadState::Downloading {
            progress.prelude.push(line.trim().to_string());
        }
    }

    fn record_file(progress: &mut DownloadProgress, path: PathBuf) {
        let kind = FileKind::from_path(&path);
        if kind == FileKind::Media {
            progress.final_file = Some(path.clone());
        }
        if !progress.tracked_files.iter().any(|f| f.path == path) {
            progress.tracked_files.push(TrackedFile {
                path,
                kind,
                size: None,
                created: None,
            });
        }
    }
}

/// Forward-only transition. Re-entering the current or an earlier state is a
/// no-op, and terminal states absorb everything.
fn advance(progress: &mut DownloadProgress, target: DownloadState) {
    if !progress.state.is_terminal() && target > progress.state {
        tracing::debug!(from = ?progress.state, to = ?target, "state transition");
        progress.state = target;
    }
}

/// Pull a file path out of one of the known destination phrasings.
fn extract_destination(line: &str) -> Option<PathBuf> {
    let trimmed = line.trim();

    // `... Destination: <path>` (also inside post-processor tags).
    if let Some(idx) = trimmed.find("Destination:") {
        let path = trimmed[idx + "Destination:".len()..].trim();
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // `Merging formats into "<path>"` and similar quoted announcements.
    if let Some(start) = trimmed.find('"') {
        let rest = &trimmed[start + 1..];
        if let Some(end) = rest.find('"') {
            let path = &rest[..end];
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
    }

    // `[download] <path> has already been downloaded`.
    if let Some(idx) = trimmed.find("has already been downloaded") {
        let mut path = trimmed[..idx].trim();
        if let Some(rest) = path.strip_prefix("[download]") {
            path = rest.trim();
        }
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    None
}

/// Human-readable "current operation" label for a post-processing line.
fn post_processing_label(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.contains("Merging") || trimmed.starts_with("[Merger]") {
        "Merging formats".to_string()
    } else if trimmed.starts_with("[ExtractAudio]") {
        "Extracting audio".to_string()
    } else if trimmed.starts_with("[Fixup") {
        "Fixing container".to_string()
    } else if trimmed.contains("Converting") {
        "Converting".to_string()
    } else {
        "Post-processing".to_string()
    }
}

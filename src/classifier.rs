//! Line classification for downloader output.
//!
//! A pure pattern match from one raw output line to a category tag. Categories
//! are checked in a fixed precedence order and the first match wins; anything
//! the tool's line protocol does not cover degrades to [`LineClass::Unknown`]
//! rather than failing, so a changed tool version cannot crash the parser.

use crate::constants::NOT_AVAILABLE;
use regex::RegexSet;
use std::fmt;
use std::sync::OnceLock;

/// Category tag assigned to one line of raw tool output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineClass {
    /// Pipe-delimited numeric progress token (four fields).
    DownloadProgress,
    /// Explicit error keyword.
    Error,
    /// Explicit warning keyword.
    Warning,
    /// Info-extraction marker.
    InfoExtraction,
    /// Format/quality selection marker.
    FormatSelection,
    /// Destination or already-downloaded marker.
    FileDestination,
    /// Merge/convert/container-fix marker.
    PostProcessing,
    /// 100% or explicit "finished" marker.
    Completion,
    /// Fallback debug marker.
    Debug,
    /// Anything else.
    Unknown,
}

impl fmt::Display for LineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LineClass::DownloadProgress => "download-progress",
            LineClass::Error => "error",
            LineClass::Warning => "warning",
            LineClass::InfoExtraction => "info-extraction",
            LineClass::FormatSelection => "format-selection",
            LineClass::FileDestination => "file-destination",
            LineClass::PostProcessing => "post-processing",
            LineClass::Completion => "completion",
            LineClass::Debug => "debug",
            LineClass::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Split a progress-template line into its four pipe-delimited fields.
///
/// The tool is invoked with a progress template that renders
/// `download:<downloaded>|<total>|<speed>|<eta>`, where any field may be the
/// literal not-available marker. The prefix is optional: a bare four-field
/// line is accepted too, but only when every field is numeric or the marker,
/// so ordinary pipe-containing chatter is not misread as progress.
pub fn progress_fields(line: &str) -> Option<[&str; 4]> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix("download:") {
        return split_four(rest);
    }
    let fields = split_four(trimmed)?;
    fields
        .iter()
        .all(|f| *f == NOT_AVAILABLE || f.parse::<f64>().is_ok())
        .then_some(fields)
}

fn split_four(rest: &str) -> Option<[&str; 4]> {
    let mut fields = rest.split('|');
    let result = [
        fields.next()?.trim(),
        fields.next()?.trim(),
        fields.next()?.trim(),
        fields.next()?.trim(),
    ];
    if fields.next().is_some() {
        return None;
    }
    Some(result)
}

/// Check whether a progress field carries the "not available" token.
pub fn field_is_available(field: &str) -> bool {
    !field.is_empty() && field != NOT_AVAILABLE
}

/// Compiled pattern groups for every category after `DownloadProgress`.
///
/// Pattern groups mirror the phrasings of the wrapped tool:
/// - **Error**: `ERROR: ...`, `[error] ...`
/// - **Warning**: `WARNING: ...`, `[warning] ...`
/// - **InfoExtraction**: `[info] ...`, extractor lines (`[youtube] id: Downloading webpage`)
/// - **FormatSelection**: format listing/selection announcements
/// - **FileDestination**: `Destination: path`, `... has already been downloaded`
/// - **PostProcessing**: `[Merger]`, `[ExtractAudio]`, `[Fixup...]`, `[ffmpeg]`, merge/convert phrasings
/// - **Completion**: a literal `100%` or "finished"
/// - **Debug**: `[debug] ...`
pub struct LineClassifier {
    error: RegexSet,
    warning: RegexSet,
    info_extraction: RegexSet,
    format_selection: RegexSet,
    file_destination: RegexSet,
    post_processing: RegexSet,
    completion: RegexSet,
    debug: RegexSet,
}

impl LineClassifier {
    fn new() -> Self {
        let error = RegexSet::new([
            r"(?i)^ERROR:",
            r"(?i)^\[error\]",
            r"(?i)^yt-dlp: error",
        ])
        .expect("error patterns must compile");

        let warning = RegexSet::new([r"(?i)^WARNING:", r"(?i)^\[warning\]"])
            .expect("warning patterns must compile");

        let info_extraction = RegexSet::new([
            r"(?i)^\[info\]",
            r"(?i)^\[[^\]]+\]\s+\S+:\s+(Downloading|Extracting)",
            r"(?i)Extracting URL",
        ])
        .expect("info-extraction patterns must compile");

        let format_selection = RegexSet::new([
            r"(?i)^\[format\]",
            r"(?i)Downloading \d+ format\(s\)",
            r"(?i)Requested format",
        ])
        .expect("format-selection patterns must compile");

        let file_destination = RegexSet::new([
            r"(?i)Destination:\s+\S",
            r"(?i)has already been downloaded",
        ])
        .expect("file-destination patterns must compile");

        let post_processing = RegexSet::new([
            r"^\[Merger\]",
            r"^\[ExtractAudio\]",
            r"^\[Fixup\w*\]",
            r"^\[VideoConvertor\]",
            r"^\[VideoRemuxer\]",
            r"^\[ffmpeg\]",
            r"(?i)Merging formats into",
            r"(?i)Converting .+ to",
        ])
        .expect("post-processing patterns must compile");

        let completion = RegexSet::new([r"\b100(\.0)?%", r"(?i)\bfinished\b"])
            .expect("completion patterns must compile");

        let debug =
            RegexSet::new([r"(?i)^\[debug\]"]).expect("debug patterns must compile");

        Self {
            error,
            warning,
            info_extraction,
            format_selection,
            file_destination,
            post_processing,
            completion,
            debug,
        }
    }

    /// Process-wide shared instance; the pattern sets are immutable once built.
    pub fn shared() -> &'static Self {
        static CLASSIFIER: OnceLock<LineClassifier> = OnceLock::new();
        CLASSIFIER.get_or_init(Self::new)
    }

    /// Classify one line. First matching category in precedence order wins.
    pub fn classify(&self, line: &str) -> LineClass {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineClass::Unknown;
        }
        if progress_fields(trimmed).is_some() {
            return LineClass::DownloadProgress;
        }
        if self.error.is_match(trimmed) {
            return LineClass::Error;
        }
        if self.warning.is_match(trimmed) {
            return LineClass::Warning;
        }
        if self.info_extraction.is_match(trimmed) {
            return LineClass::InfoExtraction;
        }
        if self.format_selection.is_match(trimmed) {
            return LineClass::FormatSelection;
        }
        if self.file_destination.is_match(trimmed) {
            return LineClass::FileDestination;
        }
        if self.post_processing.is_match(trimmed) {
            return LineClass::PostProcessing;
        }
        if self.completion.is_match(trimmed) {
            return LineClass::Completion;
        }
        if self.debug.is_match(trimmed) {
            return LineClass::Debug;
        }
        LineClass::Unknown
    }
}

impl fmt::Debug for LineClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineClassifier")
            .field("error_patterns", &self.error.len())
            .field("warning_patterns", &self.warning.len())
            .field("info_patterns", &self.info_extraction.len())
            .finish_non_exhaustive()
    }
}

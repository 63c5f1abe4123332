//! Ingestion progress reporting.
//!
//! Reports observable progress while a file moves through the pipeline so
//! users see which phase is running and how many chunks are left. Progress
//! is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for one file's ingestion.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Plugin is extracting and chunking (total unknown yet).
    Extracting { file: String },
    /// Embedding chunks: n done out of total.
    Embedding { file: String, n: u64, total: u64 },
    /// Writing embedded chunks to the vector store: n done out of total.
    Storing { file: String, n: u64, total: u64 },
}

/// Reports ingestion progress. Implementations write to stderr (human or
/// JSON).
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingestion pipeline.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest report.pdf  embedding  40 / 120 chunks".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Extracting { file } => {
                format!("ingest {}  extracting...\n", file)
            }
            IngestProgressEvent::Embedding { file, n, total } => {
                format!(
                    "ingest {}  embedding  {} / {} chunks\n",
                    file,
                    format_number(*n),
                    format_number(*total)
                )
            }
            IngestProgressEvent::Storing { file, n, total } => {
                format!(
                    "ingest {}  storing  {} / {} chunks\n",
                    file,
                    format_number(*n),
                    format_number(*total)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Extracting { file } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "extracting"
            }),
            IngestProgressEvent::Embedding { file, n, total } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Storing { file, n, total } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "storing",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled (and for background tasks).
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!(
                "Invalid progress mode: '{}'. Must be 'off', 'human', or 'json'.",
                other
            ),
        }
    }

    /// Build a reporter for this mode. Caller passes it to the pipeline.
    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}

//! JSON Lines snapshot feed consumed by the scheduler loop.
//!
//! Whatever collects metrics writes one [`MetricsSnapshot`] object per line to
//! a file or pipe; the watchdog reads one line per tick.

use std::path::Path;
use std::pin::Pin;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::snapshot::MetricsSnapshot;

/// Reads snapshots line by line from any async buffered reader.
pub struct SnapshotSource {
    lines: Lines<Pin<Box<dyn AsyncBufRead + Send>>>,
    line_number: usize,
}

impl SnapshotSource {
    /// Feed from a file, or stdin when `path` is `-`.
    pub async fn open(path: &str) -> Result<Self> {
        if path == "-" {
            return Ok(Self::from_reader(BufReader::new(tokio::io::stdin())));
        }
        let file = tokio::fs::File::open(Path::new(path))
            .await
            .with_context(|| format!("Failed to open snapshot source {path}"))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn from_reader(reader: impl AsyncBufRead + Send + 'static) -> Self {
        let reader: Pin<Box<dyn AsyncBufRead + Send>> = Box::pin(reader);
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    /// Next snapshot, `Ok(None)` at end of input.
    ///
    /// Blank lines and `#` comments are skipped. A malformed line is an error
    /// but the source stays usable for the following lines.
    pub async fn next_snapshot(&mut self) -> Result<Option<MetricsSnapshot>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .context("Failed to read snapshot source")?
        {
            self.line_number += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let snapshot = serde_json::from_str(line)
                .with_context(|| format!("Malformed snapshot on line {}", self.line_number))?;
            return Ok(Some(snapshot));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_lines_and_skips_noise() {
        let input = b"# replay\n\n{\"cpuUsage\":95,\"memoryUsage\":50,\"diskSpace\":50,\"responseTimeMs\":100}\nnot json\n{\"cpuUsage\":10,\"memoryUsage\":10,\"diskSpace\":10,\"responseTimeMs\":100}\n";
        let mut source = SnapshotSource::from_reader(&input[..]);

        let first = source.next_snapshot().await.unwrap().unwrap();
        assert!((first.cpu_usage - 95.0).abs() < f64::EPSILON);

        let err = source.next_snapshot().await.unwrap_err();
        assert!(err.to_string().contains("line 4"));

        let third = source.next_snapshot().await.unwrap().unwrap();
        assert!((third.cpu_usage - 10.0).abs() < f64::EPSILON);

        assert!(source.next_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        assert!(SnapshotSource::open("/nonexistent/snapshots.jsonl")
            .await
            .is_err());
    }
}

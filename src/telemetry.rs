use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::errors::AppResult;

const BUFFER_FILE_NAME: &str = "geocode-events.jsonl";
const ROTATED_FILE_NAME: &str = "geocode-events.1.jsonl";
const DEFAULT_BATCH_SIZE: usize = 25;

/// Append-only JSON lines log of pipeline events. One previous generation is
/// kept when the buffer outgrows its size limit.
#[derive(Clone)]
pub struct TelemetryClient {
    enabled: Arc<AtomicBool>,
    queue: Arc<Mutex<Vec<TelemetryEvent>>>,
    buffer_path: PathBuf,
    batch_size: usize,
    max_file_bytes: u64,
}

impl TelemetryClient {
    pub fn new<P: AsRef<Path>>(data_dir: P, config: &PipelineConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let buffer_path = data_dir.join(BUFFER_FILE_NAME);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&buffer_path)?;

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(config.telemetry_enabled)),
            queue: Arc::new(Mutex::new(Vec::new())),
            buffer_path,
            batch_size: DEFAULT_BATCH_SIZE,
            max_file_bytes: config.telemetry_buffer_max_bytes.max(1),
        })
    }

    pub fn record(&self, name: impl Into<String>, payload: serde_json::Value) -> AppResult<()> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut queue = self.queue.lock();
        queue.push(TelemetryEvent::new(name.into(), payload));
        if queue.len() >= self.batch_size {
            self.persist_locked(&mut queue)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut queue = self.queue.lock();
        self.persist_locked(&mut queue)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn persist_locked(&self, queue: &mut Vec<TelemetryEvent>) -> AppResult<()> {
        if queue.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::new();
        for event in queue.iter() {
            serde_json::to_writer(&mut encoded, event)?;
            encoded.push(b'\n');
        }

        self.rotate_if_needed(encoded.len() as u64)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.buffer_path)?;
        file.write_all(&encoded)?;
        file.flush()?;

        queue.clear();
        Ok(())
    }

    fn rotate_if_needed(&self, incoming_bytes: u64) -> AppResult<()> {
        let current_size = fs::metadata(&self.buffer_path)
            .map(|m| m.len())
            .unwrap_or(0);
        if current_size == 0 || current_size + incoming_bytes <= self.max_file_bytes {
            return Ok(());
        }

        let rotated = self
            .buffer_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(ROTATED_FILE_NAME);
        fs::rename(&self.buffer_path, rotated)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl TelemetryEvent {
    fn new(name: String, payload: serde_json::Value) -> Self {
        Self {
            name,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_events_on_flush() {
        let dir = tempdir().unwrap();
        let client = TelemetryClient::new(dir.path(), &PipelineConfig::default()).unwrap();
        client
            .record("geocode_throttled", json!({ "cursor": 3 }))
            .unwrap();
        assert_eq!(client.queue_depth(), 1);
        client.flush().unwrap();
        assert_eq!(client.queue_depth(), 0);

        let buffer = fs::read_to_string(client.buffer_path()).unwrap();
        assert!(buffer.contains("geocode_throttled"));
        assert_eq!(buffer.lines().count(), 1);
    }

    #[test]
    fn drops_events_while_disabled() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig {
            telemetry_enabled: false,
            ..PipelineConfig::default()
        };
        let client = TelemetryClient::new(dir.path(), &config).unwrap();
        client.record("ignored", json!({})).unwrap();
        assert_eq!(client.queue_depth(), 0);

        client.set_enabled(true);
        client.record("kept", json!({})).unwrap();
        assert_eq!(client.queue_depth(), 1);
    }

    #[test]
    fn rotates_when_exceeding_capacity() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig {
            telemetry_buffer_max_bytes: 64,
            ..PipelineConfig::default()
        };
        let client = TelemetryClient::new(dir.path(), &config).unwrap();
        for idx in 0..3 {
            client
                .record(
                    "placement_degraded",
                    json!({ "padding": "0123456789abcdef0123456789abcdef", "idx": idx }),
                )
                .unwrap();
            client.flush().unwrap();
        }

        let rotated = dir.path().join(ROTATED_FILE_NAME);
        assert!(rotated.exists());
        let current = fs::read_to_string(client.buffer_path()).unwrap();
        assert!(current.contains("\"idx\":2"));
    }
}

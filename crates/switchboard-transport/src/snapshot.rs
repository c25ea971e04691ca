//! Best-effort request/response snapshots.
//!
//! When a snapshot directory is configured, the dispatcher records a stable
//! envelope before and after each upstream call. Writes happen on a spawned
//! task and failures are swallowed; snapshots must never slow down or fail
//! a request.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEnvelope {
    pub phase: String,
    pub request_id: String,
    pub data: Value,
    pub headers: BTreeMap<String, String>,
    pub url: String,
    pub entry_endpoint: String,
    pub client_request_id: Option<String>,
    pub provider_key: String,
    pub provider_id: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Fire-and-forget write of one envelope. Secrets stay out by
    /// construction: the caller passes already-assembled headers, and the
    /// authorization slot is masked here.
    pub fn record(&self, mut envelope: SnapshotEnvelope) {
        for slot in ["authorization", "x-api-key"] {
            if let Some(v) = envelope.headers.get_mut(slot) {
                *v = "<redacted>".to_string();
            }
        }
        let dir = self.dir.clone();
        tokio::spawn(async move {
            let path = dir.join(format!("{}-{}.json", envelope.request_id, envelope.phase));
            let rendered = match serde_json::to_vec_pretty(&envelope) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "snapshot serialization failed");
                    return;
                }
            };
            if let Err(e) = std::fs::create_dir_all(&dir) {
                debug!(error = %e, dir = %dir.display(), "snapshot dir unavailable");
                return;
            }
            if let Err(e) = std::fs::write(&path, rendered) {
                debug!(error = %e, path = %path.display(), "snapshot write failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn snapshot_lands_on_disk_with_redacted_auth() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), "Bearer secret".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());

        writer.record(SnapshotEnvelope {
            phase: "pre".into(),
            request_id: "req-1".into(),
            data: json!({"model": "m"}),
            headers,
            url: "http://upstream/v1/chat/completions".into(),
            entry_endpoint: "/v1/messages".into(),
            client_request_id: None,
            provider_key: "glm".into(),
            provider_id: "glm".into(),
        });

        // the write is async fire-and-forget; give it a moment
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let written = std::fs::read_to_string(dir.path().join("req-1-pre.json")).unwrap();
        assert!(written.contains("<redacted>"));
        assert!(!written.contains("Bearer secret"));
        assert!(written.contains("\"entryEndpoint\": \"/v1/messages\""));
    }

    #[tokio::test]
    async fn unwritable_dir_is_swallowed() {
        let writer = SnapshotWriter::new("/proc/definitely/not/writable");
        writer.record(SnapshotEnvelope {
            phase: "post".into(),
            request_id: "req-2".into(),
            data: json!({}),
            headers: BTreeMap::new(),
            url: String::new(),
            entry_endpoint: String::new(),
            client_request_id: None,
            provider_key: String::new(),
            provider_id: String::new(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // nothing to assert beyond "no panic"
    }
}

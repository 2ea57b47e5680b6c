//! Newline-delimited JSON files for batches that never reached the sink

use crate::output::publisher::BatchPayload;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the spill file for one batch
pub fn spill_file_name(sweep_id: &str, batch_index: u64) -> String {
    format!("spill-{}-{}.ndjson", sweep_id, batch_index)
}

/// Writes every row of `payload` as one JSON object per line
///
/// Parent directories are created as needed. An existing file is replaced,
/// so writing the same batch twice leaves identical content.
pub async fn write_ndjson(path: &Path, payload: &BatchPayload) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut content = String::new();
    for object in payload.row_objects() {
        let line = serde_json::to_string(&object).map_err(io::Error::other)?;
        content.push_str(&line);
        content.push('\n');
    }

    tokio::fs::write(path, content).await
}

/// Spills a batch into `spool_dir`
///
/// # Returns
///
/// * `Ok(PathBuf)` - Location of the spill file
/// * `Err(io::Error)` - The spool directory is not writable
pub async fn spill_batch(spool_dir: &Path, payload: &BatchPayload) -> io::Result<PathBuf> {
    let path = spool_dir.join(spill_file_name(
        &payload.metadata.sweep_id,
        payload.metadata.batch_index,
    ));
    write_ndjson(&path, payload).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::publisher::BatchMetadata;
    use tempfile::TempDir;

    fn payload() -> BatchPayload {
        BatchPayload {
            schema: vec!["id".to_string(), "nome".to_string()],
            rows: vec![
                vec!["1".to_string(), "ANA".to_string()],
                vec!["3".to_string(), "JOSE \"ZE\"".to_string()],
            ],
            metadata: BatchMetadata {
                sweep_id: "20260101T000000Z-abcdef01".to_string(),
                batch_index: 4,
                total_batches_hint: None,
                timestamp: "2026-01-01T00:00:00+00:00".to_string(),
                extractor: "members".to_string(),
                config_fingerprint: "abcdef01".to_string(),
            },
        }
    }

    #[test]
    fn test_spill_file_name() {
        assert_eq!(spill_file_name("s1", 0), "spill-s1-0.ndjson");
    }

    #[tokio::test]
    async fn test_spill_writes_one_object_per_row() {
        let dir = TempDir::new().unwrap();
        let spool = dir.path().join("spool");

        let path = spill_batch(&spool, &payload()).await.unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "spill-20260101T000000Z-abcdef01-4.ndjson"
        );

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], "1");
        assert_eq!(lines[1]["nome"], "JOSE \"ZE\"");
    }
}

//! Append-only local record of points the pipeline gave up retrying. The
//! one piece of local durable state this component owns, besides the
//! calendar OAuth token — everything else lives in the time-series store.

use std::path::PathBuf;

use ha_protocol::write_batch::WritePoint;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub struct DeadLetterLog {
    path: PathBuf,
}

impl DeadLetterLog {
    pub fn new(path: PathBuf) -> Self {
        DeadLetterLog { path }
    }

    /// Append one point as a JSON line. Failure to write is logged, not
    /// propagated — there is nowhere further to escalate a dead-letter
    /// write failure.
    pub async fn record(&self, point: &WritePoint, reason: &str) {
        let line = match serde_json::to_string(&DeadLetterEntry {
            point,
            reason,
            recorded_at: chrono::Utc::now(),
        }) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize dead-letter entry");
                return;
            }
        };

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(
                path = %self.path.display(),
                error = %e,
                "failed to append to dead-letter log"
            );
        }
    }
}

#[derive(serde::Serialize)]
struct DeadLetterEntry<'a> {
    point: &'a WritePoint,
    reason: &'a str,
    recorded_at: chrono::DateTime<chrono::Utc>,
}

use super::RecordedEvent;
use anyhow::Result;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Appends recorded events to a JSONL file from a background task.
pub struct RecordingLogger {
    sender: mpsc::UnboundedSender<RecordedEvent>,
}

impl RecordingLogger {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn new(log_file_path: PathBuf) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Err(e) = Self::writer_task(log_file_path, &mut receiver).await {
                error!("Recording logger failed: {}", e);
            }
        });

        Ok(Self { sender })
    }

    pub fn record(&self, event: RecordedEvent) {
        if self.sender.send(event).is_err() {
            error!("Failed to send event to recording logger: receiver dropped");
        }
    }

    /// Get a clone of the logger for use in middleware
    pub fn clone_for_middleware(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }

    async fn writer_task(
        log_file_path: PathBuf,
        receiver: &mut mpsc::UnboundedReceiver<RecordedEvent>,
    ) -> Result<()> {
        if let Some(parent) = log_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file_path)
            .await?;

        info!("Recording HTTP calls to: {:?}", log_file_path);

        while let Some(event) = receiver.recv().await {
            match serde_json::to_string(&event) {
                Ok(json_line) => {
                    if let Err(e) = file.write_all(format!("{}\n", json_line).as_bytes()).await {
                        error!("Failed to write event to log: {}", e);
                        continue;
                    }
                    if let Err(e) = file.flush().await {
                        error!("Failed to flush log file: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                }
            }
        }

        info!("Recording writer task shutting down");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Direction, EventType};
    use std::collections::HashMap;
    use std::time::Duration;

    fn event(operation: &str) -> RecordedEvent {
        RecordedEvent {
            timestamp: "2026-04-01T10:00:00Z".to_string(),
            correlation_id: "c-1".to_string(),
            event_type: EventType::TelegramApiCall,
            direction: Direction::Request,
            operation: operation.to_string(),
            data: serde_json::json!({"chat_id": "42"}),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_events_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("recordings.jsonl");
        let logger = RecordingLogger::new(path.clone()).unwrap();

        logger.record(event("POST /sendMessage"));
        logger.clone_for_middleware().record(event("response_200"));

        let mut lines = Vec::new();
        for _ in 0..100 {
            if let Ok(contents) = tokio::fs::read_to_string(&path).await {
                lines = contents.lines().map(str::to_string).collect();
                if lines.len() == 2 {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(lines.len(), 2);
        let first: RecordedEvent = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first.operation, "POST /sendMessage");
        assert_eq!(first.event_type, EventType::TelegramApiCall);
    }
}

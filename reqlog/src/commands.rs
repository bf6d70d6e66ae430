use crate::config::Config;
use capture::Capture;
use capture::log_writer::{LogWriter, WriteError};
use capture::recorder::{Notification, RunSummary};
use capture::store::{self, StoreError};
use capture::types::LogEntry;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("write error: {0}")]
    Write(#[from] WriteError),
    #[error("could not encode snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("notification queue closed")]
    QueueClosed,
}

#[derive(Debug, Default, PartialEq)]
pub struct ReplayReport {
    pub skipped_lines: usize,
    pub summary: RunSummary,
}

/// Feeds recorded notifications, one JSON object per line, through the capture
/// pipeline. Lines that don't parse are skipped.
pub async fn replay(config: &Config, events: &Path) -> Result<ReplayReport, CommandError> {
    let file = tokio::fs::File::open(events).await?;
    let mut lines = BufReader::new(file).lines();

    let capture = Capture::start(&config.capture, store::from_config(&config.capture.store));
    let tx = capture.notifications();

    let mut skipped_lines = 0;
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Notification>(&line) {
            Ok(notification) => tx
                .send(notification)
                .await
                .map_err(|_| CommandError::QueueClosed)?,
            Err(err) => {
                tracing::warn!(line = line_no, "skipping invalid notification: {err}");
                skipped_lines += 1;
            }
        }
    }
    drop(tx);

    let summary = capture.finish().await;
    Ok(ReplayReport {
        skipped_lines,
        summary,
    })
}

/// Writes the whole log with its export time as pretty printed JSON, to `output`
/// or to stdout. Returns the number of exported entries.
pub async fn export(config: &Config, output: Option<&Path>) -> Result<usize, CommandError> {
    let writer = open_writer(config);
    let snapshot = writer.snapshot().await;
    writer.shutdown().await;
    let snapshot = snapshot?;

    let json = serde_json::to_string_pretty(&snapshot)?;
    match output {
        Some(path) => tokio::fs::write(path, json).await?,
        None => println!("{json}"),
    }
    Ok(snapshot.logs.len())
}

/// One summary line per entry, oldest first.
pub async fn list(config: &Config) -> Result<Vec<String>, CommandError> {
    let writer = open_writer(config);
    let entries = writer.entries().await;
    writer.shutdown().await;

    Ok(entries?.iter().map(summarize).collect())
}

pub async fn clear(config: &Config) -> Result<(), CommandError> {
    let writer = open_writer(config);
    let result = writer.clear().await;
    writer.shutdown().await;
    Ok(result?)
}

fn open_writer(config: &Config) -> LogWriter {
    LogWriter::spawn(
        store::from_config(&config.capture.store),
        &config.capture.log,
    )
}

fn summarize(entry: &LogEntry) -> String {
    let body = match &entry.body {
        Some(body) if body.truncated => format!("{} (truncated)", body.kind()),
        Some(body) => body.kind().to_string(),
        None => "none".to_string(),
    };
    format!(
        "{} {} {} headers={} body={}",
        entry.timestamp,
        entry.method,
        entry.url,
        entry.headers.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture::config::{Compression, StoreConfig};
    use capture::types::LogSnapshot;
    use std::io::Write;

    fn filesystem_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.capture.store = StoreConfig::Filesystem {
            base_dir: dir.to_str().unwrap().into(),
            compression: Compression::None,
        };
        config
    }

    // {"a":1} and "abcdef"
    const EVENTS: &str = r#"
{"event":"created","request_id":"1","url":"https://example.com/json","method":"POST","body":{"raw":[{"bytes":"eyJhIjoxfQ=="}]}}
{"event":"created","request_id":"2","url":"https://example.com/get","method":"GET"}
{"event":"headers_sent","request_id":"1","url":"https://example.com/json","method":"POST","headers":[{"name":"Content-Type","value":"application/json"}]}
this is not json
{"event":"created","request_id":"3","url":"https://example.com/text","method":"POST","body":{"raw":[{"bytes":"YWJjZGVm"}]}}
{"event":"completed","request_id":"2","method":"GET"}
{"event":"completed","request_id":"1","method":"POST"}
{"event":"error_occurred","request_id":"3"}
"#;

    #[tokio::test]
    async fn test_replay_export_clear() {
        let dir = tempfile::tempdir().unwrap();
        let config = filesystem_config(dir.path());

        let mut events = tempfile::NamedTempFile::new().unwrap();
        write!(events, "{EVENTS}").unwrap();

        let report = replay(&config, events.path()).await.unwrap();
        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.summary.notifications, 7);
        assert_eq!(report.summary.committed, 1);

        let lines = list(&config).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("POST https://example.com/json headers=1 body=json"));

        let output = dir.path().join("export.json");
        assert_eq!(export(&config, Some(&output)).await.unwrap(), 1);
        let snapshot: LogSnapshot =
            serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(snapshot.logs[0].id, "1");
        assert_eq!(
            snapshot.logs[0].body.as_ref().unwrap().content,
            capture::types::BodyContent::Json(serde_json::json!({"a": 1}))
        );

        clear(&config).await.unwrap();
        assert!(list(&config).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_missing_file() {
        let config = Config::default();
        assert!(matches!(
            replay(&config, Path::new("/nonexistent/events.jsonl")).await,
            Err(CommandError::Io(_))
        ));
    }

    #[test]
    fn test_summarize() {
        use capture::types::{BodyContent, DecodedBody};

        let mut entry = LogEntry {
            id: "1".into(),
            timestamp: "2026-01-01T00:00:00.000Z".into(),
            url: "https://example.com/".into(),
            method: "POST".into(),
            headers: Vec::new(),
            body: None,
        };
        assert_eq!(
            summarize(&entry),
            "2026-01-01T00:00:00.000Z POST https://example.com/ headers=0 body=none"
        );

        entry.body = Some(DecodedBody::new(BodyContent::Text("abc".into()), true));
        assert!(summarize(&entry).ends_with("body=text (truncated)"));
    }
}

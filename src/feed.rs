use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::warn;

use crate::observe::NetworkObserver;

/// One host lifecycle notification, as carried on an NDJSON feed. Field
/// names and shapes mirror the host event source: request ids are opaque
/// strings, `response_headers` is an ordered name/value list, `status_code`
/// may be absent on completion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FeedEvent {
    RequestWillStart {
        request_id: String,
        tab_id: i64,
        #[serde(default)]
        method: Option<String>,
        url: String,
        resource_type: String,
    },
    HeadersReceived {
        request_id: String,
        #[serde(default)]
        response_headers: Vec<(String, String)>,
    },
    RequestCompleted {
        request_id: String,
        #[serde(default)]
        status_code: Option<u16>,
    },
    RequestErrored {
        request_id: String,
    },
    TabClosed {
        tab_id: i64,
    },
}

#[derive(Debug)]
pub enum FeedError {
    ReadLine {
        line: usize,
        source: std::io::Error,
    },
    Apply {
        line: usize,
        source: anyhow::Error,
    },
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadLine { line, .. } => write!(f, "read feed line {line}"),
            Self::Apply { line, .. } => write!(f, "apply feed event at line {line}"),
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadLine { source, .. } => Some(source),
            Self::Apply { source, .. } => Some(source.as_ref()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedSummary {
    pub applied: u64,
    pub decode_errors: u64,
}

/// Applies a newline-delimited JSON event stream to the observer.
///
/// A line that fails to decode is reported and skipped so one malformed
/// entry cannot stall the feed; read and apply failures end the stream.
pub async fn apply_feed<R>(
    observer: &NetworkObserver,
    reader: R,
) -> Result<FeedSummary, FeedError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines: Lines<R> = reader.lines();
    let mut summary = FeedSummary::default();
    let mut line_number = 0usize;

    loop {
        line_number += 1;
        let line = lines.next_line().await.map_err(|source| {
            FeedError::ReadLine {
                line: line_number,
                source,
            }
        })?;
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: FeedEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                summary.decode_errors += 1;
                warn!(line = line_number, error = %err, "skipping undecodable feed line");
                continue;
            }
        };

        apply_event(observer, event)
            .await
            .map_err(|source| FeedError::Apply {
                line: line_number,
                source,
            })?;
        summary.applied += 1;
    }

    Ok(summary)
}

pub async fn apply_event(observer: &NetworkObserver, event: FeedEvent) -> anyhow::Result<()> {
    match event {
        FeedEvent::RequestWillStart {
            request_id,
            tab_id,
            method,
            url,
            resource_type,
        } => {
            observer
                .request_will_start(&request_id, tab_id, method.as_deref(), &url, &resource_type)
                .await
        }
        FeedEvent::HeadersReceived {
            request_id,
            response_headers,
        } => {
            observer.headers_received(&request_id, &response_headers);
            Ok(())
        }
        FeedEvent::RequestCompleted {
            request_id,
            status_code,
        } => observer.request_completed(&request_id, status_code).await,
        FeedEvent::RequestErrored { request_id } => observer.request_errored(&request_id).await,
        FeedEvent::TabClosed { tab_id } => observer.tab_closed(tab_id).await,
    }
}

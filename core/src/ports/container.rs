//! Container runtime port (interface).

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::domain::ContainerInfo;
use crate::error::Result;

/// How much history `FetchLogs` should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// Only the last N lines; `None` streams the whole history.
    pub tail: Option<usize>,
    /// Keep streaming new lines until the stream is dropped.
    pub follow: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            tail: Some(100),
            follow: false,
        }
    }
}

/// A control request for a running container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Stop,
    Restart,
    FetchLogs(LogOptions),
}

impl ContainerAction {
    pub fn verb(&self) -> &'static str {
        match self {
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
            ContainerAction::FetchLogs(_) => "logs",
        }
    }
}

/// Result of a successful container action.
#[derive(Debug)]
pub enum ContainerOutcome {
    Completed { message: String },
    Logs(LogStream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: LogSource,
    pub text: String,
}

/// Lazily produced container log lines.
///
/// Lines arrive as the producer reads them; nothing is buffered beyond the
/// channel capacity. Dropping the stream stops the producer.
#[derive(Debug)]
pub struct LogStream {
    rx: mpsc::Receiver<Result<LogLine>>,
}

impl LogStream {
    /// A stream plus the sender its producer writes to.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<LogLine>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// A finished stream over fixed lines.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        let (tx, stream) = Self::channel(lines.len());
        for text in lines {
            // Capacity equals the line count, so this cannot be full
            let _ = tx.try_send(Ok(LogLine {
                source: LogSource::Stdout,
                text,
            }));
        }
        stream
    }

    /// Next line, or `None` once the producer is done.
    pub async fn next_line(&mut self) -> Option<Result<LogLine>> {
        self.rx.recv().await
    }

    /// Drain the stream keeping only the last `max` lines.
    pub async fn collect_tail(mut self, max: usize) -> Result<Vec<String>> {
        let mut tail = VecDeque::with_capacity(max);
        while let Some(line) = self.next_line().await {
            let line = line?;
            if tail.len() == max {
                tail.pop_front();
            }
            if max > 0 {
                tail.push_back(line.text);
            }
        }
        Ok(tail.into())
    }
}

/// Port for the container runtime (the `docker` CLI in production).
pub trait ContainerRuntime: Send + Sync + 'static {
    /// List running containers with their published ports.
    ///
    /// Any failure to reach the runtime is `ContainerSourceUnavailable`.
    fn list_running(&self) -> impl std::future::Future<Output = Result<Vec<ContainerInfo>>> + Send;

    /// Stop a container by id or name.
    fn stop(&self, id: &str) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Restart a container by id or name.
    fn restart(&self, id: &str) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Start streaming a container's logs.
    fn logs(
        &self,
        id: &str,
        options: LogOptions,
    ) -> impl std::future::Future<Output = Result<LogStream>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_lines_yields_in_order() {
        let mut stream = LogStream::from_lines(["one", "two"]);
        assert_eq!(stream.next_line().await.unwrap().unwrap().text, "one");
        assert_eq!(stream.next_line().await.unwrap().unwrap().text, "two");
        assert!(stream.next_line().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_tail_keeps_last_lines() {
        let stream = LogStream::from_lines((1..=10).map(|i| format!("line {}", i)));
        let tail = stream.collect_tail(3).await.unwrap();
        assert_eq!(tail, vec!["line 8", "line 9", "line 10"]);
    }

    #[tokio::test]
    async fn test_lines_are_visible_before_producer_finishes() {
        let (tx, mut stream) = LogStream::channel(1);
        tx.send(Ok(LogLine {
            source: LogSource::Stderr,
            text: "booting".into(),
        }))
        .await
        .unwrap();

        // Producer is still alive, yet the first line is already readable
        let first = stream.next_line().await.unwrap().unwrap();
        assert_eq!(first.source, LogSource::Stderr);
        drop(tx);
        assert!(stream.next_line().await.is_none());
    }
}

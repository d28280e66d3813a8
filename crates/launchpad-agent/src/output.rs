use std::{collections::VecDeque, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::Mutex,
};

pub const DEFAULT_TAIL_LIMIT: usize = 200;
pub const MAX_TAIL_LIMIT: usize = 2000;

#[derive(Debug)]
struct LogBuffer {
    next_seq: u64,
    max_lines: usize,
    lines: VecDeque<(u64, String)>,
}

impl LogBuffer {
    fn new(max_lines: usize) -> Self {
        Self {
            next_seq: 1,
            max_lines: max_lines.max(1),
            lines: VecDeque::new(),
        }
    }

    fn push_line(&mut self, line: String) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.lines.push_back((seq, line));
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    fn tail_after(&self, cursor: u64, limit: usize) -> LogTail {
        // Cursor 0 means "most recent lines", for the first poll of a page.
        if cursor == 0 {
            let start = self.lines.len().saturating_sub(limit);
            let mut out = LogTail::default();
            for (seq, line) in self.lines.iter().skip(start) {
                out.lines.push(line.clone());
                out.cursor = *seq;
            }
            return out;
        }

        let mut out = LogTail {
            lines: Vec::new(),
            cursor,
        };
        for (seq, line) in self.lines.iter() {
            if *seq > cursor {
                out.lines.push(line.clone());
                out.cursor = *seq;
                if out.lines.len() >= limit {
                    break;
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LogTail {
    pub lines: Vec<String>,
    pub cursor: u64,
}

/// Console sink: every line goes to tracing and to the recent-lines ring.
#[derive(Debug, Clone)]
pub struct LogSink {
    buffer: Arc<Mutex<LogBuffer>>,
}

impl LogSink {
    pub fn new(max_lines: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(LogBuffer::new(max_lines))),
        }
    }

    /// A line printed by the game server.
    pub async fn server_line(&self, line: String) {
        tracing::info!(target: "launchpad::server", "{line}");
        self.buffer.lock().await.push_line(line);
    }

    /// A lifecycle note from the launcher itself.
    pub async fn note(&self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::info!("{msg}");
        self.buffer.lock().await.push_line(format!("[launchpad] {msg}"));
    }

    pub async fn tail(&self, cursor: u64, limit: usize) -> LogTail {
        let limit = match limit {
            0 => DEFAULT_TAIL_LIMIT,
            n => n.min(MAX_TAIL_LIMIT),
        };
        self.buffer.lock().await.tail_after(cursor, limit)
    }
}

/// Reads both output streams line by line until both are closed.
///
/// This task is the only reader of the streams, so lines from stdout and stderr
/// are merged at line granularity into a single console feed.
pub async fn drain_output<O, E>(stdout: O, stderr: E, sink: LogSink)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out = BufReader::new(stdout).lines();
    let mut err = BufReader::new(stderr).lines();
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        tokio::select! {
            line = out.next_line(), if out_open => match line {
                Ok(Some(line)) => sink.server_line(line).await,
                Ok(None) => out_open = false,
                Err(e) => {
                    tracing::debug!(error = %e, "stdout read failed");
                    out_open = false;
                }
            },
            line = err.next_line(), if err_open => match line {
                Ok(Some(line)) => sink.server_line(line).await,
                Ok(None) => err_open = false,
                Err(e) => {
                    tracing::debug!(error = %e, "stderr read failed");
                    err_open = false;
                }
            },
        }
    }
}

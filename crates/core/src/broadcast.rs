//! Per-run fan-out of log events to live subscribers.
//!
//! Every `log` event is appended to the run's durable transcript before it
//! is delivered, and attachment replays the transcript tail under the same
//! per-run lock. A subscriber attaching between two lines therefore sees a
//! consistent prefix: nothing live that is not yet on disk, and nothing on
//! disk that it will not also receive.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;
use wf_protocol::{ClientMessage, LogEvent, REPLAY_COMPLETE_LINE};

/// Outgoing half of a subscriber connection. Receives serialized frames.
pub type SubscriberTx = mpsc::UnboundedSender<String>;

struct Subscriber {
    id: Uuid,
    tx: SubscriberTx,
}

#[derive(Default)]
struct RunChannel {
    subscribers: Vec<Subscriber>,
    /// Append handle of the durable transcript, opened on first use.
    transcript: Option<File>,
}

/// Fans out run events and keeps the durable per-run transcript.
pub struct LogBroadcaster {
    logs_dir: PathBuf,
    replay_lines: usize,
    channels: Mutex<HashMap<String, Arc<Mutex<RunChannel>>>>,
}

impl LogBroadcaster {
    pub fn new(logs_dir: impl Into<PathBuf>, replay_lines: usize) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            replay_lines,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Durable transcript of one run.
    pub fn log_path(&self, run_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{run_id}.log"))
    }

    async fn channel(&self, run_id: &str) -> Arc<Mutex<RunChannel>> {
        let mut channels = self.channels.lock().await;
        Arc::clone(channels.entry(run_id.to_string()).or_default())
    }

    /// Deliver `event` to every subscriber of `run_id`.
    ///
    /// `log` events are appended to the transcript first. Subscribers whose
    /// connection is closed are dropped; the rest still receive the event.
    pub async fn broadcast(&self, run_id: &str, event: &LogEvent) {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(run_id, error = %e, "failed to serialize event");
                return;
            }
        };

        let channel = self.channel(run_id).await;
        let mut channel = channel.lock().await;

        if let LogEvent::Log { line } = event {
            self.append(run_id, &mut channel, line).await;
        }

        let before = channel.subscribers.len();
        channel
            .subscribers
            .retain(|sub| sub.tx.send(frame.clone()).is_ok());
        let dropped = before - channel.subscribers.len();
        if dropped > 0 {
            debug!(run_id, dropped, "dropped closed subscribers");
        }
    }

    async fn append(&self, run_id: &str, channel: &mut RunChannel, line: &str) {
        let path = self.log_path(run_id);
        if channel.transcript.is_none() {
            match open_append(&path).await {
                Ok(file) => channel.transcript = Some(file),
                Err(e) => {
                    warn!(run_id, path = %path.display(), error = %e, "failed to open run log");
                    return;
                }
            }
        }
        if let Some(file) = channel.transcript.as_mut() {
            if let Err(e) = write_line(file, line).await {
                warn!(run_id, path = %path.display(), error = %e, "failed to append to run log");
                // Reopen on the next line.
                channel.transcript = None;
            }
        }
    }

    /// Attach a subscriber.
    ///
    /// Replays up to the configured number of transcript lines, then the
    /// replay-complete sentinel, then live events. Returns the subscriber id
    /// used by [`LogBroadcaster::detach`].
    pub async fn attach(&self, run_id: &str, tx: SubscriberTx) -> Uuid {
        let id = Uuid::new_v4();
        let channel = self.channel(run_id).await;
        let mut channel = channel.lock().await;

        let history = self.read_tail(run_id).await;
        let mut open = true;
        for line in history
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(REPLAY_COMPLETE_LINE))
        {
            let frame = match LogEvent::log(line).to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(run_id, error = %e, "failed to serialize replay line");
                    continue;
                }
            };
            if tx.send(frame).is_err() {
                open = false;
                break;
            }
        }

        if open {
            channel.subscribers.push(Subscriber { id, tx });
            debug!(run_id, %id, replayed = history.len(), "subscriber attached");
        }
        id
    }

    /// Convenience wrapper creating the channel for a new subscriber.
    pub async fn subscribe(&self, run_id: &str) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.attach(run_id, tx).await;
        (id, rx)
    }

    /// Remove a subscriber. A no-op if it is already gone.
    pub async fn detach(&self, run_id: &str, subscriber: Uuid) {
        let channel = {
            let channels = self.channels.lock().await;
            channels.get(run_id).cloned()
        };
        if let Some(channel) = channel {
            channel
                .lock()
                .await
                .subscribers
                .retain(|sub| sub.id != subscriber);
        }
    }

    /// Handle a text frame received from a subscriber.
    ///
    /// `ping` is answered with `pong` to that subscriber only. Run state is
    /// never touched.
    pub async fn handle_client_message(&self, run_id: &str, subscriber: Uuid, text: &str) {
        match ClientMessage::parse(text) {
            ClientMessage::Ping => {
                let frame = match LogEvent::Pong.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(run_id, error = %e, "failed to serialize pong");
                        return;
                    }
                };
                let channel = self.channel(run_id).await;
                let mut channel = channel.lock().await;
                channel
                    .subscribers
                    .retain(|sub| sub.id != subscriber || sub.tx.send(frame.clone()).is_ok());
            }
            ClientMessage::Other(text) => {
                debug!(run_id, %subscriber, message = %text, "ignoring client message");
            }
        }
    }

    /// Number of live subscribers of `run_id`.
    pub async fn subscriber_count(&self, run_id: &str) -> usize {
        let channel = {
            let channels = self.channels.lock().await;
            channels.get(run_id).cloned()
        };
        match channel {
            Some(channel) => channel.lock().await.subscribers.len(),
            None => 0,
        }
    }

    /// Discard the durable transcript, for a run starting afresh.
    pub async fn reset(&self, run_id: &str) {
        let channel = self.channel(run_id).await;
        let mut channel = channel.lock().await;
        channel.transcript = None;
        let path = self.log_path(run_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(run_id, "run log reset"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(run_id, path = %path.display(), error = %e, "failed to reset run log"),
        }
    }

    /// Drop all subscribers of an evicted run. The transcript stays on disk.
    pub async fn forget(&self, run_id: &str) {
        self.channels.lock().await.remove(run_id);
    }

    async fn read_tail(&self, run_id: &str) -> Vec<String> {
        if self.replay_lines == 0 {
            return Vec::new();
        }
        let path = self.log_path(run_id);
        match read_last_lines(&path, self.replay_lines).await {
            Ok(lines) => lines,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(run_id, path = %path.display(), error = %e, "failed to read run log for replay");
                Vec::new()
            }
        }
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

/// Write one line and flush it, so replay readers see it immediately.
async fn write_line(file: &mut File, line: &str) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    file.write_all(&bytes).await?;
    file.flush().await
}

async fn read_last_lines(path: &Path, limit: usize) -> std::io::Result<Vec<String>> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut lines: VecDeque<String> = VecDeque::with_capacity(limit);
    let mut buf = Vec::new();
    while reader.read_until(b'\n', &mut buf).await? > 0 {
        if lines.len() == limit {
            lines.pop_front();
        }
        lines.push_back(
            String::from_utf8_lossy(&buf)
                .trim_end_matches(['\n', '\r'])
                .to_string(),
        );
        buf.clear();
    }
    Ok(lines.into())
}

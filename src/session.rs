//! Ordered conversation log on top of the socket connection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::protocol::{AnalysisKind, ChatMessage, DiscussionRequest};
use crate::socket::{ListenerHandle, SocketManager};
use crate::transcript::{self, TranscriptError};

/// Consumer of the inbound frame stream: keeps an insertion-ordered log of
/// parsed messages, issues outbound requests, and drives transcript export.
///
/// The session registers itself with the socket manager on construction and
/// unregisters when dropped.
pub struct ChatSession {
    socket: SocketManager,
    state: Arc<SessionState>,
    listener: ListenerHandle,
}

#[derive(Default)]
struct SessionState {
    messages: Mutex<Vec<ChatMessage>>,
    awaiting_reply: AtomicBool,
}

impl SessionState {
    fn ingest(&self, raw: &str) {
        match serde_json::from_str::<ChatMessage>(raw) {
            Ok(message) => {
                self.messages.lock().unwrap().push(message);
                self.awaiting_reply.store(false, Ordering::SeqCst);
            }
            Err(e) => tracing::error!("dropping unparseable frame: {}", e),
        }
    }
}

impl ChatSession {
    pub fn attach(socket: SocketManager) -> Self {
        let state = Arc::new(SessionState::default());
        let listener = {
            let state = Arc::clone(&state);
            socket.add_listener(move |raw| state.ingest(raw))
        };
        Self {
            socket,
            state,
            listener,
        }
    }

    /// Send a discussion topic. The user message is appended to the log
    /// before the backend echoes anything. An empty topic or a closed
    /// connection makes this a logged no-op.
    pub fn submit(
        &self,
        topic: &str,
        kind: AnalysisKind,
        video_id: Option<&str>,
        channel_id: Option<&str>,
    ) {
        if topic.trim().is_empty() {
            tracing::warn!("ignoring submit with empty topic");
            return;
        }
        if !self.socket.is_connected() {
            tracing::warn!("socket not open, topic not submitted");
            return;
        }

        let request = DiscussionRequest::new(topic, kind, video_id, channel_id);
        self.state
            .messages
            .lock()
            .unwrap()
            .push(ChatMessage::user(topic));
        self.state.awaiting_reply.store(true, Ordering::SeqCst);
        self.socket.send(&request);
    }

    /// Feed one raw frame into the log. Normally invoked through the
    /// registered listener; exposed so the session can be driven without a
    /// live socket. A frame that fails to parse is logged and dropped.
    pub fn ingest_frame(&self, raw: &str) {
        self.state.ingest(raw);
    }

    /// Empty the log. Always permitted.
    pub fn clear(&self) {
        self.state.messages.lock().unwrap().clear();
    }

    /// Snapshot of the log in insertion order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.messages.lock().unwrap().clone()
    }

    /// True between a submit and the next ingested frame. There is no
    /// timeout: a backend that never replies leaves this set until another
    /// frame arrives.
    pub fn is_awaiting_reply(&self) -> bool {
        self.state.awaiting_reply.load(Ordering::SeqCst)
    }

    /// Render the summary messages into PDF bytes.
    pub fn export_transcript(&self) -> Result<Vec<u8>, TranscriptError> {
        transcript::render_summary_pdf(&self.messages())
    }

    /// Render the summary messages and write them under the fixed
    /// conversation-record filename in `dir`.
    pub fn save_transcript(&self, dir: &Path) -> Result<PathBuf, TranscriptError> {
        let bytes = self.export_transcript()?;
        let path = dir.join(transcript::TRANSCRIPT_FILENAME);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.socket.remove_listener(self.listener);
    }
}

use serde::{Deserialize, Serialize};

/// Sender tag for locally appended user messages.
pub const USER_SENDER: &str = "User";

/// Sender tag the backend uses for its closing summary. Some backend
/// builds append the model name in parentheses, e.g. `GPTまとめ(gpt-4o)`.
pub const SUMMARY_SENDER: &str = "GPTまとめ";

/// One unit of conversation as it travels over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: USER_SENDER.to_string(),
            text: text.into(),
        }
    }

    /// Whether this message belongs to the exported summary transcript.
    pub fn is_summary(&self) -> bool {
        self.sender == SUMMARY_SENDER
            || (self.sender.starts_with(SUMMARY_SENDER)
                && self.sender[SUMMARY_SENDER.len()..].starts_with('('))
    }
}

/// Which optional identifier accompanies a discussion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisKind {
    /// Plain discussion topic, no identifier.
    #[default]
    None,
    /// Per-video comment analysis, carries a video ID.
    CommentAnalysis,
    /// Per-channel popularity analysis, carries a channel ID.
    ChannelSubscriberPopularChannel,
}

impl AnalysisKind {
    /// Wire identifier, or `None` for a plain topic (the field is omitted
    /// from the frame entirely).
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            AnalysisKind::None => None,
            AnalysisKind::CommentAnalysis => Some("comment_analysis"),
            AnalysisKind::ChannelSubscriberPopularChannel => {
                Some("channel_subscriber_popular_channel")
            }
        }
    }
}

/// Outbound request frame. Optional fields are dropped from the JSON when
/// unset; the backend treats a frame with no `analysisType` as a plain
/// discussion topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionRequest {
    pub topic: String,
    #[serde(rename = "analysisType", skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<String>,
    #[serde(rename = "videoId", skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(rename = "channelId", skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

impl DiscussionRequest {
    /// Build a request with the identifier fields populated only for the
    /// matching analysis kind.
    pub fn new(
        topic: impl Into<String>,
        kind: AnalysisKind,
        video_id: Option<&str>,
        channel_id: Option<&str>,
    ) -> Self {
        Self {
            topic: topic.into(),
            analysis_type: kind.wire_name().map(str::to_string),
            video_id: match kind {
                AnalysisKind::CommentAnalysis => video_id.map(str::to_string),
                _ => None,
            },
            channel_id: match kind {
                AnalysisKind::ChannelSubscriberPopularChannel => channel_id.map(str::to_string),
                _ => None,
            },
        }
    }
}

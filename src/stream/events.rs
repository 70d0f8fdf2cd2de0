use serde::{Deserialize, Serialize};

use crate::providers::types::{Metrics, Role, StopReason, TokenUsage};

/// One element of a streaming invocation.
///
/// Serialized externally tagged, so each event is a single-key JSON object,
/// e.g. `{"contentBlockDelta":{"contentBlockIndex":0,"delta":{"text":"Hi"}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamEvent {
    MessageStart {
        role: Role,
    },
    #[serde(rename_all = "camelCase")]
    ContentBlockStart {
        content_block_index: u32,
        start: BlockStart,
    },
    #[serde(rename_all = "camelCase")]
    ContentBlockDelta {
        content_block_index: u32,
        delta: Delta,
    },
    #[serde(rename_all = "camelCase")]
    ContentBlockStop {
        content_block_index: u32,
    },
    #[serde(rename_all = "camelCase")]
    MessageStop {
        stop_reason: StopReason,
    },
    /// Terminal event carrying token usage. Exactly one per stream.
    Metadata {
        usage: TokenUsage,
        #[serde(default)]
        metrics: Metrics,
    },
}

impl StreamEvent {
    pub fn text_delta(index: u32, text: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            content_block_index: index,
            delta: Delta::Text(text.into()),
        }
    }

    /// Token usage if this is the terminal metadata event.
    pub fn usage(&self) -> Option<&TokenUsage> {
        match self {
            Self::Metadata { usage, .. } => Some(usage),
            _ => None,
        }
    }

    pub fn is_metadata(&self) -> bool {
        matches!(self, Self::Metadata { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockStart {
    #[serde(rename_all = "camelCase")]
    ToolUse { tool_use_id: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Delta {
    Text(String),
    /// Partial JSON of a tool call's input.
    ToolUse { input: String },
    ReasoningContent { text: String },
}

//! Shared conversation history: message types and the bounded-window
//! reduction used when handing context to strategy evaluators.

/// Which side of the conversation authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorRole {
    System,
    User,
    Participant,
}

/// One entry in the shared history. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: AuthorRole,
    /// Set only for participant messages.
    pub author_name: Option<String>,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: AuthorRole::System,
            author_name: None,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: AuthorRole::User,
            author_name: None,
            content: content.into(),
        }
    }

    pub fn participant(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: AuthorRole::Participant,
            author_name: Some(name.into()),
            content: content.into(),
        }
    }

    /// Display label: the author name for participant messages, the role
    /// otherwise.
    pub fn label(&self) -> &str {
        match (&self.author_name, self.role) {
            (Some(name), _) => name,
            (None, AuthorRole::System) => "system",
            (None, _) => "user",
        }
    }
}

/// Recent-window view over a history slice.
///
/// Pure and deterministic: the canonical history is never touched, the same
/// input always yields the same slice, and reducing an already-reduced slice
/// is a no-op.
#[derive(Clone, Copy, Debug)]
pub struct TruncationReducer {
    window: usize,
}

impl TruncationReducer {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn reduce<'a>(&self, history: &'a [ChatMessage]) -> &'a [ChatMessage] {
        let start = history.len().saturating_sub(self.window);
        &history[start..]
    }
}

impl Default for TruncationReducer {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Renders messages as `label: content` lines for evaluator prompts.
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.label(), message.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders only the author labels, one per line. Used by selection
/// evaluators that decide on speaker order alone.
pub fn render_authors(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| message.label().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

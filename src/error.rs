use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("selection evaluator chose an unknown participant: {name:?}")]
    UnknownParticipant { name: String },
    #[error("selection evaluator repeated the previous speaker: {name}")]
    RepeatedSpeaker { name: String },
    #[error("selection evaluator call failed: {0}")]
    Evaluator(#[source] ProviderError),
}

#[derive(Debug, Error)]
pub enum TerminationError {
    #[error("termination evaluator call failed: {0}")]
    Evaluator(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("completion stream failed for {participant}: {source}")]
    Stream {
        participant: String,
        source: ProviderError,
    },
    #[error("chat stream ended without turn completion")]
    MissingTurnCompletion,
    #[error("chat configuration error: {0}")]
    Config(String),
}

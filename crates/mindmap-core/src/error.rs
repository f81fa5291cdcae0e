use thiserror::Error;

#[derive(Debug, Error)]
pub enum MindmapError {
    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("graph not found: {0}")]
    GraphNotFound(String),

    #[error("no active conversation graph")]
    NoActiveGraph,

    #[error("parent not found: block '{block}' references missing parent '{parent}'")]
    ParentNotFound { parent: String, block: String },

    #[error("root already set to '{root}', cannot add another root '{block}'")]
    RootAlreadySet { root: String, block: String },

    #[error("cannot delete root block: {0}")]
    CannotDeleteRoot(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("malformed structured reply: {0}")]
    MalformedReply(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl MindmapError {
    /// Errors raised by an external capability (model backends) rather than
    /// by the graph itself.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::Generation(_) | Self::Embedding(_) | Self::MalformedReply(_)
        )
    }
}

pub type MindmapResult<T> = Result<T, MindmapError>;

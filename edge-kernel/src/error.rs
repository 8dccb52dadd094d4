use crate::ports::StoreError;

/// Erreurs remontées par le noyau edge (lien série, règles, persistance)
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("not connected to device")]
    NotConnected,
    #[error("already connected to {0}")]
    AlreadyConnected(String),
    #[error("invalid rule identifier: {0}")]
    InvalidIdentifier(String),
    #[error("rule not found: {0}")]
    NotFound(String),
    #[error("transport failure ({context}): {source}")]
    TransportFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
}

impl EdgeError {
    pub fn transport(context: impl Into<String>, source: std::io::Error) -> Self {
        EdgeError::TransportFailure {
            context: context.into(),
            source,
        }
    }
}

pub type EdgeResult<T> = Result<T, EdgeError>;

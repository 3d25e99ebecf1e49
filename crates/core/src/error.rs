use crate::broker::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("Not connected to TWS")]
    NotConnected,

    #[error("{0}")]
    Broker(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<BrokerError> for CoreError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::NotConnected => CoreError::NotConnected,
            other => CoreError::Broker(other.to_string()),
        }
    }
}

use chaindesk_core::broker::BrokerError;

/// Errors raised by the TWS socket client.
#[derive(Debug, thiserror::Error)]
pub enum TwsError {
    /// Failed to open the TCP connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server did not complete the API handshake.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// A frame or field did not match the expected layout.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A request got no answer in time.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The connection has been closed.
    #[error("Connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TwsError> for BrokerError {
    fn from(err: TwsError) -> Self {
        match err {
            TwsError::Closed => BrokerError::NotConnected,
            TwsError::Timeout(what) => BrokerError::Timeout(what.to_string()),
            TwsError::Protocol(msg) | TwsError::Handshake(msg) => BrokerError::Protocol(msg),
            TwsError::Connection(msg) => BrokerError::Io(msg),
            TwsError::Io(e) => BrokerError::Io(e.to_string()),
        }
    }
}

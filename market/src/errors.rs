use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketError {
    /// Timeout, abort, or network fault below the HTTP layer. Retriable.
    #[error("transport fault: {0}")]
    Transport(#[source] reqwest::Error),

    /// The marketplace answered with a non-success status. 5xx responses
    /// are retried until attempts are exhausted; 4xx surface immediately.
    #[error("marketplace returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("could not decode marketplace response: {0}")]
    Decode(String),

    /// The client itself could not be constructed.
    #[error("market client setup failed: {0}")]
    Setup(#[source] reqwest::Error),
}

impl MarketError {
    pub fn is_retriable(&self) -> bool {
        match self {
            MarketError::Transport(_) => true,
            MarketError::Api { status, .. } => *status >= 500,
            MarketError::Decode(_) | MarketError::Setup(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            MarketError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_class_is_retriable_client_class_is_not() {
        let server = MarketError::Api {
            status: 503,
            body: "unavailable".into(),
        };
        let client = MarketError::Api {
            status: 422,
            body: "bad bid".into(),
        };
        let decode = MarketError::Decode("missing field".into());

        assert!(server.is_retriable());
        assert!(!client.is_retriable());
        assert!(!decode.is_retriable());
    }
}

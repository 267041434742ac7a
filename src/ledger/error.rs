use crate::ledger::state::ConnectionState;
use crate::ledger::types::ActionKind;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("Request failed with status {status}: {body}")]
    Transport { status: u16, body: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid table endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Unsupported table filter: {0}")]
    UnsupportedFilter(String),
    #[error("Failed to {operation} remote table: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: Box<LedgerError>,
    },
    #[error("Ledger not ready: {0}")]
    NotReady(ConnectionState),
    #[error("Ledger closed: {0}")]
    Closed(&'static str),
    #[error("Action {0} panicked: {1}")]
    ActionPanicked(ActionKind, String),
    #[error("Timed out waiting for result")]
    Timeout,
}

impl LedgerError {
    pub(crate) fn remote(operation: &'static str, source: LedgerError) -> Self {
        LedgerError::Remote {
            operation,
            source: Box::new(source),
        }
    }

    /// True when the error means the ledger shut down, as opposed to the
    /// remote store failing.
    pub fn is_closed(&self) -> bool {
        matches!(self, LedgerError::Closed(_))
    }

    /// HTTP status of the underlying transport failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            LedgerError::Transport { status, .. } => Some(*status),
            LedgerError::Http(e) => e.status().map(|s| s.as_u16()),
            LedgerError::Remote { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Text suitable for showing to the player.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::Closed(_) => "The group ledger was closed.".to_string(),
            LedgerError::InvalidEndpoint(_) => {
                "The group ledger URL is invalid. Check your access token.".to_string()
            }
            _ => "Failed to connect to the group ledger. Check your access token.".to_string(),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(value: serde_json::Error) -> Self {
        LedgerError::Decode(value.to_string())
    }
}

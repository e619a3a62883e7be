//! Hosting error taxonomy.
//!
//! Every failure is either transient (worth retrying) or permanent (retrying
//! cannot help; an operator has to look). [`HostingError::is_transient`] is
//! the single classifier used by the retry policy and by callers deciding
//! whether to hold a deployment.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostingError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unknown server: {0}")]
    NotFound(String),

    #[error("hosting API rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("hosting API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl HostingError {
    /// Classify an unsuccessful HTTP status.
    pub fn from_status(status: u16, server_id: &str, body: String) -> Self {
        match status {
            404 => HostingError::NotFound(server_id.to_string()),
            401 | 403 => HostingError::Unauthorized { status },
            _ => HostingError::Status {
                status,
                message: truncate(body),
            },
        }
    }

    /// Timeouts, transport failures, 5xx and 429 are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            HostingError::Timeout(_) | HostingError::Transport(_) => true,
            HostingError::Status { status, .. } => *status >= 500 || *status == 429,
            HostingError::NotFound(_)
            | HostingError::Unauthorized { .. }
            | HostingError::Decode(_) => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl From<reqwest::Error> for HostingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HostingError::Timeout(e.to_string())
        } else if e.is_decode() {
            HostingError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            HostingError::from_status(status.as_u16(), "", e.to_string())
        } else {
            HostingError::Transport(e.to_string())
        }
    }
}

fn truncate(mut body: String) -> String {
    const MAX: usize = 256;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

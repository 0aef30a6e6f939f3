use thiserror::Error;

use crate::domain::{DriverId, JobId};

#[derive(Debug, Error)]
pub enum MondegoError {
    #[error("unknown driver={0}")]
    UnknownDriver(DriverId),

    #[error("invalid driver={driver}: {reason}")]
    InvalidDriver { driver: DriverId, reason: String },

    #[error("job={job} is not in flight on driver={driver}")]
    NotInFlight { driver: DriverId, job: JobId },

    #[error("runner not found for driver={0}")]
    RunnerNotFound(DriverId),

    #[error("duplicate runner for driver={0}")]
    DuplicateRunner(DriverId),

    #[error("job failed: {0}")]
    Job(String),

    #[error("paced queue has stopped")]
    PacerStopped,

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("upstream: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("config: {0}")]
    Config(String),

    #[error("persistence: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl MondegoError {
    pub fn job(reason: impl Into<String>) -> Self {
        Self::Job(reason.into())
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of one outbound call to an upstream system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("undecodable body: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Server-side or transport faults, the classes that should slow callers down.
    pub fn is_upstream_fault(&self) -> bool {
        match self {
            UpstreamError::Transport(_) => true,
            UpstreamError::Status(code) => *code >= 500,
            UpstreamError::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::transport(UpstreamError::Transport("reset".into()), true)]
    #[case::server(UpstreamError::Status(503), true)]
    #[case::server_edge(UpstreamError::Status(500), true)]
    #[case::client(UpstreamError::Status(404), false)]
    #[case::redirect(UpstreamError::Status(302), false)]
    #[case::decode(UpstreamError::Decode("eof".into()), false)]
    fn upstream_fault_classes(#[case] err: UpstreamError, #[case] fault: bool) {
        assert_eq!(err.is_upstream_fault(), fault);
    }

    #[test]
    fn messages_name_the_driver() {
        let err = MondegoError::RunnerNotFound(DriverId::new("gitlab"));
        assert!(err.to_string().contains("gitlab"));
    }
}

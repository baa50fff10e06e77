use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to bind {robot} on {addr}: {source}")]
    Bind {
        robot: String,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown robot: {0}")]
    UnknownRobot(String),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl SchedulerError {
    /// Maps the error onto the failure taxonomy used in log fields.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Bind { .. } => ErrorKind::BindFailure,
            SchedulerError::UnknownRobot(_) => ErrorKind::UnknownRobotReference,
            SchedulerError::Link(LinkError::Stopped { .. }) => ErrorKind::ConnectionLost,
            SchedulerError::Link(LinkError::Io { .. }) => ErrorKind::SendFailure,
            SchedulerError::Config(_)
            | SchedulerError::Io(_)
            | SchedulerError::Json(_)
            | SchedulerError::Toml(_)
            | SchedulerError::Watch(_) => ErrorKind::ConfigLoadFailure,
        }
    }
}

/// Failures surfaced by a robot link to its callers.
///
/// Transient socket errors are retried inside the link's own poll loops and
/// never reach this type.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link to {robot} was stopped")]
    Stopped { robot: String },

    #[error("Liveness probe on {robot} ({peer:?}) failed: {source}")]
    Io {
        robot: String,
        peer: Option<SocketAddr>,
        #[source]
        source: std::io::Error,
    },
}

/// Classifies a failure for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BindFailure,
    ConnectionLost,
    SendFailure,
    RecvFailure,
    ConfigLoadFailure,
    UnknownRobotReference,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::BindFailure => write!(f, "BindFailure"),
            ErrorKind::ConnectionLost => write!(f, "ConnectionLost"),
            ErrorKind::SendFailure => write!(f, "SendFailure"),
            ErrorKind::RecvFailure => write!(f, "RecvFailure"),
            ErrorKind::ConfigLoadFailure => write!(f, "ConfigLoadFailure"),
            ErrorKind::UnknownRobotReference => write!(f, "UnknownRobotReference"),
        }
    }
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_robot_maps_to_reference_kind() {
        let err = SchedulerError::UnknownRobot("UR_XRD".into());
        assert_eq!(err.kind(), ErrorKind::UnknownRobotReference);
        assert_eq!(err.to_string(), "Unknown robot: UR_XRD");
    }

    #[test]
    fn bind_failure_message_names_robot_and_addr() {
        let err = SchedulerError::Bind {
            robot: "UR_NMR".into(),
            addr: "10.0.0.2:7992".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(err.kind(), ErrorKind::BindFailure);
        assert!(err.to_string().starts_with("Failed to bind UR_NMR on 10.0.0.2:7992"));
    }

    #[test]
    fn stopped_link_is_connection_lost() {
        let err: SchedulerError = LinkError::Stopped {
            robot: "UR_SFC".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
        assert_eq!(ErrorKind::ConnectionLost.to_string(), "ConnectionLost");
    }
}

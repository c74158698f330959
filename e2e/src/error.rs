use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("timed out after {waited:?} trying to acquire a {resource_type} from boskos")]
    AcquireTimeout { resource_type: String, waited: Duration },

    #[error("invalid resource type {0:?}")]
    InvalidResourceType(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("boskos returned status {status}: {body}")]
    Boskos { status: u16, body: String },

    #[error("cloud resource manager: {0}")]
    Cloud(String),

    #[error("command {command:?} failed: {status}. Output: {output}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    #[error("{op}. Output: {output}, error: {source}")]
    Remote {
        op: String,
        output: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to parse size {input:?} into int")]
    Parse { input: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Errors a test run cannot meaningfully continue after. Callers are
    /// expected to abort rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::AcquireTimeout { .. } | Error::Cloud(_))
    }

    /// Raw output of a failed remote command, if this error carries one.
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::Command { output, .. } | Error::Remote { output, .. } => Some(output),
            _ => None,
        }
    }

    pub(crate) fn remote(op: impl Into<String>, source: Error) -> Self {
        let output = source.output().unwrap_or_default().to_string();
        Error::Remote {
            op: op.into(),
            output,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_cloud_errors_are_fatal() {
        let timeout = Error::AcquireTimeout {
            resource_type: "gce-project".to_string(),
            waited: Duration::from_secs(1800),
        };
        assert!(timeout.is_fatal());
        assert!(Error::Cloud("no project".to_string()).is_fatal());

        assert!(!Error::Cancelled.is_fatal());
        assert!(!Error::Boskos { status: 500, body: String::new() }.is_fatal());
    }

    #[test]
    fn remote_error_keeps_command_output() {
        let cmd = Error::Command {
            command: "ssh host -- cat /tmp/x".to_string(),
            status: "exit status: 1".to_string(),
            output: "cat: /tmp/x: No such file or directory".to_string(),
        };
        let err = Error::remote("failed to read test file /tmp/x", cmd);

        assert_eq!(err.output(), Some("cat: /tmp/x: No such file or directory"));
        let msg = err.to_string();
        assert!(msg.starts_with("failed to read test file /tmp/x. Output: cat:"));
    }
}

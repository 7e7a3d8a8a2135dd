use crate::domain::error::PipelineError::{
    ConfigurationError, FilesystemError, ProtocolError, RemoteError, TransportError,
};
use std::error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum PipelineError {
    /// A required setting is missing or invalid. Raised before any I/O.
    ConfigurationError { setting: String, reason: String },
    TransportError { target: String, reason: String },
    ProtocolError { target: String, reason: String },
    /// The remote answered but refused; `message` is the server's own text.
    RemoteError { target: String, message: String },
    FilesystemError { path: String, reason: String },
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigurationError { setting, reason } => {
                write!(f, "Invalid configuration for {setting}: {reason}.")
            }
            TransportError { target, reason } => {
                write!(f, "Request to {target} failed: {reason}.")
            }
            ProtocolError { target, reason } => {
                write!(f, "Malformed response from {target}: {reason}.")
            }
            RemoteError { target, message } => {
                write!(f, "Server response with an error from {target}: '{message}'.")
            }
            FilesystemError { path, reason } => write!(f, "File {path} failed: {reason}."),
        }
    }
}

impl error::Error for PipelineError {}

impl PipelineError {
    /// Short stable label, logged as a field next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigurationError { .. } => "configuration",
            TransportError { .. } => "transport",
            ProtocolError { .. } => "protocol",
            RemoteError { .. } => "remote",
            FilesystemError { .. } => "filesystem",
        }
    }

    pub fn transport(target: impl Into<String>, err: &dyn error::Error) -> PipelineError {
        TransportError {
            target: target.into(),
            reason: error_chain(err),
        }
    }

    pub fn filesystem(path: impl Display, err: &dyn error::Error) -> PipelineError {
        FilesystemError {
            path: path.to_string(),
            reason: error_chain(err),
        }
    }
}

/// Joins an error with all of its sources, `reqwest` hides the useful part
/// ("connection refused") a couple of levels down.
pub fn error_chain(err: &dyn error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !chain.contains(&cause_text) {
            chain.push_str(": ");
            chain.push_str(&cause_text);
        }
        source = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug)]
    struct Wrapper(io::Error);

    impl Display for Wrapper {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "error sending request")
        }
    }

    impl error::Error for Wrapper {
        fn source(&self) -> Option<&(dyn error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = Wrapper(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        assert_eq!(error_chain(&err), "error sending request: connection refused");
    }

    #[test]
    fn remote_error_display_carries_message_verbatim() {
        let err = RemoteError {
            target: "http://x/api".to_string(),
            message: "bad uid".to_string(),
        };
        assert!(err.to_string().contains("'bad uid'"));
        assert_eq!(err.kind(), "remote");
    }

    #[test]
    fn kinds_are_distinct() {
        let errors = [
            ConfigurationError {
                setting: "uid".into(),
                reason: "missing".into(),
            },
            TransportError {
                target: "t".into(),
                reason: "r".into(),
            },
            ProtocolError {
                target: "t".into(),
                reason: "r".into(),
            },
            RemoteError {
                target: "t".into(),
                message: "m".into(),
            },
            FilesystemError {
                path: "p".into(),
                reason: "r".into(),
            },
        ];
        let mut kinds: Vec<&str> = errors.iter().map(PipelineError::kind).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }
}

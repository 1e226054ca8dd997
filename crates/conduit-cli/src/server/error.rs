use std::io;

use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

/// Reasons the listener stops before or while serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listener configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot listen on {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server stopped unexpectedly: {0}")]
    Runtime(#[source] io::Error),
}

impl ServerError {
    pub fn invalid_config(err: &anyhow::Error) -> Self {
        Self::InvalidConfig(format!("{err:#}"))
    }

    pub fn bind_error(address: &str, source: io::Error) -> Self {
        Self::BindError {
            address: address.to_owned(),
            source,
        }
    }

    /// Stable identifier printed next to the exit error.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "E001",
            Self::BindError { .. } => "E002",
            Self::Runtime(_) => "E003",
        }
    }

    /// Hint for the operator, when one applies.
    pub fn suggestion(&self) -> Option<&'static str> {
        let Self::BindError { source, .. } = self else {
            return matches!(self, Self::InvalidConfig(_))
                .then_some("run with --help to list every flag and its environment variable");
        };

        Some(match source.kind() {
            io::ErrorKind::AddrInUse => "another process holds the port; stop it or pass --port",
            io::ErrorKind::PermissionDenied => "the port needs privileges; use one above 1023",
            io::ErrorKind::AddrNotAvailable => "the host is not an address of this machine",
            _ => "check the host, port and firewall settings",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_differ_per_variant() {
        let codes = [
            ServerError::InvalidConfig("port".to_owned()).error_code(),
            ServerError::bind_error("127.0.0.1:80", io::Error::other("x")).error_code(),
            ServerError::Runtime(io::Error::other("x")).error_code(),
        ];
        assert_ne!(codes[0], codes[1]);
        assert_ne!(codes[1], codes[2]);
    }

    #[test]
    fn busy_port_suggests_another() {
        let error = ServerError::bind_error(
            "127.0.0.1:3000",
            io::Error::from(io::ErrorKind::AddrInUse),
        );
        assert!(error.suggestion().is_some_and(|s| s.contains("--port")));
        assert!(error.to_string().starts_with("cannot listen on 127.0.0.1:3000"));
        assert_eq!(ServerError::Runtime(io::Error::other("x")).suggestion(), None);
    }
}

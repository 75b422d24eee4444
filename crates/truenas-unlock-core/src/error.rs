use std::path::PathBuf;
use thiserror::Error;

/// Result alias for core operations.
pub type UnlockResult<T> = Result<T, UnlockError>;

#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("[TU1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[TU1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[TU1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[TU1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[TU1101] no configuration file found; searched {searched:?}")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("[TU1200] failed to read secret from {path}: {source}")]
    SecretRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[TU1201] secret at {0} is empty")]
    EmptySecret(PathBuf),

    #[error("[TU2000] appliance unreachable: {0}")]
    Transport(String),

    #[error("[TU2001] appliance rejected credentials (HTTP {status})")]
    Auth { status: u16 },

    #[error("[TU2002] appliance api error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("[TU2003] unexpected appliance response: {0}")]
    Decode(String),
}

impl UnlockError {
    pub fn code(&self) -> &'static str {
        match self {
            UnlockError::Io(_) => "TU1000",
            UnlockError::Toml(_) => "TU1001",
            UnlockError::Yaml(_) => "TU1002",
            UnlockError::InvalidConfig(_) => "TU1100",
            UnlockError::ConfigNotFound { .. } => "TU1101",
            UnlockError::SecretRead { .. } => "TU1200",
            UnlockError::EmptySecret(_) => "TU1201",
            UnlockError::Transport(_) => "TU2000",
            UnlockError::Auth { .. } => "TU2001",
            UnlockError::Api { .. } => "TU2002",
            UnlockError::Decode(_) => "TU2003",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_code_prefix() {
        let err = UnlockError::Auth { status: 401 };
        assert_eq!(err.code(), "TU2001");
        assert!(err.to_string().starts_with("[TU2001]"));
    }
}

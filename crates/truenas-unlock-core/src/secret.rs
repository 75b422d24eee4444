//! Secret resolution shared by the API key and per-dataset passphrases.

use crate::error::{UnlockError, UnlockResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// How a configured secret string is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SecretsMode {
    /// Read the value as a file when it names an existing regular file,
    /// otherwise use it verbatim.
    #[default]
    Auto,
    /// Always treat the value as a file path.
    Files,
    /// Always treat the value as the secret itself.
    Inline,
}

/// Resolve `value` into secret material according to `mode`.
pub fn resolve_secret(value: &str, mode: SecretsMode) -> UnlockResult<Zeroizing<String>> {
    match mode {
        SecretsMode::Inline => Ok(Zeroizing::new(value.to_string())),
        SecretsMode::Files => read_secret_file(&expand_home(value)),
        SecretsMode::Auto => {
            let path = expand_home(value);
            if path.is_file() {
                read_secret_file(&path)
            } else {
                Ok(Zeroizing::new(value.to_string()))
            }
        }
    }
}

/// Read a secret file, stripping surrounding whitespace such as the trailing
/// newline most editors leave behind.
pub fn read_secret_file(path: &Path) -> UnlockResult<Zeroizing<String>> {
    let raw = Zeroizing::new(fs::read_to_string(path).map_err(|source| {
        UnlockError::SecretRead {
            path: path.to_path_buf(),
            source,
        }
    })?);
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UnlockError::EmptySecret(path.to_path_buf()));
    }
    Ok(Zeroizing::new(trimmed.to_string()))
}

/// Expand a leading `~/` against `$HOME`. Other values pass through untouched.
pub fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    if value == "~" {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn inline_mode_never_touches_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key");
        fs::write(&path, "from-file").unwrap();

        let value = path.to_string_lossy();
        let secret = resolve_secret(&value, SecretsMode::Inline).unwrap();
        assert_eq!(secret.as_str(), value);
    }

    #[test]
    fn auto_mode_reads_existing_file_and_trims() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key");
        fs::write(&path, "  hunter2\n").unwrap();

        let secret = resolve_secret(&path.to_string_lossy(), SecretsMode::Auto).unwrap();
        assert_eq!(secret.as_str(), "hunter2");
    }

    #[test]
    fn auto_mode_falls_back_to_literal() {
        let secret = resolve_secret("my-literal-passphrase", SecretsMode::Auto).unwrap();
        assert_eq!(secret.as_str(), "my-literal-passphrase");
    }

    #[test]
    fn auto_mode_treats_directory_as_literal() {
        let dir = tempdir().unwrap();
        let value = dir.path().to_string_lossy().into_owned();
        let secret = resolve_secret(&value, SecretsMode::Auto).unwrap();
        assert_eq!(secret.as_str(), value);
    }

    #[test]
    fn files_mode_reports_missing_file() {
        let err = resolve_secret("/nonexistent/path", SecretsMode::Files).unwrap_err();
        match err {
            UnlockError::SecretRead { path, source } => {
                assert_eq!(path, PathBuf::from("/nonexistent/path"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn files_mode_rejects_blank_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blank");
        fs::write(&path, "\n\n").unwrap();

        let err = resolve_secret(&path.to_string_lossy(), SecretsMode::Files).unwrap_err();
        assert!(matches!(err, UnlockError::EmptySecret(_)));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/etc/key"), PathBuf::from("/etc/key"));
        assert_eq!(expand_home("relative/key"), PathBuf::from("relative/key"));
    }

    #[test]
    fn expand_home_resolves_tilde_prefix() {
        if let Some(home) = env::var_os("HOME") {
            assert_eq!(
                expand_home("~/.secrets/key"),
                PathBuf::from(home).join(".secrets/key")
            );
        }
    }
}

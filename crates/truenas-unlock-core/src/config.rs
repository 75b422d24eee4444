use crate::error::{UnlockError, UnlockResult};
use crate::secret::{expand_home, resolve_secret, SecretsMode};
use log::warn;
use schemars::JsonSchema;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Config filenames searched in the working directory, in order.
pub const LOCAL_CONFIG_NAMES: &[&str] = &["config.yaml", "config.yml"];

/// Directory under `$HOME` holding the per-user config.
pub const USER_CONFIG_DIR: &str = ".config/truenas-unlock";

/// Printed when no configuration can be found.
pub const EXAMPLE_CONFIG: &str = "\
host: 192.168.1.214:443
api_key: ~/.secrets/truenas-api-key  # file path or literal value
skip_cert_verify: true
# secrets: auto  # auto (default), files, or inline

datasets:
  tank/syncthing: ~/.secrets/syncthing-key
  tank/photos: my-literal-passphrase
";

/// One managed dataset and the secret that unlocks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub path: String,
    /// Key file path or literal passphrase, interpreted per [`SecretsMode`].
    pub secret: String,
}

impl DatasetEntry {
    pub fn new(path: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            secret: secret.into(),
        }
    }

    /// First path segment, e.g. `tank` for `tank/data/photos`.
    pub fn pool(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }

    /// Everything after the pool, e.g. `data/photos` for `tank/data/photos`.
    pub fn name(&self) -> &str {
        self.path
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or_default()
    }

    pub fn passphrase(&self, mode: SecretsMode) -> UnlockResult<Zeroizing<String>> {
        resolve_secret(&self.secret, mode)
    }
}

/// Ordered dataset → secret mapping. Names are unique and the declaration
/// order is kept so unlock attempts run in a reproducible sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    entries: Vec<DatasetEntry>,
}

impl DesiredState {
    pub fn new(entries: Vec<DatasetEntry>) -> UnlockResult<Self> {
        let mut desired = Self {
            entries: Vec::with_capacity(entries.len()),
        };
        for entry in entries {
            desired.push(entry).map_err(UnlockError::InvalidConfig)?;
        }
        Ok(desired)
    }

    fn push(&mut self, entry: DatasetEntry) -> Result<(), String> {
        if self.contains(&entry.path) {
            return Err(format!("dataset `{}` is declared more than once", entry.path));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|entry| entry.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for DesiredState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.path, &entry.secret)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DesiredState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DesiredVisitor;

        impl<'de> Visitor<'de> for DesiredVisitor {
            type Value = DesiredState;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of dataset path to secret")
            }

            // `datasets:` with nothing underneath.
            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(DesiredState::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut desired = DesiredState {
                    entries: Vec::with_capacity(map.size_hint().unwrap_or(0)),
                };
                while let Some((path, secret)) = map.next_entry::<String, String>()? {
                    desired
                        .push(DatasetEntry { path, secret })
                        .map_err(de::Error::custom)?;
                }
                Ok(desired)
            }
        }

        deserializer.deserialize_map(DesiredVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Timeouts {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,

    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

fn default_connect_secs() -> u64 {
    3
}

fn default_request_secs() -> u64 {
    30
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            request_secs: default_request_secs(),
        }
    }
}

/// Everything a run needs, loaded once at startup and shared by reference.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UnlockConfig {
    /// Appliance address, `host[:port]`, optionally with an `http(s)://` scheme.
    pub host: String,

    /// API key file path or literal value.
    #[serde(default)]
    pub api_key: String,

    /// Older spelling of `api_key`, used only when `api_key` is unset.
    #[serde(default, skip_serializing)]
    pub api_key_file: Option<String>,

    #[serde(default)]
    pub skip_cert_verify: bool,

    #[serde(default)]
    pub secrets: SecretsMode,

    /// Dataset path to key file path (or literal passphrase).
    #[serde(default)]
    #[schemars(with = "std::collections::BTreeMap<String, String>")]
    pub datasets: DesiredState,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(skip)]
    pub path: PathBuf,
}

impl UnlockConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> UnlockResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        if cfg.api_key.trim().is_empty() {
            if let Some(legacy) = cfg.api_key_file.take() {
                cfg.api_key = legacy;
            }
        }
        cfg.validate()?;

        if cfg.datasets.is_empty() {
            warn!("{} declares no datasets; nothing will be unlocked", path.display());
        }

        Ok(cfg)
    }

    /// Load the first config found in the standard search locations.
    pub fn discover() -> UnlockResult<Self> {
        match find_config() {
            Some(path) => Self::load(path),
            None => Err(UnlockError::ConfigNotFound {
                searched: config_search_paths(),
            }),
        }
    }

    fn validate(&self) -> UnlockResult<()> {
        if self.host.trim().is_empty() {
            return Err(UnlockError::InvalidConfig("host must not be empty".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(UnlockError::InvalidConfig("api_key must be set".into()));
        }
        if self.timeouts.connect_secs == 0 || self.timeouts.request_secs == 0 {
            return Err(UnlockError::InvalidConfig(
                "timeouts must be at least one second".into(),
            ));
        }
        for entry in self.datasets.iter() {
            let path = entry.path.as_str();
            if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
                return Err(UnlockError::InvalidConfig(format!(
                    "invalid dataset path `{path}`; expected pool/dataset"
                )));
            }
            if entry.secret.trim().is_empty() {
                return Err(UnlockError::InvalidConfig(format!(
                    "dataset `{path}` has an empty secret"
                )));
            }
        }
        Ok(())
    }

    pub fn api_key(&self) -> UnlockResult<Zeroizing<String>> {
        resolve_secret(&self.api_key, self.secrets)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_secs)
    }
}

/// Candidate config locations: the working directory first, then `$HOME`.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = LOCAL_CONFIG_NAMES.iter().map(PathBuf::from).collect();
    if env::var_os("HOME").is_some() {
        let dir = expand_home(&format!("~/{USER_CONFIG_DIR}"));
        paths.extend(LOCAL_CONFIG_NAMES.iter().map(|name| dir.join(name)));
    }
    paths
}

pub fn find_config() -> Option<PathBuf> {
    config_search_paths().into_iter().find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dataset_entry_splits_pool_and_name() {
        let entry = DatasetEntry::new("tank/photos", "/tmp/key");
        assert_eq!(entry.pool(), "tank");
        assert_eq!(entry.name(), "photos");

        let nested = DatasetEntry::new("tank/data/photos", "/tmp/key");
        assert_eq!(nested.pool(), "tank");
        assert_eq!(nested.name(), "data/photos");
    }

    #[test]
    fn desired_state_rejects_duplicates() {
        let err = DesiredState::new(vec![
            DatasetEntry::new("tank/a", "/k/a"),
            DatasetEntry::new("tank/a", "/k/b"),
        ])
        .unwrap_err();
        assert!(matches!(err, UnlockError::InvalidConfig(_)));
    }

    #[test]
    fn load_yaml_preserves_dataset_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "host: nas.local\napi_key: literal-key\ndatasets:\n  tank/zeta: z\n  tank/alpha: a\n  tank/mid: m\n",
        )
        .unwrap();

        let cfg = UnlockConfig::load(&path).unwrap();
        let names: Vec<&str> = cfg.datasets.iter().map(|entry| entry.path.as_str()).collect();
        assert_eq!(names, vec!["tank/zeta", "tank/alpha", "tank/mid"]);
        assert_eq!(cfg.path, path);
        assert!(!cfg.skip_cert_verify);
        assert_eq!(cfg.secrets, SecretsMode::Auto);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn load_accepts_legacy_api_key_file() {
        let dir = tempdir().unwrap();
        let key_file = dir.path().join("api-key");
        let ds_key = dir.path().join("ds-key");
        fs::write(&key_file, "test-api-key").unwrap();
        fs::write(&ds_key, "test-passphrase").unwrap();

        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            format!(
                "host: 192.168.1.1:443\napi_key_file: {}\nskip_cert_verify: true\ndatasets:\n  tank/photos: {}\n  tank/docs: {}\n",
                key_file.display(),
                ds_key.display(),
                ds_key.display()
            ),
        )
        .unwrap();

        let cfg = UnlockConfig::load(&path).unwrap();
        assert_eq!(cfg.host, "192.168.1.1:443");
        assert!(cfg.skip_cert_verify);
        assert_eq!(cfg.api_key().unwrap().as_str(), "test-api-key");
        assert_eq!(cfg.datasets.len(), 2);

        let first = cfg.datasets.iter().next().unwrap();
        assert_eq!(first.path, "tank/photos");
        assert_eq!(
            first.passphrase(cfg.secrets).unwrap().as_str(),
            "test-passphrase"
        );
    }

    #[test]
    fn api_key_wins_over_legacy_api_key_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "host: nas\napi_key: new\napi_key_file: old\nsecrets: inline\n",
        )
        .unwrap();

        let cfg = UnlockConfig::load(&path).unwrap();
        assert_eq!(cfg.api_key().unwrap().as_str(), "new");
    }

    #[test]
    fn load_requires_some_api_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "host: nas\ndatasets:\n  tank/a: one\n").unwrap();

        let err = UnlockConfig::load(&path).unwrap_err();
        assert!(matches!(err, UnlockError::InvalidConfig(_)));
    }

    #[test]
    fn files_mode_surfaces_missing_api_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "host: 192.168.1.1:443\napi_key: /nonexistent/path\nsecrets: files\ndatasets:\n  tank/photos: /tmp/key\n",
        )
        .unwrap();

        let cfg = UnlockConfig::load(&path).unwrap();
        assert!(matches!(
            cfg.api_key().unwrap_err(),
            UnlockError::SecretRead { .. }
        ));
    }

    #[test]
    fn load_rejects_duplicate_datasets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "host: nas\napi_key: k\ndatasets:\n  tank/a: one\n  tank/a: two\n",
        )
        .unwrap();

        assert!(UnlockConfig::load(&path).is_err());
    }

    #[test]
    fn load_rejects_malformed_dataset_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "host: nas\napi_key: k\ndatasets:\n  /tank/a: one\n").unwrap();

        let err = UnlockConfig::load(&path).unwrap_err();
        assert!(matches!(err, UnlockError::InvalidConfig(_)));
    }

    #[test]
    fn load_allows_missing_datasets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "host: nas\napi_key: k\n").unwrap();

        let cfg = UnlockConfig::load(&path).unwrap();
        assert!(cfg.datasets.is_empty());
    }

    #[test]
    fn load_allows_blank_datasets_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "host: nas\napi_key: k\ndatasets:\n").unwrap();

        let cfg = UnlockConfig::load(&path).unwrap();
        assert!(cfg.datasets.is_empty());
    }

    #[test]
    fn load_toml_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truenas-unlock.toml");
        fs::write(
            &path,
            "host = \"nas.local\"\napi_key = \"k\"\nsecrets = \"inline\"\n\n[datasets]\n\"tank/a\" = \"pass\"\n\n[timeouts]\nconnect_secs = 5\n",
        )
        .unwrap();

        let cfg = UnlockConfig::load(&path).unwrap();
        assert_eq!(cfg.secrets, SecretsMode::Inline);
        assert!(cfg.datasets.contains("tank/a"));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn search_paths_start_in_working_directory() {
        let paths = config_search_paths();
        assert_eq!(paths[0], PathBuf::from("config.yaml"));
        assert_eq!(paths[1], PathBuf::from("config.yml"));
    }
}

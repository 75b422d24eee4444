//! `ApplianceProvider` backed by the TrueNAS `pool/dataset` endpoints.

use crate::client::{ApiClient, ClientSettings};
use crate::parse::parse_dataset_list;
use log::debug;
use serde::Serialize;
use truenas_unlock_core::config::UnlockConfig;
use truenas_unlock_core::error::UnlockResult;
use truenas_unlock_core::provider::{ApplianceProvider, ObservedState};
use zeroize::Zeroizing;

const LIST_PATH: &str = "/pool/dataset";
const UNLOCK_PATH: &str = "/pool/dataset/unlock";

#[derive(Serialize)]
struct UnlockRequest<'a> {
    id: &'a str,
    options: UnlockOptions<'a>,
}

#[derive(Serialize)]
struct UnlockOptions<'a> {
    key_file: bool,
    recursive: bool,
    force: bool,
    toggle_attachments: bool,
    datasets: [DatasetPassphrase<'a>; 1],
}

#[derive(Serialize)]
struct DatasetPassphrase<'a> {
    name: &'a str,
    passphrase: &'a str,
}

impl<'a> UnlockRequest<'a> {
    fn single(dataset: &'a str, passphrase: &'a str) -> Self {
        Self {
            id: dataset,
            options: UnlockOptions {
                key_file: false,
                recursive: false,
                force: true,
                toggle_attachments: true,
                datasets: [DatasetPassphrase {
                    name: dataset,
                    passphrase,
                }],
            },
        }
    }
}

/// Talks to one TrueNAS appliance with a bearer API key.
pub struct TrueNasProvider {
    client: ApiClient,
}

impl TrueNasProvider {
    /// Build a provider from the run configuration, resolving the API key once.
    pub fn from_config(config: &UnlockConfig) -> UnlockResult<Self> {
        let token = config.api_key()?;
        let settings = ClientSettings {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            skip_cert_verify: config.skip_cert_verify,
        };
        Self::connect(&config.host, token, &settings)
    }

    fn connect(
        host: &str,
        token: Zeroizing<String>,
        settings: &ClientSettings,
    ) -> UnlockResult<Self> {
        let client = ApiClient::new(host, token, settings)?;
        if settings.skip_cert_verify {
            debug!("certificate verification disabled for {}", client.base_url());
        }
        Ok(Self { client })
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }
}

impl ApplianceProvider for TrueNasProvider {
    fn list_datasets(&self) -> UnlockResult<ObservedState> {
        let body = self.client.get(LIST_PATH)?;
        parse_dataset_list(&body)
    }

    fn unlock_dataset(&self, dataset: &str, passphrase: &str) -> UnlockResult<()> {
        let request = UnlockRequest::single(dataset, passphrase);
        let body = self.client.post_json(UNLOCK_PATH, &request)?;
        debug!("unlock {dataset} accepted: {}", body.trim());
        Ok(())
    }
}

//! RouterOS address-list integration.
//!
//! Lets an operator block an address at the network boundary by adding it to
//! a pre-configured firewall address list, via the RouterOS REST API. These
//! are plain request/response calls with a static retry policy; nothing here
//! touches the ingestion core.

use crate::config::MikrotikConfig;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum MikrotikError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("router rejected request: {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("address {0} not found in list")]
    AddressNotFound(String),
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    #[serde(rename = ".id")]
    id: String,
}

pub struct MikrotikClient {
    config: MikrotikConfig,
    client: reqwest::Client,
}

impl MikrotikClient {
    pub fn new(config: MikrotikConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("https://{}/rest{}", self.config.address, path)
    }

    async fn send(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, MikrotikError> {
        let mut attempt = 1;
        loop {
            let request = build()
                .basic_auth(&self.config.username, Some(&self.config.password));
            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(MikrotikError::Rejected { status, body });
                }
                Err(e) if attempt < RETRY_ATTEMPTS => {
                    warn!(attempt, error = %e, "RouterOS request failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Add an address to the configured firewall address list.
    pub async fn add_to_list(&self, address: &str, comment: &str) -> Result<(), MikrotikError> {
        debug!(address, list = %self.config.list, "Adding address to list");
        self.send(|| {
            self.client
                .put(self.url("/ip/firewall/address-list"))
                .json(&json!({
                    "list": self.config.list,
                    "address": address,
                    "comment": comment,
                    "disabled": "no",
                }))
        })
        .await?;
        Ok(())
    }

    /// Remove an address from the configured firewall address list.
    pub async fn remove_from_list(&self, address: &str) -> Result<(), MikrotikError> {
        let id = self.find_entry_id(address).await?;
        debug!(address, id, "Removing address from list");
        self.send(|| {
            self.client
                .delete(self.url(&format!("/ip/firewall/address-list/{}", id)))
        })
        .await?;
        Ok(())
    }

    async fn find_entry_id(&self, address: &str) -> Result<String, MikrotikError> {
        let response = self
            .send(|| {
                self.client
                    .get(self.url("/ip/firewall/address-list"))
                    .query(&[("list", self.config.list.as_str()), ("address", address)])
            })
            .await?;
        let entries: Vec<ListEntry> = response.json().await?;
        entries
            .into_iter()
            .next_back()
            .map(|entry| entry.id)
            .ok_or_else(|| MikrotikError::AddressNotFound(address.to_string()))
    }
}

//! HTTP client for the Nessie REST API (v2).

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use url::Url;

use dropsweep_kernel::adapters::nessie::{history_filter, ContentResponse, LogResponse};
use dropsweep_kernel::config::CleanupConfig;
use dropsweep_kernel::history::{
    Catalog, CatalogError, CommitId, CommitPage, TableContent, TableIdentifier,
};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Read-only Nessie client implementing the kernel's [`Catalog`] seam.
///
/// Requests run on the shared tokio runtime and are awaited in place, so
/// the pipeline itself stays synchronous.
pub struct NessieClient {
    client: Client,
    endpoint: Url,
    reference: String,
    token: String,
    page_size: Option<u32>,
    max_retries: u32,
    runtime: Handle,
}

impl NessieClient {
    /// Creates a client from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed or the
    /// endpoint cannot carry path segments.
    pub fn new(config: &CleanupConfig, runtime: Handle) -> Result<Self> {
        if config.catalog_endpoint.cannot_be_a_base() {
            anyhow::bail!(
                "catalog endpoint {} cannot be used as a base URL",
                config.catalog_endpoint
            );
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.catalog_endpoint.clone(),
            reference: config.reference.clone(),
            token: config.token.clone(),
            page_size: config.page_size,
            max_retries: config.max_retries,
            runtime,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn history_url(&self) -> Url {
        self.url(&["trees", &self.reference, "history"])
    }

    fn contents_url(&self, commit: &CommitId, table: &TableIdentifier) -> Url {
        let detached = format!("@{commit}");
        self.url(&["trees", &detached, "contents", table.as_str()])
    }

    /// GET `url` with bounded retries on transient failures.
    ///
    /// Returns `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<Option<T>, CatalogError> {
        let mut attempt = 0;
        loop {
            match self.get_once(url.clone(), query).await {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        url = %url,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "retrying catalog request in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<Option<T>, CatalogError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(status = %status, url = %response.url(), "catalog response");

        match status {
            s if s.is_success() => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| CatalogError::Decode(e.to_string())),
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CatalogError::Unauthorized {
                status: status.as_u16(),
            }),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(CatalogError::UnexpectedStatus {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

impl Catalog for NessieClient {
    fn commit_page(
        &self,
        since: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<CommitPage, CatalogError> {
        let mut query = vec![("filter", history_filter(since))];
        if let Some(page_size) = self.page_size {
            query.push(("max-records", page_size.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("page-token", token.to_string()));
        }

        let url = self.history_url();
        let response: Option<LogResponse> =
            self.runtime.block_on(self.get_json(url, &query))?;

        match response {
            Some(log) => log.into_page(),
            None => Err(CatalogError::UnexpectedStatus {
                status: StatusCode::NOT_FOUND.as_u16(),
                body: format!("reference `{}` not found", self.reference),
            }),
        }
    }

    fn table_content(
        &self,
        commit: &CommitId,
        table: &TableIdentifier,
    ) -> Result<Option<TableContent>, CatalogError> {
        let url = self.contents_url(commit, table);
        let response: Option<ContentResponse> = self.runtime.block_on(self.get_json(url, &[]))?;

        response.map(ContentResponse::into_table_content).transpose()
    }
}

//! HTTP spreadsheet gateway client
//!
//! Talks to a small sheet gateway in front of the event spreadsheet:
//!
//! - `GET  {base}/worksheets/{sheet}/find?value={talk_id}` → `{"row": N}` or 404
//! - `PUT  {base}/worksheets/{sheet}/cells/{A1}` with `{"value": "N"}`
//!
//! The upstream quota is roughly one request per second, so every call goes
//! through a rate limiter.

use crate::sink::{RowHandle, SheetColumns, SinkError, TallyColumn, TallySink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tfb_common::config::SheetConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;

const USER_AGENT: &str = concat!("tfb-ag/", env!("CARGO_PKG_VERSION"));

/// Hands out request slots at least `min_interval` apart
struct RateLimiter {
    next_slot: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            next_slot: Mutex::new(None),
            min_interval,
        }
    }

    /// Sleep until the next free slot, then book the one after it
    async fn wait(&self) {
        let mut next = self.next_slot.lock().await;
        if let Some(slot) = *next {
            if slot > Instant::now() {
                tracing::debug!(delay = ?(slot - Instant::now()), "Sheet gateway rate limit");
                tokio::time::sleep_until(slot).await;
            }
        }
        *next = Some(Instant::now() + self.min_interval);
    }
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    row: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CellUpdate {
    value: String,
}

/// Sheet gateway client for one worksheet
pub struct SheetClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    base_url: reqwest::Url,
    worksheet: String,
    token: Option<String>,
    columns: SheetColumns,
}

impl SheetClient {
    pub fn new(config: &SheetConfig, worksheet: &str) -> crate::Result<Self> {
        let base = config
            .base_url
            .as_deref()
            .ok_or_else(|| SinkError::Unavailable("no sheet base_url configured".to_string()))?;
        let base_url = reqwest::Url::parse(base)
            .map_err(|e| SinkError::Unavailable(format!("invalid base_url '{}': {}", base, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SinkError::Unavailable(format!(
                "base_url '{}' cannot hold a path",
                base
            ))
            .into());
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SinkError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(config.min_request_interval())),
            base_url,
            worksheet: worksheet.to_string(),
            token: config.token.clone(),
            columns: SheetColumns {
                positive: config.positive_column.clone(),
                negative: config.negative_column.clone(),
                neutral: config.neutral_column.clone(),
            },
        })
    }

    pub fn worksheet(&self) -> &str {
        &self.worksheet
    }

    /// `{base}/worksheets/{sheet}/{tail...}` with every segment escaped
    fn endpoint(&self, tail: &[&str]) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("worksheets")
                .push(&self.worksheet)
                .extend(tail);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn error_for(response: reqwest::Response) -> SinkError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SinkError::Api(status, body)
    }
}

#[async_trait]
impl TallySink for SheetClient {
    async fn find_row(&self, talk_id: &str) -> Result<Option<RowHandle>, SinkError> {
        self.rate_limiter.wait().await;

        let url = self.endpoint(&["find"]);
        tracing::debug!(talk_id = %talk_id, url = %url, "Looking up talk row");

        let response = self
            .authorize(self.http_client.get(url).query(&[("value", talk_id)]))
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::error_for(response).await);
        }

        let found: FindResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Parse(e.to_string()))?;
        Ok(found.row.map(RowHandle))
    }

    async fn update_cell(
        &self,
        row: RowHandle,
        column: TallyColumn,
        value: u64,
    ) -> Result<(), SinkError> {
        self.rate_limiter.wait().await;

        let cell = self.columns.cell(row, column);
        let url = self.endpoint(&["cells", cell.as_str()]);
        tracing::debug!(cell = %cell, value, "Updating sheet cell");

        let body = CellUpdate {
            value: value.to_string(),
        };
        let response = self
            .authorize(self.http_client.put(url).json(&body))
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(())
    }
}

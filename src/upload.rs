use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::blocking::{multipart, Client};
use serde::Deserialize;

use crate::config::UploadConfig;
use crate::error::{PipelineError, Result};
use crate::scorer::ScoredRecord;

/// Holds the bearer token the collaborator's token endpoint issued, and
/// when it needs refreshing. A token is refreshed proactively once it is
/// within `token_refresh_margin_secs` of expiry rather than reactively on
/// a 401, since the upload contract is fire-and-forget per batch.
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

pub struct Uploader {
    client: Client,
    config: UploadConfig,
    token: Mutex<Option<CachedToken>>,
}

impl Uploader {
    pub fn new(config: UploadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Uploader { client, config, token: Mutex::new(None) })
    }

    /// Serializes `rows` to an in-memory CSV and POSTs it as a multipart
    /// upload with a bearer token, as spec.md's external collaborator
    /// interface requires. `UploadFailed` on any non-2xx response or
    /// transport error; the caller decides whether to retry the batch.
    pub fn upload_suspicious(&self, rows: &[ScoredRecord], batch_label: &str) -> Result<()> {
        let token = self.ensure_token()?;
        let csv_bytes = serialize_rows(rows)?;

        let part = multipart::Part::bytes(csv_bytes)
            .file_name(format!("{}.csv", batch_label))
            .mime_str("text/csv")
            .map_err(|e| PipelineError::UploadFailed(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/api/suspicious-flows", self.config.base_url))
            .bearer_auth(token)
            .multipart(form)
            .send()?;

        if !response.status().is_success() {
            return Err(PipelineError::UploadFailed(format!(
                "collaborator responded {}", response.status()
            )));
        }
        Ok(())
    }

    fn ensure_token(&self) -> Result<String> {
        let mut guard = self.token.lock().expect("token mutex poisoned");
        if let Some(cached) = guard.as_ref() {
            let margin = Duration::from_secs(self.config.token_refresh_margin_secs);
            if cached.expires_at > Instant::now() + margin {
                return Ok(cached.value.clone());
            }
        }

        let password = std::env::var(&self.config.password_env).map_err(|_| {
            PipelineError::UploadFailed(format!(
                "password env var {} not set", self.config.password_env
            ))
        })?;

        let response = self
            .client
            .post(format!("{}/api/token", self.config.base_url))
            .form(&[("username", self.config.username.as_str()), ("password", password.as_str())])
            .send()?;

        if !response.status().is_success() {
            return Err(PipelineError::UploadFailed(format!(
                "token exchange responded {}", response.status()
            )));
        }

        let token_response: TokenResponse = response.json()?;
        let expires_at = Instant::now() + Duration::from_secs(token_response.expires_in);
        let value = token_response.access_token.clone();
        *guard = Some(CachedToken { value: value.clone(), expires_at });
        Ok(value)
    }
}

fn serialize_rows(rows: &[ScoredRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(ScoredRecord::header())?;
    for row in rows {
        writer.write_record(row.to_row())?;
    }
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| PipelineError::UploadFailed(e.to_string()))
}

//! Upstream data sources behind the paid query routes.
//!
//! Each source is a black box: given a target it returns JSON or a
//! [`SourceError`]. The report route fans out to every source and keeps
//! whatever succeeded.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::SourceSpec;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream unreachable: {0}")]
    Transport(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("invalid upstream payload: {0}")]
    Payload(String),
}

pub type SourceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, SourceError>> + Send + 'a>>;

/// A data provider for one query type.
pub trait QuerySource: Send + Sync {
    /// Provider name recorded in the ledger as the payment's data source.
    fn provider(&self) -> &str;

    fn fetch<'a>(&'a self, target: &'a str) -> SourceFuture<'a>;
}

/// Maximum upstream response body size (1 MB).
const MAX_RESPONSE_BODY_SIZE: usize = 1024 * 1024;

/// GETs `url?target=<target>` and expects a JSON body.
pub struct HttpJsonSource {
    provider: String,
    url: reqwest::Url,
    http: reqwest::Client,
    max_body: usize,
}

impl HttpJsonSource {
    pub fn new(provider: &str, url: &str, http: reqwest::Client) -> Result<Self, SourceError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| SourceError::Transport(format!("invalid source URL '{url}': {e}")))?;
        Ok(Self {
            provider: provider.to_string(),
            url,
            http,
            max_body: MAX_RESPONSE_BODY_SIZE,
        })
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }
}

/// Read at most `limit` bytes of body, aborting as soon as the limit is passed.
async fn read_limited(mut resp: reqwest::Response, limit: usize) -> Result<Vec<u8>, SourceError> {
    let too_large = || SourceError::Payload(format!("response exceeds {limit} bytes"));

    if let Some(cl) = resp.content_length() {
        if cl > limit as u64 {
            return Err(too_large());
        }
    }

    let mut buf = Vec::with_capacity(
        resp.content_length()
            .map(|cl| cl as usize)
            .unwrap_or(8192)
            .min(limit),
    );
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| SourceError::Transport(e.to_string()))?
    {
        if buf.len() + chunk.len() > limit {
            return Err(too_large());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

impl QuerySource for HttpJsonSource {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn fetch<'a>(&'a self, target: &'a str) -> SourceFuture<'a> {
        Box::pin(async move {
            let mut url = self.url.clone();
            url.query_pairs_mut().append_pair("target", target);

            let resp = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| SourceError::Transport(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(SourceError::Status(resp.status().as_u16()));
            }
            let body = read_limited(resp, self.max_body).await?;
            serde_json::from_slice(&body).map_err(|e| SourceError::Payload(e.to_string()))
        })
    }
}

/// Result of fanning a target out to every source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub results: BTreeMap<String, serde_json::Value>,
    /// Per-source failures, keyed by query type.
    pub errors: BTreeMap<String, String>,
}

/// Query type → source.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn QuerySource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, query_type: &str, source: Arc<dyn QuerySource>) -> Self {
        self.sources.insert(query_type.to_string(), source);
        self
    }

    /// Build HTTP sources from `QUERY_SOURCES` entries.
    pub fn from_specs(specs: &[SourceSpec], http: &reqwest::Client) -> Result<Self, SourceError> {
        let mut registry = Self::new();
        for spec in specs {
            let source = HttpJsonSource::new(&spec.provider, &spec.url, http.clone())?;
            registry = registry.with_source(&spec.query_type, Arc::new(source));
        }
        Ok(registry)
    }

    pub fn get(&self, query_type: &str) -> Option<&Arc<dyn QuerySource>> {
        self.sources.get(query_type)
    }

    pub fn query_types(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Query every source concurrently. Failures are reported per source.
    pub async fn report(&self, target: &str) -> Report {
        let mut tasks = tokio::task::JoinSet::new();
        for (query_type, source) in &self.sources {
            let query_type = query_type.clone();
            let source = Arc::clone(source);
            let target = target.to_string();
            tasks.spawn(async move {
                let result = source.fetch(&target).await;
                (query_type, result)
            });
        }

        let mut report = Report::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((query_type, Ok(value))) => {
                    report.results.insert(query_type, value);
                }
                Ok((query_type, Err(e))) => {
                    tracing::warn!(query_type = %query_type, error = %e, "source failed in report");
                    report.errors.insert(query_type, e.to_string());
                }
                Err(e) => tracing::error!(error = %e, "source task panicked"),
            }
        }
        report
    }
}

/// Accepts contract addresses, token symbols and similar identifiers.
pub fn validate_target(target: &str) -> Result<(), String> {
    if target.is_empty() {
        return Err("target must not be empty".to_string());
    }
    if target.len() > 128 {
        return Err("target too long".to_string());
    }
    if !target
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err("target contains invalid characters".to_string());
    }
    Ok(())
}

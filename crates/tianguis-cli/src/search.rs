//! HTTP search client for the marketplace listings API.

use std::time::Duration;

use serde::Deserialize;
use tianguis_pipeline::{RawListing, SearchClient, SearchError};

/// Connection settings for the listings API.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
  pub base_url: String,
  /// Per-request timeout in seconds.
  #[serde(default = "default_timeout")]
  pub timeout_secs: u64,
}

fn default_timeout() -> u64 { 30 }

/// One listing as the marketplace API returns it.
#[derive(Debug, Deserialize)]
struct ApiListing {
  #[serde(default)]
  seller:    String,
  #[serde(default)]
  title:     String,
  price:     Option<f64>,
  currency:  Option<String>,
  permalink: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
  results: Vec<ApiListing>,
}

/// Marketplace search over HTTP.
pub struct HttpSearchClient {
  client:   reqwest::Client,
  base_url: String,
}

impl HttpSearchClient {
  pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| SearchError::Fatal(format!("building http client: {e}")))?;

    Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_owned() })
  }
}

impl SearchClient for HttpSearchClient {
  async fn search(&self, query: &str) -> Result<Vec<RawListing>, SearchError> {
    let url = format!("{}/search", self.base_url);
    let response = self
      .client
      .get(&url)
      .query(&[("q", query)])
      .send()
      .await
      .map_err(classify)?;

    let status = response.status();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
      return Err(SearchError::Transient(format!("{url}: {status}")));
    }
    if !status.is_success() {
      return Err(SearchError::Fatal(format!("{url}: {status}")));
    }

    let body: SearchResponse = response.json().await.map_err(classify)?;
    Ok(
      body
        .results
        .into_iter()
        .map(|l| RawListing {
          source:   l.seller,
          title:    l.title,
          price:    l.price,
          currency: l.currency,
          url:      l.permalink,
        })
        .collect(),
    )
  }
}

/// Connection-level failures are worth retrying; everything else is not.
fn classify(err: reqwest::Error) -> SearchError {
  if err.is_timeout() || err.is_connect() {
    SearchError::Transient(err.to_string())
  } else {
    SearchError::Fatal(err.to_string())
  }
}

//! HTTP snapshot source for the realtime backend.
//!
//! Talks to two endpoints:
//! - `GET {base}/api/bus_data?routes=a,b` - vehicle snapshot (JSON array)
//! - `GET {base}/api/route_shapes?routes=a,b` - route shapes keyed by route
//!
//! Connection errors and 429/503 responses are retried with exponential
//! backoff; any other non-success status fails the fetch immediately.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use log::{debug, warn};
use reqwest::{Client, RequestBuilder, StatusCode};

use crate::error::{Result, TrackerError};
use crate::snapshot::{parse_entity_snapshot, parse_overlay_shapes, OverlayShapes, RawEntityUpdate};
use crate::source::SnapshotSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;

const ENTITY_PATH: &str = "/api/bus_data";
const SHAPES_PATH: &str = "/api/route_shapes";

/// [`SnapshotSource`] backed by the realtime HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: Client,
    base_url: String,
}

impl HttpSnapshotSource {
    /// Create a source for the backend at `base_url` (e.g. `http://localhost:5000`).
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TrackerError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, path: &str, scope: &BTreeSet<String>) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .query(&[("routes", routes_param(scope))])
    }

    /// GET `path` for `scope` and return the body, retrying transient
    /// failures.
    async fn get_body(&self, path: &str, scope: &BTreeSet<String>) -> Result<String> {
        let start = Instant::now();
        let mut retries = 0;

        loop {
            match self.request(path, scope).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if is_transient(status) {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(TrackerError::Transport {
                                message: format!("Max retries exceeded ({})", status),
                                status_code: Some(status.as_u16()),
                            });
                        }
                        let delay = backoff(retries);
                        warn!(
                            "[HttpSource] {} for {}, retry {} after {:?}",
                            status, path, retries, delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(TrackerError::Transport {
                            message: format!("HTTP {} from {}", status, path),
                            status_code: Some(status.as_u16()),
                        });
                    }

                    let body = resp.text().await.map_err(|e| TrackerError::Transport {
                        message: format!("Failed to read body: {}", e),
                        status_code: Some(status.as_u16()),
                    })?;
                    debug!(
                        "[HttpSource] {} bytes from {} in {:.2}s",
                        body.len(),
                        path,
                        start.elapsed().as_secs_f64()
                    );
                    return Ok(body);
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(TrackerError::transport(format!("Request error: {}", e)));
                    }
                    let delay = backoff(retries);
                    warn!(
                        "[HttpSource] Error for {}: {}, retry {} after {:?}",
                        path, e, retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_entities(&self, scope: &BTreeSet<String>) -> Result<Vec<RawEntityUpdate>> {
        let body = self.get_body(ENTITY_PATH, scope).await?;
        parse_entity_snapshot(&body)
    }

    async fn fetch_overlay_shapes(&self, scope: &BTreeSet<String>) -> Result<OverlayShapes> {
        let body = self.get_body(SHAPES_PATH, scope).await?;
        parse_overlay_shapes(&body)
    }
}

/// Comma-joined route list for the `routes` query parameter.
fn routes_param(scope: &BTreeSet<String>) -> String {
    scope.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

/// Exponential backoff: 1s, 2s, 4s...
fn backoff(retry: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * (1 << retry.min(5)))
}

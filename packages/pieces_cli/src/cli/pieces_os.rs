use std::ops::RangeInclusive;
use std::time::Duration;

use copilot_stream::Endpoint;
use tracing::{debug, info};

use crate::config::{PIECES_PORT_RANGE, PiecesFileConfig};

const HEALTH_PATH: &str = "/.well-known/health";
const HEALTH_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum PiecesOsError {
    #[error("PiecesOS is not running")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PiecesOsError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}

/// Health check PiecesOS via GET /.well-known/health.
pub async fn health_check(client: &reqwest::Client, endpoint: &Endpoint) -> bool {
    let url = format!("{}{}", endpoint.base_url(), HEALTH_PATH);
    match client.get(&url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!(url = %url, error = %e, "health check failed");
            false
        }
    }
}

/// Find a healthy PiecesOS: the configured port first, then the standard range.
pub async fn discover(config: &PiecesFileConfig) -> Result<Endpoint, PiecesOsError> {
    discover_in(config, PIECES_PORT_RANGE).await
}

pub async fn discover_in(
    config: &PiecesFileConfig,
    range: RangeInclusive<u16>,
) -> Result<Endpoint, PiecesOsError> {
    let client = reqwest::Client::builder()
        .timeout(HEALTH_TIMEOUT)
        .build()
        .map_err(PiecesOsError::from_reqwest)?;

    let configured = Endpoint::new(config.host.clone(), config.port);
    if health_check(&client, &configured).await {
        return Ok(configured);
    }
    if !config.scan_ports {
        return Err(PiecesOsError::Unavailable);
    }

    for port in range.filter(|p| *p != config.port) {
        let candidate = Endpoint::new(config.host.clone(), port);
        if health_check(&client, &candidate).await {
            info!(port, "found PiecesOS on a non-default port");
            return Ok(candidate);
        }
    }
    Err(PiecesOsError::Unavailable)
}

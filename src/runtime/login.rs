//! Credential verification against a registry's v2 API.
//!
//! The daemon's `/auth` endpoint has no bollard binding, so the check talks
//! to the registry directly the way `docker login` does: request `/v2/`, follow
//! the `WWW-Authenticate` challenge, and present the credentials either to
//! the bearer token service or as basic auth.

use std::time::Duration;

use log::{debug, trace};
use reqwest::{header, Client, StatusCode};

use super::RegistryCredentials;
use crate::error::RuntimeError;

const DOCKER_HUB_V2: &str = "https://registry-1.docker.io";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Default, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Challenge {
    Bearer(BearerChallenge),
    Basic,
}

pub struct RegistryLogin {
    client: Client,
}

impl RegistryLogin {
    pub fn new() -> Result<Self, RuntimeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RuntimeError::Connection(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// `Ok` when the registry accepts `credentials`,
    /// [`RuntimeError::Unauthorized`] when it rejects them.
    pub async fn verify(&self, credentials: &RegistryCredentials) -> Result<(), RuntimeError> {
        if credentials.username.is_empty() || credentials.token.is_empty() {
            return Err(RuntimeError::Unauthorized(format!(
                "incomplete credentials for {}",
                credentials.registry_url
            )));
        }

        let base = registry_base(&credentials.registry_url);
        let ping_url = format!("{base}/v2/");
        let response = self
            .client
            .get(&ping_url)
            .send()
            .await
            .map_err(|e| RuntimeError::Connection(format!("{ping_url}: {e}")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {}
            status if status.is_success() => {
                debug!("{} does not require authentication", base);
                return Ok(());
            }
            status => {
                return Err(RuntimeError::Api(format!("{ping_url}: unexpected status {status}")));
            }
        }

        let challenge_header = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RuntimeError::Api(format!("{ping_url}: missing WWW-Authenticate")))?;
        trace!("Challenge from {}: {}", base, challenge_header);

        let challenge = parse_challenge(challenge_header).ok_or_else(|| {
            RuntimeError::Api(format!("{ping_url}: unsupported challenge {challenge_header}"))
        })?;

        let request = match &challenge {
            Challenge::Bearer(bearer) => {
                let mut query = vec![("account", credentials.username.as_str())];
                if let Some(service) = &bearer.service {
                    query.push(("service", service.as_str()));
                }
                self.client.get(&bearer.realm).query(&query)
            }
            Challenge::Basic => self.client.get(&ping_url),
        };
        let response = request
            .basic_auth(&credentials.username, Some(&credentials.token))
            .send()
            .await
            .map_err(|e| RuntimeError::Connection(format!("{base}: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RuntimeError::Unauthorized(
                format!("{} rejected credentials for {}", base, credentials.username),
            )),
            status => Err(RuntimeError::Api(format!("{base}: login returned {status}"))),
        }
    }
}

/// Base URL of the v2 API behind a configured registry address.
fn registry_base(registry_url: &str) -> String {
    let trimmed = registry_url.trim_end_matches('/');
    let host = trimmed
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    if matches!(host, "index.docker.io/v1" | "index.docker.io" | "docker.io") {
        return DOCKER_HUB_V2.to_string();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

fn parse_challenge(header: &str) -> Option<Challenge> {
    let (scheme, params) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut bearer = BearerChallenge::default();
    for part in params.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim_matches('"').to_string();
        match key {
            "realm" => bearer.realm = value,
            "service" => bearer.service = Some(value),
            _ => {}
        }
    }
    (!bearer.realm.is_empty()).then_some(Challenge::Bearer(bearer))
}

//! HTTP client for the Key Manager
//!
//! Key issuance falls back to [`KeySimulator`] on transport failure when the
//! configuration allows it. Retrieval by id and the liveness check never fall
//! back.

use async_trait::async_trait;
use qumail_core::{KeySource, KeyType, QuMailError};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString, SecretVec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::KmConfig;
use crate::simulator::{is_simulated_key_id, KeySimulator};
use crate::wire::{decode_key_material, KeyContainer, KeyIdsRequest, KeyRequest, KeyResponse};
use crate::{KmError, KmResult};

const MAX_LOGGED_BODY: usize = 256;

/// Key material handed out by the Key Manager or the simulator
pub struct DeliveredKey {
    key_id: String,
    material: SecretVec<u8>,
    size: usize,
    source: KeySource,
    key_type: KeyType,
    generation_time: Option<String>,
}

impl DeliveredKey {
    /// Assemble a delivered key; `size` is the material length
    pub fn new(
        key_id: String,
        material: SecretVec<u8>,
        source: KeySource,
        key_type: KeyType,
        generation_time: Option<String>,
    ) -> Self {
        let size = material.expose_secret().len();
        Self {
            key_id,
            material,
            size,
            source,
            key_type,
            generation_time,
        }
    }

    /// Key id assigned by the issuer
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Raw key bytes
    pub fn material(&self) -> &SecretVec<u8> {
        &self.material
    }

    /// Number of key bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Provenance
    pub fn source(&self) -> KeySource {
        self.source
    }

    /// Key kind reported by the issuer
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Issuer-reported generation time, as sent
    pub fn generation_time(&self) -> Option<&str> {
        self.generation_time.as_deref()
    }
}

impl fmt::Debug for DeliveredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveredKey")
            .field("key_id", &self.key_id)
            .field("material", &"[REDACTED]")
            .field("size", &self.size)
            .field("source", &self.source)
            .field("key_type", &self.key_type)
            .finish()
    }
}

/// Liveness state reported by [`KeyManagerApi::check_connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Key Manager answered 200
    Connected,
    /// Key Manager answered with another status
    Error,
    /// No answer within the timeout
    ConnectionError,
}

/// Result of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub status: LinkStatus,
    pub response_time_ms: Option<u64>,
}

/// Operations the key lifecycle needs from a Key Manager
#[async_trait]
pub trait KeyManagerApi: Send + Sync {
    /// Obtain `size` bytes of fresh key material shared with `peer_identity`
    async fn request_key(&self, peer_identity: &str, size: usize) -> KmResult<DeliveredKey>;

    /// Fetch previously issued material by key id, on behalf of `peer_sae_id`
    async fn retrieve_key_by_id(&self, key_id: &str, peer_sae_id: &str) -> KmResult<DeliveredKey>;

    /// Report Key Manager liveness; never fails
    async fn check_connection(&self) -> ConnectionStatus;
}

/// Key Manager client over HTTP
pub struct KmClient {
    http: Client,
    config: KmConfig,
    api_key: SecretString,
    simulator: KeySimulator,
}

impl fmt::Debug for KmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmClient")
            .field("base_url", &self.config.base_url)
            .field("allow_simulator_fallback", &self.config.allow_simulator_fallback)
            .finish_non_exhaustive()
    }
}

impl KmClient {
    /// Create a client from connection settings
    pub fn new(config: KmConfig) -> KmResult<Self> {
        config.parsed_base_url()?;
        let http = Client::builder()
            .build()
            .map_err(|e| KmError::Configuration(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            http,
            api_key: SecretString::new(config.api_key.clone()),
            config,
            simulator: KeySimulator,
        })
    }

    /// Connection settings in use
    pub fn config(&self) -> &KmConfig {
        &self.config
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.api_key.expose_secret())
    }

    async fn exchange(
        &self,
        request: RequestBuilder,
        limit: Duration,
    ) -> Result<(StatusCode, String), String> {
        let send = async move {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        match timeout(limit, send).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no response within {} ms", limit.as_millis())),
        }
    }

    fn fall_back(&self, reason: String, size: usize) -> KmResult<DeliveredKey> {
        if !self.config.allow_simulator_fallback {
            error!("Key Manager unreachable and simulator fallback disabled: {}", reason);
            return Err(KmError::Transport(reason));
        }

        let key = self.simulator.issue(size);
        warn!(
            key_id = %key.key_id(),
            source = KeySource::Simulator.as_str(),
            "Key Manager unreachable ({}), issuing simulated key",
            reason
        );
        Ok(key)
    }
}

#[async_trait]
impl KeyManagerApi for KmClient {
    async fn request_key(&self, peer_identity: &str, size: usize) -> KmResult<DeliveredKey> {
        if size == 0 {
            return Err(
                QuMailError::InvalidKeyRequest("key size must be positive".to_string()).into(),
            );
        }

        let url = self.config.endpoint(&self.config.key_request_path)?;
        let request = KeyRequest::new(peer_identity, size);
        debug!(request_id = %request.key_id, size, "Requesting key from Key Manager");

        let builder = self.authorized(self.http.post(url)).json(&request);
        let (status, body) = match self.exchange(builder, self.config.request_timeout()).await {
            Ok(answer) => answer,
            Err(reason) => return self.fall_back(reason, size),
        };

        if status != StatusCode::OK {
            let body = truncate_body(&body);
            warn!(status = status.as_u16(), "Key Manager rejected key request: {}", body);
            return Err(KmError::Protocol {
                status: status.as_u16(),
                body,
            });
        }

        let response: KeyResponse = serde_json::from_str(&body)
            .map_err(|e| KmError::InvalidResponse(format!("key response: {e}")))?;
        let key = delivered_from_response(response, size)?;
        info!(
            key_id = %key.key_id(),
            size = key.size(),
            source = key.source().as_str(),
            "Key Manager issued key"
        );
        Ok(key)
    }

    async fn retrieve_key_by_id(&self, key_id: &str, peer_sae_id: &str) -> KmResult<DeliveredKey> {
        if is_simulated_key_id(key_id) {
            return Err(QuMailError::InvalidKeyRequest(format!(
                "{key_id} was simulated locally and cannot be retrieved"
            ))
            .into());
        }

        let url = self.config.endpoint(&self.config.key_retrieval_path)?;
        let builder = self
            .authorized(self.http.post(url))
            .query(&[("master_SAE_ID", peer_sae_id)])
            .json(&KeyIdsRequest::single(key_id));

        let (status, body) = self
            .exchange(builder, self.config.request_timeout())
            .await
            .map_err(|reason| {
                warn!(%key_id, "Key retrieval failed: {}", reason);
                KmError::Transport(reason)
            })?;

        if status != StatusCode::OK {
            let body = truncate_body(&body);
            warn!(
                %key_id,
                status = status.as_u16(),
                "Key Manager rejected key retrieval: {}",
                body
            );
            return Err(KmError::Protocol {
                status: status.as_u16(),
                body,
            });
        }

        let container: KeyContainer = serde_json::from_str(&body)
            .map_err(|e| KmError::InvalidResponse(format!("key container: {e}")))?;
        let entry = container
            .keys
            .into_iter()
            .find(|entry| entry.key_id == key_id)
            .ok_or_else(|| KmError::InvalidResponse(format!("{key_id} missing from response")))?;

        let material = decode_key_material(&entry.key)?;
        debug!(%key_id, size = material.len(), "Retrieved key by id");
        Ok(DeliveredKey::new(
            entry.key_id,
            SecretVec::new(material.to_vec()),
            KeySource::KeyManager,
            KeyType::Symmetric,
            None,
        ))
    }

    async fn check_connection(&self) -> ConnectionStatus {
        let unreachable = ConnectionStatus {
            connected: false,
            status: LinkStatus::ConnectionError,
            response_time_ms: None,
        };

        let url = match self.config.endpoint(&self.config.status_path) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build Key Manager status URL: {}", e);
                return unreachable;
            }
        };

        let started = Instant::now();
        let builder = self.authorized(self.http.get(url));
        match self.exchange(builder, self.config.status_timeout()).await {
            Ok((status, _)) => {
                let connected = status == StatusCode::OK;
                let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                debug!(status = status.as_u16(), elapsed_ms = elapsed, "Key Manager status check");
                ConnectionStatus {
                    connected,
                    status: if connected {
                        LinkStatus::Connected
                    } else {
                        LinkStatus::Error
                    },
                    response_time_ms: Some(elapsed),
                }
            }
            Err(reason) => {
                info!("Key Manager status check failed: {}", reason);
                unreachable
            }
        }
    }
}

fn delivered_from_response(response: KeyResponse, requested: usize) -> KmResult<DeliveredKey> {
    if response.key_id.is_empty() {
        return Err(KmError::InvalidResponse("empty key_ID".to_string()));
    }

    let material = decode_key_material(&response.key)?;
    if material.len() < requested {
        return Err(KmError::InvalidResponse(format!(
            "{} key bytes delivered for a request of {requested}",
            material.len()
        )));
    }

    let source = match response.metadata.source.as_deref() {
        Some(tag) if tag.eq_ignore_ascii_case(KeySource::Simulator.as_str()) => {
            KeySource::Simulator
        }
        _ => KeySource::KeyManager,
    };

    Ok(DeliveredKey::new(
        response.key_id,
        SecretVec::new(material.to_vec()),
        source,
        KeyType::from_metadata(response.metadata.key_type.as_deref()),
        response.metadata.generation_time,
    ))
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_LOGGED_BODY).collect()
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, trace, warn};

use crate::backoff::{BackoffGuard, Clock};
use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::location::{LocationResult, OriginTag};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;
const DEFAULT_QPS: u32 = 10;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeocodeError {
    #[error("geocoding quota exceeded: {0}")]
    RateLimited(String),
    #[error("geocoding request rejected ({status}): {message}")]
    Api { status: String, message: String },
    #[error("geocoding transport failure: {0}")]
    Transport(String),
    #[error("geocoding request timed out")]
    Timeout,
}

impl GeocodeError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, GeocodeError::Transport(_) | GeocodeError::Timeout)
    }
}

impl From<reqwest::Error> for GeocodeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeocodeError::Timeout
        } else if err.is_decode() {
            GeocodeError::Api {
                status: "INVALID_RESPONSE".into(),
                message: err.to_string(),
            }
        } else {
            GeocodeError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub address_components: Vec<AddressComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub location: Option<LatLng>,
    #[serde(default)]
    pub location_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressComponent {
    #[serde(default)]
    pub long_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

impl Candidate {
    pub fn new(lat: f64, lng: f64, name: &str, location_type: Option<&str>) -> Self {
        Self {
            geometry: Some(Geometry {
                location: Some(LatLng { lat, lng }),
                location_type: location_type.map(str::to_string),
            }),
            address_components: vec![AddressComponent {
                long_name: name.to_string(),
                short_name: None,
                types: Vec::new(),
            }],
            formatted_address: None,
        }
    }
}

/// Providers answer with either a list of candidates or a single bare one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CandidateSet {
    Many(Vec<Candidate>),
    One(Box<Candidate>),
}

impl CandidateSet {
    pub fn into_vec(self) -> Vec<Candidate> {
        match self {
            CandidateSet::Many(list) => list,
            CandidateSet::One(candidate) => vec![*candidate],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedPlace {
    pub latitude: f64,
    pub longitude: f64,
    pub place_name: Option<String>,
    pub location_type: Option<String>,
}

impl GeocodedPlace {
    pub fn from_candidate(candidate: &Candidate) -> Option<Self> {
        let geometry = candidate.geometry.as_ref()?;
        let location = geometry.location?;
        Some(Self {
            latitude: location.lat,
            longitude: location.lng,
            place_name: candidate
                .address_components
                .first()
                .map(|component| component.long_name.clone())
                .filter(|name| !name.is_empty()),
            location_type: geometry.location_type.clone(),
        })
    }

    pub fn into_result(self, origin: OriginTag) -> LocationResult {
        LocationResult {
            latitude: self.latitude,
            longitude: self.longitude,
            place_name: self.place_name,
            location_type: self.location_type,
            origin,
        }
    }
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Vec<Candidate>, GeocodeError>;
}

/// Google Geocoding web service.
pub struct HttpGeocodeProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

impl HttpGeocodeProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("post-locator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl GeocodeProvider for HttpGeocodeProvider {
    async fn geocode(&self, query: &str) -> Result<Vec<Candidate>, GeocodeError> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            status: String,
            #[serde(default)]
            results: Option<CandidateSet>,
            #[serde(default)]
            error_message: Option<String>,
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("address", query), ("key", self.api_key.expose_secret())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GeocodeError::Api {
                status: status.as_str().to_string(),
                message,
            });
        }

        let parsed: Response = response.json().await?;
        let status = parsed.status;
        let message = parsed.error_message.unwrap_or_default();
        match status.as_str() {
            // Some providers omit the status envelope entirely.
            "" | "OK" => Ok(parsed.results.map(CandidateSet::into_vec).unwrap_or_default()),
            "ZERO_RESULTS" => Ok(Vec::new()),
            "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" if message.is_empty() => {
                Err(GeocodeError::RateLimited(status))
            }
            "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => Err(GeocodeError::RateLimited(message)),
            _ => Err(GeocodeError::Api { status, message }),
        }
    }
}

struct RateLimiter {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(qps: u32) -> Self {
        Self {
            min_interval: Duration::from_millis(Self::interval_ms(qps)),
            last_tick: AsyncMutex::new(None),
        }
    }

    fn interval_ms(qps: u32) -> u64 {
        let safe_qps = qps.max(1);
        (1000_f64 / safe_qps as f64).ceil() as u64
    }

    async fn wait(&self) {
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

/// Geocodes free-text locations without ever failing the caller.
///
/// Every provider failure becomes `None` plus a log record. A rate-limit
/// answer trips the [`BackoffGuard`], after which calls return `None`
/// without touching the network until the window has passed. Transport
/// failures and timeouts are retried a bounded number of times.
pub struct GeocodeClient {
    provider: Option<Arc<dyn GeocodeProvider>>,
    backoff: BackoffGuard,
    rate_limiter: RateLimiter,
    max_attempts: u32,
    retry_base_delay: Duration,
    jitter_rng: Mutex<StdRng>,
}

impl GeocodeClient {
    pub fn new(provider: Arc<dyn GeocodeProvider>, backoff: BackoffGuard) -> Self {
        Self::build(Some(provider), backoff)
    }

    /// A client with no provider behind it; every lookup yields `None`.
    pub fn disabled(backoff: BackoffGuard) -> Self {
        Self::build(None, backoff)
    }

    pub fn from_config(config: &AppConfig, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let backoff = BackoffGuard::with_clock(config.backoff_window(), clock);
        let client = match config.google_maps_api_key.clone() {
            Some(key) => {
                let provider = HttpGeocodeProvider::new(
                    config.geocode_endpoint.clone(),
                    key,
                    config.geocode_timeout(),
                )?;
                Self::new(Arc::new(provider), backoff)
            }
            None => {
                warn!(
                    target: "geocode",
                    "GOOGLE_MAPS_API_KEY not set; text locations will not be geocoded"
                );
                Self::disabled(backoff)
            }
        };
        Ok(client
            .with_max_attempts(config.geocode_max_attempts)
            .with_rate_limit_qps(config.geocode_rate_limit_qps))
    }

    fn build(provider: Option<Arc<dyn GeocodeProvider>>, backoff: BackoffGuard) -> Self {
        Self {
            provider,
            backoff,
            rate_limiter: RateLimiter::new(DEFAULT_QPS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: Duration::from_millis(BASE_BACKOFF_MS),
            jitter_rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_rate_limit_qps(mut self, qps: u32) -> Self {
        self.rate_limiter = RateLimiter::new(qps);
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_jitter_seed(self, seed: u64) -> Self {
        *self.jitter_rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn backoff(&self) -> &BackoffGuard {
        &self.backoff
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn geocode(&self, query: &str) -> Option<GeocodedPlace> {
        trace!(target: "geocode", query, "geocoding location text");
        let Some(provider) = self.provider.as_deref() else {
            debug!(target: "geocode", query, "no geocoding provider configured");
            return None;
        };

        if !self.backoff.try_acquire() {
            return None;
        }

        let candidates = match self.lookup_with_retry(provider, query).await {
            Ok(candidates) => candidates,
            Err(GeocodeError::RateLimited(message)) => {
                error!(target: "geocode", query, %message, "geocoding quota exceeded; backing off");
                self.backoff.trip();
                return None;
            }
            Err(err) => {
                error!(target: "geocode", query, ?err, "location not found");
                return None;
            }
        };

        let Some(first) = candidates.first() else {
            debug!(target: "geocode", query, "provider returned no candidates");
            return None;
        };

        match GeocodedPlace::from_candidate(first) {
            Some(place) => {
                debug!(target: "geocode", query, ?place, "geocoded location text");
                Some(place)
            }
            None => {
                error!(target: "geocode", query, candidate = ?first, "invalid geocoding candidate");
                None
            }
        }
    }

    async fn lookup_with_retry(
        &self,
        provider: &dyn GeocodeProvider,
        query: &str,
    ) -> Result<Vec<Candidate>, GeocodeError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.wait().await;
            match provider.geocode(query).await {
                Ok(candidates) => return Ok(candidates),
                Err(err) if err.is_retriable() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        target: "geocode",
                        ?err,
                        attempt, "geocoding failed; retrying after {:?}", delay
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_base_delay.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(6);
        let base = Duration::from_millis(base_ms * (1 << exponent));
        let jitter_ms = self.jitter_rng.lock().gen_range(0..base_ms);
        base + Duration::from_millis(jitter_ms)
    }
}

//! HTTP adapters for the signal service and the exchange proxy.
//!
//! Every failure leaves this module as a typed [`CallError`], so the health
//! ledgers downstream never inspect message text.

use std::time::Duration;

use aiguard_core::{now_ms, CallError, PortfolioPosition, PortfolioSnapshot, Signal};
use aiguard_position::SignalGenerator;
use aiguard_readiness::PortfolioSource;
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::EndpointsConfig;
use crate::error::{AppError, AppResult};

/// Wait assumed when a 429 carries no usable Retry-After header.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Map a transport-level reqwest failure.
pub fn map_reqwest_error(error: &reqwest::Error, timeout_ms: u64) -> CallError {
    if error.is_timeout() {
        CallError::Timeout(timeout_ms)
    } else if error.is_connect() {
        CallError::Transport(error.to_string())
    } else if error.is_decode() {
        CallError::Parse(error.to_string())
    } else if error.is_request() {
        CallError::Transport(error.to_string())
    } else {
        CallError::Other(error.to_string())
    }
}

/// Map a non-success HTTP status.
pub fn map_status(status: StatusCode, retry_after: Option<&str>, body: String) -> CallError {
    match status.as_u16() {
        429 => CallError::RateLimited {
            retry_after_secs: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => CallError::Auth(format!("HTTP {status}: {body}")),
        400 | 422 => CallError::Validation(format!("HTTP {status}: {body}")),
        502..=504 => CallError::Transport(format!("HTTP {status}")),
        _ => CallError::Other(format!("HTTP {status}: {body}")),
    }
}

fn build_client(timeout_ms: u64) -> AppResult<Client> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| AppError::HttpClient(format!("Failed to create HTTP client: {e}")))
}

/// Turn a response into a typed error unless it is a success.
async fn check_status(response: Response) -> Result<Response, CallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.text().await.unwrap_or_default();
    Err(map_status(status, retry_after.as_deref(), body))
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, CallError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CallError::Transport(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| CallError::Parse(e.to_string()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignalRequest<'a> {
    asset_pair: &'a str,
}

/// Client for the detailed-signal endpoint.
pub struct HttpSignalGenerator {
    client: Client,
    url: String,
    timeout_ms: u64,
}

impl HttpSignalGenerator {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> AppResult<Self> {
        Ok(Self {
            client: build_client(timeout_ms)?,
            url: url.into(),
            timeout_ms,
        })
    }

    pub fn from_config(endpoints: &EndpointsConfig) -> AppResult<Self> {
        Self::new(&endpoints.signal_url, endpoints.timeout_ms)
    }
}

#[async_trait]
impl SignalGenerator for HttpSignalGenerator {
    async fn generate_detailed_signal(&self, asset_pair: &str) -> Result<Option<Signal>, CallError> {
        trace!(url = %self.url, asset_pair, "Requesting detailed signal");
        let response = self
            .client
            .post(&self.url)
            .json(&SignalRequest { asset_pair })
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, self.timeout_ms))?;

        let response = check_status(response).await?;
        let signal: Option<Signal> = parse_json(response).await?;
        debug!(
            asset_pair,
            direction = ?signal.as_ref().map(|s| s.direction),
            "Detailed signal received"
        );
        Ok(signal)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeResponse {
    #[serde(alias = "timestamp", alias = "time")]
    server_time: i64,
}

/// Liveness probe against the exchange proxy's timestamp endpoint.
pub struct ProxyProbe {
    client: Client,
    url: String,
    timeout_ms: u64,
}

impl ProxyProbe {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> AppResult<Self> {
        Ok(Self {
            client: build_client(timeout_ms)?,
            url: url.into(),
            timeout_ms,
        })
    }

    pub fn from_config(endpoints: &EndpointsConfig) -> AppResult<Self> {
        Self::new(&endpoints.proxy_time_url, endpoints.timeout_ms)
    }

    /// Returns the proxy's server time (Unix ms).
    pub async fn probe(&self) -> Result<i64, CallError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, self.timeout_ms))?;
        let response = check_status(response).await?;
        let time: TimeResponse = parse_json(response).await?;
        Ok(time.server_time)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioResponse {
    #[serde(default)]
    positions: Vec<PortfolioPosition>,
    #[serde(default)]
    cash_balance: Decimal,
    /// Exchange-reported total; summed from positions when absent.
    #[serde(default)]
    total_usd_value: Option<Decimal>,
}

/// Fetches the portfolio from the exchange proxy.
pub struct HttpPortfolioSource {
    client: Client,
    url: String,
    timeout_ms: u64,
}

impl HttpPortfolioSource {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> AppResult<Self> {
        Ok(Self {
            client: build_client(timeout_ms)?,
            url: url.into(),
            timeout_ms,
        })
    }

    pub fn from_config(endpoints: &EndpointsConfig) -> AppResult<Self> {
        Self::new(&endpoints.portfolio_url, endpoints.timeout_ms)
    }
}

#[async_trait]
impl PortfolioSource for HttpPortfolioSource {
    async fn fetch_portfolio(&self) -> Result<PortfolioSnapshot, CallError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, self.timeout_ms))?;
        let response = check_status(response).await?;
        let body: PortfolioResponse = parse_json(response).await?;

        let fetched_at = now_ms();
        Ok(match body.total_usd_value {
            Some(total) => {
                PortfolioSnapshot::new(body.positions, total, body.cash_balance, fetched_at)
            }
            None => PortfolioSnapshot::from_positions(body.positions, body.cash_balance, fetched_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiguard_core::{ErrorKind, SignalDirection};
    use axum::http::HeaderValue;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use rust_decimal_macros::dec;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_map_status() {
        let err = map_status(StatusCode::TOO_MANY_REQUESTS, Some("7"), String::new());
        assert_eq!(err, CallError::RateLimited { retry_after_secs: 7 });

        let err = map_status(StatusCode::TOO_MANY_REQUESTS, None, String::new());
        assert_eq!(err.retry_after_secs(), Some(DEFAULT_RETRY_AFTER_SECS));

        let err = map_status(StatusCode::TOO_MANY_REQUESTS, Some("soon"), String::new());
        assert_eq!(err.retry_after_secs(), Some(DEFAULT_RETRY_AFTER_SECS));

        assert_eq!(
            map_status(StatusCode::UNAUTHORIZED, None, String::new()).kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, None, String::new()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            map_status(StatusCode::BAD_REQUEST, None, String::new()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            map_status(StatusCode::BAD_GATEWAY, None, String::new()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            map_status(StatusCode::INTERNAL_SERVER_ERROR, None, String::new()).kind(),
            ErrorKind::Other
        );
    }

    #[tokio::test]
    async fn test_signal_success() {
        let router = Router::new().route(
            "/signal",
            post(|Json(body): Json<serde_json::Value>| async move {
                let pair = body["assetPair"].as_str().unwrap_or_default().to_string();
                Json(Signal::new(pair, SignalDirection::Sell, 0.8))
            }),
        );
        let base = serve(router).await;

        let generator = HttpSignalGenerator::new(format!("{base}/signal"), 2_000).unwrap();
        let signal = generator
            .generate_detailed_signal("ETH/USD")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.asset_pair, "ETH/USD");
        assert_eq!(signal.direction, SignalDirection::Sell);
    }

    #[tokio::test]
    async fn test_signal_null_body_is_none() {
        let router = Router::new().route(
            "/signal",
            post(|| async { Json(serde_json::Value::Null) }),
        );
        let base = serve(router).await;

        let generator = HttpSignalGenerator::new(format!("{base}/signal"), 2_000).unwrap();
        assert!(generator
            .generate_detailed_signal("BTC/USD")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_signal_rate_limited() {
        let router = Router::new().route(
            "/signal",
            post(|| async {
                let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static("12"));
                response
            }),
        );
        let base = serve(router).await;

        let generator = HttpSignalGenerator::new(format!("{base}/signal"), 2_000).unwrap();
        let err = generator
            .generate_detailed_signal("BTC/USD")
            .await
            .unwrap_err();
        assert_eq!(err, CallError::RateLimited { retry_after_secs: 12 });
    }

    #[tokio::test]
    async fn test_signal_garbage_is_parse_error() {
        let router = Router::new().route("/signal", post(|| async { "not json" }));
        let base = serve(router).await;

        let generator = HttpSignalGenerator::new(format!("{base}/signal"), 2_000).unwrap();
        let err = generator
            .generate_detailed_signal("BTC/USD")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_transport() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = ProxyProbe::new(format!("http://{addr}/time"), 2_000).unwrap();
        let err = probe.probe().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_probe_reads_server_time() {
        let router = Router::new().route(
            "/time",
            get(|| async { Json(serde_json::json!({ "serverTime": 1_700_000_000_000_i64 })) }),
        );
        let base = serve(router).await;

        let probe = ProxyProbe::new(format!("{base}/time"), 2_000).unwrap();
        assert_eq!(probe.probe().await.unwrap(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_portfolio_fetch() {
        let router = Router::new().route(
            "/portfolio",
            get(|| async {
                Json(serde_json::json!({
                    "positions": [{
                        "currency": "BTC",
                        "balance": "0.5",
                        "available": "0.4",
                        "usdValue": "21000"
                    }],
                    "cashBalance": "1000"
                }))
            }),
        );
        let base = serve(router).await;

        let source = HttpPortfolioSource::new(format!("{base}/portfolio"), 2_000).unwrap();
        let snapshot = source.fetch_portfolio().await.unwrap();
        assert_eq!(snapshot.positions().len(), 1);
        assert_eq!(snapshot.total_usd_value(), dec!(22000));
        assert!(snapshot.fetched_at() > 0);
        assert!(snapshot.validate().is_ok());
    }
}

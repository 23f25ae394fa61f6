//! OANDA v3 REST candle source.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::{source::CandleSource, Candle, Error, Granularity, Result};

/// Smallest batch requested from the provider.
const MIN_REQUEST: usize = 10;

/// Mid-price candles from `GET {base}/instruments/{instrument}/candles`.
#[derive(Clone)]
pub struct OandaSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OandaSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pivotwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Over-fetch so enough completed candles remain once the in-progress
    /// one is dropped.
    pub fn request_count(count: usize) -> usize {
        (count * 3).max(MIN_REQUEST)
    }
}

impl std::fmt::Debug for OandaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OandaSource")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CandleSource for OandaSource {
    async fn candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let failed = |reason: String| Error::Source {
            instrument: instrument.to_string(),
            granularity,
            reason,
        };

        let url = format!("{}/instruments/{instrument}/candles", self.base_url);
        let request_count = Self::request_count(count).to_string();
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("count", request_count.as_str()),
                ("granularity", granularity.as_str()),
                ("price", "M"),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| failed(e.to_string()))?;

        let body: CandlesResponse = response.json().await.map_err(|e| failed(e.to_string()))?;
        let candles = body.into_candles().map_err(failed)?;
        debug!(instrument, %granularity, received = candles.len(), "fetched candles");
        Ok(candles)
    }
}

// ============================================================
// WIRE FORMAT
// ============================================================

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<RawCandle>,
}

#[derive(Debug, Deserialize)]
struct RawCandle {
    complete: bool,
    time: DateTime<Utc>,
    mid: Option<MidPrices>,
}

/// Prices arrive as decimal strings.
#[derive(Debug, Deserialize)]
struct MidPrices {
    o: String,
    h: String,
    l: String,
    c: String,
}

impl CandlesResponse {
    fn into_candles(self) -> std::result::Result<Vec<Candle>, String> {
        self.candles
            .into_iter()
            .map(|raw| {
                let mid = raw
                    .mid
                    .ok_or_else(|| format!("candle at {} has no mid prices", raw.time))?;
                Ok(Candle::new(
                    price(&mid.o)?,
                    price(&mid.h)?,
                    price(&mid.l)?,
                    price(&mid.c)?,
                    raw.time,
                    raw.complete,
                ))
            })
            .collect()
    }
}

fn price(raw: &str) -> std::result::Result<f64, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("unparseable price {raw:?}"))
}

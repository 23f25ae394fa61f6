//! External collaborators: where candles come from and where alerts go.

use async_trait::async_trait;

use crate::{Candle, Error, Granularity, OHLCVExt, Result};

/// Market-data provider.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Recent candles for `(instrument, granularity)`, oldest first.
    ///
    /// Implementations should return at least `count` completed candles when
    /// the provider has them; the in-progress candle may be included and is
    /// filtered out by [`completed_window`].
    async fn candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candle>>;
}

/// Notification channel. Fire-and-forget: delivery failures are logged by the
/// sink and never retried.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, text: &str);
}

/// Last `count` completed candles, oldest first.
///
/// `Ok(None)` means insufficient data: fewer than `count` completed candles were
/// available. Candles with NaN/inf prices or `high < low` are rejected.
pub async fn completed_window<S>(
    source: &S,
    instrument: &str,
    granularity: Granularity,
    count: usize,
) -> Result<Option<Vec<Candle>>>
where
    S: CandleSource + ?Sized,
{
    let mut complete: Vec<Candle> = source
        .candles(instrument, granularity, count)
        .await?
        .into_iter()
        .filter(|c| c.complete)
        .collect();

    if complete.len() < count {
        return Ok(None);
    }

    let window = complete.split_off(complete.len() - count);
    for (index, candle) in window.iter().enumerate() {
        candle.validate().map_err(|e| match e {
            Error::InvalidCandle { reason, .. } => Error::InvalidCandle { index, reason },
            other => other,
        })?;
    }
    Ok(Some(window))
}

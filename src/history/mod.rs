//! Periodic history refresh and retraining.
//!
//! Each cycle fetches both instruments over the current window, joins them,
//! fits a new model and publishes it. The window then slides forward by one
//! update period. A failed cycle leaves the previous model in place and is
//! not retried before the next scheduled tick.

pub mod window;

use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::binance::interval::KlineInterval;
use crate::api::binance::rest::Kline;
use crate::error::{PairWatchError, Result};
use crate::model::{ModelSlot, TrainedModel, Trainer};
use window::HistoryWindow;

#[async_trait]
pub trait KlineSource: Send + Sync {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Kline>>;
}

pub struct HistoryRefresher<S, T> {
    source: S,
    trainer: T,
    models: ModelSlot,
    predictor_symbol: String,
    target_symbol: String,
    sample_time: KlineInterval,
    update_period: Duration,
    from_ms: i64,
    to_ms: i64,
}

impl<S: KlineSource, T: Trainer> HistoryRefresher<S, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        trainer: T,
        models: ModelSlot,
        predictor_symbol: String,
        target_symbol: String,
        sample_time: KlineInterval,
        update_period: Duration,
        from_ms: i64,
        to_ms: i64,
    ) -> Self {
        Self {
            source,
            trainer,
            models,
            predictor_symbol,
            target_symbol,
            sample_time,
            update_period,
            from_ms,
            to_ms,
        }
    }

    /// Current window bounds in epoch milliseconds.
    pub fn bounds(&self) -> (i64, i64) {
        (self.from_ms, self.to_ms)
    }

    async fn fetch_pair(
        &self,
        from_ms: i64,
        to_ms: i64,
        sample_time: KlineInterval,
    ) -> Result<(Vec<Kline>, Vec<Kline>)> {
        tokio::try_join!(
            self.source
                .fetch_klines(&self.predictor_symbol, sample_time, from_ms, to_ms),
            self.source
                .fetch_klines(&self.target_symbol, sample_time, from_ms, to_ms),
        )
    }

    /// Fetches both series concurrently. Either failure fails the refresh.
    pub async fn refresh(&self, from_ms: i64, to_ms: i64, sample_time: KlineInterval) -> Result<HistoryWindow> {
        let (predictor, target) = self.fetch_pair(from_ms, to_ms, sample_time).await?;
        HistoryWindow::join(&predictor, &target)
    }

    /// One fetch-join-train-publish pass. The window slides once both
    /// fetches succeed, even if the data then cannot be joined or trained on.
    pub async fn cycle(&mut self) -> Result<()> {
        let (from_ms, to_ms) = self.bounds();
        let (predictor, target) = self.fetch_pair(from_ms, to_ms, self.sample_time).await?;

        let step = i64::try_from(self.update_period.as_millis()).unwrap_or(i64::MAX);
        self.from_ms = self.from_ms.saturating_add(step);
        self.to_ms = self.to_ms.saturating_add(step);

        let window = HistoryWindow::join(&predictor, &target)?;
        let bucket_ms = i64::try_from(self.sample_time.duration().as_millis())
            .unwrap_or(i64::MAX)
            .max(1);
        let expected = (to_ms - from_ms) / bucket_ms;
        info!(
            "Fetched {} of ~{} {} rows of {}/{} history, last close at {:?}",
            window.len(),
            expected,
            self.sample_time,
            self.predictor_symbol,
            self.target_symbol,
            window.rows().last().map(|row| row.close_time)
        );
        if window.is_empty() {
            return Err(PairWatchError::DegenerateInput(format!(
                "no history between {} and {}",
                from_ms, to_ms
            )));
        }

        let model = TrainedModel::train(&self.trainer, &window)?;
        self.models.publish(model);
        Ok(())
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.update_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "History refresher started, retraining every {:?}",
            self.update_period
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("History refresher stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.cycle().await {
                warn!("Refresh cycle failed, keeping previous model: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrdinaryLeastSquares;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const HOUR_MS: i64 = 3_600_000;

    /// Serves y = 2x + 10 for every request and records what was asked.
    #[derive(Default)]
    struct LinearSource {
        calls: Mutex<Vec<(String, i64, i64)>>,
        failures: Mutex<VecDeque<String>>,
        target_rows: Mutex<Option<usize>>,
    }

    #[async_trait]
    impl KlineSource for LinearSource {
        async fn fetch_klines(
            &self,
            symbol: &str,
            _interval: KlineInterval,
            start_ms: i64,
            end_ms: i64,
        ) -> Result<Vec<Kline>> {
            self.calls
                .lock()
                .unwrap()
                .push((symbol.to_string(), start_ms, end_ms));

            let failing = {
                let mut failures = self.failures.lock().unwrap();
                let hit = failures.front().map(|s| s == symbol).unwrap_or(false);
                if hit {
                    failures.pop_front();
                }
                hit
            };
            if failing {
                return Err(PairWatchError::FetchError(format!("{} unavailable", symbol)));
            }

            let rows = match *self.target_rows.lock().unwrap() {
                Some(n) if symbol == "ETHUSDT" => n,
                _ => 5,
            };
            Ok((1..=5)
                .take(rows)
                .map(|i| {
                    let x = Decimal::from(100 + i);
                    let close = if symbol == "BTCUSDT" {
                        x
                    } else {
                        x * Decimal::from(2) + Decimal::from(10)
                    };
                    Kline {
                        close_time: start_ms + i * 1_000,
                        close,
                    }
                })
                .collect())
        }
    }

    fn refresher(source: LinearSource, models: ModelSlot) -> HistoryRefresher<LinearSource, OrdinaryLeastSquares> {
        HistoryRefresher::new(
            source,
            OrdinaryLeastSquares,
            models,
            "BTCUSDT".to_string(),
            "ETHUSDT".to_string(),
            KlineInterval::M1,
            Duration::from_secs(3600),
            0,
            10 * HOUR_MS,
        )
    }

    #[tokio::test]
    async fn cycle_trains_publishes_and_slides_window() {
        let models = ModelSlot::new();
        let mut refresher = refresher(LinearSource::default(), models.clone());

        refresher.cycle().await.unwrap();

        let model = models.current().unwrap();
        assert!((model.predict(200.0) - 410.0).abs() < 1e-6);
        assert_eq!(model.rows(), 5);
        assert_eq!(refresher.bounds(), (HOUR_MS, 11 * HOUR_MS));

        let calls = refresher.source.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(_, from, to)| *from == 0 && *to == 10 * HOUR_MS));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_model_and_window() {
        let models = ModelSlot::new();
        let mut refresher = refresher(LinearSource::default(), models.clone());
        refresher.cycle().await.unwrap();
        let first = models.current().unwrap();

        refresher
            .source
            .failures
            .lock()
            .unwrap()
            .push_back("ETHUSDT".to_string());
        let result = refresher.cycle().await;

        assert!(matches!(result, Err(PairWatchError::FetchError(_))));
        assert!(std::sync::Arc::ptr_eq(&first, &models.current().unwrap()));
        assert_eq!(refresher.bounds(), (HOUR_MS, 11 * HOUR_MS));
    }

    #[tokio::test]
    async fn unjoinable_history_still_slides_window() {
        let models = ModelSlot::new();
        let source = LinearSource::default();
        *source.target_rows.lock().unwrap() = Some(3);
        let mut refresher = refresher(source, models.clone());

        let result = refresher.cycle().await;
        assert!(matches!(result, Err(PairWatchError::DegenerateInput(_))));
        assert!(models.current().is_none());
        assert_eq!(refresher.bounds(), (HOUR_MS, 11 * HOUR_MS));

        *refresher.source.target_rows.lock().unwrap() = None;
        refresher.cycle().await.unwrap();
        assert!(models.current().is_some());
        assert_eq!(refresher.bounds(), (2 * HOUR_MS, 12 * HOUR_MS));
    }

    #[tokio::test]
    async fn refresh_returns_joined_window() {
        let refresher = refresher(LinearSource::default(), ModelSlot::new());
        let window = refresher.refresh(0, HOUR_MS, KlineInterval::M1).await.unwrap();
        assert_eq!(window.len(), 5);
        assert_eq!(window.rows()[0].close_time, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_on_schedule_and_stops_on_cancel() {
        let models = ModelSlot::new();
        let source = LinearSource::default();
        source
            .failures
            .lock()
            .unwrap()
            .push_back("BTCUSDT".to_string());
        let refresher = refresher(source, models.clone());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(refresher.run(cancel.clone()));

        // First tick fails; nothing published and no immediate retry.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(models.current().is_none());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(models.current().is_some());

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}

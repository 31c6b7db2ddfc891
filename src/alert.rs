use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{PairWatchError, Result};
use crate::feed::mailbox::{InstrumentPrice, PriceReceiver};
use crate::model::ModelSlot;
use crate::timer::PriceTimer;

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub instrument: String,
    pub current: Decimal,
    pub predicted: f64,
    pub deviation: f64,
    pub at: DateTime<Utc>,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALERT {}: predicted {:.2} current {:.2} deviation {:.2}% at {}",
            self.instrument,
            self.predicted,
            self.current,
            self.deviation * 100.0,
            self.at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// What one pass over the latest prices concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// No model has been published yet.
    NoModel,
    /// Prices or prediction unusable this pass.
    Degraded(String),
    /// Deviation below threshold.
    Within { deviation: f64 },
    /// Deviation over threshold but the debounce window is still open.
    Suppressed { deviation: f64 },
    Alerted(Alert),
}

pub struct AlertLoop {
    predictor: PriceReceiver,
    target: PriceReceiver,
    models: ModelSlot,
    timer: PriceTimer,
    threshold: f64,
    window: Duration,
    verbose: bool,
    sink: mpsc::UnboundedSender<Alert>,
}

impl AlertLoop {
    pub fn new(
        predictor: PriceReceiver,
        target: PriceReceiver,
        models: ModelSlot,
        timer: PriceTimer,
        threshold: f64,
        window: Duration,
        sink: mpsc::UnboundedSender<Alert>,
    ) -> Self {
        Self {
            predictor,
            target,
            models,
            timer,
            threshold,
            window,
            verbose: false,
            sink,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Checks one pair of prices against the current model. Rearms the timer
    /// only when an alert is produced.
    pub fn evaluate(&mut self, a: &InstrumentPrice, b: &InstrumentPrice) -> Evaluation {
        let Some(model) = self.models.current() else {
            return Evaluation::NoModel;
        };

        if b.price <= Decimal::ZERO {
            return Evaluation::Degraded(format!("{} price is {}", b.instrument, b.price));
        }
        let (Some(current_a), Some(current_b)) = (a.price.to_f64(), b.price.to_f64()) else {
            return Evaluation::Degraded("price out of f64 range".to_string());
        };

        let predicted = model.predict(current_a);
        if !predicted.is_finite() {
            return Evaluation::Degraded(format!("model predicted {}", predicted));
        }

        let deviation = (predicted - current_b).abs() / current_b;
        if self.verbose {
            println!(
                "{} prices: Predicted:{:.2} Current:{:.2} Deviation:{:.4} {} price current:{}",
                b.instrument, predicted, current_b, deviation, a.instrument, a.price
            );
        }

        if deviation < self.threshold {
            return Evaluation::Within { deviation };
        }
        if !self.timer.fired() {
            return Evaluation::Suppressed { deviation };
        }

        self.timer.rearm(self.window);
        Evaluation::Alerted(Alert {
            instrument: b.instrument.clone(),
            current: b.price,
            predicted,
            deviation,
            at: Utc::now(),
        })
    }

    /// Evaluates on every new tick of either instrument until cancelled and
    /// hands each alert to the sink. The debounce window starts counting when
    /// the loop starts. A feed that ends after publishing keeps contributing
    /// its last price.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.timer.rearm(self.window);
        info!(
            "Alert loop started: threshold {:.2}%, window {:?}",
            self.threshold * 100.0,
            self.window
        );

        let mut predictor_open = true;
        let mut target_open = true;

        loop {
            let prices = tokio::select! {
                _ = cancel.cancelled() => None,
                prices = async {
                    let a = self.predictor.latest().await?;
                    let b = self.target.latest().await?;
                    Ok::<_, PairWatchError>((a, b))
                } => Some(prices?),
            };
            let Some((a, b)) = prices else {
                info!("Alert loop stopping");
                return Ok(());
            };

            match self.evaluate(&a, &b) {
                Evaluation::Alerted(alert) => {
                    info!("{}", alert);
                    if self.sink.send(alert).is_err() {
                        warn!("Alert output is gone, alert dropped");
                    }
                }
                Evaluation::Degraded(reason) => warn!("Skipping evaluation: {}", reason),
                Evaluation::Suppressed { deviation } => debug!(
                    "Deviation {:.4} over threshold, alert suppressed for another {:?}",
                    deviation,
                    self.timer.remaining().unwrap_or_default()
                ),
                Evaluation::Within { deviation } => {
                    debug!("Deviation {:.4} within threshold", deviation)
                }
                Evaluation::NoModel => debug!("No model yet, skipping evaluation"),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Alert loop stopping");
                    return Ok(());
                }
                open = self.predictor.changed(), if predictor_open => {
                    if !open {
                        predictor_open = false;
                        warn!("{} feed ended, using its last price", self.predictor.instrument());
                    }
                }
                open = self.target.changed(), if target_open => {
                    if !open {
                        target_open = false;
                        warn!("{} feed ended, using its last price", self.target.instrument());
                    }
                }
            }
        }
    }
}

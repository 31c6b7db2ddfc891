//! Regression contracts and the shared model slot.
//!
//! The target is instrument B's raw close price, predicted from instrument A's
//! raw close price.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use log::info;

use crate::error::{PairWatchError, Result};
use crate::history::window::HistoryWindow;

pub trait Predictor: Send + Sync {
    fn predict(&self, feature: f64) -> f64;
}

pub trait Trainer: Send + Sync {
    fn fit(&self, features: &[f64], target: &[f64]) -> Result<Box<dyn Predictor>>;
}

/// A fitted model plus when and on how much data it was fitted.
pub struct TrainedModel {
    predictor: Box<dyn Predictor>,
    trained_at: DateTime<Utc>,
    rows: usize,
}

impl TrainedModel {
    pub fn new(predictor: Box<dyn Predictor>, rows: usize) -> Self {
        Self {
            predictor,
            trained_at: Utc::now(),
            rows,
        }
    }

    pub fn train(trainer: &dyn Trainer, window: &HistoryWindow) -> Result<Self> {
        let features = window.predictor_closes();
        let target = window.target_closes();
        let predictor = trainer.fit(&features, &target)?;
        Ok(Self::new(predictor, window.len()))
    }

    pub fn predict(&self, feature: f64) -> f64 {
        self.predictor.predict(feature)
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Current model, swapped whole on retrain. Readers hold an `Arc` for the
/// length of one prediction and never see a partial model.
#[derive(Clone, Default)]
pub struct ModelSlot {
    inner: Arc<ArcSwapOption<TrainedModel>>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, model: TrainedModel) {
        info!(
            "Publishing model trained on {} rows at {}",
            model.rows(),
            model.trained_at()
        );
        self.inner.store(Some(Arc::new(model)));
    }

    pub fn current(&self) -> Option<Arc<TrainedModel>> {
        self.inner.load_full()
    }
}

/// `y = slope * x + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRegression {
    pub slope: f64,
    pub intercept: f64,
}

impl Predictor for LinearRegression {
    fn predict(&self, feature: f64) -> f64 {
        self.slope * feature + self.intercept
    }
}

/// Single-feature ordinary least squares.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdinaryLeastSquares;

impl OrdinaryLeastSquares {
    pub fn fit_line(features: &[f64], target: &[f64]) -> Result<LinearRegression> {
        if features.len() != target.len() {
            return Err(PairWatchError::DegenerateInput(format!(
                "{} features for {} targets",
                features.len(),
                target.len()
            )));
        }
        if features.len() < 2 {
            return Err(PairWatchError::DegenerateInput(format!(
                "need at least 2 rows to fit, got {}",
                features.len()
            )));
        }
        if features.iter().chain(target).any(|v| !v.is_finite()) {
            return Err(PairWatchError::DegenerateInput(
                "non-finite value in training data".to_string(),
            ));
        }

        let n = features.len() as f64;
        let mean_x = features.iter().sum::<f64>() / n;
        let mean_y = target.iter().sum::<f64>() / n;

        let (cov, var) = features
            .iter()
            .zip(target)
            .fold((0.0, 0.0), |(cov, var), (x, y)| {
                let dx = x - mean_x;
                (cov + dx * (y - mean_y), var + dx * dx)
            });

        if var == 0.0 {
            return Err(PairWatchError::DegenerateInput(
                "predictor series has zero variance".to_string(),
            ));
        }

        let slope = cov / var;
        Ok(LinearRegression {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }
}

impl Trainer for OrdinaryLeastSquares {
    fn fit(&self, features: &[f64], target: &[f64]) -> Result<Box<dyn Predictor>> {
        Ok(Box::new(Self::fit_line(features, target)?))
    }
}

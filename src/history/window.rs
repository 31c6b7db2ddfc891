use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::api::binance::rest::Kline;
use crate::error::{PairWatchError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub close_time: i64,
    pub predictor_close: Decimal,
    pub target_close: Decimal,
}

/// Both instruments' closes, one row per sampling interval, ascending by
/// close time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryWindow {
    rows: Vec<HistoryRow>,
}

impl HistoryWindow {
    /// Pairs the two series by position. Rejects series of different length,
    /// rows whose close times disagree, and non-ascending close times.
    pub fn join(predictor: &[Kline], target: &[Kline]) -> Result<Self> {
        if predictor.len() != target.len() {
            return Err(PairWatchError::DegenerateInput(format!(
                "kline series differ in length: {} vs {}",
                predictor.len(),
                target.len()
            )));
        }

        let mut rows: Vec<HistoryRow> = Vec::with_capacity(predictor.len());
        for (i, (a, b)) in predictor.iter().zip(target).enumerate() {
            if a.close_time != b.close_time {
                return Err(PairWatchError::DegenerateInput(format!(
                    "row {}: close times differ ({} vs {})",
                    i, a.close_time, b.close_time
                )));
            }
            if let Some(prev) = rows.last() {
                if a.close_time <= prev.close_time {
                    return Err(PairWatchError::DegenerateInput(format!(
                        "row {}: close time {} does not follow {}",
                        i, a.close_time, prev.close_time
                    )));
                }
            }
            rows.push(HistoryRow {
                close_time: a.close_time,
                predictor_close: a.close,
                target_close: b.close,
            });
        }

        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[HistoryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn predictor_closes(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|r| r.predictor_close.to_f64().unwrap_or(f64::NAN))
            .collect()
    }

    pub fn target_closes(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|r| r.target_close.to_f64().unwrap_or(f64::NAN))
            .collect()
    }
}

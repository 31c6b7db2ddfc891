//! Single-slot price mailboxes.
//!
//! Each instrument gets one writer (its feed task) and any number of readers.
//! A publish replaces whatever is held; unread values are dropped.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::error::{PairWatchError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentPrice {
    pub instrument: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

pub fn mailbox(instrument: &str) -> (PriceSender, PriceReceiver) {
    let (tx, rx) = watch::channel(None);
    (
        PriceSender {
            instrument: instrument.to_string(),
            tx,
        },
        PriceReceiver {
            instrument: instrument.to_string(),
            rx,
        },
    )
}

#[derive(Debug)]
pub struct PriceSender {
    instrument: String,
    tx: watch::Sender<Option<InstrumentPrice>>,
}

impl PriceSender {
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Overwrite the slot. Never blocks, even with no reader attached.
    pub fn publish(&self, price: Decimal, observed_at: DateTime<Utc>) {
        self.tx.send_replace(Some(InstrumentPrice {
            instrument: self.instrument.clone(),
            price,
            observed_at,
        }));
    }
}

#[derive(Debug, Clone)]
pub struct PriceReceiver {
    instrument: String,
    rx: watch::Receiver<Option<InstrumentPrice>>,
}

impl PriceReceiver {
    /// Waits for the first published price, then returns whatever the slot
    /// currently holds without waiting again.
    pub async fn latest(&mut self) -> Result<InstrumentPrice> {
        let current = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PairWatchError::FeedClosed(self.instrument.clone()))?
            .clone();
        current.ok_or_else(|| PairWatchError::FeedClosed(self.instrument.clone()))
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Resolves when a price newer than the last one read has been published.
    /// Returns `false` once the writer is gone; the last price stays readable.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

//! Live price feed: one WebSocket connection and one task per instrument.

pub mod mailbox;

use std::collections::HashMap;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::api::binance::ws::{self, TickerStream};
use crate::error::{PairWatchError, Result};
use mailbox::{mailbox, InstrumentPrice, PriceReceiver, PriceSender};

/// A connected, subscribed ticker stream waiting to be driven.
pub struct FeedSession {
    stream: TickerStream,
    sender: PriceSender,
}

impl FeedSession {
    pub fn instrument(&self) -> &str {
        self.sender.instrument()
    }

    /// Runs until the socket fails or `cancel` fires. A socket failure ends
    /// only this instrument's feed.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        ws::run_ticker(self.stream, self.sender, cancel).await
    }
}

/// Read side of the feed, keyed by upper-case symbol.
#[derive(Debug, Clone, Default)]
pub struct LiveFeed {
    receivers: HashMap<String, PriceReceiver>,
}

impl LiveFeed {
    /// Connects every instrument up front. Any instrument that cannot be
    /// reached fails startup.
    pub async fn connect(ws_url: &str, instruments: &[String]) -> Result<(Self, Vec<FeedSession>)> {
        let mut feed = LiveFeed::default();
        let mut sessions = Vec::with_capacity(instruments.len());

        for instrument in instruments {
            let stream = ws::connect_to_ticker(ws_url, instrument)
                .await
                .map_err(|e| {
                    PairWatchError::StartupError(format!("cannot connect {}: {}", instrument, e))
                })?;
            let sender = feed.register(instrument);
            sessions.push(FeedSession { stream, sender });
        }

        info!("Live feed connected for {:?}", instruments);
        Ok((feed, sessions))
    }

    /// Adds a mailbox for `instrument` and hands back its writer.
    pub fn register(&mut self, instrument: &str) -> PriceSender {
        let symbol = instrument.to_uppercase();
        let (tx, rx) = mailbox(&symbol);
        self.receivers.insert(symbol, rx);
        tx
    }

    pub fn reader(&self, instrument: &str) -> Result<PriceReceiver> {
        self.receivers
            .get(&instrument.to_uppercase())
            .cloned()
            .ok_or_else(|| PairWatchError::StartupError(format!("no feed for {}", instrument)))
    }

    /// Waits for the first price of `instrument`, then returns the freshest.
    pub async fn latest(&self, instrument: &str) -> Result<InstrumentPrice> {
        self.reader(instrument)?.latest().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures_util::{SinkExt, StreamExt};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::Message;

    #[tokio::test]
    async fn latest_per_instrument_is_independent() {
        let mut feed = LiveFeed::default();
        let btc = feed.register("btcusdt");
        let eth = feed.register("ETHUSDT");

        btc.publish(dec!(100), Utc::now());
        btc.publish(dec!(102), Utc::now());
        eth.publish(dec!(50), Utc::now());

        assert_eq!(feed.latest("BTCUSDT").await.unwrap().price, dec!(102));
        assert_eq!(feed.latest("ethusdt").await.unwrap().price, dec!(50));
        assert!(feed.reader("SOLUSDT").is_err());
    }

    #[tokio::test]
    async fn startup_fails_when_an_instrument_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = LiveFeed::connect(&format!("ws://{}", addr), &["BTCUSDT".to_string()]).await;
        assert!(matches!(result, Err(PairWatchError::StartupError(_))));
    }

    #[tokio::test]
    async fn one_connection_per_instrument() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Every accepted connection echoes one tick priced by its subscription.
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    let Some(Ok(Message::Text(sub))) = ws.next().await else {
                        return;
                    };
                    let frame = if sub.contains("btcusdt@ticker") {
                        r#"{"s":"BTCUSDT","c":"102"}"#
                    } else {
                        r#"{"s":"ETHUSDT","c":"50"}"#
                    };
                    ws.send(Message::Text(frame.to_string())).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });

        let instruments = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let (feed, sessions) = LiveFeed::connect(&format!("ws://{}", addr), &instruments)
            .await
            .unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].instrument(), "BTCUSDT");

        let cancel = CancellationToken::new();
        let tasks: Vec<_> = sessions
            .into_iter()
            .map(|session| tokio::spawn(session.run(cancel.clone())))
            .collect();

        let btc = tokio::time::timeout(Duration::from_secs(5), feed.latest("BTCUSDT"))
            .await
            .unwrap()
            .unwrap();
        let eth = tokio::time::timeout(Duration::from_secs(5), feed.latest("ETHUSDT"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(btc.price, dec!(102));
        assert_eq!(eth.price, dec!(50));

        cancel.cancel();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
    }
}

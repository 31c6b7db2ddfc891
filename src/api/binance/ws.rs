use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{PairWatchError, Result};
use crate::feed::mailbox::PriceSender;

pub type TickerStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    method: &'static str,
    params: Vec<String>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    s: Option<String>, // Symbol
    c: Option<String>, // Last price
    #[serde(rename = "E")]
    event_time: Option<i64>,
    error: Option<serde_json::Value>,
}

/// One decoded price update.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

pub fn stream_name(symbol: &str) -> String {
    format!("{}@ticker", symbol.to_lowercase())
}

pub fn subscribe_message(symbol: &str, id: u64) -> Result<String> {
    let request = SubscribeRequest {
        method: "SUBSCRIBE",
        params: vec![stream_name(symbol)],
        id,
    };
    Ok(serde_json::to_string(&request)?)
}

/// Decodes one text frame. `Ok(None)` means the frame carries no price
/// (subscription acks and the like).
pub fn parse_ticker(text: &str) -> Result<Option<Tick>> {
    let data: TickerData = serde_json::from_str(text)?;

    if let Some(err) = data.error {
        return Err(PairWatchError::DecodeError(format!(
            "exchange reported error: {}",
            err
        )));
    }

    let Some(raw_price) = data.c else {
        return Ok(None);
    };
    let symbol = data
        .s
        .ok_or_else(|| PairWatchError::DecodeError("ticker without symbol".to_string()))?;
    let price = Decimal::from_str(&raw_price).map_err(|e| {
        PairWatchError::DecodeError(format!("bad price '{}' for {}: {}", raw_price, symbol, e))
    })?;
    let observed_at = data
        .event_time
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Some(Tick {
        symbol,
        price,
        observed_at,
    }))
}

/// Opens the per-symbol ticker stream and sends the subscribe request.
pub async fn connect_to_ticker(base_url: &str, symbol: &str) -> Result<TickerStream> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), stream_name(symbol));
    info!("Connecting to ticker stream: {}", url);

    let (mut ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
        error!("Connection error for {}: {}", symbol, e);
        PairWatchError::ConnectionError {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        }
    })?;
    ws_stream
        .send(Message::Text(subscribe_message(symbol, 1)?))
        .await?;

    info!("Subscribed to {}", stream_name(symbol));
    Ok(ws_stream)
}

/// Reads ticks until the socket fails or `cancel` fires, publishing each
/// price into `sender`.
pub async fn run_ticker(
    mut ws_stream: TickerStream,
    sender: PriceSender,
    cancel: CancellationToken,
) -> Result<()> {
    let symbol = sender.instrument().to_string();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            message = ws_stream.next() => Some(message),
        };
        let Some(message) = next else {
            info!("Closing ticker stream for {}", symbol);
            if let Err(e) = ws_stream.close(None).await {
                debug!("Close handshake for {} failed: {}", symbol, e);
            }
            return Ok(());
        };

        match message {
            Some(Ok(Message::Text(text))) => match parse_ticker(&text) {
                Ok(Some(tick)) if tick.symbol.eq_ignore_ascii_case(&symbol) => {
                    debug!("{}: Price = {}", tick.symbol, tick.price);
                    sender.publish(tick.price, tick.observed_at);
                }
                Ok(Some(tick)) => {
                    warn!("Ignoring {} tick on the {} stream", tick.symbol, symbol);
                }
                Ok(None) => debug!("Non-price message on {}: {}", symbol, text),
                Err(e) => warn!("Failed to parse ticker data for {}: {}", symbol, e),
            },
            Some(Ok(Message::Close(frame))) => {
                error!("Ticker stream for {} closed by server: {:?}", symbol, frame);
                return Err(PairWatchError::ConnectionError {
                    symbol,
                    reason: "closed by server".to_string(),
                });
            }
            Some(Ok(_)) => {} // Ping/pong and binary frames carry no ticks
            Some(Err(e)) => {
                error!("WebSocket error on {}: {}", symbol, e);
                return Err(PairWatchError::ConnectionError {
                    symbol,
                    reason: e.to_string(),
                });
            }
            None => {
                error!("Ticker stream for {} ended", symbol);
                return Err(PairWatchError::ConnectionError {
                    symbol,
                    reason: "stream ended".to_string(),
                });
            }
        }
    }
}

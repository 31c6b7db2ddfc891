use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::api::binance::interval::KlineInterval;
use crate::error::{PairWatchError, Result};
use crate::history::KlineSource;

const CLOSE_PRICE_IDX: usize = 4;
const CLOSE_TIME_IDX: usize = 6;
/// Largest page the klines endpoint serves.
const PAGE_LIMIT: usize = 1000;

/// One candlestick, reduced to what the regression needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub close_time: i64,
    pub close: Decimal,
}

impl Kline {
    /// Decodes one row of the klines array response.
    pub fn from_row(row: &[Value]) -> Result<Self> {
        let close = match row.get(CLOSE_PRICE_IDX) {
            Some(Value::String(s)) => Decimal::from_str(s).ok(),
            Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        }
        .ok_or_else(|| PairWatchError::FetchError(format!("bad close price in kline {:?}", row)))?;

        let close_time = row
            .get(CLOSE_TIME_IDX)
            .and_then(Value::as_i64)
            .ok_or_else(|| PairWatchError::FetchError(format!("bad close time in kline {:?}", row)))?;

        Ok(Self { close_time, close })
    }
}

pub fn parse_klines(payload: &Value) -> Result<Vec<Kline>> {
    let rows = payload
        .as_array()
        .ok_or_else(|| PairWatchError::FetchError(format!("klines payload is not an array: {}", payload)))?;
    rows.iter()
        .map(|row| match row.as_array() {
            Some(fields) => Kline::from_row(fields),
            None => Err(PairWatchError::FetchError(format!("kline row is not an array: {}", row))),
        })
        .collect()
}

/// Pulls consecutive pages until `end_ms` is covered or the source runs dry.
/// `fetch_page` gets the start of each page; the next page starts one
/// millisecond after the last close time seen.
pub async fn collect_pages<F, Fut>(
    start_ms: i64,
    end_ms: i64,
    limit: usize,
    mut fetch_page: F,
) -> Result<Vec<Kline>>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<Vec<Kline>>>,
{
    let mut klines = Vec::new();
    let mut cursor = start_ms;

    while cursor <= end_ms {
        let page = fetch_page(cursor).await?;
        let Some(last_close) = page.last().map(|k| k.close_time) else {
            break;
        };
        if last_close < cursor {
            return Err(PairWatchError::FetchError(format!(
                "klines page starting at {} ended at {}",
                cursor, last_close
            )));
        }

        let full = page.len() >= limit;
        klines.extend(page);
        if !full || last_close >= end_ms {
            break;
        }
        cursor = last_close + 1;
    }

    Ok(klines)
}

#[derive(Clone)]
pub struct BinanceRest {
    http: Client,
    url: String,
}

impl BinanceRest {
    pub fn new(url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, url })
    }

    async fn fetch_page(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Kline>> {
        let url = format!("{}/api/v3/klines", self.url.trim_end_matches('/'));
        let query = [
            ("symbol", symbol.to_uppercase()),
            ("interval", interval.as_str().to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];

        let payload: Value = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| PairWatchError::FetchError(format!("{}: {}", symbol, e)))?
            .json()
            .await
            .map_err(|e| PairWatchError::FetchError(format!("{}: {}", symbol, e)))?;

        parse_klines(&payload)
    }
}

#[async_trait]
impl KlineSource for BinanceRest {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Kline>> {
        let client = self;
        let klines = collect_pages(start_ms, end_ms, PAGE_LIMIT, move |cursor| {
            client.fetch_page(symbol, interval, cursor, end_ms)
        })
        .await?;

        debug!(
            "Fetched {} {} klines for {} [{}, {}]",
            klines.len(),
            interval,
            symbol,
            start_ms,
            end_ms
        );
        Ok(klines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_close_price_and_close_time() {
        let payload: Value = serde_json::from_str(
            r#"[
                [1672531200000,"16541.77","16545.70","16508.39","16529.67","1033.8","1672617599999","17095.4",31000,"500.1","8268.3","0"],
                [1672617600000,"16529.59","16556.80","16498.92","16551.47","1111.1",1672703999999,"18383.4",32000,"550.2","9100.0","0"]
            ]"#,
        )
        .unwrap();

        // close_time must be an integer; the first row carries it as a string
        assert!(parse_klines(&payload).is_err());

        let payload: Value = serde_json::from_str(
            r#"[
                [1672531200000,"16541.77","16545.70","16508.39","16529.67","1033.8",1672617599999,"17095.4",31000,"500.1","8268.3","0"],
                [1672617600000,"16529.59","16556.80","16498.92",16551.47,"1111.1",1672703999999,"18383.4",32000,"550.2","9100.0","0"]
            ]"#,
        )
        .unwrap();
        let klines = parse_klines(&payload).unwrap();
        assert_eq!(
            klines,
            vec![
                Kline { close_time: 1_672_617_599_999, close: dec!(16529.67) },
                Kline { close_time: 1_672_703_999_999, close: dec!(16551.47) },
            ]
        );
    }

    #[test]
    fn error_envelope_is_a_fetch_error() {
        let payload: Value = serde_json::from_str(r#"{"code":-1121,"msg":"Invalid symbol."}"#).unwrap();
        assert!(matches!(parse_klines(&payload), Err(PairWatchError::FetchError(_))));
    }

    #[test]
    fn short_row_is_rejected() {
        let row: Vec<Value> = serde_json::from_str(r#"[1672531200000,"1","2"]"#).unwrap();
        assert!(Kline::from_row(&row).is_err());
    }

    /// Rows close every 1000 ms up to `last`, at most `limit` per page.
    fn page_of(cursor: i64, end_ms: i64, last: i64, limit: usize) -> Vec<Kline> {
        (1..=last / 1_000)
            .map(|i| i * 1_000)
            .filter(|t| *t >= cursor && *t <= end_ms)
            .take(limit)
            .map(|close_time| Kline {
                close_time,
                close: Decimal::from(close_time / 1_000),
            })
            .collect()
    }

    #[tokio::test]
    async fn pages_until_window_is_covered() {
        let mut cursors = Vec::new();
        let klines = collect_pages(0, 25_000, 10, |cursor| {
            cursors.push(cursor);
            let page = page_of(cursor, 25_000, 30_000, 10);
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(cursors, vec![0, 10_001, 20_001]);
        assert_eq!(klines.len(), 25);
        assert_eq!(klines.first().map(|k| k.close_time), Some(1_000));
        assert_eq!(klines.last().map(|k| k.close_time), Some(25_000));
        assert!(klines.windows(2).all(|w| w[0].close_time < w[1].close_time));
    }

    #[tokio::test]
    async fn short_page_ends_paging() {
        let mut calls = 0;
        let klines = collect_pages(0, 100_000, 10, |cursor| {
            calls += 1;
            let page = page_of(cursor, 100_000, 12_000, 10);
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(klines.len(), 12);
    }

    #[tokio::test]
    async fn page_that_does_not_advance_is_a_fetch_error() {
        let result = collect_pages(5_000, 100_000, 1, |_| async {
            Ok(vec![Kline { close_time: 1_000, close: Decimal::ONE }])
        })
        .await;
        assert!(matches!(result, Err(PairWatchError::FetchError(_))));
    }

    #[tokio::test]
    async fn page_error_fails_the_fetch() {
        let result = collect_pages(0, 100_000, 10, |_| async {
            Err(PairWatchError::FetchError("rate limited".to_string()))
        })
        .await;
        assert!(matches!(result, Err(PairWatchError::FetchError(_))));
    }
}

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::PairWatchError;

/// Kline bucket sizes accepted by the klines endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum KlineInterval {
    S1,
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
    Month1,
}

impl KlineInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::S1 => "1s",
            KlineInterval::M1 => "1m",
            KlineInterval::M3 => "3m",
            KlineInterval::M5 => "5m",
            KlineInterval::M15 => "15m",
            KlineInterval::M30 => "30m",
            KlineInterval::H1 => "1h",
            KlineInterval::H2 => "2h",
            KlineInterval::H4 => "4h",
            KlineInterval::H6 => "6h",
            KlineInterval::H8 => "8h",
            KlineInterval::H12 => "12h",
            KlineInterval::D1 => "1d",
            KlineInterval::D3 => "3d",
            KlineInterval::W1 => "1w",
            KlineInterval::Month1 => "1M",
        }
    }

    /// Nominal bucket length. Calendar months are counted as 30 days.
    pub fn duration(&self) -> Duration {
        let secs = match self {
            KlineInterval::S1 => 1,
            KlineInterval::M1 => 60,
            KlineInterval::M3 => 3 * 60,
            KlineInterval::M5 => 5 * 60,
            KlineInterval::M15 => 15 * 60,
            KlineInterval::M30 => 30 * 60,
            KlineInterval::H1 => 3600,
            KlineInterval::H2 => 2 * 3600,
            KlineInterval::H4 => 4 * 3600,
            KlineInterval::H6 => 6 * 3600,
            KlineInterval::H8 => 8 * 3600,
            KlineInterval::H12 => 12 * 3600,
            KlineInterval::D1 => 86_400,
            KlineInterval::D3 => 3 * 86_400,
            KlineInterval::W1 => 7 * 86_400,
            KlineInterval::Month1 => 30 * 86_400,
        };
        Duration::from_secs(secs)
    }
}

impl FromStr for KlineInterval {
    type Err = PairWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let interval = match s {
            "1s" => KlineInterval::S1,
            "1m" => KlineInterval::M1,
            "3m" => KlineInterval::M3,
            "5m" => KlineInterval::M5,
            "15m" => KlineInterval::M15,
            "30m" => KlineInterval::M30,
            "1h" => KlineInterval::H1,
            "2h" => KlineInterval::H2,
            "4h" => KlineInterval::H4,
            "6h" => KlineInterval::H6,
            "8h" => KlineInterval::H8,
            "12h" => KlineInterval::H12,
            "1d" => KlineInterval::D1,
            "3d" => KlineInterval::D3,
            "1w" => KlineInterval::W1,
            "1M" => KlineInterval::Month1,
            other => {
                return Err(PairWatchError::ConfigError(format!(
                    "unknown kline interval '{}'",
                    other
                )))
            }
        };
        Ok(interval)
    }
}

impl TryFrom<String> for KlineInterval {
    type Error = PairWatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_and_month_codes_are_case_sensitive() {
        assert_eq!("1m".parse::<KlineInterval>().unwrap(), KlineInterval::M1);
        assert_eq!("1M".parse::<KlineInterval>().unwrap(), KlineInterval::Month1);
        assert!("1H".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn display_matches_exchange_code() {
        assert_eq!(KlineInterval::H4.to_string(), "4h");
        assert_eq!(KlineInterval::D1.duration(), Duration::from_secs(86_400));
    }
}

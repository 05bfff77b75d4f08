use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smallest price a generated instrument may trade at.
pub const MIN_PRICE: f64 = 0.01;

/// Round a price to cents, never going below [`MIN_PRICE`].
pub fn round_price(price: f64) -> f64 {
    if !price.is_finite() {
        return MIN_PRICE;
    }
    ((price * 100.0).round() / 100.0).max(MIN_PRICE)
}

/// OHLCV bar data
///
/// Prices carry two-decimal precision and volume is a whole share count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// `low <= min(open, close) <= max(open, close) <= high`, all prices positive.
    pub fn is_sane(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        self.low <= self.open.min(self.close) && self.high >= self.open.max(self.close)
    }
}

/// Direction of a scripted move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Up,
    Down,
}

impl Direction {
    /// +1.0 for up, -1.0 for down.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bar() -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(),
            open: 100.0,
            high: 101.5,
            low: 99.25,
            close: 100.75,
            volume: 12_000,
        }
    }

    #[test]
    fn test_round_price_to_cents() {
        assert_eq!(round_price(100.123), 100.12);
        assert_eq!(round_price(100.126), 100.13);
        assert_eq!(round_price(0.0001), MIN_PRICE);
        assert_eq!(round_price(f64::NAN), MIN_PRICE);
    }

    #[test]
    fn test_bar_sanity() {
        assert!(sample_bar().is_sane());

        let mut bar = sample_bar();
        bar.high = 100.5; // below close
        assert!(!bar.is_sane());

        let mut bar = sample_bar();
        bar.low = -1.0;
        assert!(!bar.is_sane());
    }

    #[test]
    fn test_direction_sign() {
        assert_eq!(Direction::Up.sign(), 1.0);
        assert_eq!(Direction::Down.sign(), -1.0);
        assert_eq!(Direction::default(), Direction::Up);
        assert_eq!(Direction::Down.to_string(), "down");
    }
}

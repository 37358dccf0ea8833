//! Historical candle sources.

pub mod csv_file;
pub mod memory;

pub use csv_file::CsvFeed;
pub use memory::MemoryFeed;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use common::{Candle, Result};

/// A source of candles in ascending time order.
#[async_trait]
pub trait CandleFeed: Send {
    /// Open the source. Failure here is an `Error::Connection`.
    async fn start(&mut self) -> Result<()>;

    /// The next candle, or `None` once the source is exhausted.
    async fn next_candle(&mut self) -> Result<Option<Candle>>;
}

/// RFC3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_both_formats() {
        let day = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01"), Some(day));
        assert_eq!(parse_timestamp("2024-05-01T00:00:00Z"), Some(day));
        assert_eq!(
            parse_timestamp("2024-05-01T02:00:00+02:00"),
            Some(day)
        );
        assert_eq!(parse_timestamp("May 1st"), None);
    }
}

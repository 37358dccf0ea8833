use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use common::{Candle, Error, Result};

use super::{parse_timestamp, CandleFeed};

#[derive(Debug, Deserialize)]
struct CsvRow {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Reads `<data_dir>/<security>.csv` and replays the rows inside `[from, to)`.
///
/// Expected header: `time,open,high,low,close,volume`.
#[derive(Debug)]
pub struct CsvFeed {
    path: PathBuf,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    candles: VecDeque<Candle>,
}

impl CsvFeed {
    pub fn new(data_dir: &Path, security: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            path: data_dir.join(format!("{security}.csv")),
            from,
            to,
            candles: VecDeque::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> Result<VecDeque<Candle>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut out = VecDeque::new();
        let mut last: Option<DateTime<Utc>> = None;
        for (idx, row) in reader.deserialize::<CsvRow>().enumerate() {
            // Header is line 1.
            let line = idx + 2;
            let row = row.map_err(|e| self.error(format!("line {line}: {e}")))?;
            let time = parse_timestamp(&row.time)
                .ok_or_else(|| self.error(format!("line {line}: bad timestamp '{}'", row.time)))?;

            if let Some(prev) = last {
                if time <= prev {
                    return Err(self.error(format!(
                        "line {line}: {time} is not after {prev}; rows must be in ascending time order"
                    )));
                }
            }
            last = Some(time);

            let prices = [row.open, row.high, row.low, row.close];
            if prices.iter().any(|p| !p.is_finite()) || row.high < row.low {
                return Err(self.error(format!(
                    "line {line}: malformed bar o={} h={} l={} c={}",
                    row.open, row.high, row.low, row.close
                )));
            }
            if !(row.volume.is_finite() && row.volume >= 0.0) {
                return Err(self.error(format!("line {line}: bad volume {}", row.volume)));
            }

            if time < self.from || time >= self.to {
                continue;
            }
            out.push_back(Candle::finished(
                time, row.open, row.high, row.low, row.close, row.volume,
            ));
        }
        Ok(out)
    }

    fn error(&self, msg: String) -> Error {
        Error::Connection(format!("{}: {msg}", self.path.display()))
    }
}

#[async_trait]
impl CandleFeed for CsvFeed {
    async fn start(&mut self) -> Result<()> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.error(format!("cannot open data file: {e}")))?;
        self.candles = self.parse(&content)?;
        info!(
            path = %self.path.display(),
            from = %self.from,
            to = %self.to,
            candles = self.candles.len(),
            "CSV feed loaded"
        );
        Ok(())
    }

    async fn next_candle(&mut self) -> Result<Option<Candle>> {
        let next = self.candles.pop_front();
        if next.is_none() {
            debug!(path = %self.path.display(), "CSV feed exhausted");
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn write_csv(dir: &Path, body: &str) {
        let mut f = std::fs::File::create(dir.join("TEST.csv")).unwrap();
        writeln!(f, "time,open,high,low,close,volume").unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn filters_to_half_open_range() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "2024-01-01,1,2,0.5,1.5,10\n\
             2024-01-02,1.5,2.5,1,2,10\n\
             2024-01-03T00:00:00Z,2,3,1.5,2.5,10\n\
             2024-01-04,2.5,3,2,2.8,10\n",
        );
        let mut feed = CsvFeed::new(dir.path(), "TEST", day(2), day(4));
        feed.start().await.unwrap();

        let mut times = Vec::new();
        while let Some(c) = feed.next_candle().await.unwrap() {
            assert!(c.is_finished());
            times.push(c.open_time);
        }
        assert_eq!(times, vec![day(2), day(3)]);
    }

    #[tokio::test]
    async fn missing_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut feed = CsvFeed::new(dir.path(), "NOPE", day(1), day(2));
        assert!(matches!(feed.start().await, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn descending_rows_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "2024-01-02,1,2,0.5,1.5,10\n2024-01-01,1,2,0.5,1.5,10\n",
        );
        let mut feed = CsvFeed::new(dir.path(), "TEST", day(1), day(9));
        let err = feed.start().await.unwrap_err();
        assert!(err.to_string().contains("ascending"));
    }

    #[tokio::test]
    async fn non_finite_or_inverted_bars_rejected() {
        for body in [
            "2024-01-01,1,2,0.5,1.5,10\n2024-01-02,1,NaN,0.5,1.5,10\n",
            "2024-01-01,1,2,0.5,1.5,10\n2024-01-02,1,2,0.5,inf,10\n",
            "2024-01-01,1,2,0.5,1.5,10\n2024-01-02,1,0.5,2,1.5,10\n",
        ] {
            let dir = tempfile::tempdir().unwrap();
            write_csv(dir.path(), body);
            let mut feed = CsvFeed::new(dir.path(), "TEST", day(1), day(9));
            let err = feed.start().await.unwrap_err();
            assert!(matches!(err, Error::Connection(_)));
            assert!(err.to_string().contains("line 3"), "{err}");
        }
    }

    #[tokio::test]
    async fn malformed_number_names_line() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "2024-01-01,1,two,0.5,1.5,10\n");
        let mut feed = CsvFeed::new(dir.path(), "TEST", day(1), day(9));
        let err = feed.start().await.unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}

//! C2: the tape reader - a lazy, time-paced sequence of ticks read from a
//! CSV replay file (spec.md §4.2, §6).
//!
//! Columns: `ticker, ignored, YYYYMMDD, HHMMSS, price, volume, ...`. The
//! header row is skipped. Grounded on
//! `original_source/pkg/exchange/dealsFlow/delivery/csv.go`, but replaces
//! its busy "sleep 1s in a loop until caught up" pacing with the single
//! computed-delta sleep spec.md §9 calls out as the fix, and reads the
//! timestamp as `%Y%m%d%H%M%S` per spec.md §6 (the Go source parses with
//! a 12-hour-clock format string, almost certainly a transcription bug -
//! we follow the documented behavior, not the literal source).

use std::path::Path;

use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::TapeError;
use crate::types::Tick;

pub const TAPE_CHANNEL_CAPACITY: usize = 10_000;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Reads `path` to completion, pacing emission onto `tx` by the gap
/// between consecutive timestamps. Single producer: intended to run as
/// its own task, never called concurrently with itself on the same file.
pub async fn run(path: impl AsRef<Path>, tx: mpsc::Sender<Tick>) -> Result<(), TapeError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| TapeError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

    let mut last_timestamp: Option<NaiveDateTime> = None;

    for record in reader.records() {
        let record = record?;

        let ts_str = format!(
            "{}{}",
            record.get(2).unwrap_or_default(),
            record.get(3).unwrap_or_default()
        );
        let timestamp = match NaiveDateTime::parse_from_str(&ts_str, TIMESTAMP_FORMAT) {
            Ok(t) => t,
            Err(e) => {
                warn!(row = ?record, error = %e, "skipping tape row: unparseable timestamp");
                continue;
            }
        };

        if let Some(last) = last_timestamp {
            let delta = timestamp.signed_duration_since(last);
            if delta.num_seconds() > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(delta.num_seconds() as u64)).await;
            }
        }
        last_timestamp = Some(timestamp);

        let ticker = record.get(0).unwrap_or_default().to_string();

        // Quantize through f32 to match the precision orders enter with
        // (proto `Deal.price` is a wire `float`, widened in rpc.rs); the
        // matcher's equality check requires both sides to round the same way.
        let price: f64 = match record.get(4).unwrap_or_default().parse::<f32>() {
            Ok(p) => p as f64,
            Err(e) => {
                warn!(row = ?record, error = %e, "skipping tape row: unparseable price");
                continue;
            }
        };

        let volume: i32 = match record.get(5).unwrap_or_default().parse() {
            Ok(v) => v,
            Err(e) => {
                warn!(row = ?record, error = %e, "skipping tape row: unparseable volume");
                continue;
            }
        };

        if tx
            .send(Tick { ticker, price, volume })
            .await
            .is_err()
        {
            // Receiver gone (matcher shut down) - nothing left to feed.
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn drain(mut rx: mpsc::Receiver<Tick>) -> Vec<Tick> {
        let mut out = Vec::new();
        while let Some(t) = rx.recv().await {
            out.push(t);
        }
        out
    }

    #[tokio::test]
    async fn reads_ticks_skipping_the_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ticker,ignored,date,time,price,volume").unwrap();
        writeln!(file, "A,x,20240101,090000,100.0,4").unwrap();
        writeln!(file, "A,x,20240101,090000,100.0,8").unwrap();

        let (tx, rx) = mpsc::channel(TAPE_CHANNEL_CAPACITY);
        run(file.path(), tx).await.unwrap();
        let ticks = drain(rx).await;

        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].ticker, "A");
        assert_eq!(ticks[0].volume, 4);
        assert_eq!(ticks[1].volume, 8);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_not_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ticker,ignored,date,time,price,volume").unwrap();
        writeln!(file, "A,x,20240101,090000,NOTAPRICE,4").unwrap();
        writeln!(file, "A,x,20240101,090000,100.0,NOTAVOLUME").unwrap();
        writeln!(file, "A,x,20240101,090000,100.0,4").unwrap();

        let (tx, rx) = mpsc::channel(TAPE_CHANNEL_CAPACITY);
        run(file.path(), tx).await.unwrap();
        let ticks = drain(rx).await;

        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].volume, 4);
    }
}

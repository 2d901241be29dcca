//! Line-Delimited Record Ingest
//!
//! Feeds the writer's [`RecordQueue`] from a stream of newline-delimited JSON
//! update records, typically a feed handler piping into stdin. Lines that do
//! not parse are logged and skipped.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::application::services::queue::{PushOutcome, RecordQueue};
use crate::domain::record::UpdateRecord;

/// Counters from one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Records queued.
    pub accepted: u64,
    /// Records queued by evicting an older one.
    pub displaced: u64,
    /// Lines that were not valid records.
    pub rejected: u64,
}

/// Read records from `reader` into `queue` until end of input, a read error,
/// cancellation, or the queue closing. The queue is closed on end of input so
/// the writer can flush and stop.
pub async fn ingest_lines<R>(
    reader: R,
    queue: &RecordQueue,
    cancel: &CancellationToken,
) -> IngestReport
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut report = IngestReport::default();

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!(
                    accepted = report.accepted,
                    rejected = report.rejected,
                    "Ingest input ended"
                );
                queue.close();
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Ingest read failed");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: UpdateRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                report.rejected += 1;
                tracing::warn!(error = %e, "Skipping unparseable record line");
                continue;
            }
        };

        match queue.push(record) {
            PushOutcome::Accepted => report.accepted += 1,
            PushOutcome::DisplacedOldest => {
                report.accepted += 1;
                report.displaced += 1;
            }
            PushOutcome::Closed(_) => {
                tracing::debug!("Record queue closed, ingest stopping");
                break;
            }
        }
    }

    report
}

/// Run [`ingest_lines`] over the process's standard input.
pub async fn ingest_stdin(queue: &RecordQueue, cancel: &CancellationToken) -> IngestReport {
    ingest_lines(BufReader::new(tokio::io::stdin()), queue, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::ChannelKind;

    fn line(timestamp: f64) -> String {
        let record = UpdateRecord::new(
            "BINANCE",
            "BTC-USDT",
            ChannelKind::Discrete,
            timestamp,
            timestamp,
            "{\"px\":\"64000.1\"}",
        );
        serde_json::to_string(&record).unwrap()
    }

    #[tokio::test]
    async fn queues_valid_lines_and_skips_garbage() {
        let input = format!("{}\n\nnot a record\n{}\n", line(1.0), line(2.0));
        let queue = RecordQueue::new(8);

        let report = ingest_lines(input.as_bytes(), &queue, &CancellationToken::new()).await;

        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);
        assert!(queue.is_closed());
        let timestamps: Vec<f64> = queue.drain().iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn counts_displacement() {
        let input = format!("{}\n{}\n{}\n", line(1.0), line(2.0), line(3.0));
        let queue = RecordQueue::new(2);

        let report = ingest_lines(input.as_bytes(), &queue, &CancellationToken::new()).await;

        assert_eq!(report.accepted, 3);
        assert_eq!(report.displaced, 1);
    }

    #[tokio::test]
    async fn stops_when_queue_closed() {
        let input = format!("{}\n{}\n", line(1.0), line(2.0));
        let queue = RecordQueue::new(8);
        queue.close();

        let report = ingest_lines(input.as_bytes(), &queue, &CancellationToken::new()).await;
        assert_eq!(report, IngestReport::default());
    }
}

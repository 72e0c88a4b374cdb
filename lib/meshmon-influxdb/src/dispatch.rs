use std::time::Duration;

use tokio::{select, sync::mpsc, time::interval};
use tracing::{debug, warn};

use crate::{client::InfluxHttpClient, point::MetricPoint};

/// Most points a single batched write carries.
pub(crate) const BATCH_MAX_POINTS: usize = 500;

/// How long queued points wait before being flushed regardless of batch size.
pub(crate) const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity of the per-connection write queue.
pub(crate) const QUEUE_CAPACITY: usize = 1024;

/// How long an insert blocks on a full queue before its point is dropped.
pub(crate) const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Drains the write queue, batching queued points into periodic network writes.
///
/// A batch goes out when the flush interval elapses or when it reaches
/// [`BATCH_MAX_POINTS`], whichever happens first. A failed write drops the batch and
/// logs it: a storage outage must never propagate back into ingestion. When the channel
/// closes, whatever is still buffered is flushed one final time before the task exits.
pub(crate) async fn run_dispatcher(client: InfluxHttpClient, mut rx: mpsc::Receiver<MetricPoint>) {
    let mut batch: Vec<MetricPoint> = Vec::with_capacity(BATCH_MAX_POINTS);

    let mut flush_ticker = interval(FLUSH_INTERVAL);
    // The first tick completes immediately.
    flush_ticker.tick().await;

    loop {
        select! {
            maybe_point = rx.recv() => match maybe_point {
                Some(point) => {
                    batch.push(point);
                    if batch.len() >= BATCH_MAX_POINTS {
                        flush(&client, &mut batch).await;
                        flush_ticker.reset();
                    }
                }
                None => break,
            },

            _ = flush_ticker.tick() => flush(&client, &mut batch).await,
        }
    }

    flush(&client, &mut batch).await;
    debug!("Batch dispatcher stopped.");
}

async fn flush(client: &InfluxHttpClient, batch: &mut Vec<MetricPoint>) {
    if batch.is_empty() {
        return;
    }

    let points = batch.len();
    match client.write(batch).await {
        Ok(()) => debug!(points, "Wrote batch."),
        Err(e) => warn!(error = %e, points, "Batch write failed, dropping points."),
    }
    batch.clear();
}

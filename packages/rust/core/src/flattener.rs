//! Re-emits batches as an unbatched record stream.

use geoenrich_shared::{GeoenrichError, Record, Result};
use tokio::sync::mpsc;

use crate::batch::Batch;

/// Send every record of `batch` downstream, in order.
///
/// Returns once the whole batch has been accepted, so the next batch is not
/// pulled before this one is out. A closed receiver ends the run.
pub async fn emit(batch: Batch, output: &mpsc::Sender<Record>) -> Result<usize> {
    let mut sent = 0;
    for record in batch.into_records() {
        output.send(record).await.map_err(|_| {
            tracing::debug!(sent, "downstream receiver closed");
            GeoenrichError::Cancelled
        })?;
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(n: usize) -> Batch {
        let records = (0..n)
            .map(|i| serde_json::from_value(json!({ "n": i })).unwrap())
            .collect();
        Batch::new(0, records)
    }

    #[tokio::test]
    async fn emits_records_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let sent = emit(batch(3), &tx).await.unwrap();
        drop(tx);

        assert_eq!(sent, 3);
        let mut seen = Vec::new();
        while let Some(r) = rx.recv().await {
            seen.push(r.get("n").and_then(|v| v.as_u64()).unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn closed_receiver_stops_the_run() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = emit(batch(2), &tx).await.unwrap_err();
        assert!(matches!(err, GeoenrichError::Cancelled));
    }
}

//! Work planner
//!
//! Splits the inclusive target range into one contiguous shard per worker
//! (the last shard absorbs the remainder), chops every shard into inner
//! batches, and feeds those batches into the bounded batch queue. Batches from
//! all shards are interleaved so every region of the range makes progress.

use async_channel::Sender;
use std::ops::RangeInclusive;
use tokio_util::sync::CancellationToken;

/// A contiguous, inclusive slice of the target range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub index: usize,
    pub lo: u64,
    pub hi: u64,
}

impl Shard {
    pub fn len(&self) -> u64 {
        self.hi - self.lo + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Chops the shard into batches of at most `batch_inner` targets
    pub fn batches(&self, batch_inner: usize) -> Vec<InnerBatch> {
        let step = batch_inner.max(1) as u64;
        let mut batches = Vec::new();
        let mut start = self.lo;

        loop {
            let end = start.saturating_add(step - 1).min(self.hi);
            batches.push(InnerBatch {
                shard: self.index,
                lo: start,
                hi: end,
            });
            if end >= self.hi {
                break;
            }
            start = end + 1;
        }

        batches
    }
}

/// Planning unit pulled by workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerBatch {
    pub shard: usize,
    pub lo: u64,
    pub hi: u64,
}

impl InnerBatch {
    pub fn targets(&self) -> RangeInclusive<u64> {
        self.lo..=self.hi
    }

    pub fn len(&self) -> u64 {
        self.hi - self.lo + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Partitions `[lo, hi]` into at most `workers` contiguous shards
///
/// When the range holds fewer targets than there are workers, one
/// single-target shard is produced per target and no empty shards exist.
///
/// # Example
///
/// ```
/// use id_sweep::sweep::plan_shards;
///
/// let shards = plan_shards(1, 10, 3);
/// assert_eq!(shards.len(), 3);
/// assert_eq!((shards[0].lo, shards[0].hi), (1, 3));
/// assert_eq!((shards[2].lo, shards[2].hi), (7, 10));
/// ```
pub fn plan_shards(lo: u64, hi: u64, workers: usize) -> Vec<Shard> {
    if lo > hi {
        return Vec::new();
    }

    let total = hi - lo + 1;
    let count = (workers.max(1) as u64).min(total);
    let size = total / count;

    (0..count)
        .map(|i| {
            let start = lo + i * size;
            let end = if i == count - 1 { hi } else { start + size - 1 };
            Shard {
                index: i as usize,
                lo: start,
                hi: end,
            }
        })
        .collect()
}

/// Feeds inner batches into the batch queue, round-robin across shards
///
/// Blocks while the queue is full. Stops early when cancelled or when every
/// worker has gone away. The queue closes when the returned future completes
/// and the sender is dropped.
///
/// # Returns
///
/// The number of batches queued
pub async fn feed_batches(
    shards: Vec<Shard>,
    batch_inner: usize,
    queue: Sender<InnerBatch>,
    cancel: CancellationToken,
) -> usize {
    let mut per_shard: Vec<std::vec::IntoIter<InnerBatch>> = shards
        .iter()
        .map(|s| s.batches(batch_inner).into_iter())
        .collect();
    let mut queued = 0;

    loop {
        let mut progressed = false;
        for batches in per_shard.iter_mut() {
            let Some(batch) = batches.next() else {
                continue;
            };
            progressed = true;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(queued, "Planner stopped by cancellation");
                    return queued;
                }
                sent = queue.send(batch) => {
                    if sent.is_err() {
                        tracing::debug!(queued, "Batch queue closed, planner stopping");
                        return queued;
                    }
                    queued += 1;
                }
            }
        }
        if !progressed {
            break;
        }
    }

    tracing::debug!(queued, "Planner finished");
    queued
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten(shards: &[Shard]) -> Vec<u64> {
        shards.iter().flat_map(|s| s.lo..=s.hi).collect()
    }

    #[test]
    fn test_partition_has_no_gaps_or_overlap() {
        for (lo, hi, workers) in [(1, 100, 5), (1, 101, 4), (7, 9, 8), (1, 1, 1), (50, 5000, 13)] {
            let shards = plan_shards(lo, hi, workers);
            let expected: Vec<u64> = (lo..=hi).collect();
            assert_eq!(flatten(&shards), expected, "range {}..={} / {}", lo, hi, workers);
        }
    }

    #[test]
    fn test_last_shard_absorbs_remainder() {
        let shards = plan_shards(1, 10, 4);
        let lengths: Vec<u64> = shards.iter().map(Shard::len).collect();
        assert_eq!(lengths, vec![2, 2, 2, 4]);
    }

    #[test]
    fn test_more_workers_than_targets() {
        let shards = plan_shards(100, 100, 16);
        assert_eq!(shards, vec![Shard { index: 0, lo: 100, hi: 100 }]);
    }

    #[test]
    fn test_shard_batches() {
        let shard = Shard { index: 0, lo: 1, hi: 10 };
        let batches = shard.batches(4);
        let bounds: Vec<(u64, u64)> = batches.iter().map(|b| (b.lo, b.hi)).collect();
        assert_eq!(bounds, vec![(1, 4), (5, 8), (9, 10)]);
    }

    #[test]
    fn test_batches_near_u64_max() {
        let shard = Shard { index: 0, lo: u64::MAX - 2, hi: u64::MAX };
        let batches = shard.batches(10);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn test_feed_interleaves_shards() {
        let (tx, rx) = async_channel::bounded(100);
        let shards = plan_shards(1, 8, 2);
        let queued = feed_batches(shards, 2, tx, CancellationToken::new()).await;
        assert_eq!(queued, 4);

        let mut order = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            order.push((batch.shard, batch.lo));
        }
        assert_eq!(order, vec![(0, 1), (1, 5), (0, 3), (1, 7)]);
        assert!(rx.is_closed());
    }

    #[tokio::test]
    async fn test_feed_stops_on_cancel() {
        let (tx, rx) = async_channel::bounded(1);
        let cancel = CancellationToken::new();
        let shards = plan_shards(1, 100, 1);

        let handle = tokio::spawn(feed_batches(shards, 10, tx, cancel.clone()));
        // One batch fits in the queue, the planner then blocks
        let first = rx.recv().await.unwrap();
        assert_eq!(first.lo, 1);
        cancel.cancel();

        let queued = handle.await.unwrap();
        assert!(queued < 10);
    }
}

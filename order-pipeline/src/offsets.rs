//! Commit bookkeeping for one consumer group membership.

use crate::transport::CommitPosition;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// When processed offsets are pushed to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Commit after every processed message.
    PerMessage,
    /// Commit pending offsets at most once per interval.
    Interval(Duration),
}

impl CommitPolicy {
    /// `Duration::ZERO` means per-message commits.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            Self::PerMessage
        } else {
            Self::Interval(interval)
        }
    }
}

/// Tracks, per partition, the next offset to commit and whether the broker
/// has it yet.
#[derive(Debug)]
pub struct OffsetTracker {
    policy: CommitPolicy,
    pending: BTreeMap<i32, i64>,
    committed: BTreeMap<i32, i64>,
    last_commit: Instant,
}

impl OffsetTracker {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            pending: BTreeMap::new(),
            committed: BTreeMap::new(),
            last_commit: Instant::now(),
        }
    }

    /// Records that the message at `offset` is done with.
    pub fn mark(&mut self, partition: i32, offset: i64) {
        let next = offset + 1;
        let floor = self.committed.get(&partition).copied().unwrap_or(i64::MIN);
        if next <= floor {
            return;
        }
        let entry = self.pending.entry(partition).or_insert(next);
        if next > *entry {
            *entry = next;
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Whether the policy wants a commit now.
    pub fn is_due(&self) -> bool {
        if !self.has_pending() {
            return false;
        }
        match self.policy {
            CommitPolicy::PerMessage => true,
            CommitPolicy::Interval(interval) => self.last_commit.elapsed() >= interval,
        }
    }

    /// Positions to send to the broker.
    pub fn pending(&self) -> Vec<CommitPosition> {
        self.pending
            .iter()
            .map(|(partition, next_offset)| CommitPosition {
                partition: *partition,
                next_offset: *next_offset,
            })
            .collect()
    }

    /// Records that `positions` reached the broker.
    pub fn committed(&mut self, positions: &[CommitPosition]) {
        for position in positions {
            self.committed.insert(position.partition, position.next_offset);
            if self.pending.get(&position.partition) == Some(&position.next_offset) {
                self.pending.remove(&position.partition);
            }
        }
        self.last_commit = Instant::now();
    }

    /// Last committed next-offset for a partition.
    pub fn committed_offset(&self, partition: i32) -> Option<i64> {
        self.committed.get(&partition).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_message_is_due_after_mark() {
        let mut tracker = OffsetTracker::new(CommitPolicy::PerMessage);
        assert!(!tracker.is_due());

        tracker.mark(0, 4);
        assert!(tracker.is_due());
        assert_eq!(
            tracker.pending(),
            vec![CommitPosition {
                partition: 0,
                next_offset: 5
            }]
        );
    }

    #[test]
    fn test_mark_keeps_highest_offset() {
        let mut tracker = OffsetTracker::new(CommitPolicy::PerMessage);
        tracker.mark(1, 7);
        tracker.mark(1, 3);
        tracker.mark(0, 0);

        let pending = tracker.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].partition, 0);
        assert_eq!(pending[1].next_offset, 8);
    }

    #[test]
    fn test_committed_clears_pending_and_ignores_stale_marks() {
        let mut tracker = OffsetTracker::new(CommitPolicy::PerMessage);
        tracker.mark(0, 9);
        let positions = tracker.pending();
        tracker.committed(&positions);

        assert!(!tracker.has_pending());
        assert_eq!(tracker.committed_offset(0), Some(10));

        tracker.mark(0, 5);
        assert!(!tracker.has_pending());
    }

    #[test]
    fn test_failed_commit_keeps_positions_queued() {
        let mut tracker = OffsetTracker::new(CommitPolicy::PerMessage);
        tracker.mark(0, 2);
        tracker.mark(1, 0);
        let attempted = tracker.pending();

        // Commit rejected by the broker: `committed` is never called.
        assert!(tracker.is_due());
        assert_eq!(tracker.pending(), attempted);
        assert_eq!(tracker.committed_offset(0), None);

        tracker.mark(0, 3);
        let retried = tracker.pending();
        assert_eq!(
            retried,
            vec![
                CommitPosition {
                    partition: 0,
                    next_offset: 4
                },
                CommitPosition {
                    partition: 1,
                    next_offset: 1
                },
            ]
        );

        tracker.committed(&retried);
        assert!(!tracker.has_pending());
        assert_eq!(tracker.committed_offset(0), Some(4));
        assert_eq!(tracker.committed_offset(1), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_policy_waits() {
        let mut tracker = OffsetTracker::new(CommitPolicy::Interval(Duration::from_secs(1)));
        tracker.mark(0, 0);
        assert!(!tracker.is_due());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(tracker.is_due());
    }

    #[test]
    fn test_zero_interval_is_per_message() {
        assert_eq!(
            CommitPolicy::from_interval(Duration::ZERO),
            CommitPolicy::PerMessage
        );
        assert_eq!(
            CommitPolicy::from_interval(Duration::from_secs(1)),
            CommitPolicy::Interval(Duration::from_secs(1))
        );
    }
}

//! Approximate-time pairing of two independently published streams.
//!
//! Each stream keeps a bounded FIFO of unmatched messages. A new message is
//! paired with the closest-stamped entry of the opposite queue when the stamps
//! differ by at most the configured tolerance. Both streams are expected to be
//! monotonic; out-of-order messages are dropped on arrival, and entries that
//! can no longer produce an in-order pair are evicted eagerly. Emitted pairs
//! are therefore non-decreasing in both left and right stamps.
//!
//! The synchronizer knows nothing about transports or decoding. It is driven
//! through `&mut self` from a single dispatch context and needs no locking.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Anything carrying an acquisition stamp in nanoseconds
pub trait Stamped {
    fn stamp(&self) -> u64;
}

impl Stamped for crate::schemas::RawImage {
    fn stamp(&self) -> u64 {
        self.header.as_ref().map(|h| h.acq_time).unwrap_or(0)
    }
}

/// Which camera a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSide {
    Left,
    Right,
}

impl StreamSide {
    pub fn other(self) -> Self {
        match self {
            StreamSide::Left => StreamSide::Right,
            StreamSide::Right => StreamSide::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamSide::Left => "left",
            StreamSide::Right => "right",
        }
    }
}

impl fmt::Display for StreamSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matching parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Unmatched messages kept per stream
    pub queue_size: usize,
    /// Largest accepted stamp difference within a pair
    pub tolerance: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            queue_size: 10,
            tolerance: Duration::from_millis(20),
        }
    }
}

/// Synchronizer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Pairs matched
    pub pairs: u64,
    /// Messages discarded without a partner (capacity or staleness)
    pub evicted: u64,
    /// Messages older than their own stream's last accepted stamp
    pub late: u64,
}

/// Callback receiving `(left, right)` for every match
pub type PairCallback<M> = Box<dyn FnMut(M, M) + Send>;

/// Two-stream approximate-time synchronizer
pub struct ApproximateTimeSync<M> {
    policy: SyncPolicy,
    tolerance_ns: u64,
    left: VecDeque<M>,
    right: VecDeque<M>,
    last_left: Option<u64>,
    last_right: Option<u64>,
    callback: Option<PairCallback<M>>,
    stats: SyncStats,
}

impl<M: Stamped> ApproximateTimeSync<M> {
    pub fn new(policy: SyncPolicy) -> Self {
        let queue_size = policy.queue_size.max(1);
        Self {
            policy: SyncPolicy {
                queue_size,
                ..policy
            },
            tolerance_ns: u64::try_from(policy.tolerance.as_nanos()).unwrap_or(u64::MAX),
            left: VecDeque::with_capacity(queue_size),
            right: VecDeque::with_capacity(queue_size),
            last_left: None,
            last_right: None,
            callback: None,
            stats: SyncStats::default(),
        }
    }

    /// Register the pair callback, replacing any previous one
    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: FnMut(M, M) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Number of unmatched messages waiting on one side
    pub fn pending(&self, side: StreamSide) -> usize {
        self.queue(side).len()
    }

    /// Drop every buffered message and forget the per-stream stamps
    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
        self.last_left = None;
        self.last_right = None;
    }

    pub fn add_left(&mut self, msg: M) {
        self.add(StreamSide::Left, msg);
    }

    pub fn add_right(&mut self, msg: M) {
        self.add(StreamSide::Right, msg);
    }

    /// Feed one message; invokes the callback at most once
    pub fn add(&mut self, side: StreamSide, msg: M) {
        let stamp = msg.stamp();

        if let Some(last) = self.last_stamp(side).filter(|last| stamp < *last) {
            self.stats.late += 1;
            log::debug!(
                "[{}] dropping late message at {} ns (last accepted {} ns)",
                side,
                stamp,
                last
            );
            return;
        }
        *self.last_stamp_mut(side) = Some(stamp);

        // The opposite stream is monotonic too: its entries this far behind
        // cannot pair with this message or any later one.
        let horizon = stamp.saturating_sub(self.tolerance_ns);
        let stale = self
            .queue(side.other())
            .iter()
            .take_while(|m| m.stamp() < horizon)
            .count();
        self.evict_front(side.other(), stale);

        let tolerance = self.tolerance_ns;
        let best = self
            .queue(side.other())
            .iter()
            .enumerate()
            .map(|(idx, m)| (idx, m.stamp().abs_diff(stamp)))
            .filter(|(_, diff)| *diff <= tolerance)
            .min_by_key(|(_, diff)| *diff)
            .map(|(idx, _)| idx);

        match best {
            Some(idx) => {
                // Older candidates would break pair ordering once this one is emitted.
                self.evict_front(side.other(), idx);
                let Some(partner) = self.queue_mut(side.other()).pop_front() else {
                    return;
                };
                let older = self
                    .queue(side)
                    .iter()
                    .take_while(|m| m.stamp() < stamp)
                    .count();
                self.evict_front(side, older);

                match side {
                    StreamSide::Left => self.emit(msg, partner),
                    StreamSide::Right => self.emit(partner, msg),
                }
            }
            None => {
                let newest_other = self.queue(side.other()).back().map(|m| m.stamp());
                if newest_other.is_some_and(|t| t > stamp.saturating_add(tolerance)) {
                    self.stats.evicted += 1;
                    log::debug!(
                        "[{}] no partner possible for {} ns, {} stream is already at {} ns",
                        side,
                        stamp,
                        side.other(),
                        newest_other.unwrap_or_default()
                    );
                    return;
                }

                let queue_size = self.policy.queue_size;
                let queue = self.queue_mut(side);
                queue.push_back(msg);
                if queue.len() > queue_size {
                    self.evict_front(side, 1);
                }
            }
        }
    }

    fn emit(&mut self, left: M, right: M) {
        self.stats.pairs += 1;
        log::trace!(
            "pair matched: left {} ns, right {} ns",
            left.stamp(),
            right.stamp()
        );
        match self.callback.as_mut() {
            Some(callback) => callback(left, right),
            None => log::debug!("pair matched with no callback registered, discarding"),
        }
    }

    fn evict_front(&mut self, side: StreamSide, count: usize) {
        if count == 0 {
            return;
        }
        let queue = self.queue_mut(side);
        let count = count.min(queue.len());
        for m in queue.drain(..count) {
            log::debug!("[{}] sync miss, evicting message at {} ns", side, m.stamp());
        }
        self.stats.evicted += count as u64;
    }

    fn queue(&self, side: StreamSide) -> &VecDeque<M> {
        match side {
            StreamSide::Left => &self.left,
            StreamSide::Right => &self.right,
        }
    }

    fn queue_mut(&mut self, side: StreamSide) -> &mut VecDeque<M> {
        match side {
            StreamSide::Left => &mut self.left,
            StreamSide::Right => &mut self.right,
        }
    }

    fn last_stamp(&self, side: StreamSide) -> Option<u64> {
        match side {
            StreamSide::Left => self.last_left,
            StreamSide::Right => self.last_right,
        }
    }

    fn last_stamp_mut(&mut self, side: StreamSide) -> &mut Option<u64> {
        match side {
            StreamSide::Left => &mut self.last_left,
            StreamSide::Right => &mut self.last_right,
        }
    }
}

//! Reassembly of signals logged across several entries
//!
//! The board logs at most four bytes per entry, so a longer signal is logged
//! through one logger per 4-byte chunk. Entries of the different loggers may
//! arrive in any order; [`MergeQueue`] keeps one FIFO per logger and emits
//! the concatenated bytes once every FIFO holds at least one entry.

use crate::protocol::LOG_ENTRY_SIZE;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct MergeQueue {
    ids: Vec<u8>,
    queues: Vec<VecDeque<(DateTime<Utc>, [u8; LOG_ENTRY_SIZE])>>,
}

impl MergeQueue {
    /// Queue for the loggers `ids`, in the order their chunks are concatenated
    pub fn new(ids: Vec<u8>) -> Self {
        let queues = vec![VecDeque::new(); ids.len()];
        Self { ids, queues }
    }

    pub fn ids(&self) -> &[u8] {
        &self.ids
    }

    pub fn contains(&self, id: u8) -> bool {
        self.ids.contains(&id)
    }

    /// Add one entry; returns the merged bytes when every chunk is present
    ///
    /// The merged sample takes the timestamp of its first chunk.
    pub fn push(
        &mut self,
        id: u8,
        timestamp: DateTime<Utc>,
        data: [u8; LOG_ENTRY_SIZE],
    ) -> Option<(DateTime<Utc>, Vec<u8>)> {
        let slot = self.ids.iter().position(|i| *i == id)?;
        self.queues[slot].push_back((timestamp, data));

        if self.queues.iter().any(VecDeque::is_empty) {
            return None;
        }
        let mut merged = Vec::with_capacity(self.ids.len() * LOG_ENTRY_SIZE);
        let mut first = None;
        for queue in &mut self.queues {
            let (ts, chunk) = queue.pop_front()?;
            first.get_or_insert(ts);
            merged.extend_from_slice(&chunk);
        }
        first.map(|ts| (ts, merged))
    }

    /// Entries waiting for their siblings
    pub fn pending(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn clear(&mut self) {
        self.queues.iter_mut().for_each(VecDeque::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_single_logger_passes_through() {
        let mut queue = MergeQueue::new(vec![5]);
        let now = Utc::now();
        let (ts, bytes) = queue.push(5, now, [1, 2, 3, 4]).unwrap();
        assert_eq!(ts, now);
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_order_chunks() {
        let mut queue = MergeQueue::new(vec![0, 1, 2]);
        let t0 = Utc::now();

        assert!(queue.push(2, t0 + Duration::milliseconds(2), [9, 9, 9, 9]).is_none());
        assert!(queue.push(0, t0, [1, 1, 1, 1]).is_none());
        let (ts, bytes) = queue.push(1, t0 + Duration::milliseconds(1), [5, 5, 5, 5]).unwrap();

        assert_eq!(ts, t0);
        assert_eq!(bytes, vec![1, 1, 1, 1, 5, 5, 5, 5, 9, 9, 9, 9]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_unknown_id_ignored() {
        let mut queue = MergeQueue::new(vec![0, 1]);
        assert!(queue.push(7, Utc::now(), [0; 4]).is_none());
        assert_eq!(queue.pending(), 0);
    }
}

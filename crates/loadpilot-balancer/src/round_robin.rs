//! Per-workload-type round-robin cursors.
//!
//! Each workload type keeps its own rotating position so that, for
//! example, price updates and trade executions rotate independently
//! across the same candidate set. Positions wrap around the candidate
//! count of each call, so the set may grow or shrink as components fail
//! and recover.

use std::collections::HashMap;
use std::sync::Mutex;

use loadpilot_state::WorkloadType;

#[derive(Default)]
pub struct WorkloadCursors {
    positions: Mutex<HashMap<WorkloadType, usize>>,
}

impl WorkloadCursors {
    /// Index of the next candidate for `workload` among `count`; `None`
    /// when there are no candidates.
    pub fn next(&self, workload: WorkloadType, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        let mut positions = self.positions.lock().unwrap_or_else(|e| e.into_inner());
        let position = positions.entry(workload).or_insert(0);
        let idx = *position % count;
        *position = position.wrapping_add(1);
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_and_wraps() {
        let cursors = WorkloadCursors::default();
        let picks: Vec<_> = (0..4)
            .filter_map(|_| cursors.next(WorkloadType::PriceUpdate, 3))
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn no_candidates_does_not_advance() {
        let cursors = WorkloadCursors::default();
        assert_eq!(cursors.next(WorkloadType::PriceUpdate, 0), None);
        assert_eq!(cursors.next(WorkloadType::PriceUpdate, 2), Some(0));
    }

    #[test]
    fn follows_a_growing_candidate_set() {
        let cursors = WorkloadCursors::default();
        assert_eq!(cursors.next(WorkloadType::TradeExecution, 2), Some(0));
        assert_eq!(cursors.next(WorkloadType::TradeExecution, 2), Some(1));

        // A component recovers; the candidate list grows.
        assert_eq!(cursors.next(WorkloadType::TradeExecution, 4), Some(2));
        assert_eq!(cursors.next(WorkloadType::TradeExecution, 4), Some(3));
        assert_eq!(cursors.next(WorkloadType::TradeExecution, 4), Some(0));
    }

    #[test]
    fn workload_types_rotate_independently() {
        let cursors = WorkloadCursors::default();

        assert_eq!(cursors.next(WorkloadType::PriceUpdate, 3), Some(0));
        assert_eq!(cursors.next(WorkloadType::PriceUpdate, 3), Some(1));
        assert_eq!(cursors.next(WorkloadType::TradeExecution, 3), Some(0));
        assert_eq!(cursors.next(WorkloadType::PriceUpdate, 3), Some(2));
        assert_eq!(cursors.next(WorkloadType::TradeExecution, 3), Some(1));
    }
}

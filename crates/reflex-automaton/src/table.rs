//! Specialized transition tables
//!
//! Every minimized state's dense transition map is lowered into the
//! narrowest representation that covers it exactly, trading between memory
//! and per-byte dispatch cost. Alternates is the fallback for irregular
//! multi-range maps and dispatches by binary search over sorted lower
//! bounds.

use std::collections::BTreeMap;

/// Index of a state in its automaton's arena
pub type StateId = usize;

/// Widest populated span a Lookup table will cover
const LOOKUP_MAX_SPAN: usize = 64;

/// Per-state transition dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionTable {
    /// No outgoing edges
    Empty,
    /// Exactly one byte value
    Singleton { byte: u8, target: StateId },
    /// One contiguous inclusive range
    Range { lo: u8, hi: u8, target: StateId },
    /// Every byte (wildcard)
    All { target: StateId },
    /// Dense array indexed by `byte - offset`; entries may be gaps
    Lookup {
        offset: u8,
        targets: Vec<Option<StateId>>,
    },
    /// Sorted lower bounds selecting among sub-tables
    Alternates {
        bounds: Vec<u8>,
        tables: Vec<TransitionTable>,
    },
}

impl TransitionTable {
    /// Look up the successor for one byte
    pub fn next(&self, byte: u8) -> Option<StateId> {
        match self {
            TransitionTable::Empty => None,
            TransitionTable::Singleton { byte: b, target } => (byte == *b).then_some(*target),
            TransitionTable::Range { lo, hi, target } => {
                (byte >= *lo && byte <= *hi).then_some(*target)
            }
            TransitionTable::All { target } => Some(*target),
            TransitionTable::Lookup { offset, targets } => {
                let index = byte.checked_sub(*offset)? as usize;
                targets.get(index).copied().flatten()
            }
            TransitionTable::Alternates { bounds, tables } => {
                let slot = bounds.partition_point(|&b| b <= byte);
                if slot == 0 {
                    return None;
                }
                tables.get(slot - 1)?.next(byte)
            }
        }
    }

    /// Whether the table has no outgoing edges
    pub fn is_empty(&self) -> bool {
        matches!(self, TransitionTable::Empty)
    }

    /// Emit the narrowest variant covering `map` exactly
    pub fn specialize(map: &BTreeMap<u8, StateId>) -> TransitionTable {
        if map.is_empty() {
            return TransitionTable::Empty;
        }
        if map.len() == 1 {
            let (&byte, &target) = map.iter().next().unwrap_or((&0, &0));
            return TransitionTable::Singleton { byte, target };
        }

        // contiguous single-target runs, in byte order
        let runs = contiguous_runs(map);

        if let [(lo, hi, target)] = runs[..] {
            return if lo == 0x00 && hi == 0xFF {
                TransitionTable::All { target }
            } else {
                TransitionTable::Range { lo, hi, target }
            };
        }

        let lo = runs[0].0;
        let hi = runs[runs.len() - 1].1;
        let span = hi as usize - lo as usize + 1;
        if span <= LOOKUP_MAX_SPAN {
            let mut targets = vec![None; span];
            for (&byte, &target) in map {
                targets[(byte - lo) as usize] = Some(target);
            }
            return TransitionTable::Lookup {
                offset: lo,
                targets,
            };
        }

        // fallback: one sub-table per run, empty regions covering the gaps
        let mut bounds = Vec::new();
        let mut tables = Vec::new();
        for (index, &(run_lo, run_hi, target)) in runs.iter().enumerate() {
            bounds.push(run_lo);
            tables.push(if run_lo == run_hi {
                TransitionTable::Singleton {
                    byte: run_lo,
                    target,
                }
            } else {
                TransitionTable::Range {
                    lo: run_lo,
                    hi: run_hi,
                    target,
                }
            });
            let gap_start = run_hi as usize + 1;
            if let Some(&(next_lo, _, _)) = runs.get(index + 1) {
                if gap_start < next_lo as usize {
                    bounds.push(gap_start as u8);
                    tables.push(TransitionTable::Empty);
                }
            }
        }
        TransitionTable::Alternates { bounds, tables }
    }

    /// Sorted byte values with an outgoing edge, for diagnostics
    pub fn accepted_bytes(&self) -> Vec<u8> {
        match self {
            TransitionTable::Empty => Vec::new(),
            TransitionTable::Singleton { byte, .. } => vec![*byte],
            TransitionTable::Range { lo, hi, .. } => (*lo..=*hi).collect(),
            TransitionTable::All { .. } => (0x00..=0xFF).collect(),
            TransitionTable::Lookup { offset, targets } => targets
                .iter()
                .enumerate()
                .filter(|(_, t)| t.is_some())
                .map(|(i, _)| offset + i as u8)
                .collect(),
            TransitionTable::Alternates { tables, .. } => {
                tables.iter().flat_map(|t| t.accepted_bytes()).collect()
            }
        }
    }

    /// Visit every target state id in the table
    pub fn for_each_target(&self, f: &mut impl FnMut(StateId)) {
        match self {
            TransitionTable::Empty => {}
            TransitionTable::Singleton { target, .. }
            | TransitionTable::Range { target, .. }
            | TransitionTable::All { target } => f(*target),
            TransitionTable::Lookup { targets, .. } => {
                for target in targets.iter().flatten() {
                    f(*target);
                }
            }
            TransitionTable::Alternates { tables, .. } => {
                for table in tables {
                    table.for_each_target(f);
                }
            }
        }
    }
}

/// Maximal runs of consecutive bytes mapping to the same target
fn contiguous_runs(map: &BTreeMap<u8, StateId>) -> Vec<(u8, u8, StateId)> {
    let mut runs: Vec<(u8, u8, StateId)> = Vec::new();
    for (&byte, &target) in map {
        match runs.last_mut() {
            Some((_, hi, run_target))
                if *run_target == target && *hi as usize + 1 == byte as usize =>
            {
                *hi = byte;
            }
            _ => runs.push((byte, byte, target)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(u8, StateId)]) -> BTreeMap<u8, StateId> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_specialize_empty_and_singleton() {
        assert_eq!(TransitionTable::specialize(&map(&[])), TransitionTable::Empty);
        assert_eq!(
            TransitionTable::specialize(&map(&[(0x42, 7)])),
            TransitionTable::Singleton { byte: 0x42, target: 7 }
        );
    }

    #[test]
    fn test_specialize_range_and_all() {
        let range = TransitionTable::specialize(&map(&[(0x10, 3), (0x11, 3), (0x12, 3)]));
        assert_eq!(range, TransitionTable::Range { lo: 0x10, hi: 0x12, target: 3 });

        let every: BTreeMap<u8, StateId> = (0x00..=0xFF).map(|b| (b, 9)).collect();
        assert_eq!(
            TransitionTable::specialize(&every),
            TransitionTable::All { target: 9 }
        );
    }

    #[test]
    fn test_specialize_lookup_for_clustered_bytes() {
        let table = TransitionTable::specialize(&map(&[(0x10, 1), (0x12, 2), (0x15, 3)]));
        assert!(matches!(table, TransitionTable::Lookup { offset: 0x10, .. }));

        assert_eq!(table.next(0x10), Some(1));
        assert_eq!(table.next(0x11), None);
        assert_eq!(table.next(0x12), Some(2));
        assert_eq!(table.next(0x15), Some(3));
        assert_eq!(table.next(0x16), None);
        assert_eq!(table.next(0x0F), None);
    }

    #[test]
    fn test_specialize_alternates_for_sparse_ranges() {
        let table = TransitionTable::specialize(&map(&[
            (0x01, 1),
            (0x02, 1),
            (0x80, 2),
            (0xF0, 3),
            (0xF1, 3),
        ]));
        assert!(matches!(table, TransitionTable::Alternates { .. }));

        assert_eq!(table.next(0x01), Some(1));
        assert_eq!(table.next(0x02), Some(1));
        assert_eq!(table.next(0x03), None);
        assert_eq!(table.next(0x80), Some(2));
        assert_eq!(table.next(0x81), None);
        assert_eq!(table.next(0xF0), Some(3));
        assert_eq!(table.next(0xF1), Some(3));
        assert_eq!(table.next(0xF2), None);
        assert_eq!(table.next(0x00), None);
    }

    #[test]
    fn test_accepted_bytes_sorted() {
        let table = TransitionTable::specialize(&map(&[(0x80, 2), (0x01, 1), (0xF0, 3)]));
        assert_eq!(table.accepted_bytes(), vec![0x01, 0x80, 0xF0]);
    }

    #[test]
    fn test_adjacent_runs_different_targets() {
        // two touching ranges with different targets must stay distinct
        let table = TransitionTable::specialize(&map(&[(0x00, 1), (0x01, 2)]));
        assert_eq!(table.next(0x00), Some(1));
        assert_eq!(table.next(0x01), Some(2));
        assert_eq!(table.next(0x02), None);
    }
}

//! Subset construction, value merging and minimization
//!
//! The DFA stage turns the shared NFA into a deterministic automaton over
//! the full byte alphabet. Each DFA state's value is the merge of the
//! accept values of every NFA accepting state in its subset, in pattern
//! insertion order. Minimization then collapses states with identical
//! values and identical transition behavior.

use std::collections::{BTreeMap, HashMap};

use crate::automaton::{AutomatonState, ByteAutomaton, StateKind};
use crate::nfa::Nfa;
use crate::table::TransitionTable;

#[derive(Debug, Clone)]
struct DfaState<V> {
    accepting: bool,
    value: V,
    transitions: BTreeMap<u8, usize>,
}

/// Deterministic automaton with dense transition maps
///
/// Intermediate form between subset construction and the specialized
/// [`ByteAutomaton`]; kept public so minimization equivalence can be tested
/// against the unminimized machine.
#[derive(Debug, Clone)]
pub struct Dfa<V> {
    states: Vec<DfaState<V>>,
    start: usize,
}

impl<V: Clone + PartialEq> Dfa<V> {
    /// Subset construction over the byte alphabet
    ///
    /// `merge` flattens the accept values present in one subset (ordered by
    /// pattern insertion) into the state's single value; called with an
    /// empty slice for non-accepting states.
    pub fn from_nfa(nfa: &Nfa<V>, merge: impl Fn(&[&V]) -> V) -> Self {
        let start_set = nfa.epsilon_closure(&[nfa.start()]);

        let mut subset_index: HashMap<Vec<usize>, usize> = HashMap::new();
        subset_index.insert(start_set.clone(), 0);

        let mut subsets = vec![start_set];
        let mut states: Vec<DfaState<V>> = Vec::new();
        let mut next = 0;

        while next < subsets.len() {
            let subset = subsets[next].clone();
            next += 1;

            let accept_indexes = nfa.accepts(&subset);
            let accept_values: Vec<&V> =
                accept_indexes.iter().map(|&i| nfa.value(i)).collect();

            let mut transitions = BTreeMap::new();
            for byte in 0..=0xFFu8 {
                let moved = nfa.step(&subset, byte);
                if moved.is_empty() {
                    continue;
                }
                let closure = nfa.epsilon_closure(&moved);
                let target = match subset_index.get(&closure) {
                    Some(&id) => id,
                    None => {
                        let id = subsets.len();
                        subset_index.insert(closure.clone(), id);
                        subsets.push(closure);
                        id
                    }
                };
                transitions.insert(byte, target);
            }

            states.push(DfaState {
                accepting: !accept_indexes.is_empty(),
                value: merge(&accept_values),
                transitions,
            });
        }

        Self { states, start: 0 }
    }

    /// Number of states
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the automaton has no states
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Run the dense-table machine directly
    ///
    /// Same fail-fast semantics as the specialized automaton; used to check
    /// that minimization and specialization preserve behavior.
    pub fn matches(&self, input: &[u8]) -> Option<&V> {
        let mut current = self.start;
        for &byte in input {
            current = *self.states[current].transitions.get(&byte)?;
        }
        let state = &self.states[current];
        state.accepting.then_some(&state.value)
    }

    /// Merge states with identical values and transition behavior
    ///
    /// Standard partition refinement: the initial partition groups states
    /// by (accepting, value); classes are split until every pair in a class
    /// agrees on the class of its target for all 256 bytes.
    pub fn minimize(&self) -> Self {
        // class id per state, seeded by (accepting, value)
        let mut class_of: Vec<usize> = vec![0; self.states.len()];
        {
            let mut keys: Vec<(bool, &V)> = Vec::new();
            for (id, state) in self.states.iter().enumerate() {
                let key = (state.accepting, &state.value);
                let class = match keys.iter().position(|k| *k == key) {
                    Some(found) => found,
                    None => {
                        keys.push(key);
                        keys.len() - 1
                    }
                };
                class_of[id] = class;
            }
        }

        // refine on (class, byte -> target class) until the partition is stable;
        // class ids are assigned in first-seen state order, so an unchanged
        // partition reproduces the same id vector
        loop {
            let mut signatures: Vec<(usize, Vec<(u8, usize)>)> = Vec::new();
            let mut next: Vec<usize> = Vec::with_capacity(self.states.len());
            for (id, state) in self.states.iter().enumerate() {
                let signature: Vec<(u8, usize)> = state
                    .transitions
                    .iter()
                    .map(|(&byte, &target)| (byte, class_of[target]))
                    .collect();
                let key = (class_of[id], signature);
                let class = match signatures.iter().position(|k| *k == key) {
                    Some(found) => found,
                    None => {
                        signatures.push(key);
                        signatures.len() - 1
                    }
                };
                next.push(class);
            }
            if next == class_of {
                break;
            }
            class_of = next;
        }

        // representative = lowest-numbered member, keeps ordering stable
        let class_count = class_of.iter().copied().max().map_or(0, |m| m + 1);
        let mut representative: Vec<Option<usize>> = vec![None; class_count];
        for (id, &class) in class_of.iter().enumerate() {
            if representative[class].is_none() {
                representative[class] = Some(id);
            }
        }

        let states = representative
            .iter()
            .map(|rep| {
                let rep = rep.unwrap_or(0);
                let old = &self.states[rep];
                DfaState {
                    accepting: old.accepting,
                    value: old.value.clone(),
                    transitions: old
                        .transitions
                        .iter()
                        .map(|(&byte, &target)| (byte, class_of[target]))
                        .collect(),
                }
            })
            .collect();

        Self {
            states,
            start: class_of[self.start],
        }
    }

    /// Emit the specialized, immutable automaton
    pub fn specialize(&self) -> ByteAutomaton<V> {
        let states = self
            .states
            .iter()
            .enumerate()
            .map(|(id, state)| {
                let kind = match (id == self.start, state.accepting) {
                    (true, true) => StateKind::InitialFinal,
                    (true, false) => StateKind::Initial,
                    (false, true) => StateKind::Final,
                    (false, false) => StateKind::Normal,
                };
                AutomatonState {
                    kind,
                    value: state.value.clone(),
                    table: TransitionTable::specialize(&state.transitions),
                }
            })
            .collect();

        ByteAutomaton::from_parts_unchecked(states, self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;

    fn merge_strs(values: &[&Vec<&'static str>]) -> Vec<&'static str> {
        values.iter().flat_map(|v| v.iter().copied()).collect()
    }

    fn build(patterns: &[(&str, &'static str)]) -> Dfa<Vec<&'static str>> {
        let mut nfa = Nfa::new();
        for (source, tag) in patterns {
            nfa.add_pattern(&Pattern::parse(source).unwrap(), vec![*tag]);
        }
        Dfa::from_nfa(&nfa, merge_strs)
    }

    #[test]
    fn test_subset_construction_discriminates() {
        let dfa = build(&[("01 02 .*", "a"), ("01 03 .*", "b")]);

        assert_eq!(dfa.matches(&[0x01, 0x02, 0xFF]), Some(&vec!["a"]));
        assert_eq!(dfa.matches(&[0x01, 0x03, 0x00]), Some(&vec!["b"]));
        assert_eq!(dfa.matches(&[0x01, 0x04]), None);
    }

    #[test]
    fn test_merge_preserves_insertion_order() {
        // 01 1a is accepted by both patterns; first-added value leads.
        let dfa = build(&[(". 1a", "wild"), ("01 1a", "exact")]);
        assert_eq!(dfa.matches(&[0x01, 0x1A]), Some(&vec!["wild", "exact"]));
    }

    #[test]
    fn test_minimize_shrinks_and_preserves() {
        let dfa = build(&[("( 01 | 02 ) aa", "x")]);
        let minimized = dfa.minimize();

        assert!(minimized.len() <= dfa.len());
        for input in [
            vec![0x01, 0xAA],
            vec![0x02, 0xAA],
            vec![0x03, 0xAA],
            vec![0x01],
            vec![0x01, 0xAA, 0x00],
        ] {
            assert_eq!(dfa.matches(&input), minimized.matches(&input));
        }
    }

    #[test]
    fn test_minimize_keeps_distinct_values_apart() {
        let dfa = build(&[("01", "a"), ("02", "b")]);
        let minimized = dfa.minimize();

        assert_eq!(minimized.matches(&[0x01]), Some(&vec!["a"]));
        assert_eq!(minimized.matches(&[0x02]), Some(&vec!["b"]));
    }
}

//! Thompson-style NFA construction
//!
//! Patterns lower into fragments over an arena of integer-indexed states
//! connected by epsilon edges and inclusive byte-interval edges. All
//! patterns share a single synthetic start state; each pattern's accept
//! state records the pattern's insertion index so merged values keep their
//! authoring order downstream.

use crate::pattern::Pattern;

pub(crate) type NfaStateId = usize;

#[derive(Debug, Clone, Default)]
struct NfaState {
    /// Epsilon successors
    epsilon: Vec<NfaStateId>,
    /// Byte-interval edges (inclusive lo..=hi)
    edges: Vec<(u8, u8, NfaStateId)>,
    /// Index of the pattern this state accepts, if any
    accept: Option<usize>,
}

/// Nondeterministic automaton under construction
///
/// One value per added pattern; the DFA stage resolves accept indexes back
/// through [`Nfa::value`].
#[derive(Debug, Clone)]
pub struct Nfa<V> {
    states: Vec<NfaState>,
    start: NfaStateId,
    values: Vec<V>,
}

impl<V> Nfa<V> {
    /// Create an NFA with only the shared start state
    pub fn new() -> Self {
        Self {
            states: vec![NfaState::default()],
            start: 0,
            values: Vec::new(),
        }
    }

    /// Number of patterns added so far
    pub fn pattern_count(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn start(&self) -> NfaStateId {
        self.start
    }

    pub(crate) fn value(&self, pattern: usize) -> &V {
        &self.values[pattern]
    }

    /// Add a compiled pattern with its accept value
    pub fn add_pattern(&mut self, pattern: &Pattern, value: V) {
        let index = self.values.len();
        self.values.push(value);

        let (enter, exit) = self.fragment(pattern);
        let start = self.start;
        self.states[start].epsilon.push(enter);
        self.states[exit].accept = Some(index);
    }

    fn new_state(&mut self) -> NfaStateId {
        self.states.push(NfaState::default());
        self.states.len() - 1
    }

    /// Build a fragment, returning its (entry, exit) states
    fn fragment(&mut self, pattern: &Pattern) -> (NfaStateId, NfaStateId) {
        match pattern {
            Pattern::Byte(b) => self.interval_fragment(*b, *b),
            Pattern::Range(lo, hi) => self.interval_fragment(*lo, *hi),
            Pattern::Any => self.interval_fragment(0x00, 0xFF),

            Pattern::Concat(elements) => {
                let enter = self.new_state();
                let mut tail = enter;
                for element in elements {
                    let (frag_enter, frag_exit) = self.fragment(element);
                    self.states[tail].epsilon.push(frag_enter);
                    tail = frag_exit;
                }
                (enter, tail)
            }

            Pattern::Alternate(branches) => {
                let enter = self.new_state();
                let exit = self.new_state();
                for branch in branches {
                    let (frag_enter, frag_exit) = self.fragment(branch);
                    self.states[enter].epsilon.push(frag_enter);
                    self.states[frag_exit].epsilon.push(exit);
                }
                (enter, exit)
            }

            Pattern::Star(inner) => {
                let enter = self.new_state();
                let exit = self.new_state();
                let (frag_enter, frag_exit) = self.fragment(inner);
                self.states[enter].epsilon.push(frag_enter);
                self.states[enter].epsilon.push(exit);
                self.states[frag_exit].epsilon.push(frag_enter);
                self.states[frag_exit].epsilon.push(exit);
                (enter, exit)
            }

            Pattern::Plus(inner) => {
                let exit = self.new_state();
                let (frag_enter, frag_exit) = self.fragment(inner);
                self.states[frag_exit].epsilon.push(frag_enter);
                self.states[frag_exit].epsilon.push(exit);
                (frag_enter, exit)
            }

            Pattern::Optional(inner) => {
                let enter = self.new_state();
                let exit = self.new_state();
                let (frag_enter, frag_exit) = self.fragment(inner);
                self.states[enter].epsilon.push(frag_enter);
                self.states[enter].epsilon.push(exit);
                self.states[frag_exit].epsilon.push(exit);
                (enter, exit)
            }
        }
    }

    fn interval_fragment(&mut self, lo: u8, hi: u8) -> (NfaStateId, NfaStateId) {
        let enter = self.new_state();
        let exit = self.new_state();
        self.states[enter].edges.push((lo, hi, exit));
        (enter, exit)
    }

    /// Epsilon closure of a state set; result is sorted and deduplicated
    pub(crate) fn epsilon_closure(&self, seed: &[NfaStateId]) -> Vec<NfaStateId> {
        let mut closure: Vec<NfaStateId> = seed.to_vec();
        let mut stack: Vec<NfaStateId> = seed.to_vec();
        while let Some(id) = stack.pop() {
            for &next in &self.states[id].epsilon {
                if !closure.contains(&next) {
                    closure.push(next);
                    stack.push(next);
                }
            }
        }
        closure.sort_unstable();
        closure.dedup();
        closure
    }

    /// States reachable from `set` on `byte` (before closure)
    pub(crate) fn step(&self, set: &[NfaStateId], byte: u8) -> Vec<NfaStateId> {
        let mut result = Vec::new();
        for &id in set {
            for &(lo, hi, target) in &self.states[id].edges {
                if byte >= lo && byte <= hi && !result.contains(&target) {
                    result.push(target);
                }
            }
        }
        result
    }

    /// Accepted pattern indexes in `set`, in pattern insertion order
    pub(crate) fn accepts(&self, set: &[NfaStateId]) -> Vec<usize> {
        let mut indexes: Vec<usize> = set
            .iter()
            .filter_map(|&id| self.states[id].accept)
            .collect();
        indexes.sort_unstable();
        indexes.dedup();
        indexes
    }
}

impl<V> Default for Nfa<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;

    #[test]
    fn test_shared_start_state() {
        let mut nfa: Nfa<u32> = Nfa::new();
        nfa.add_pattern(&Pattern::parse("01").unwrap(), 1);
        nfa.add_pattern(&Pattern::parse("02").unwrap(), 2);

        assert_eq!(nfa.pattern_count(), 2);
        let closure = nfa.epsilon_closure(&[nfa.start()]);
        // Start state reaches both fragments' entry states.
        assert!(closure.len() >= 3);
    }

    #[test]
    fn test_step_and_accept() {
        let mut nfa: Nfa<&str> = Nfa::new();
        nfa.add_pattern(&Pattern::parse("01 02").unwrap(), "done");

        let start = nfa.epsilon_closure(&[nfa.start()]);
        let after_one = nfa.epsilon_closure(&nfa.step(&start, 0x01));
        assert!(nfa.accepts(&after_one).is_empty());

        let after_two = nfa.epsilon_closure(&nfa.step(&after_one, 0x02));
        assert_eq!(nfa.accepts(&after_two), vec![0]);

        assert!(nfa.step(&after_two, 0x03).is_empty());
    }
}

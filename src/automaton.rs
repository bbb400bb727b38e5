// Copyright 2024 Cornell University
// released under MIT License
// author: Nikil Shyamunder <nvs26@cornell.edu>
// author: Kevin Laeufer <laeufer@cornell.edu>

use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::ops::Index;

use crate::errors::{BuildError, MoveError};

/// Anything that can label an edge and travel over a channel.
pub trait Key: Clone + Eq + Hash + Debug + Display {}

impl<T: Clone + Eq + Hash + Debug + Display> Key for T {}

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct StateId(u32);
entity_impl!(StateId, "state");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    name: String,
    /// target per alphabet position
    targets: Vec<StateId>,
}

impl State {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Deterministic finite state machine over a fixed alphabet.
///
/// Every state has exactly one target for every key of the alphabet. Newly
/// declared states start out with self-loops, so the transition function is
/// total as soon as a state exists.
#[derive(Debug, Clone)]
pub struct Automaton<K> {
    alphabet: Vec<K>,
    positions: FxHashMap<K, usize>,
    states: PrimaryMap<StateId, State>,
    by_name: FxHashMap<String, StateId>,
    current: Option<StateId>,
}

impl<K: Key> Automaton<K> {
    pub fn new(alphabet: impl IntoIterator<Item = K>) -> Self {
        let mut keys = Vec::new();
        let mut positions = FxHashMap::default();
        for key in alphabet {
            if !positions.contains_key(&key) {
                positions.insert(key.clone(), keys.len());
                keys.push(key);
            }
        }
        Self {
            alphabet: keys,
            positions,
            states: PrimaryMap::new(),
            by_name: FxHashMap::default(),
            current: None,
        }
    }

    pub fn alphabet(&self) -> &[K] {
        &self.alphabet
    }

    pub fn add_node(&mut self, name: impl Into<String>) -> Result<StateId, BuildError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(BuildError::DuplicateState(name));
        }
        let id = self.states.next_key();
        let state = State {
            name: name.clone(),
            targets: vec![id; self.alphabet.len()],
        };
        let pushed = self.states.push(state);
        debug_assert_eq!(pushed, id);
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Overwrites the target of `from` on `key`.
    pub fn set_transition(&mut self, from: &str, to: &str, key: &K) -> Result<(), BuildError> {
        let from = self.lookup(from)?;
        let to = self.lookup(to)?;
        let pos = self
            .position(key)
            .ok_or_else(|| BuildError::UnknownKey(key.to_string()))?;
        self.states[from].targets[pos] = to;
        Ok(())
    }

    pub fn set_initial_node(&mut self, name: &str) -> Result<(), BuildError> {
        self.current = Some(self.lookup(name)?);
        Ok(())
    }

    /// Advances along the edge labelled `key`. The current state is left
    /// untouched on failure.
    pub fn move_by(&mut self, key: &K) -> Result<StateId, MoveError> {
        let current = self.current.ok_or(MoveError::NoInitialState)?;
        let next = self
            .target(current, key)
            .ok_or_else(|| MoveError::UnknownKey(key.to_string()))?;
        self.current = Some(next);
        Ok(next)
    }

    pub fn target(&self, from: StateId, key: &K) -> Option<StateId> {
        self.position(key).map(|pos| self.states[from].targets[pos])
    }

    /// All `(key, target)` pairs leaving `from`, in alphabet order
    pub fn edges_from(&self, from: StateId) -> impl Iterator<Item = (&K, StateId)> + '_ {
        self.alphabet
            .iter()
            .zip(self.states[from].targets.iter().copied())
    }

    /// Name of the current state
    pub fn state(&self) -> Option<&str> {
        self.current.map(|id| self.states[id].name())
    }

    pub fn current(&self) -> Option<StateId> {
        self.current
    }

    /// Jumps straight to `id`. Only meant for rebuilding a snapshot.
    pub(crate) fn set_current(&mut self, id: StateId) {
        assert!(self.states.is_valid(id), "{id} does not belong to this automaton");
        self.current = Some(id);
    }

    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.by_name.get(name).copied()
    }

    pub fn state_name(&self, id: StateId) -> &str {
        self.states[id].name()
    }

    pub fn state_ids(&self) -> impl Iterator<Item = StateId> + '_ {
        self.states.keys()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn position(&self, key: &K) -> Option<usize> {
        self.positions.get(key).copied()
    }

    fn lookup(&self, name: &str) -> Result<StateId, BuildError> {
        self.state_id(name)
            .ok_or_else(|| BuildError::UnknownState(name.to_string()))
    }
}

impl<K> Index<StateId> for Automaton<K> {
    type Output = State;

    fn index(&self, index: StateId) -> &Self::Output {
        &self.states[index]
    }
}

impl<K> Index<&str> for Automaton<K> {
    type Output = State;

    fn index(&self, index: &str) -> &Self::Output {
        &self.states[self.by_name[index]]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Three states, cycling on `a` and resetting on `r`
    pub fn build_ring() -> Automaton<&'static str> {
        let mut ring = Automaton::new(["a", "r"]);
        for name in ["s0", "s1", "s2"] {
            ring.add_node(name).unwrap();
        }
        ring.set_transition("s0", "s1", &"a").unwrap();
        ring.set_transition("s1", "s2", &"a").unwrap();
        ring.set_transition("s2", "s0", &"a").unwrap();
        for name in ["s1", "s2"] {
            ring.set_transition(name, "s0", &"r").unwrap();
        }
        ring.set_initial_node("s0").unwrap();
        ring
    }

    #[test]
    fn new_states_loop_on_every_key() {
        let mut a = Automaton::new(["x", "y"]);
        let id = a.add_node("only").unwrap();
        a.set_initial_node("only").unwrap();
        assert_eq!(a.target(id, &"x"), Some(id));
        assert_eq!(a.move_by(&"y").unwrap(), id);
        assert_eq!(a.state(), Some("only"));
    }

    #[test]
    fn duplicate_and_unknown_states_are_rejected() {
        let mut a = Automaton::new(["x"]);
        a.add_node("s").unwrap();
        assert_eq!(
            a.add_node("s"),
            Err(BuildError::DuplicateState("s".to_string()))
        );
        assert_eq!(
            a.set_transition("s", "t", &"x"),
            Err(BuildError::UnknownState("t".to_string()))
        );
        assert_eq!(
            a.set_transition("s", "s", &"z"),
            Err(BuildError::UnknownKey("z".to_string()))
        );
        assert_eq!(
            a.set_initial_node("t"),
            Err(BuildError::UnknownState("t".to_string()))
        );
    }

    #[test]
    fn move_before_initial_state_fails() {
        let mut a = Automaton::new(["x"]);
        a.add_node("s").unwrap();
        assert_eq!(a.move_by(&"x"), Err(MoveError::NoInitialState));
        assert_eq!(a.state(), None);
    }

    #[test]
    fn unknown_key_does_not_change_state() {
        let mut ring = build_ring();
        ring.move_by(&"a").unwrap();
        assert_eq!(
            ring.move_by(&"nope"),
            Err(MoveError::UnknownKey("nope".to_string()))
        );
        assert_eq!(ring.state(), Some("s1"));
    }

    #[test]
    fn same_word_same_state() {
        let word = ["a", "a", "r", "a", "a", "a", "r", "a"];
        let mut first = build_ring();
        let mut second = build_ring();
        for key in word {
            first.move_by(&key).unwrap();
        }
        for key in word {
            second.move_by(&key).unwrap();
        }
        assert_eq!(first.state(), second.state());
        assert_eq!(first.state(), Some("s1"));
    }

    #[test]
    fn transition_function_is_total() {
        let ring = build_ring();
        for id in ring.state_ids() {
            for key in ring.alphabet() {
                assert!(ring.target(id, key).is_some());
            }
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring["s2"].name(), "s2");
    }

    #[test]
    fn repeated_alphabet_keys_collapse() {
        let a: Automaton<&str> = Automaton::new(["x", "y", "x"]);
        assert_eq!(a.alphabet(), &["x", "y"]);
    }
}

// Copyright 2024 Cornell University
// released under MIT License
// author: Nikil Shyamunder <nvs26@cornell.edu>
// author: Kevin Laeufer <laeufer@cornell.edu>
// author: Francis Pham <fdp25@cornell.edu>

use log::{debug, trace, warn};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::automaton::{Automaton, Key, StateId};
use crate::channel::{Buffered, Channel};
use crate::errors::{BuildError, ChannelError, MoveError};

/// Classification of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Action {
    /// the edge was never classified; it can not be fired
    #[default]
    Undefined,
    /// silent, internal move
    Nothing,
    Receive,
    Transmit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Undefined => write!(f, "#"),
            Action::Nothing => write!(f, "."),
            Action::Receive => write!(f, "?"),
            Action::Transmit => write!(f, "!"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge<K> {
    pub action: Action,
    pub key: K,
}

/// A deterministic automaton whose edges are classified as sends,
/// receives or silent moves, bound to an inbound and an outbound channel.
///
/// Channels are shared with the communication partner: the outbound channel
/// of one peer is the inbound channel of the other.
pub struct Cfsm<K, C: ?Sized = Buffered<K>> {
    automaton: Automaton<K>,
    edges: FxHashMap<(StateId, StateId), Edge<K>>,
    inbound: Option<Arc<C>>,
    outbound: Option<Arc<C>>,
}

/// Cloning keeps the channel bindings, i.e. the clone talks over the very
/// same channels. Use `detached` for an unbound copy.
impl<K: Clone, C: ?Sized> Clone for Cfsm<K, C> {
    fn clone(&self) -> Self {
        Self {
            automaton: self.automaton.clone(),
            edges: self.edges.clone(),
            inbound: self.inbound.clone(),
            outbound: self.outbound.clone(),
        }
    }
}

impl<K: fmt::Debug, C: ?Sized> fmt::Debug for Cfsm<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cfsm")
            .field("automaton", &self.automaton)
            .field("edges", &self.edges)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl<K, C: ?Sized> Cfsm<K, C> {
    pub fn bind_channels(&mut self, inbound: Arc<C>, outbound: Arc<C>) {
        self.inbound = Some(inbound);
        self.outbound = Some(outbound);
    }

    pub fn is_bound(&self) -> bool {
        self.inbound.is_some() && self.outbound.is_some()
    }

    pub fn inbound(&self) -> Option<&Arc<C>> {
        self.inbound.as_ref()
    }

    pub fn outbound(&self) -> Option<&Arc<C>> {
        self.outbound.as_ref()
    }
}

impl<K: Key, C: ?Sized> Cfsm<K, C> {
    pub fn new(alphabet: impl IntoIterator<Item = K>) -> Self {
        Self {
            automaton: Automaton::new(alphabet),
            edges: FxHashMap::default(),
            inbound: None,
            outbound: None,
        }
    }

    pub fn add_node(&mut self, name: impl Into<String>) -> Result<StateId, BuildError> {
        self.automaton.add_node(name)
    }

    pub fn set_initial_node(&mut self, name: &str) -> Result<(), BuildError> {
        self.automaton.set_initial_node(name)
    }

    /// Sets the raw transition and records how the `(from, to)` edge is
    /// classified. A later classification of the same state pair replaces the
    /// earlier one.
    pub fn set_transition(
        &mut self,
        from: &str,
        to: &str,
        key: K,
        action: Action,
    ) -> Result<(), BuildError> {
        self.automaton.set_transition(from, to, &key)?;
        let pair = (self.id(from)?, self.id(to)?);
        if let Some(previous) = self.edges.get(&pair) {
            if previous.key != key {
                warn!(
                    "edge {from} -> {to}: classification on `{}` replaced by `{key}`",
                    previous.key
                );
            }
        }
        self.edges.insert(pair, Edge { action, key });
        Ok(())
    }

    /// Copy of the machine (states, classifications and current state)
    /// with no channel bound, over any channel type.
    pub fn detached<C2: ?Sized>(&self) -> Cfsm<K, C2> {
        Cfsm {
            automaton: self.automaton.clone(),
            edges: self.edges.clone(),
            inbound: None,
            outbound: None,
        }
    }

    pub fn automaton(&self) -> &Automaton<K> {
        &self.automaton
    }

    pub fn state(&self) -> Option<&str> {
        self.automaton.state()
    }

    pub fn state_id(&self) -> Option<StateId> {
        self.automaton.current()
    }

    pub(crate) fn set_state(&mut self, id: StateId) {
        self.automaton.set_current(id);
    }

    /// How the edge leaving `from` on `key` is classified
    pub fn classification(&self, from: StateId, key: &K) -> Action {
        self.automaton
            .target(from, key)
            .and_then(|to| self.edges.get(&(from, to)))
            .filter(|edge| &edge.key == key)
            .map_or(Action::Undefined, |edge| edge.action)
    }

    /// All classified transitions as `(from, to, key, action)`, ordered by
    /// state then by alphabet position
    pub fn transitions(&self) -> Vec<(StateId, StateId, &K, Action)> {
        self.automaton
            .state_ids()
            .flat_map(|from| {
                self.automaton
                    .edges_from(from)
                    .map(move |(key, to)| (from, to, key, self.classification(from, key)))
            })
            .filter(|(_, _, _, action)| *action != Action::Undefined)
            .collect()
    }

    /// Keys labelling `Transmit` edges out of the current state, in alphabet order
    pub fn enabled_send_moves(&self) -> Vec<K> {
        self.enabled(Action::Transmit)
    }

    /// Keys labelling silent (`Nothing`) edges out of the current state
    pub fn enabled_internal_moves(&self) -> Vec<K> {
        self.enabled(Action::Nothing)
    }

    pub fn has_receive_edge(&self) -> bool {
        !self.enabled(Action::Receive).is_empty()
    }

    /// Fires a silent edge. No channel is touched.
    pub fn fire_internal(&mut self, key: &K) -> Result<StateId, MoveError> {
        self.check_edge(key, Action::Nothing)?;
        self.automaton.move_by(key)
    }

    fn enabled(&self, action: Action) -> Vec<K> {
        let Some(current) = self.automaton.current() else {
            return vec![];
        };
        self.automaton
            .edges_from(current)
            .map(|(key, _)| key)
            .filter(|key| self.classification(current, key) == action)
            .cloned()
            .collect()
    }

    fn check_edge(&self, key: &K, expected: Action) -> Result<StateId, MoveError> {
        let current = self.automaton.current().ok_or(MoveError::NoInitialState)?;
        let to = self
            .automaton
            .target(current, key)
            .ok_or_else(|| MoveError::UnknownKey(key.to_string()))?;
        let action = self.classification(current, key);
        if action != expected {
            return Err(MoveError::WrongAction {
                from: self.automaton.state_name(current).to_string(),
                to: self.automaton.state_name(to).to_string(),
                key: key.to_string(),
                action,
            });
        }
        Ok(to)
    }

    fn id(&self, name: &str) -> Result<StateId, BuildError> {
        self.automaton
            .state_id(name)
            .ok_or_else(|| BuildError::UnknownState(name.to_string()))
    }
}

impl<K: Key, C: Channel<K> + ?Sized> Cfsm<K, C> {
    /// Fires the edge labelled `key` if it is a `Transmit` edge: `key` is sent
    /// on the outbound channel, then the automaton advances. Any other
    /// classification fails without side effects.
    pub fn try_move(&mut self, key: &K) -> Result<StateId, MoveError> {
        self.check_edge(key, Action::Transmit)?;
        let outbound = self.outbound.as_ref().ok_or(MoveError::Unbound)?;
        outbound.send(key.clone())?;
        let next = self.automaton.move_by(key)?;
        debug!(
            "sent `{key}`, now in {}",
            self.automaton.state_name(next)
        );
        Ok(next)
    }

    /// Non-blocking look at the oldest message waiting on the inbound channel
    pub fn peek_pending(&self) -> Option<K> {
        self.inbound.as_ref().and_then(|inbound| inbound.peek())
    }

    /// Waits for a message on the inbound channel and advances by it.
    /// Fails immediately, without waiting, if the current state has no
    /// `Receive` edge.
    pub fn wait_and_move(&mut self) -> Result<K, MoveError> {
        let current = self.automaton.current().ok_or(MoveError::NoInitialState)?;
        if !self.has_receive_edge() {
            return Err(MoveError::NoReceiveEdge(
                self.automaton.state_name(current).to_string(),
            ));
        }
        let inbound = self.inbound.as_ref().ok_or(MoveError::Unbound)?;
        trace!("waiting in {}", self.automaton.state_name(current));
        let key = inbound
            .receive()
            .ok_or(MoveError::Channel(ChannelError::Closed))?;
        let next = self.automaton.move_by(&key)?;
        debug!(
            "received `{key}`, now in {}",
            self.automaton.state_name(next)
        );
        Ok(key)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::Research;

    /// Requester side of a request/acknowledge exchange
    pub fn build_requester() -> Cfsm<&'static str, Research<&'static str>> {
        let mut m = Cfsm::new(["Req", "Ack"]);
        m.add_node("Idle").unwrap();
        m.add_node("Sending").unwrap();
        m.set_transition("Idle", "Sending", "Req", Action::Transmit)
            .unwrap();
        m.set_transition("Sending", "Idle", "Ack", Action::Receive)
            .unwrap();
        m.set_initial_node("Idle").unwrap();
        m
    }

    /// Responder side of a request/acknowledge exchange
    pub fn build_responder() -> Cfsm<&'static str, Research<&'static str>> {
        let mut m = Cfsm::new(["Req", "Ack"]);
        m.add_node("Idle").unwrap();
        m.add_node("Busy").unwrap();
        m.set_transition("Idle", "Busy", "Req", Action::Receive)
            .unwrap();
        m.set_transition("Busy", "Idle", "Ack", Action::Transmit)
            .unwrap();
        m.set_initial_node("Idle").unwrap();
        m
    }

    fn wire(
        a: &mut Cfsm<&'static str, Research<&'static str>>,
        b: &mut Cfsm<&'static str, Research<&'static str>>,
    ) -> (Arc<Research<&'static str>>, Arc<Research<&'static str>>) {
        let a_to_b = Arc::new(Research::new());
        let b_to_a = Arc::new(Research::new());
        a.bind_channels(Arc::clone(&b_to_a), Arc::clone(&a_to_b));
        b.bind_channels(Arc::clone(&a_to_b), Arc::clone(&b_to_a));
        (a_to_b, b_to_a)
    }

    #[test]
    fn send_moves_follow_the_current_state() {
        let mut req = build_requester();
        let mut resp = build_responder();
        wire(&mut req, &mut resp);
        assert_eq!(req.enabled_send_moves(), vec!["Req"]);
        assert!(resp.enabled_send_moves().is_empty());
        req.try_move(&"Req").unwrap();
        assert!(req.enabled_send_moves().is_empty());
        assert!(req.has_receive_edge());
    }

    #[test]
    fn transmit_uses_the_outbound_channel() {
        let mut req = build_requester();
        let mut resp = build_responder();
        let (req_to_resp, resp_to_req) = wire(&mut req, &mut resp);

        req.try_move(&"Req").unwrap();
        assert_eq!(req_to_resp.contents(), vec!["Req"]);
        assert!(resp_to_req.contents().is_empty());
        assert_eq!(resp.peek_pending(), Some("Req"));
        assert_eq!(req.peek_pending(), None);

        assert_eq!(resp.wait_and_move().unwrap(), "Req");
        assert_eq!(resp.state(), Some("Busy"));
        resp.try_move(&"Ack").unwrap();
        assert_eq!(resp_to_req.contents(), vec!["Ack"]);
        assert_eq!(req.wait_and_move().unwrap(), "Ack");
        assert_eq!(req.state(), Some("Idle"));
        assert_eq!(resp.state(), Some("Idle"));
    }

    #[test]
    fn try_move_refuses_non_transmit_edges() {
        let mut req = build_requester();
        let mut resp = build_responder();
        let (req_to_resp, _) = wire(&mut req, &mut resp);

        let err = resp.try_move(&"Req").unwrap_err();
        assert_eq!(
            err,
            MoveError::WrongAction {
                from: "Idle".to_string(),
                to: "Busy".to_string(),
                key: "Req".to_string(),
                action: Action::Receive,
            }
        );
        assert_eq!(resp.state(), Some("Idle"));

        // `Ack` from `Idle` was never classified (it is the default self-loop)
        let err = req.try_move(&"Ack").unwrap_err();
        assert!(matches!(
            err,
            MoveError::WrongAction {
                action: Action::Undefined,
                ..
            }
        ));
        assert_eq!(req.state(), Some("Idle"));
        assert!(req_to_resp.contents().is_empty());
    }

    #[test]
    fn wait_without_receive_edge_returns_immediately() {
        let mut req = build_requester();
        let mut resp = build_responder();
        wire(&mut req, &mut resp);
        assert_eq!(
            req.wait_and_move(),
            Err(MoveError::NoReceiveEdge("Idle".to_string()))
        );
    }

    #[test]
    fn debug_output_shows_binding() {
        let mut req = build_requester();
        assert!(format!("{req:?}").contains("bound: false"));
        let mut resp = build_responder();
        wire(&mut req, &mut resp);
        assert!(format!("{req:?}").contains("bound: true"));
        assert!(format!("{:?}", req.automaton()).starts_with("Automaton"));
    }

    #[test]
    fn research_inbound_reports_closed_when_empty() {
        let mut req = build_requester();
        let mut resp = build_responder();
        wire(&mut req, &mut resp);
        assert_eq!(
            resp.wait_and_move(),
            Err(MoveError::Channel(ChannelError::Closed))
        );
        assert_eq!(resp.state(), Some("Idle"));
    }

    #[test]
    fn unbound_machine_can_not_send() {
        let mut req = build_requester();
        assert_eq!(req.try_move(&"Req"), Err(MoveError::Unbound));
        assert_eq!(req.state(), Some("Idle"));
        assert_eq!(req.peek_pending(), None);
    }

    #[test]
    fn silent_edges_move_without_traffic() {
        let mut m: Cfsm<&str, Research<&str>> = Cfsm::new(["Tick", "Req"]);
        m.add_node("A").unwrap();
        m.add_node("B").unwrap();
        m.set_transition("A", "B", "Tick", Action::Nothing).unwrap();
        m.set_transition("B", "A", "Req", Action::Transmit).unwrap();
        m.set_initial_node("A").unwrap();

        assert_eq!(m.enabled_internal_moves(), vec!["Tick"]);
        assert!(m.enabled_send_moves().is_empty());
        assert!(matches!(
            m.try_move(&"Tick"),
            Err(MoveError::WrongAction {
                action: Action::Nothing,
                ..
            })
        ));
        m.fire_internal(&"Tick").unwrap();
        assert_eq!(m.state(), Some("B"));
        assert!(m.fire_internal(&"Req").is_err());
    }

    #[test]
    fn detached_copy_has_no_channels() {
        let mut req = build_requester();
        let mut resp = build_responder();
        wire(&mut req, &mut resp);
        req.try_move(&"Req").unwrap();

        let copy: Cfsm<&str> = req.detached();
        assert!(!copy.is_bound());
        assert_eq!(copy.state(), Some("Sending"));
        assert_eq!(copy.transitions().len(), 2);
        assert!(req.is_bound());
    }

    #[test]
    fn transitions_list_only_classified_edges() {
        let req = build_requester();
        let a = req.automaton();
        let listed: Vec<_> = req
            .transitions()
            .into_iter()
            .map(|(from, to, key, action)| (a.state_name(from), a.state_name(to), *key, action))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("Idle", "Sending", "Req", Action::Transmit),
                ("Sending", "Idle", "Ack", Action::Receive),
            ]
        );
    }

    #[test]
    fn unknown_state_in_transition_is_a_build_error() {
        let mut m = build_requester();
        assert_eq!(
            m.set_transition("Idle", "Gone", "Req", Action::Transmit),
            Err(BuildError::UnknownState("Gone".to_string()))
        );
    }
}

// Copyright 2025 Cornell University
// released under MIT License
// author: Ernest Ng <eyn5@cornell.edu>
// author: Kevin Laeufer <laeufer@cornell.edu>

/*! Breadth-first exploration of the joint state space of two communicating
 *  automata. A `Configuration` is the pair of local states plus the contents
 *  of both channels; configurations are plain values, so two of them are the
 *  same node of the reachability graph exactly when all four components agree.
 */

use log::{debug, info, trace};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction as Dir;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::automaton::{Automaton, Key, StateId};
use crate::cfsm::{Action, Cfsm};
use crate::channel::Research;
use crate::errors::ExploreError;

/// One of the two communicating peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Peer {
    First,
    Second,
}

impl Peer {
    pub const BOTH: [Peer; 2] = [Peer::First, Peer::Second];
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::First => write!(f, "1"),
            Peer::Second => write!(f, "2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Receive,
    Internal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            Direction::Send => Action::Transmit,
            Direction::Receive => Action::Receive,
            Direction::Internal => Action::Nothing,
        };
        write!(f, "{action}")
    }
}

/// What fired between two configurations: which peer, which key and whether
/// it was sent, received or a silent move
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stimulus<K> {
    pub peer: Peer,
    pub direction: Direction,
    pub key: K,
}

impl<K: fmt::Display> fmt::Display for Stimulus<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.peer, self.direction, self.key)
    }
}

/// Joint snapshot: both local states, the pending messages from the first
/// peer to the second (`forward`) and from the second to the first
/// (`backward`), oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Configuration<K> {
    first: StateId,
    second: StateId,
    forward: Vec<K>,
    backward: Vec<K>,
}

impl<K> Configuration<K> {
    pub fn new(first: StateId, second: StateId, forward: Vec<K>, backward: Vec<K>) -> Self {
        Self {
            first,
            second,
            forward,
            backward,
        }
    }

    pub fn state(&self, peer: Peer) -> StateId {
        match peer {
            Peer::First => self.first,
            Peer::Second => self.second,
        }
    }

    /// Messages travelling from the first peer to the second
    pub fn forward(&self) -> &[K] {
        &self.forward
    }

    /// Messages travelling from the second peer to the first
    pub fn backward(&self) -> &[K] {
        &self.backward
    }

    /// Messages waiting to be received by `peer`
    pub fn inbox(&self, peer: Peer) -> &[K] {
        match peer {
            Peer::First => &self.backward,
            Peer::Second => &self.forward,
        }
    }
}

/// Handle of a configuration inside a `ReachabilityGraph`.
/// Handles are handed out sequentially in discovery order, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigId(NodeIndex);

impl ConfigId {
    pub fn index(self) -> usize {
        self.0.index()
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Result of registering a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stored {
    pub id: ConfigId,
    pub is_new: bool,
}

/// Distinct reachable configurations plus the one-step transitions between them
#[derive(Debug, Clone)]
pub struct ReachabilityGraph<K> {
    graph: DiGraph<Configuration<K>, Stimulus<K>>,
    index: FxHashMap<Configuration<K>, ConfigId>,
}

impl<K: Key> ReachabilityGraph<K> {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: FxHashMap::default(),
        }
    }

    fn store(&mut self, configuration: Configuration<K>) -> Stored {
        if let Some(&id) = self.index.get(&configuration) {
            return Stored { id, is_new: false };
        }
        let id = ConfigId(self.graph.add_node(configuration.clone()));
        self.index.insert(configuration, id);
        Stored { id, is_new: true }
    }

    fn connect(&mut self, from: ConfigId, to: ConfigId, stimulus: Stimulus<K>) {
        self.graph.add_edge(from.0, to.0, stimulus);
    }

    /// The configuration the exploration started from
    pub fn initial(&self) -> ConfigId {
        ConfigId(NodeIndex::new(0))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn configuration(&self, id: ConfigId) -> &Configuration<K> {
        &self.graph[id.0]
    }

    /// All configurations in discovery order
    pub fn configurations(&self) -> impl Iterator<Item = (ConfigId, &Configuration<K>)> {
        self.graph
            .node_indices()
            .map(move |n| (ConfigId(n), &self.graph[n]))
    }

    /// All transitions in the order they were discovered
    pub fn edges(&self) -> impl Iterator<Item = (ConfigId, ConfigId, &Stimulus<K>)> {
        self.graph
            .edge_references()
            .map(|e| (ConfigId(e.source()), ConfigId(e.target()), e.weight()))
    }

    /// Outgoing transitions of `id`, in discovery order
    pub fn successors(&self, id: ConfigId) -> Vec<(ConfigId, &Stimulus<K>)> {
        let mut out: Vec<_> = self
            .graph
            .edges_directed(id.0, Dir::Outgoing)
            .map(|e| (e.id(), ConfigId(e.target()), e.weight()))
            .collect();
        out.sort_by_key(|(edge, _, _)| *edge);
        out.into_iter().map(|(_, to, s)| (to, s)).collect()
    }

    pub fn id_of(&self, configuration: &Configuration<K>) -> Option<ConfigId> {
        self.index.get(configuration).copied()
    }

    /// Every configuration in which the peers are in the given local states,
    /// whatever the channel contents
    pub fn find(&self, first: StateId, second: StateId) -> Vec<ConfigId> {
        self.configurations()
            .filter(|(_, c)| c.first == first && c.second == second)
            .map(|(id, _)| id)
            .collect()
    }

    /// Configurations without any outgoing transition. These are reported
    /// as found; telling a proper final state from a deadlock is up to the caller.
    pub fn stuck_configurations(&self) -> Vec<ConfigId> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .edges_directed(n, Dir::Outgoing)
                    .next()
                    .is_none()
            })
            .map(ConfigId)
            .collect()
    }

    /// States of `automaton` (playing `peer`) that occur in no configuration
    pub fn unreached_states(&self, peer: Peer, automaton: &Automaton<K>) -> Vec<StateId> {
        automaton
            .state_ids()
            .filter(|&s| !self.graph.node_weights().any(|c| c.state(peer) == s))
            .collect()
    }

    /// The underlying petgraph graph, for running graph algorithms on it
    pub fn as_graph(&self) -> &DiGraph<Configuration<K>, Stimulus<K>> {
        &self.graph
    }
}

/// Limits for an exploration run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExploreOptions {
    /// Abort once more than this many distinct configurations were found.
    /// `None` explores until the frontier is empty, which never happens
    /// for an infinite product space.
    pub max_configurations: Option<usize>,
    /// Also fire silent (`Nothing`) edges, as a class after sends and
    /// receptions. Off by default: the graph then only has communication steps.
    pub internal_moves: bool,
}

/// Both machines rebuilt from a configuration and wired to private channels
struct Snapshot<K: Key> {
    first: Cfsm<K, Research<K>>,
    second: Cfsm<K, Research<K>>,
    forward: Arc<Research<K>>,
    backward: Arc<Research<K>>,
}

impl<K: Key> Snapshot<K> {
    fn machine(&mut self, peer: Peer) -> &mut Cfsm<K, Research<K>> {
        match peer {
            Peer::First => &mut self.first,
            Peer::Second => &mut self.second,
        }
    }

    fn configuration(&self) -> Configuration<K> {
        Configuration {
            first: self.first.state_id().expect("snapshot machines have a state"),
            second: self.second.state_id().expect("snapshot machines have a state"),
            forward: self.forward.contents(),
            backward: self.backward.contents(),
        }
    }
}

pub struct Explorer<K: Key> {
    first: Cfsm<K, Research<K>>,
    second: Cfsm<K, Research<K>>,
    options: ExploreOptions,
}

impl<K: Key> Explorer<K> {
    /// Takes copies of both machines, including their current states. Any
    /// channel the originals are bound to is ignored.
    pub fn new<C1: ?Sized, C2: ?Sized>(first: &Cfsm<K, C1>, second: &Cfsm<K, C2>) -> Self {
        Self {
            first: first.detached(),
            second: second.detached(),
            options: ExploreOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExploreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run(&self) -> Result<ReachabilityGraph<K>, ExploreError> {
        let initial = self.initial_configuration()?;
        let mut graph = ReachabilityGraph::new();
        graph.store(initial.clone());
        let mut pending = VecDeque::from([initial]);

        info!("Begin exploration");
        while let Some(configuration) = pending.pop_front() {
            let Some(current) = graph.id_of(&configuration) else {
                unreachable!("dequeued a configuration that was never registered");
            };
            let successors = self.expand(&configuration);
            debug!(
                "expanding configuration {current}: {} successor(s)",
                successors.len()
            );

            for (stimulus, next) in successors {
                let is_known = graph.id_of(&next).is_some();
                if !is_known {
                    if let Some(max) = self.options.max_configurations {
                        if graph.len() >= max {
                            return Err(ExploreError::LimitExceeded {
                                max_configurations: max,
                            });
                        }
                    }
                }
                let stored = graph.store(next.clone());
                trace!("  {stimulus} -> configuration {}", stored.id);
                graph.connect(current, stored.id, stimulus);
                if stored.is_new {
                    pending.push_back(next);
                }
            }
        }
        info!(
            "End of exploration: {} configurations, {} transitions",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    fn initial_configuration(&self) -> Result<Configuration<K>, ExploreError> {
        let first = self
            .first
            .state_id()
            .ok_or(ExploreError::NoInitialState(Peer::First))?;
        let second = self
            .second
            .state_id()
            .ok_or(ExploreError::NoInitialState(Peer::Second))?;
        Ok(Configuration::new(first, second, vec![], vec![]))
    }

    /// Fresh machines in the states of `configuration`, bound to fresh
    /// channels holding copies of its messages
    fn materialize(&self, configuration: &Configuration<K>) -> Snapshot<K> {
        let forward = Arc::new(Research::from_messages(configuration.forward.iter().cloned()));
        let backward = Arc::new(Research::from_messages(
            configuration.backward.iter().cloned(),
        ));

        let mut first = self.first.clone();
        first.set_state(configuration.first);
        first.bind_channels(Arc::clone(&backward), Arc::clone(&forward));

        let mut second = self.second.clone();
        second.set_state(configuration.second);
        second.bind_channels(Arc::clone(&forward), Arc::clone(&backward));

        Snapshot {
            first,
            second,
            forward,
            backward,
        }
    }

    /// Every configuration one stimulus away from `configuration`: sends of
    /// either peer, then receptions of either peer, then silent moves when
    /// `internal_moves` is set
    fn expand(&self, configuration: &Configuration<K>) -> Vec<(Stimulus<K>, Configuration<K>)> {
        let mut probe = self.materialize(configuration);
        let mut successors = vec![];

        for peer in Peer::BOTH {
            for key in probe.machine(peer).enabled_send_moves() {
                let mut next = self.materialize(configuration);
                if let Err(e) = next.machine(peer).try_move(&key) {
                    unreachable!("enabled send move `{key}` failed: {e}");
                }
                successors.push((
                    Stimulus {
                        peer,
                        direction: Direction::Send,
                        key,
                    },
                    next.configuration(),
                ));
            }
        }

        for peer in Peer::BOTH {
            if probe.machine(peer).peek_pending().is_none() {
                continue;
            }
            let mut next = self.materialize(configuration);
            match next.machine(peer).wait_and_move() {
                Ok(key) => successors.push((
                    Stimulus {
                        peer,
                        direction: Direction::Receive,
                        key,
                    },
                    next.configuration(),
                )),
                // the message waits until the peer reaches a receiving state
                Err(e) => trace!("peer {peer} can not receive yet: {e}"),
            }
        }

        if !self.options.internal_moves {
            return successors;
        }
        for peer in Peer::BOTH {
            for key in probe.machine(peer).enabled_internal_moves() {
                let mut next = self.materialize(configuration);
                if let Err(e) = next.machine(peer).fire_internal(&key) {
                    unreachable!("enabled internal move `{key}` failed: {e}");
                }
                successors.push((
                    Stimulus {
                        peer,
                        direction: Direction::Internal,
                        key,
                    },
                    next.configuration(),
                ));
            }
        }

        successors
    }
}

/// Explores the whole reachable product space of `first` and `second`.
/// Does not return if that space is infinite; use `Explorer` with
/// `ExploreOptions::max_configurations` for a bounded run.
pub fn explore<K: Key, C1: ?Sized, C2: ?Sized>(
    first: &Cfsm<K, C1>,
    second: &Cfsm<K, C2>,
) -> Result<ReachabilityGraph<K>, ExploreError> {
    Explorer::new(first, second).run()
}

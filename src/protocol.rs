// Copyright 2025 Cornell University
// released under MIT License
// author: Ernest Ng <eyn5@cornell.edu>

use crate::cfsm::Cfsm;
use crate::channel::Channel;
use crate::errors::ExploreError;
use crate::explorer::{ExploreOptions, Explorer, Peer, ReachabilityGraph};
use crate::scheduler::Simulation;

/// A named machine of a protocol, not bound to any channel
#[derive(Debug, Clone)]
pub struct Machine {
    name: String,
    cfsm: Cfsm<String>,
}

impl Machine {
    pub fn new(name: impl Into<String>, cfsm: Cfsm<String>) -> Self {
        Self {
            name: name.into(),
            cfsm,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cfsm(&self) -> &Cfsm<String> {
        &self.cfsm
    }

    /// Fresh copy in the initial state, ready to be bound to channels of type `C`
    pub fn instantiate<C: ?Sized>(&self) -> Cfsm<String, C> {
        self.cfsm.detached()
    }
}

/// Two machines over one shared alphabet
#[derive(Debug, Clone)]
pub struct Protocol {
    alphabet: Vec<String>,
    first: Machine,
    second: Machine,
}

impl Protocol {
    pub fn new(alphabet: Vec<String>, first: Machine, second: Machine) -> Self {
        Self {
            alphabet,
            first,
            second,
        }
    }

    pub fn alphabet(&self) -> &[String] {
        &self.alphabet
    }

    pub fn machine(&self, peer: Peer) -> &Machine {
        match peer {
            Peer::First => &self.first,
            Peer::Second => &self.second,
        }
    }

    pub fn machines(&self) -> [&Machine; 2] {
        [&self.first, &self.second]
    }

    pub fn explore(&self, options: ExploreOptions) -> Result<ReachabilityGraph<String>, ExploreError> {
        Explorer::new(self.first.cfsm(), self.second.cfsm())
            .with_options(options)
            .run()
    }

    /// Both machines wired up for a live run over channels of type `C`
    pub fn simulation<C>(&self) -> Simulation<String, C>
    where
        C: Channel<String> + Default + Send + Sync,
    {
        Simulation::new(
            (self.first.name(), self.first.instantiate()),
            (self.second.name(), self.second.instantiate()),
        )
    }
}

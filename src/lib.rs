// Copyright 2024 Cornell University
// released under MIT License
// author: Nikil Shyamunder <nikil.shyamsunder@gmail.com>
// author: Kevin Laeufer <laeufer@cornell.edu>
// author: Francis Pham <fdp25@cornell.edu>

pub mod automaton;
pub mod cfsm;
pub mod channel;
pub mod diagnostic;
pub mod errors;
pub mod explorer;
pub mod parser;
pub mod protocol;
pub mod scheduler;
pub mod serialize;

pub use automaton::{Automaton, Key, StateId};
pub use cfsm::{Action, Cfsm};
pub use channel::{Buffered, Channel, Rendezvous, Research};
pub use errors::Error;
pub use explorer::{explore, Configuration, ExploreOptions, Explorer, ReachabilityGraph};

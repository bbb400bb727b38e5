// Copyright 2024 Cornell University
// released under MIT License
// author: Nikil Shyamunder <nvs26@cornell.edu>
// author: Kevin Laeufer <laeufer@cornell.edu>
// author: Francis Pham <fdp25@cornell.edu>
// author: Ernest Ng <eyn5@cornell.edu>

use thiserror::Error;

use crate::cfsm::Action;
use crate::explorer::Peer;

/// Errors raised while a protocol definition is being assembled.
/// These indicate a malformed machine and are meant to abort setup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("state `{0}` is already declared")]
    DuplicateState(String),
    #[error("state `{0}` is not declared")]
    UnknownState(String),
    #[error("key `{0}` is not part of the alphabet")]
    UnknownKey(String),
}

/// Non-fatal failures of a single move. Drivers usually treat these
/// as "not my turn" and try something else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("no initial state has been set")]
    NoInitialState,
    #[error("key `{0}` is not part of the alphabet")]
    UnknownKey(String),
    /// The edge selected by the key is not classified as expected
    #[error("edge `{from}` -> `{to}` on `{key}` is classified as {action:?}")]
    WrongAction {
        from: String,
        to: String,
        key: String,
        action: Action,
    },
    #[error("state `{0}` has no receive edge")]
    NoReceiveEdge(String),
    #[error("no channel is bound")]
    Unbound,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExploreError {
    /// Exploration limit exceeded (protection against infinite product spaces)
    #[error("exploration stopped after {max_configurations} configurations")]
    LimitExceeded { max_configurations: usize },
    #[error("machine {0} has no initial state")]
    NoInitialState(Peer),
}

/// Errors produced while loading a protocol description. The detailed,
/// source-annotated report goes through the `DiagnosticHandler`.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("{0}")]
    Build(#[from] BuildError),
    #[error("{0}")]
    Semantic(String),
}

/// Crate level error, mostly used by the command line driver
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Move(#[from] MoveError),
    #[error(transparent)]
    Explore(#[from] ExploreError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = BuildError::UnknownState("Wait".to_string());
        assert_eq!(err.to_string(), "state `Wait` is not declared");

        let err = MoveError::WrongAction {
            from: "Idle".to_string(),
            to: "Service".to_string(),
            key: "Req".to_string(),
            action: Action::Receive,
        };
        assert_eq!(
            err.to_string(),
            "edge `Idle` -> `Service` on `Req` is classified as Receive"
        );
    }

    #[test]
    fn channel_errors_convert_into_move_errors() {
        let err: MoveError = ChannelError::Closed.into();
        assert_eq!(err, MoveError::Channel(ChannelError::Closed));
        assert_eq!(err.to_string(), "channel is closed");
    }
}

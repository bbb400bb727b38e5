// Copyright 2025 Cornell University
// released under MIT License
// author: Nikil Shyamunder <nvs26@cornell.edu>
// author: Kevin Laeufer <laeufer@cornell.edu>
// author: Francis Pham <fdp25@cornell.edu>
// author: Ernest Ng <eyn5@cornell.edu>

use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;

use crate::cfsm::{Action, Cfsm};
use crate::diagnostic::*;
use crate::errors::{BuildError, ParseError};
use crate::protocol::{Machine, Protocol};

#[derive(Parser)]
#[grammar = "protocol.pest"]
struct ProtocolParser;

struct ParserContext<'a> {
    fileid: usize,
    handler: &'a mut DiagnosticHandler,
}

impl ParserContext<'_> {
    /// Reports `error` at `pair` and returns it
    fn fail<T>(&mut self, pair: &Pair<'_, Rule>, error: ParseError) -> Result<T, ParseError> {
        self.handler
            .emit_diagnostic_parsing(&error.to_string(), self.fileid, pair, Level::Error);
        Err(error)
    }

    fn parse_protocol(&mut self, file: Pair<'_, Rule>) -> Result<Protocol, ParseError> {
        let mut inner = file.into_inner();
        let alphabet_pair = inner
            .next()
            .expect("grammar guarantees an alphabet declaration");
        let alphabet = self.parse_alphabet(alphabet_pair)?;

        let mut machines: Vec<Machine> = vec![];
        for pair in inner {
            if pair.as_rule() != Rule::machine {
                continue;
            }
            let name_pair = pair
                .clone()
                .into_inner()
                .next()
                .expect("grammar guarantees a machine name");
            if machines.iter().any(|m| m.name() == name_pair.as_str()) {
                let msg = format!("machine `{}` is declared twice", name_pair.as_str());
                return self.fail(&name_pair, ParseError::Semantic(msg));
            }
            machines.push(self.parse_machine(pair, &alphabet)?);
        }

        let count = machines.len();
        let [first, second]: [Machine; 2] = machines.try_into().map_err(|_| {
            let msg = format!("expected exactly two machines, found {count}");
            self.handler.emit_general_message(&msg, Level::Error);
            ParseError::Semantic(msg)
        })?;
        Ok(Protocol::new(alphabet, first, second))
    }

    fn parse_alphabet(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<String>, ParseError> {
        let mut alphabet: Vec<String> = vec![];
        for key in pair.into_inner() {
            if alphabet.iter().any(|k| k == key.as_str()) {
                let msg = format!("key `{}` is declared twice", key.as_str());
                return self.fail(&key, ParseError::Semantic(msg));
            }
            alphabet.push(key.as_str().to_string());
        }
        Ok(alphabet)
    }

    fn parse_machine(
        &mut self,
        pair: Pair<'_, Rule>,
        alphabet: &[String],
    ) -> Result<Machine, ParseError> {
        let mut inner = pair.into_inner();
        let name_pair = inner.next().expect("grammar guarantees a machine name");
        let mut cfsm: Cfsm<String> = Cfsm::new(alphabet.iter().cloned());
        let mut has_initial = false;
        // (source state, key) pairs that already have a transition
        let mut seen = FxHashSet::default();
        // (source state, target state) pairs and the key they were classified on
        let mut classified = FxHashMap::default();

        for item in inner {
            match item.as_rule() {
                Rule::states => {
                    for state in item.into_inner() {
                        if let Err(e) = cfsm.add_node(state.as_str()) {
                            return self.fail(&state, e.into());
                        }
                    }
                }
                Rule::initial => {
                    let state = item
                        .into_inner()
                        .next()
                        .expect("grammar guarantees an initial state name");
                    if let Err(e) = cfsm.set_initial_node(state.as_str()) {
                        return self.fail(&state, e.into());
                    }
                    has_initial = true;
                }
                Rule::transition => {
                    self.parse_transition(item, alphabet, &mut cfsm, &mut seen, &mut classified)?
                }
                rule => unreachable!("unexpected rule in machine body: {:?}", rule),
            }
        }

        if !has_initial {
            let msg = format!("machine `{}` has no initial state", name_pair.as_str());
            return self.fail(&name_pair, ParseError::Semantic(msg));
        }
        Ok(Machine::new(name_pair.as_str(), cfsm))
    }

    fn parse_transition(
        &mut self,
        pair: Pair<'_, Rule>,
        alphabet: &[String],
        cfsm: &mut Cfsm<String>,
        seen: &mut FxHashSet<(String, String)>,
        classified: &mut FxHashMap<(String, String), String>,
    ) -> Result<(), ParseError> {
        let whole = pair.clone();
        let mut inner = pair.into_inner();
        let mut next = || inner.next().expect("grammar guarantees four transition parts");
        let (from, to, action, key) = (next(), next(), next(), next());

        for state in [&from, &to] {
            if cfsm.automaton().state_id(state.as_str()).is_none() {
                let e = BuildError::UnknownState(state.as_str().to_string());
                return self.fail(state, e.into());
            }
        }
        if !alphabet.iter().any(|k| k == key.as_str()) {
            let e = BuildError::UnknownKey(key.as_str().to_string());
            return self.fail(&key, e.into());
        }
        let action = match action.as_rule() {
            Rule::transmit => Action::Transmit,
            Rule::receive => Action::Receive,
            Rule::nothing => Action::Nothing,
            rule => unreachable!("expected an action, found {:?}", rule),
        };

        if !seen.insert((from.as_str().to_string(), key.as_str().to_string())) {
            let msg = format!(
                "`{}` already has a transition on `{}`, this one replaces it",
                from.as_str(),
                key.as_str()
            );
            self.handler
                .emit_diagnostic_parsing(&msg, self.fileid, &whole, Level::Warning);
        }

        let edge = (from.as_str().to_string(), to.as_str().to_string());
        if let Some(previous) = classified.insert(edge, key.as_str().to_string()) {
            if previous != key.as_str() {
                let msg = format!(
                    "edge `{}` -> `{}` was classified on `{}`, `{}` replaces it and `{}` becomes undefined",
                    from.as_str(),
                    to.as_str(),
                    previous,
                    key.as_str(),
                    previous
                );
                self.handler
                    .emit_diagnostic_parsing(&msg, self.fileid, &whole, Level::Warning);
            }
        }

        if let Err(e) = cfsm.set_transition(from.as_str(), to.as_str(), key.as_str().to_string(), action) {
            return self.fail(&whole, e.into());
        }
        Ok(())
    }
}

/// Parses a protocol description held in memory; `name` is only used in diagnostics
pub fn parse_str(
    name: &str,
    input: &str,
    handler: &mut DiagnosticHandler,
) -> Result<Protocol, ParseError> {
    let fileid = handler.add_file(name.to_string(), input.to_string());

    let mut pairs = match ProtocolParser::parse(Rule::file, input) {
        Ok(pairs) => pairs,
        Err(err) => {
            let (start, end) = match err.location {
                InputLocation::Pos(start) => (start, start),
                InputLocation::Span(span) => span,
            };
            let msg = format!("Lexing failed: {}", err.variant.message());
            handler.emit_diagnostic_span(&msg, fileid, start, end, Level::Error);
            return Err(ParseError::Syntax(msg));
        }
    };
    let file = pairs.next().expect("grammar guarantees a file rule");

    let mut context = ParserContext { fileid, handler };
    context.parse_protocol(file)
}

/// Parses the protocol file at `filename` using a particular `DiagnosticHandler`
pub fn parse_file(
    filename: impl AsRef<Path>,
    handler: &mut DiagnosticHandler,
) -> Result<Protocol, ParseError> {
    let path = filename.as_ref();
    let name = path.to_string_lossy().to_string();
    let input = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: name.clone(),
        source,
    })?;
    parse_str(&name, &input, handler)
}

// Copyright 2024 Cornell University
// released under MIT License
// author: Nikil Shyamunder <nvs26@cornell.edu>
// author: Kevin Laeufer <laeufer@cornell.edu>
// author: Francis Pham <fdp25@cornell.edu>

use std::fmt::{self, Display, Formatter};
use std::io::Write;

use crate::automaton::{Automaton, Key};
use crate::explorer::{Configuration, Peer, ReachabilityGraph};
use crate::protocol::Protocol;

fn to_string(f: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> std::io::Result<String> {
    let mut out = Vec::new();
    f(&mut out)?;
    String::from_utf8(out).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn join<K: Display>(keys: &[K]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `<state 1> <state 2>` of a configuration
fn serialize_states<K>(
    configuration: &Configuration<K>,
    first: &Automaton<K>,
    second: &Automaton<K>,
) -> String
where
    K: Key,
{
    format!(
        "{} {}",
        first.state_name(configuration.state(Peer::First)),
        second.state_name(configuration.state(Peer::Second))
    )
}

/// Dumps the reachability graph: every configuration as
/// `<state 1> <state 2> <id>`, the successor ids of every configuration and
/// the pending messages of both channels (first to second, then second to first).
pub fn serialize_graph<K: Key>(
    out: &mut impl Write,
    graph: &ReachabilityGraph<K>,
    first: &Automaton<K>,
    second: &Automaton<K>,
) -> std::io::Result<()> {
    writeln!(out, "Possible states:")?;
    for (id, configuration) in graph.configurations() {
        writeln!(out, "{} {}", serialize_states(configuration, first, second), id)?;
    }

    writeln!(out, "Connections:")?;
    for (id, _) in graph.configurations() {
        write!(out, "{}:", id)?;
        for (to, _) in graph.successors(id) {
            write!(out, " {}", to)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "Channels:")?;
    for (id, configuration) in graph.configurations() {
        writeln!(
            out,
            "{}: [{}] [{}]",
            id,
            join(configuration.forward()),
            join(configuration.backward())
        )?;
    }
    Ok(())
}

pub fn serialize_graph_to_string<K: Key>(
    graph: &ReachabilityGraph<K>,
    first: &Automaton<K>,
    second: &Automaton<K>,
) -> std::io::Result<String> {
    to_string(|out| serialize_graph(out, graph, first, second))
}

/// Counts, stuck configurations and states no configuration ever visits
pub fn serialize_summary<K: Key>(
    out: &mut impl Write,
    graph: &ReachabilityGraph<K>,
    first: &Automaton<K>,
    second: &Automaton<K>,
) -> std::io::Result<()> {
    writeln!(
        out,
        "{} configurations, {} transitions",
        graph.len(),
        graph.edge_count()
    )?;

    let stuck = graph.stuck_configurations();
    if stuck.is_empty() {
        writeln!(out, "stuck: none")?;
    } else {
        writeln!(out, "stuck:")?;
        for id in stuck {
            let configuration = graph.configuration(id);
            writeln!(
                out,
                "  {} {} [{}] [{}]",
                id,
                serialize_states(configuration, first, second),
                join(configuration.forward()),
                join(configuration.backward())
            )?;
        }
    }

    for (peer, automaton) in [(Peer::First, first), (Peer::Second, second)] {
        let unreached: Vec<_> = graph
            .unreached_states(peer, automaton)
            .into_iter()
            .map(|s| automaton.state_name(s))
            .collect();
        if !unreached.is_empty() {
            writeln!(out, "unreached states of {}: {}", peer, unreached.join(", "))?;
        }
    }
    Ok(())
}

/// Renders the protocol back into the description format
pub fn serialize_protocol(out: &mut impl Write, protocol: &Protocol) -> std::io::Result<()> {
    writeln!(out, "alphabet {};", protocol.alphabet().join(", "))?;

    for machine in protocol.machines() {
        let cfsm = machine.cfsm();
        let automaton = cfsm.automaton();
        writeln!(out)?;
        writeln!(out, "machine {} {{", machine.name())?;
        let states: Vec<_> = automaton
            .state_ids()
            .map(|s| automaton.state_name(s))
            .collect();
        writeln!(out, "    states {};", states.join(", "))?;
        if let Some(initial) = cfsm.state() {
            writeln!(out, "    initial {};", initial)?;
        }
        for (from, to, key, action) in cfsm.transitions() {
            writeln!(
                out,
                "    {} -> {} {} {};",
                automaton.state_name(from),
                automaton.state_name(to),
                action,
                key
            )?;
        }
        writeln!(out, "}}")?;
    }
    Ok(())
}

pub fn serialize_protocol_to_string(protocol: &Protocol) -> std::io::Result<String> {
    to_string(|out| serialize_protocol(out, protocol))
}

/// Graphviz rendering of a reachability graph. Nodes are labelled with both
/// local states and the channel contents, edges with the stimulus.
///
/// ```ignore
/// println!("{}", Dot::new(&graph, first.automaton(), second.automaton()));
/// ```
pub struct Dot<'a, K> {
    graph: &'a ReachabilityGraph<K>,
    first: &'a Automaton<K>,
    second: &'a Automaton<K>,
}

impl<'a, K> Dot<'a, K> {
    pub fn new(
        graph: &'a ReachabilityGraph<K>,
        first: &'a Automaton<K>,
        second: &'a Automaton<K>,
    ) -> Self {
        Self {
            graph,
            first,
            second,
        }
    }
}

impl<K: Key> Display for Dot<'_, K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "digraph \"reachability\" {{")?;
        for (id, configuration) in self.graph.configurations() {
            writeln!(
                f,
                "    {} [label=\"{} [{}] [{}]\"];",
                id,
                serialize_states(configuration, self.first, self.second),
                join(configuration.forward()),
                join(configuration.backward())
            )?;
        }
        if self.graph.edge_count() > 0 {
            writeln!(f)?;
        }
        for (from, to, stimulus) in self.graph.edges() {
            writeln!(f, "    {from} -> {to} [label=\"{stimulus}\"];")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
pub mod tests {
    use insta::Settings;
    use std::path::Path;

    use super::*;
    use crate::diagnostic::DiagnosticHandler;
    use crate::explorer::ExploreOptions;
    use crate::parser::{parse_file, parse_str};

    fn snap(name: &str, content: String) {
        let mut settings = Settings::clone_current();
        settings.set_snapshot_path(Path::new("../tests/snapshots"));
        settings.bind(|| {
            insta::assert_snapshot!(name, content);
        });
    }

    fn load(filename: &str) -> Protocol {
        let mut handler = DiagnosticHandler::default();
        parse_file(filename, &mut handler).unwrap()
    }

    fn automata(protocol: &Protocol) -> (&Automaton<String>, &Automaton<String>) {
        (
            protocol.machine(Peer::First).cfsm().automaton(),
            protocol.machine(Peer::Second).cfsm().automaton(),
        )
    }

    #[test]
    fn user_server_graph() {
        let protocol = load("tests/protocols/user_server.cfsm");
        let graph = protocol.explore(ExploreOptions::default()).unwrap();
        let (first, second) = automata(&protocol);
        snap(
            "user_server_graph",
            serialize_graph_to_string(&graph, first, second).unwrap(),
        );
    }

    #[test]
    fn user_server_summary() {
        let protocol = load("tests/protocols/user_server.cfsm");
        let graph = protocol.explore(ExploreOptions::default()).unwrap();
        let (first, second) = automata(&protocol);
        let summary = to_string(|out| serialize_summary(out, &graph, first, second)).unwrap();
        assert_eq!(
            summary,
            "13 configurations, 18 transitions\nstuck:\n  10 Wait Fault [] []\n"
        );
    }

    #[test]
    fn request_ack_dot() {
        let protocol = load("tests/protocols/request_ack.cfsm");
        let graph = protocol.explore(ExploreOptions::default()).unwrap();
        let (first, second) = automata(&protocol);
        assert_eq!(
            Dot::new(&graph, first, second).to_string(),
            "digraph \"reachability\" {\n\
            \x20   0 [label=\"Idle Idle [] []\"];\n\
            \x20   1 [label=\"Sending Idle [Req] []\"];\n\
            \x20   2 [label=\"Sending Busy [] []\"];\n\
            \x20   3 [label=\"Sending Idle [] [Ack]\"];\n\
            \n\
            \x20   0 -> 1 [label=\"1!Req\"];\n\
            \x20   1 -> 2 [label=\"2?Req\"];\n\
            \x20   2 -> 3 [label=\"2!Ack\"];\n\
            \x20   3 -> 0 [label=\"1?Ack\"];\n\
            }"
        );
    }

    #[test]
    fn user_server_protocol() {
        let protocol = load("tests/protocols/user_server.cfsm");
        snap(
            "user_server_protocol",
            serialize_protocol_to_string(&protocol).unwrap(),
        );
    }

    #[test]
    fn printed_protocol_parses_to_the_same_protocol() {
        let protocol = load("tests/protocols/user_server.cfsm");
        let printed = serialize_protocol_to_string(&protocol).unwrap();
        let mut handler = DiagnosticHandler::default();
        let reparsed = parse_str("printed.cfsm", &printed, &mut handler).unwrap();
        assert_eq!(serialize_protocol_to_string(&reparsed).unwrap(), printed);

        let graph = protocol.explore(ExploreOptions::default()).unwrap();
        let again = reparsed.explore(ExploreOptions::default()).unwrap();
        assert_eq!(graph.len(), again.len());
        assert_eq!(graph.edge_count(), again.edge_count());
    }
}

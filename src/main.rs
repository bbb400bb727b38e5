// Copyright 2025 Cornell University
// released under MIT License
// author: Ernest Ng <eyn5@cornell.edu>

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use cfsm::diagnostic::DiagnosticHandler;
use cfsm::errors::{Error, ParseError};
use cfsm::explorer::{ExploreOptions, Peer};
use cfsm::parser::parse_file;
use cfsm::protocol::Protocol;
use cfsm::scheduler::{Policy, SimulationOptions, SimulationReport, Trace};
use cfsm::serialize::{serialize_graph, serialize_summary, Dot};
use cfsm::{Buffered, Rendezvous};
use clap::{ColorChoice, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};

/// Args for the CFSM CLI
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, disable_version_flag = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Users can specify `-v` or `--verbose` to toggle logging
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,

    /// Pass in `--color never` to suppress colored error messages.
    #[arg(long, value_name = "COLOR_CHOICE", default_value = "auto", global = true)]
    color: ColorChoice,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Builds the reachability graph of a protocol
    Explore {
        /// Path to a protocol (.cfsm) file
        #[arg(value_name = "PROTOCOL_FILE")]
        protocol: String,

        /// Print the graph in Graphviz DOT format instead of the text dump
        #[arg(long)]
        dot: bool,

        /// Give up once more than this many configurations were found
        #[arg(long)]
        max_configurations: Option<usize>,

        /// Also explore silent (`.`) transitions
        #[arg(long)]
        internal_moves: bool,
    },
    /// Runs both machines of a protocol concurrently
    Simulate {
        /// Path to a protocol (.cfsm) file
        #[arg(value_name = "PROTOCOL_FILE")]
        protocol: String,

        #[arg(long, value_enum, default_value_t = ChannelKind::Buffered)]
        channel: ChannelKind,

        /// Iterations per machine
        #[arg(long, default_value_t = 20)]
        steps: usize,

        /// Wall-clock limit for the whole run
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Probability with which the second machine sends when it could
        #[arg(long, default_value_t = Policy::DEFAULT_SEND_PROBABILITY, value_parser = parse_probability)]
        send_bias: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ChannelKind {
    Buffered,
    Rendezvous,
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{p} is not a probability between 0 and 1"))
    }
}

fn explore(protocol: &Protocol, dot: bool, options: ExploreOptions) -> Result<(), Error> {
    let graph = protocol.explore(options)?;
    let first = protocol.machine(Peer::First).cfsm().automaton();
    let second = protocol.machine(Peer::Second).cfsm().automaton();

    let mut out = std::io::stdout().lock();
    if dot {
        writeln!(out, "{}", Dot::new(&graph, first, second))?;
    } else {
        serialize_graph(&mut out, &graph, first, second)?;
        serialize_summary(&mut out, &graph, first, second)?;
    }
    Ok(())
}

fn print_trace(trace: &Trace<String>) {
    println!("{}: {:?}", trace.name, trace.outcome);
    for step in &trace.steps {
        println!("  {}: {}", step.state, step.event);
    }
    if let Some(state) = &trace.final_state {
        println!("  ends in {}", state);
    }
}

fn print_report(report: &SimulationReport<String>) {
    print_trace(&report.first);
    print_trace(&report.second);
    if report.timed_out {
        println!("timed out");
    }
}

/// Examples:
/// ```
/// $ cargo run -- explore tests/protocols/user_server.cfsm
/// $ cargo run -- explore tests/protocols/request_ack.cfsm --dot
/// $ cargo run -- simulate tests/protocols/user_server.cfsm --channel rendezvous --seed 3 -v
/// ```
fn main() -> ExitCode {
    // Parse CLI args
    let cli = Cli::parse();

    // Set up logger to use the log-level specified via the `-v` flag
    // For concision, we disable timestamps and the module paths in the log
    env_logger::Builder::new()
        .format_timestamp(None)
        .format_module_path(false)
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let handler = &mut DiagnosticHandler::new(cli.color);

    let result = match cli.command {
        Command::Explore {
            protocol,
            dot,
            max_configurations,
            internal_moves,
        } => {
            let options = ExploreOptions {
                max_configurations,
                internal_moves,
            };
            parse_file(&protocol, handler)
                .map_err(Error::from)
                .and_then(|p| explore(&p, dot, options))
        }
        Command::Simulate {
            protocol,
            channel,
            steps,
            timeout_ms,
            seed,
            send_bias,
        } => parse_file(&protocol, handler).map_err(Error::from).map(|p| {
            let options = SimulationOptions {
                steps,
                timeout: Some(Duration::from_millis(timeout_ms)),
                seed,
                pace: None,
            };
            let policies = (
                Policy::Eager,
                Policy::Biased {
                    send_probability: send_bias,
                },
            );
            let report = match channel {
                ChannelKind::Buffered => p
                    .simulation::<Buffered<String>>()
                    .with_policies(policies.0, policies.1)
                    .with_options(options)
                    .run(),
                ChannelKind::Rendezvous => p
                    .simulation::<Rendezvous<String>>()
                    .with_policies(policies.0, policies.1)
                    .with_options(options)
                    .run(),
            };
            print_report(&report);
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        // already rendered by the diagnostic handler
        Err(Error::Parse(ref e)) if !matches!(e, ParseError::Io { .. }) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

// Copyright 2024 Cornell University
// released under MIT License
// author: Nikil Shyamunder <nvs26@cornell.edu>
// author: Kevin Laeufer <laeufer@cornell.edu>
// author: Francis Pham <fdp25@cornell.edu>
// author: Ernest Ng <eyn5@cornell.edu>

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use crate::automaton::Key;
use crate::cfsm::Cfsm;
use crate::channel::Channel;
use crate::errors::{ChannelError, MoveError};

/// How a driver picks between sending and waiting
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    /// Always fire the first enabled send-move
    Eager,
    /// Fire the first enabled send-move with the given probability,
    /// otherwise wait for a message
    Biased { send_probability: f64 },
}

impl Policy {
    pub const DEFAULT_SEND_PROBABILITY: f64 = 2.0 / 3.0;

    fn wants_send(&self, rng: &mut StdRng) -> bool {
        match self {
            Policy::Eager => true,
            // NaN never sends
            Policy::Biased { send_probability } if send_probability.is_nan() => false,
            Policy::Biased { send_probability } => rng.gen_bool(send_probability.clamp(0.0, 1.0)),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Biased {
            send_probability: Self::DEFAULT_SEND_PROBABILITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<K> {
    Sent(K),
    Received(K),
    Internal(K),
    /// the attempted move was not possible, the state is unchanged
    Refused(MoveError),
}

impl<K: fmt::Display> fmt::Display for Event<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Sent(key) => write!(f, "sent {key}"),
            Event::Received(key) => write!(f, "received {key}"),
            Event::Internal(key) => write!(f, "internal {key}"),
            Event::Refused(e) => write!(f, "refused ({e})"),
        }
    }
}

/// One iteration of a driver: the state it started in and what happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<K> {
    pub state: String,
    pub event: Event<K>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// used up its step budget
    Completed,
    /// stopped from outside, or the peer hung up
    Stopped,
    /// no send, no silent move and no receive edge left
    Stuck,
}

#[derive(Debug, Clone)]
pub struct Trace<K> {
    pub name: String,
    pub steps: Vec<Step<K>>,
    pub outcome: Outcome,
    /// state the machine was left in
    pub final_state: Option<String>,
}

impl<K> Trace<K> {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: vec![],
            outcome: Outcome::Completed,
            final_state: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationReport<K> {
    pub first: Trace<K>,
    pub second: Trace<K>,
    /// the wall-clock timeout fired before both drivers were done
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationOptions {
    /// iterations per driver
    pub steps: usize,
    /// stop both drivers once this much time has passed since the start
    pub timeout: Option<Duration>,
    pub seed: u64,
    /// pause after every iteration
    pub pace: Option<Duration>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            steps: 20,
            timeout: Some(Duration::from_secs(5)),
            seed: 0,
            pace: None,
        }
    }
}

/// Shared cancellation hook: raises a flag and closes both channels,
/// which wakes a driver blocked in `send` or `receive`.
pub struct StopHandle<K, C: ?Sized> {
    stopped: Arc<AtomicBool>,
    channels: [Arc<C>; 2],
    key: PhantomData<fn() -> K>,
}

impl<K, C: ?Sized> Clone for StopHandle<K, C> {
    fn clone(&self) -> Self {
        Self {
            stopped: Arc::clone(&self.stopped),
            channels: [Arc::clone(&self.channels[0]), Arc::clone(&self.channels[1])],
            key: PhantomData,
        }
    }
}

impl<K, C: Channel<K> + ?Sized> StopHandle<K, C> {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.hang_up();
    }

    fn hang_up(&self) {
        for channel in &self.channels {
            channel.close();
        }
    }
}

/// A machine together with the loop that drives it
struct Driver<K, C: ?Sized> {
    name: String,
    machine: Cfsm<K, C>,
    policy: Policy,
    rng: StdRng,
}

impl<K: Key, C: Channel<K> + ?Sized> Driver<K, C> {
    fn run(mut self, steps: usize, pace: Option<Duration>, stop: &StopHandle<K, C>) -> Trace<K> {
        let mut trace = Trace::new(&self.name);
        for _ in 0..steps {
            if stop.is_stopped() {
                trace.outcome = Outcome::Stopped;
                break;
            }
            let state = self.machine.state().unwrap_or("?").to_string();
            info!("{}: {}", self.name, state);

            let event = match self.step() {
                Ok(event) => event,
                Err(MoveError::Channel(ChannelError::Closed)) => {
                    debug!("{}: channel closed in {}", self.name, state);
                    trace.outcome = Outcome::Stopped;
                    break;
                }
                Err(MoveError::NoReceiveEdge(_)) if self.is_stuck() => {
                    warn!("{}: stuck in {}", self.name, state);
                    trace.outcome = Outcome::Stuck;
                    break;
                }
                Err(e) => Event::Refused(e),
            };
            debug!("{}: {}", self.name, event);
            trace.steps.push(Step { state, event });

            if let Some(pause) = pace {
                thread::sleep(pause);
            }
        }

        // a peer waiting on us would otherwise wait forever
        stop.hang_up();
        trace.final_state = self.machine.state().map(str::to_string);
        trace
    }

    fn step(&mut self) -> Result<Event<K>, MoveError> {
        let sends = self.machine.enabled_send_moves();
        if let Some(key) = sends.first() {
            if self.policy.wants_send(&mut self.rng) {
                self.machine.try_move(key)?;
                return Ok(Event::Sent(key.clone()));
            }
        }
        if let Some(key) = self.machine.enabled_internal_moves().first() {
            self.machine.fire_internal(key)?;
            return Ok(Event::Internal(key.clone()));
        }
        self.machine.wait_and_move().map(Event::Received)
    }

    fn is_stuck(&self) -> bool {
        self.machine.enabled_send_moves().is_empty()
            && self.machine.enabled_internal_moves().is_empty()
            && !self.machine.has_receive_edge()
    }
}

/// Two machines running concurrently, each on its own thread, talking over
/// a freshly created channel pair
pub struct Simulation<K, C> {
    first: Driver<K, C>,
    second: Driver<K, C>,
    stop: StopHandle<K, C>,
    options: SimulationOptions,
}

impl<K, C> Simulation<K, C>
where
    K: Key + Send,
    C: Channel<K> + Default + Send + Sync,
{
    /// Binds `first` and `second` to each other. Any previous binding is replaced.
    pub fn new(
        (first_name, mut first): (&str, Cfsm<K, C>),
        (second_name, mut second): (&str, Cfsm<K, C>),
    ) -> Self {
        let forward = Arc::new(C::default());
        let backward = Arc::new(C::default());
        first.bind_channels(Arc::clone(&backward), Arc::clone(&forward));
        second.bind_channels(Arc::clone(&forward), Arc::clone(&backward));

        let options = SimulationOptions::default();
        Self {
            first: Driver {
                name: first_name.to_string(),
                machine: first,
                policy: Policy::Eager,
                rng: StdRng::seed_from_u64(options.seed),
            },
            second: Driver {
                name: second_name.to_string(),
                machine: second,
                policy: Policy::default(),
                rng: StdRng::seed_from_u64(options.seed.wrapping_add(1)),
            },
            stop: StopHandle {
                stopped: Arc::new(AtomicBool::new(false)),
                channels: [forward, backward],
                key: PhantomData,
            },
            options,
        }
    }

    pub fn with_policies(mut self, first: Policy, second: Policy) -> Self {
        self.first.policy = first;
        self.second.policy = second;
        self
    }

    pub fn with_options(mut self, options: SimulationOptions) -> Self {
        self.first.rng = StdRng::seed_from_u64(options.seed);
        self.second.rng = StdRng::seed_from_u64(options.seed.wrapping_add(1));
        self.options = options;
        self
    }

    /// Handle for stopping the simulation from another thread
    pub fn stop_handle(&self) -> StopHandle<K, C> {
        self.stop.clone()
    }

    /// Runs both drivers to completion, or until the timeout fires
    pub fn run(self) -> SimulationReport<K> {
        let Self {
            first,
            second,
            stop,
            options,
        } = self;
        info!(
            "Starting simulation of {} and {} ({} steps each)",
            first.name, second.name, options.steps
        );

        let (done_tx, done_rx) = mpsc::channel::<()>();
        let mut timed_out = false;
        let (first, second) = thread::scope(|s| {
            let spawn = |driver: Driver<K, C>| {
                let stop = &stop;
                let done = done_tx.clone();
                s.spawn(move || {
                    let trace = driver.run(options.steps, options.pace, stop);
                    // the receiver only goes away once both drivers are joined
                    let _ = done.send(());
                    trace
                })
            };
            let first = spawn(first);
            let second = spawn(second);

            let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
            for _ in 0..2 {
                let finished = match deadline {
                    Some(deadline) => done_rx
                        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                        .is_ok(),
                    None => done_rx.recv().is_ok(),
                };
                if !finished {
                    warn!("Simulation timed out, stopping both drivers");
                    timed_out = true;
                    stop.stop();
                    break;
                }
            }

            let first = first
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            let second = second
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            (first, second)
        });

        info!("Simulation finished");
        SimulationReport {
            first,
            second,
            timed_out,
        }
    }
}

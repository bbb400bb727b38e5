// Copyright 2025 Cornell University
// released under MIT License
// author: Ernest Ng <eyn5@cornell.edu>

/*! Point-to-point message conduits between two communicating automata.
 *
 *  - `Buffered`: unbounded FIFO, `send` never waits, `receive` waits for data.
 *  - `Rendezvous`: no buffering, `send` waits until its value was collected.
 *  - `Research`: the FIFO of `Buffered` without any waiting. It is the only
 *    variant the reachability explorer uses.
 *
 *  Blocking variants can be `close`d, which wakes every waiting thread.
 */

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::errors::ChannelError;

pub trait Channel<M> {
    /// Appends `msg`. Fails only once the channel has been closed.
    fn send(&self, msg: M) -> Result<(), ChannelError>;

    /// Removes the oldest message. Blocking variants wait for one and return
    /// `None` only after the channel was closed and drained.
    fn receive(&self) -> Option<M>;

    fn has_pending(&self) -> bool;

    fn peek(&self) -> Option<M>;

    /// Wakes up every thread waiting on this channel; later sends fail.
    fn close(&self) {}
}

#[derive(Debug)]
struct Queue<M> {
    messages: VecDeque<M>,
    closed: bool,
}

/// Unbounded FIFO channel
#[derive(Debug)]
pub struct Buffered<M> {
    queue: Mutex<Queue<M>>,
    available: Condvar,
}

impl<M> Default for Buffered<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Buffered<M> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                messages: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Queue<M>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<M: Clone> Channel<M> for Buffered<M> {
    fn send(&self, msg: M) -> Result<(), ChannelError> {
        let mut queue = self.lock();
        if queue.closed {
            return Err(ChannelError::Closed);
        }
        queue.messages.push_back(msg);
        self.available.notify_one();
        Ok(())
    }

    fn receive(&self) -> Option<M> {
        let mut queue = self.lock();
        loop {
            if let Some(msg) = queue.messages.pop_front() {
                return Some(msg);
            }
            if queue.closed {
                return None;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn has_pending(&self) -> bool {
        !self.lock().messages.is_empty()
    }

    fn peek(&self) -> Option<M> {
        self.lock().messages.front().cloned()
    }

    fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }
}

#[derive(Debug)]
struct Slot<M> {
    value: Option<M>,
    /// number of values ever offered
    offered: u64,
    /// number of values ever collected
    collected: u64,
    closed: bool,
}

/// Synchronous hand-off: a single slot plus two condition variables.
/// `offered` is signalled when a value lands in the slot, `collected` when
/// the receiver took it out.
#[derive(Debug)]
pub struct Rendezvous<M> {
    slot: Mutex<Slot<M>>,
    offered: Condvar,
    collected: Condvar,
}

impl<M> Default for Rendezvous<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Rendezvous<M> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                offered: 0,
                collected: 0,
                closed: false,
            }),
            offered: Condvar::new(),
            collected: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<M>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<M: Clone> Channel<M> for Rendezvous<M> {
    fn send(&self, msg: M) -> Result<(), ChannelError> {
        let mut slot = self.lock();

        // wait for a previous hand-off to complete
        while slot.value.is_some() && !slot.closed {
            slot = self
                .collected
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
        if slot.closed {
            return Err(ChannelError::Closed);
        }

        slot.value = Some(msg);
        slot.offered += 1;
        let ticket = slot.offered;
        self.offered.notify_all();

        while slot.collected < ticket && !slot.closed {
            slot = self
                .collected
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
        if slot.collected < ticket {
            // closed before anybody picked it up
            slot.value = None;
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    fn receive(&self) -> Option<M> {
        let mut slot = self.lock();
        loop {
            if let Some(msg) = slot.value.take() {
                slot.collected += 1;
                self.collected.notify_all();
                return Some(msg);
            }
            if slot.closed {
                return None;
            }
            slot = self.offered.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn has_pending(&self) -> bool {
        self.lock().value.is_some()
    }

    fn peek(&self) -> Option<M> {
        self.lock().value.clone()
    }

    fn close(&self) {
        self.lock().closed = true;
        self.offered.notify_all();
        self.collected.notify_all();
    }
}

/// Non-blocking FIFO used while exploring hypothetical futures.
/// `receive` on an empty channel returns `None` right away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Research<M> {
    messages: RefCell<VecDeque<M>>,
}

impl<M> Default for Research<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Research<M> {
    pub fn new() -> Self {
        Self {
            messages: RefCell::new(VecDeque::new()),
        }
    }

    pub fn from_messages(messages: impl IntoIterator<Item = M>) -> Self {
        Self {
            messages: RefCell::new(messages.into_iter().collect()),
        }
    }

    /// Pending messages, oldest first
    pub fn contents(&self) -> Vec<M>
    where
        M: Clone,
    {
        self.messages.borrow().iter().cloned().collect()
    }
}

impl<M: Clone> Channel<M> for Research<M> {
    fn send(&self, msg: M) -> Result<(), ChannelError> {
        self.messages.borrow_mut().push_back(msg);
        Ok(())
    }

    fn receive(&self) -> Option<M> {
        self.messages.borrow_mut().pop_front()
    }

    fn has_pending(&self) -> bool {
        !self.messages.borrow().is_empty()
    }

    fn peek(&self) -> Option<M> {
        self.messages.borrow().front().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn buffered_is_fifo() {
        let ch = Buffered::new();
        for msg in ["m1", "m2", "m3"] {
            ch.send(msg).unwrap();
        }
        assert_eq!(ch.len(), 3);
        assert_eq!(ch.peek(), Some("m1"));
        assert_eq!(ch.receive(), Some("m1"));
        assert_eq!(ch.receive(), Some("m2"));
        assert_eq!(ch.receive(), Some("m3"));
        assert!(!ch.has_pending());
        assert_eq!(ch.peek(), None);
    }

    #[test]
    fn research_is_fifo_and_never_blocks() {
        let ch = Research::new();
        assert_eq!(ch.receive(), None);
        for msg in 0..5 {
            ch.send(msg).unwrap();
        }
        assert_eq!(ch.contents(), vec![0, 1, 2, 3, 4]);
        let drained: Vec<_> = std::iter::from_fn(|| ch.receive()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert_eq!(ch.receive(), None);
    }

    #[test]
    fn research_clones_do_not_alias() {
        let ch = Research::from_messages(["a"]);
        let copy = ch.clone();
        copy.send("b").unwrap();
        assert_eq!(ch.contents(), vec!["a"]);
        assert_eq!(copy.contents(), vec!["a", "b"]);
        assert_ne!(ch, copy);
    }

    #[test]
    fn buffered_receive_waits_for_send() {
        let ch = Arc::new(Buffered::new());
        let receiver = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.receive())
        };
        thread::sleep(Duration::from_millis(20));
        ch.send("Req").unwrap();
        assert_eq!(receiver.join().unwrap(), Some("Req"));
    }

    #[test]
    fn closing_wakes_blocked_receiver() {
        let ch: Arc<Buffered<u32>> = Arc::new(Buffered::new());
        let receiver = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.receive())
        };
        thread::sleep(Duration::from_millis(20));
        ch.close();
        assert_eq!(receiver.join().unwrap(), None);
        assert_eq!(ch.send(1), Err(ChannelError::Closed));
    }

    #[test]
    fn closed_buffered_still_drains() {
        let ch = Buffered::new();
        ch.send(7).unwrap();
        ch.close();
        assert_eq!(ch.receive(), Some(7));
        assert_eq!(ch.receive(), None);
    }

    #[test]
    fn rendezvous_send_waits_for_receive() {
        let ch = Arc::new(Rendezvous::new());
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.send("Req"))
        };

        // the offer becomes visible but the sender stays parked
        while !ch.has_pending() {
            thread::yield_now();
        }
        assert_eq!(ch.peek(), Some("Req"));
        assert!(!sender.is_finished());

        assert_eq!(ch.receive(), Some("Req"));
        sender.join().unwrap().unwrap();
        assert!(!ch.has_pending());
    }

    #[test]
    fn rendezvous_pairs_every_message() {
        let ch = Arc::new(Rendezvous::new());
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                for i in 0..50 {
                    ch.send(i).unwrap();
                }
            })
        };
        let received: Vec<_> = (0..50).map(|_| ch.receive().unwrap()).collect();
        sender.join().unwrap();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
        assert!(!ch.has_pending());
        assert_eq!(ch.peek(), None);
    }

    #[test]
    fn rendezvous_second_sender_waits_its_turn() {
        let ch = Arc::new(Rendezvous::new());
        let senders: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|msg| {
                let ch = Arc::clone(&ch);
                thread::spawn(move || ch.send(msg))
            })
            .collect();
        let mut got = vec![ch.receive().unwrap(), ch.receive().unwrap()];
        for sender in senders {
            sender.join().unwrap().unwrap();
        }
        got.sort();
        assert_eq!(got, vec!["a", "b"]);
        assert!(!ch.has_pending());
    }

    #[test]
    fn closing_releases_uncollected_sender() {
        let ch = Arc::new(Rendezvous::new());
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.send(1))
        };
        while !ch.has_pending() {
            thread::yield_now();
        }
        ch.close();
        assert_eq!(sender.join().unwrap(), Err(ChannelError::Closed));
        assert!(!ch.has_pending());
        assert_eq!(ch.receive(), None);
    }
}

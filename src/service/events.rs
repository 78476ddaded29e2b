//! Event delivery for connections and servers.
//!
//! Until the application takes the receiver, events wait in a backlog of at
//! most [`EVENT_BACKLOG`] entries; past that the oldest are discarded. Taking
//! the receiver replays the backlog in order and from then on events go
//! straight to the channel, so handler-only users never accumulate memory.
//!
//! The terminal event seals the queue: nothing published afterwards is
//! delivered, whichever task publishes it.

use crate::utils::metrics::global_metrics;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Events kept for a receiver that has not been taken yet
pub const EVENT_BACKLOG: usize = 64;

enum Sink<T> {
    Pending(VecDeque<T>),
    Taken(mpsc::UnboundedSender<T>),
}

struct State<T> {
    sink: Sink<T>,
    sealed: bool,
}

pub(crate) struct EventQueue<T> {
    state: Mutex<State<T>>,
}

impl<T> EventQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                sink: Sink::Pending(VecDeque::new()),
                sealed: false,
            }),
        }
    }

    pub(crate) fn publish(&self, event: T) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.sealed {
            state.push(event);
        }
    }

    /// Publish the terminal event and drop everything after it.
    /// Returns `false` if the queue was already sealed.
    pub(crate) fn finish(&self, event: T) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.sealed {
            return false;
        }
        state.push(event);
        state.sealed = true;
        true
    }

    /// Hand out the receiver once, preloaded with the backlog
    pub(crate) fn take(&self) -> Option<mpsc::UnboundedReceiver<T>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Sink::Pending(backlog) = &mut state.sink else {
            return None;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        for event in backlog.drain(..) {
            let _ = tx.send(event);
        }
        state.sink = Sink::Taken(tx);
        Some(rx)
    }
}

impl<T> State<T> {
    fn push(&mut self, event: T) {
        match &mut self.sink {
            Sink::Pending(backlog) => {
                if backlog.len() >= EVENT_BACKLOG {
                    backlog.pop_front();
                    global_metrics().event_dropped();
                    debug!(backlog = EVENT_BACKLOG, "Event stream not taken, oldest event dropped");
                }
                backlog.push_back(event);
            }
            Sink::Taken(tx) => {
                let _ = tx.send(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_backlog_keeps_newest_events() {
        let queue = EventQueue::new();
        for n in 0..(EVENT_BACKLOG + 10) {
            queue.publish(n);
        }
        let mut rx = queue.take().unwrap();
        assert!(queue.take().is_none());

        let replayed: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(replayed.len(), EVENT_BACKLOG);
        assert_eq!(replayed.first(), Some(&10));
        assert_eq!(replayed.last(), Some(&(EVENT_BACKLOG + 9)));

        queue.publish(1000);
        assert_eq!(rx.try_recv().unwrap(), 1000);
    }

    #[test]
    fn test_finish_seals_the_queue() {
        let queue = EventQueue::new();
        queue.publish("packet");
        assert!(queue.finish("closed"));
        queue.publish("late");
        assert!(!queue.finish("closed again"));

        let mut rx = queue.take().unwrap();
        assert_eq!(rx.try_recv().unwrap(), "packet");
        assert_eq!(rx.try_recv().unwrap(), "closed");
        assert!(rx.try_recv().is_err());
    }
}

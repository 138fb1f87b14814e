//! Round-robin multiplexing of several watches
//!
//! A [`WatchSet`] advances each of its watches by one bounded read-cycle
//! per pass and forwards everything they produce into a single merged lazy
//! sequence. Single-threaded and deterministic: concurrent server activity
//! on two watches comes out interleaved in round-robin order, and no watch
//! can starve another for more than one read-cycle.

use std::{cell::Cell, collections::VecDeque, rc::Rc};

use super::watch::{Flow, Watch, WatchEvent};
use crate::Result;

struct Entry {
    watch: Watch,
    terminated: bool,
}

/// An ordered set of watches merged into one event stream
#[derive(Default)]
pub struct WatchSet {
    watches: Vec<Entry>,
    stop: Rc<Cell<bool>>,
}

impl WatchSet {
    /// An empty set
    pub fn new() -> Self {
        WatchSet {
            watches: Vec::new(),
            stop: Rc::new(Cell::new(false)),
        }
    }

    /// Append a watch; passes visit watches in insertion order
    pub fn push(&mut self, watch: Watch) {
        self.watches.push(Entry {
            watch,
            terminated: false,
        });
    }

    /// Number of watches in the set
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Whether the set holds no watches
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Stop the set and every watch in it
    ///
    /// Cooperative like [`Watch::stop`]: the merged stream winds down after
    /// the current pass completes.
    pub fn stop(&self) {
        self.stop.set(true);
        for entry in &self.watches {
            entry.watch.stop();
        }
    }

    /// The merged lazy event sequence
    ///
    /// Ends when every watch has terminated (or the set was stopped).
    pub fn stream(&mut self) -> MergedStream<'_> {
        MergedStream {
            set: self,
            pending: VecDeque::new(),
            done: false,
        }
    }
}

/// Merged pull iterator over a [`WatchSet`]
pub struct MergedStream<'a> {
    set: &'a mut WatchSet,
    pending: VecDeque<Result<WatchEvent>>,
    done: bool,
}

impl Iterator for MergedStream<'_> {
    type Item = Result<WatchEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }

            // one full round-robin pass: each live watch advances by
            // exactly one read-cycle
            let mut out = Vec::new();
            for entry in self.set.watches.iter_mut() {
                if entry.terminated {
                    continue;
                }
                match entry.watch.cycle(&mut out) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Terminated) => entry.terminated = true,
                    Err(e) => {
                        entry.terminated = true;
                        self.pending.push_back(Err(e));
                    }
                }
                self.pending.extend(out.drain(..).map(Ok));
            }

            if self.set.stop.get() {
                self.set.stop.set(false);
                self.done = true;
            }
            if self.set.watches.iter().all(|e| e.terminated) {
                self.done = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::watch::tests::{watch_over, Op, ScriptedBackend};
    use crate::api::watch::{WatchConfig, WatchEvent};

    fn name(event: &WatchEvent) -> String {
        event
            .object()
            .and_then(|o| o.get("metadata"))
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn events_interleave_in_round_robin_order() {
        // both watches terminate on clean EOF thanks to timeoutSeconds
        let backend_a = std::rc::Rc::new(ScriptedBackend::new(vec![vec![
            Op::Data("{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"name\":\"a1\",\"resourceVersion\":\"1\"}}}\n"),
            Op::Data("{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"name\":\"a2\",\"resourceVersion\":\"2\"}}}\n"),
            Op::Eof,
        ]]));
        let backend_b = std::rc::Rc::new(ScriptedBackend::new(vec![vec![
            Op::Data("{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"name\":\"b1\",\"resourceVersion\":\"1\"}}}\n"),
            Op::Eof,
        ]]));

        let mut set = WatchSet::new();
        set.push(watch_over(&backend_a, WatchConfig::new("/api/v1/nodes").timeout(10)));
        set.push(watch_over(&backend_b, WatchConfig::new("/api/v1/pods").timeout(10)));

        let names: Vec<_> = set
            .stream()
            .collect::<Result<Vec<_>>>()
            .unwrap()
            .iter()
            .map(name)
            .collect();
        // pass 1: a1, b1; pass 2: a2, b terminates; pass 3: a terminates
        assert_eq!(names, vec!["a1", "b1", "a2"]);
    }

    #[test]
    fn stop_propagates_to_every_watch() {
        let backend_a = std::rc::Rc::new(ScriptedBackend::new(vec![]));
        let backend_b = std::rc::Rc::new(ScriptedBackend::new(vec![]));

        let mut set = WatchSet::new();
        set.push(watch_over(&backend_a, WatchConfig::new("/api/v1/nodes")));
        set.push(watch_over(&backend_b, WatchConfig::new("/api/v1/pods")));
        set.stop();

        // every child sees its stop flag before ever connecting, so no
        // reads are issued and nothing is delivered
        let events: Vec<_> = set.stream().collect();
        assert!(events.is_empty());
        assert_eq!(backend_a.connections_opened(), 0);
        assert_eq!(backend_b.connections_opened(), 0);
    }

    #[test]
    fn empty_set_yields_nothing() {
        let mut set = WatchSet::new();
        assert!(set.is_empty());
        assert!(set.stream().next().is_none());
    }
}

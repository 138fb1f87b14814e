//! The watch engine
//!
//! A [`Watch`] owns one long-lived streaming connection to a collection
//! endpoint and turns its newline-framed frames into events, surviving
//! server-side timeouts and dead peers. It resumes at the highest delivered
//! `resourceVersion` after a reconnect and suppresses duplicate delivery,
//! so a consumer sees every event exactly once, in server order.
//!
//! The engine advances one read-cycle at a time through a single internal
//! primitive; the callback driver ([`Watch::start`]) and the pull driver
//! ([`Watch::stream`]) are both thin loops over it.

use std::{
    cell::Cell,
    collections::VecDeque,
    io,
    rc::Rc,
    time::{Duration, Instant},
};

use serde::Deserialize;
use serde_json::Value;

use crate::{
    client::transport::{Backend, Query},
    jsonpath, Error, Result,
};

const DEFAULT_READ_LENGTH: usize = 8192;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_micros(100_000);
const DEFAULT_DEAD_PEER_TIMEOUT: Duration = Duration::from_secs(600);

/// A raw event returned from a watch query
///
/// Note that a watch query returns many of these as newline separated JSON.
/// Objects are schema-agnostic [`Value`] documents. `ERROR` frames never
/// appear here; they reset the watch internally.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent {
    /// Resource was added
    Added(Value),
    /// Resource was modified
    Modified(Value),
    /// Resource was deleted
    Deleted(Value),
    /// Resource version marker, sent at the server's discretion
    Bookmark(Value),
    /// An undecoded frame, delivered when frame decoding is disabled
    #[serde(skip)]
    Raw(String),
}

impl WatchEvent {
    /// The inner object document, when this event was decoded
    pub fn object(&self) -> Option<&Value> {
        match self {
            WatchEvent::Added(o)
            | WatchEvent::Modified(o)
            | WatchEvent::Deleted(o)
            | WatchEvent::Bookmark(o) => Some(o),
            WatchEvent::Raw(_) => None,
        }
    }

    /// The object's `metadata.resourceVersion`, when present
    pub fn resource_version(&self) -> Option<&str> {
        self.object()
            .and_then(|o| jsonpath::get(o, "metadata.resourceVersion").ok())
            .and_then(Value::as_str)
    }
}

/// Callback invoked per delivered event
///
/// Receives the event and a handle exposing [`WatchHandle::stop`]; sharing
/// any further state with the surrounding code is the caller's business.
pub type WatchCallback = Box<dyn FnMut(&WatchEvent, &WatchHandle)>;

/// Parameters of one watch, immutable after creation
#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub(crate) endpoint: String,
    pub(crate) params: Query,
    pub(crate) resource_version: Option<String>,
    pub(crate) read_length: usize,
    pub(crate) read_timeout: Duration,
    pub(crate) dead_peer_timeout: Duration,
    pub(crate) decode: bool,
}

impl WatchConfig {
    /// Watch the collection at `endpoint`
    ///
    /// The query map is the caller's: pass `watch=true` (and anything else
    /// the endpoint needs) via [`WatchConfig::param`]. The engine itself
    /// only manages `resourceVersion`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        WatchConfig {
            endpoint: endpoint.into(),
            params: Query::new(),
            resource_version: None,
            read_length: DEFAULT_READ_LENGTH,
            read_timeout: DEFAULT_READ_TIMEOUT,
            dead_peer_timeout: DEFAULT_DEAD_PEER_TIMEOUT,
            decode: true,
        }
    }

    /// Add a query parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Restrict the watched objects by their fields
    ///
    /// Supports `=`, `==`, and `!=`, comma separated.
    pub fn fields(self, field_selector: &str) -> Self {
        self.param("fieldSelector", field_selector)
    }

    /// Restrict the watched objects by their labels
    pub fn labels(self, label_selector: &str) -> Self {
        self.param("labelSelector", label_selector)
    }

    /// Ask the server to end the watch after `timeout_secs`
    ///
    /// With a positive server-side timeout a clean end-of-stream terminates
    /// the watch instead of reconnecting it.
    pub fn timeout(self, timeout_secs: u32) -> Self {
        self.param("timeoutSeconds", timeout_secs.to_string())
    }

    /// Start from a known `resourceVersion` instead of a full replay
    pub fn at_version(mut self, version: impl Into<String>) -> Self {
        self.resource_version = Some(version.into());
        self
    }

    /// Max bytes pulled per read (default 8192)
    pub fn read_length(mut self, bytes: usize) -> Self {
        self.read_length = bytes;
        self
    }

    /// Deadline for a single stream read (default 100ms)
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Tear down connections silent for this long (default 600s, 0 disables)
    pub fn dead_peer_timeout(mut self, timeout: Duration) -> Self {
        self.dead_peer_timeout = timeout;
        self
    }

    /// Deliver raw frame bytes instead of decoded events
    pub fn decode(mut self, decode: bool) -> Self {
        self.decode = decode;
        self
    }
}

/// Clonable stop handle for a [`Watch`]
///
/// Stopping is cooperative: the flag is observed at the top of the next
/// read-cycle, which closes the connection and returns control. Idempotent,
/// and safe to call before the watch ever starts.
#[derive(Clone, Debug)]
pub struct WatchHandle {
    stop: Rc<Cell<bool>>,
}

impl WatchHandle {
    /// Request the watch to stop at the next read-cycle
    pub fn stop(&self) {
        self.stop.set(true);
    }
}

/// Mutable runtime state, touched only by the read cycle
struct WatchState {
    handle: Option<Box<dyn io::Read>>,
    buffer: Vec<u8>,
    stop: Rc<Cell<bool>>,
    /// Highest version seen; cleared after a 410 to let the server pick a
    /// new starting point
    resource_version: Option<String>,
    /// Highest version successfully delivered; never decreases
    last_success: Option<String>,
    handle_start: Option<Instant>,
    last_bytes_read: Option<Instant>,
    initial_load_finished: bool,
}

pub(crate) enum Flow {
    Continue,
    Terminated,
}

/// A long-lived watch over one collection endpoint
pub struct Watch {
    backend: Rc<dyn Backend>,
    config: WatchConfig,
    callback: Option<WatchCallback>,
    state: WatchState,
}

impl Watch {
    pub(crate) fn new(
        backend: Rc<dyn Backend>,
        config: WatchConfig,
        callback: Option<WatchCallback>,
    ) -> Self {
        let resource_version = config.resource_version.clone();
        Watch {
            backend,
            config,
            callback,
            state: WatchState {
                handle: None,
                buffer: Vec::new(),
                stop: Rc::new(Cell::new(false)),
                resource_version,
                last_success: None,
                handle_start: None,
                last_bytes_read: None,
                initial_load_finished: false,
            },
        }
    }

    /// Run in callback mode
    ///
    /// Every complete event triggers the configured callback. Runs forever
    /// when `cycles == 0`, otherwise performs at most `cycles`
    /// read-iterations and returns. Returns early (without error) once
    /// stopped or once a server-side `timeoutSeconds` elapses cleanly.
    pub fn start(&mut self, cycles: usize) -> Result<()> {
        let mut iterations = 0usize;
        let mut pending = Vec::new();
        loop {
            pending.clear();
            let flow = self.cycle(&mut pending)?;
            if !pending.is_empty() {
                let handle = self.handle();
                if let Some(cb) = self.callback.as_mut() {
                    for event in &pending {
                        cb(event, &handle);
                    }
                }
            }
            if matches!(flow, Flow::Terminated) {
                return Ok(());
            }
            iterations += 1;
            if cycles > 0 && iterations >= cycles {
                return Ok(());
            }
        }
    }

    /// Run in pull mode
    ///
    /// Returns a lazy sequence of events that reconnects transparently.
    /// Cycle semantics are identical to [`Watch::start`].
    pub fn stream(&mut self, cycles: usize) -> WatchStream<'_> {
        WatchStream {
            watch: self,
            cycles,
            iterations: 0,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Request the watch to stop at the next read-cycle
    pub fn stop(&self) {
        self.state.stop.set(true);
    }

    /// A clonable stop handle for this watch
    pub fn handle(&self) -> WatchHandle {
        WatchHandle {
            stop: self.state.stop.clone(),
        }
    }

    /// Spawn a child process running this watch to completion
    ///
    /// Unsupported: there is no safe process fork here, so this always
    /// returns `false`. Use [`Watch::stream`] or a [`WatchSet`] to
    /// interleave watches instead.
    ///
    /// [`WatchSet`]: crate::WatchSet
    pub fn fork(&mut self) -> bool {
        tracing::warn!("process forking is not supported; drive this watch with stream() instead");
        false
    }

    /// The highest delivered `resourceVersion`, if any event arrived yet
    pub fn last_resource_version(&self) -> Option<&str> {
        self.state.last_success.as_deref()
    }

    /// One read-cycle of the outer loop
    ///
    /// Order: stop check, (re)connect, dead-peer check, bounded read,
    /// parse pass over complete lines.
    pub(crate) fn cycle(&mut self, out: &mut Vec<WatchEvent>) -> Result<Flow> {
        if self.state.stop.get() {
            self.reset();
            self.state.stop.set(false);
            return Ok(Flow::Terminated);
        }
        if self.state.handle.is_none() {
            self.connect()?;
        }
        if self.dead_peer_tripped(Instant::now()) {
            tracing::debug!(endpoint = %self.config.endpoint, "dead peer detected, reconnecting");
            self.reset();
            self.connect()?;
        }

        let mut chunk = vec![0u8; self.config.read_length];
        let read = match self.state.handle.as_mut() {
            Some(handle) => handle.read(&mut chunk),
            None => return Ok(Flow::Continue),
        };
        match read {
            Ok(0) => {
                // end of stream: terminal when the caller asked the server
                // to time the watch out, a reconnect otherwise
                if self.server_timeout_requested() {
                    tracing::debug!(endpoint = %self.config.endpoint, "server-side timeout elapsed");
                    self.reset();
                    return Ok(Flow::Terminated);
                }
                tracing::debug!(endpoint = %self.config.endpoint, "stream closed, reconnecting");
                self.reset();
                self.connect()?;
                return Ok(Flow::Continue);
            }
            Ok(n) => {
                self.state.last_bytes_read = Some(Instant::now());
                self.state.buffer.extend_from_slice(&chunk[..n]);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                // a timed-out read is an empty chunk, not a failure; going
                // idle is also how the end of the initial replay burst shows
                self.state.initial_load_finished = true;
            }
            Err(e) => return Err(Error::TransportRead(e)),
        }

        self.drain_buffer(out)?;
        Ok(Flow::Continue)
    }

    /// Process every complete line in the parse buffer
    ///
    /// Afterwards the buffer holds at most a trailing partial line.
    fn drain_buffer(&mut self, out: &mut Vec<WatchEvent>) -> Result<()> {
        while let Some(pos) = self.state.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.state.buffer.drain(..=pos).collect();
            line.pop();
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let doc: Value = match serde_json::from_slice(&line) {
                Ok(doc) => doc,
                Err(e) => {
                    // one bad frame must not kill the stream
                    tracing::warn!("discarding undecodable watch frame: {}", e);
                    continue;
                }
            };
            match self.preprocess(&doc) {
                Disposition::Reset => {
                    self.reset();
                    self.connect()?;
                    return Ok(());
                }
                Disposition::ResetExpired => {
                    // the server no longer has our version; let it pick the
                    // replay point on the next connection
                    self.state.resource_version = None;
                    self.reset();
                    self.connect()?;
                    return Ok(());
                }
                Disposition::Deliver => {}
            }

            let event_type = str_at(&doc, "type").unwrap_or_default();
            if !self.state.initial_load_finished && event_type != "ADDED" {
                // the replay burst is all ADDED; the first live event marks
                // its end
                self.state.initial_load_finished = true;
            }

            let rv = str_at(&doc, "object.metadata.resourceVersion").unwrap_or_default();
            let newer = rv_newer(&rv, self.state.last_success.as_deref());
            let deliver = !self.state.initial_load_finished || newer;
            if newer {
                self.state.resource_version = Some(rv.clone());
                self.state.last_success = Some(rv);
            }
            if !deliver {
                tracing::trace!("suppressing replayed event");
                continue;
            }

            if self.config.decode {
                match serde_json::from_value::<WatchEvent>(doc) {
                    Ok(event) => out.push(event),
                    Err(e) => {
                        tracing::warn!("discarding unrecognized watch frame: {}", e);
                    }
                }
            } else {
                out.push(WatchEvent::Raw(String::from_utf8_lossy(&line).into_owned()));
            }
        }
        Ok(())
    }

    /// Classify a decoded frame before delivery
    fn preprocess(&self, doc: &Value) -> Disposition {
        if !doc.is_object() {
            tracing::warn!("non-object watch frame, resetting");
            return Disposition::Reset;
        }
        if str_at(doc, "kind").as_deref() == Some("Status")
            && str_at(doc, "status").as_deref() == Some("Failure")
        {
            tracing::warn!(
                message = %str_at(doc, "message").unwrap_or_default(),
                "failure status frame, resetting"
            );
            return Disposition::Reset;
        }
        if str_at(doc, "type").as_deref() == Some("ERROR") {
            let code = jsonpath::get(doc, "object.code")
                .ok()
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if code == 410 {
                tracing::debug!("resource version too old, restarting without one");
                return Disposition::ResetExpired;
            }
            tracing::warn!("error frame, resetting");
            return Disposition::Reset;
        }
        Disposition::Deliver
    }

    fn connect(&mut self) -> Result<()> {
        let mut params = self.config.params.clone();
        if let Some(rv) = &self.state.resource_version {
            params.insert("resourceVersion".into(), rv.clone());
        }
        let handle =
            self.backend
                .open_stream(&self.config.endpoint, &params, self.config.read_timeout)?;
        self.state.handle = Some(handle);
        self.state.handle_start = Some(Instant::now());
        self.state.last_bytes_read = None;
        Ok(())
    }

    /// Close the connection and discard any partial frame
    fn reset(&mut self) {
        self.state.handle = None;
        self.state.buffer.clear();
        self.state.handle_start = None;
        self.state.last_bytes_read = None;
    }

    fn dead_peer_tripped(&self, now: Instant) -> bool {
        if self.config.dead_peer_timeout.is_zero() {
            return false;
        }
        let timeout = self.config.dead_peer_timeout;
        let aged = match self.state.handle_start {
            Some(started) => now.duration_since(started) >= timeout,
            None => false,
        };
        // a connection that never produced bytes counts as silent from the
        // moment it was opened
        let silent = match self.state.last_bytes_read {
            Some(last) => now.duration_since(last) >= timeout,
            None => true,
        };
        aged && silent
    }

    fn server_timeout_requested(&self) -> bool {
        self.config
            .params
            .get("timeoutSeconds")
            .and_then(|v| v.parse::<u64>().ok())
            .map(|t| t > 0)
            .unwrap_or(false)
    }
}

enum Disposition {
    Deliver,
    Reset,
    ResetExpired,
}

fn str_at(doc: &Value, path: &str) -> Option<String> {
    jsonpath::get(doc, path)
        .ok()
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Compare resourceVersions
///
/// Opaque tokens per the api contract, but the server issues decimal
/// strings; compare numerically when both sides parse so "99" orders before
/// "100", falling back to a lexicographic comparison.
fn rv_newer(candidate: &str, last: Option<&str>) -> bool {
    if candidate.is_empty() {
        return false;
    }
    let last = match last {
        Some(l) => l,
        None => return true,
    };
    match (candidate.parse::<u64>(), last.parse::<u64>()) {
        (Ok(c), Ok(l)) => c > l,
        _ => candidate > last,
    }
}

/// Lazy pull-mode sequence over a [`Watch`]
///
/// Restarts the underlying connection transparently; ends after the cycle
/// bound, a cooperative stop, or a clean server-side timeout.
pub struct WatchStream<'a> {
    watch: &'a mut Watch,
    cycles: usize,
    iterations: usize,
    pending: VecDeque<WatchEvent>,
    done: bool,
}

impl Iterator for WatchStream<'_> {
    type Item = Result<WatchEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            if self.cycles > 0 && self.iterations >= self.cycles {
                return None;
            }
            let mut out = Vec::new();
            match self.watch.cycle(&mut out) {
                Ok(Flow::Continue) => {
                    self.iterations += 1;
                    self.pending.extend(out);
                }
                Ok(Flow::Terminated) => {
                    self.done = true;
                    self.pending.extend(out);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    /// One scripted read operation
    pub(crate) enum Op {
        Data(&'static str),
        Timeout,
        Eof,
    }

    pub(crate) struct ScriptedStream {
        ops: VecDeque<Op>,
    }

    impl io::Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.ops.pop_front() {
                Some(Op::Data(data)) => {
                    let bytes = data.as_bytes();
                    assert!(bytes.len() <= buf.len(), "scripted chunk exceeds read length");
                    buf[..bytes.len()].copy_from_slice(bytes);
                    Ok(bytes.len())
                }
                Some(Op::Timeout) => Err(io::Error::from(io::ErrorKind::TimedOut)),
                Some(Op::Eof) | None => Ok(0),
            }
        }
    }

    /// A backend whose connections replay a script
    pub(crate) struct ScriptedBackend {
        connections: RefCell<VecDeque<Vec<Op>>>,
        pub(crate) requests: RefCell<Vec<Query>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(connections: Vec<Vec<Op>>) -> Self {
            ScriptedBackend {
                connections: RefCell::new(connections.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        pub(crate) fn connections_opened(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl Backend for ScriptedBackend {
        fn get_json(&self, _endpoint: &str, _query: &Query) -> Result<Value> {
            unimplemented!("not used by watch tests")
        }

        fn open_stream(
            &self,
            _endpoint: &str,
            query: &Query,
            _read_timeout: Duration,
        ) -> Result<Box<dyn io::Read>> {
            self.requests.borrow_mut().push(query.clone());
            let ops = self
                .connections
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| {
                    Error::TransportRead(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "script exhausted",
                    ))
                })?;
            Ok(Box::new(ScriptedStream { ops: ops.into() }))
        }
    }

    pub(crate) fn watch_over(backend: &Rc<ScriptedBackend>, config: WatchConfig) -> Watch {
        Watch::new(backend.clone() as Rc<dyn Backend>, config, None)
    }

    fn rv(event: &WatchEvent) -> String {
        event.resource_version().unwrap_or_default().to_string()
    }

    #[test]
    fn initial_load_then_live_update_without_duplicates() {
        let backend = Rc::new(ScriptedBackend::new(vec![
            vec![
                Op::Data("{\"type\":\"ADDED\",\"object\":{\"kind\":\"Node\",\"metadata\":{\"name\":\"a\",\"resourceVersion\":\"100\"}}}\n"),
                Op::Data("{\"type\":\"ADDED\",\"object\":{\"kind\":\"Node\",\"metadata\":{\"name\":\"b\",\"resourceVersion\":\"101\"}}}\n"),
                Op::Eof,
            ],
            vec![
                Op::Data("{\"type\":\"MODIFIED\",\"object\":{\"kind\":\"Node\",\"metadata\":{\"name\":\"a\",\"resourceVersion\":\"102\"}}}\n"),
            ],
        ]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/nodes"));

        let events: Vec<_> = watch.stream(4).collect::<Result<_>>().unwrap();
        assert_eq!(
            events.iter().map(rv).collect::<Vec<_>>(),
            vec!["100", "101", "102"]
        );
        assert!(matches!(events[2], WatchEvent::Modified(_)));

        // the reconnect resumed from the highest delivered version
        let requests = backend.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].contains_key("resourceVersion"));
        assert_eq!(requests[1].get("resourceVersion").unwrap(), "101");
    }

    #[test]
    fn gone_frame_clears_version_but_not_last_success() {
        let backend = Rc::new(ScriptedBackend::new(vec![
            vec![Op::Data(
                "{\"type\":\"ERROR\",\"object\":{\"code\":410,\"message\":\"too old\"}}\n",
            )],
            vec![Op::Timeout],
        ]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/nodes").at_version("100"));
        watch.state.last_success = Some("55".into());

        let mut out = Vec::new();
        watch.cycle(&mut out).unwrap();
        assert!(out.is_empty());

        let requests = backend.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].get("resourceVersion").unwrap(), "100");
        assert!(!requests[1].contains_key("resourceVersion"));
        assert_eq!(watch.state.last_success.as_deref(), Some("55"));
    }

    #[test]
    fn failure_status_frame_resets_silently() {
        let backend = Rc::new(ScriptedBackend::new(vec![
            vec![Op::Data(
                "{\"kind\":\"Status\",\"status\":\"Failure\",\"message\":\"unauthorized\"}\n",
            )],
            vec![Op::Timeout],
        ]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/nodes"));

        let mut out = Vec::new();
        watch.cycle(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(backend.connections_opened(), 2);
    }

    #[test]
    fn dead_peer_reopens_exactly_once() {
        let backend = Rc::new(ScriptedBackend::new(vec![
            vec![Op::Timeout],
            vec![Op::Timeout],
        ]));
        let mut watch = watch_over(
            &backend,
            WatchConfig::new("/api/v1/nodes").dead_peer_timeout(Duration::from_secs(5)),
        );
        watch.state.last_success = Some("7".into());

        let mut out = Vec::new();
        watch.cycle(&mut out).unwrap();
        assert_eq!(backend.connections_opened(), 1);

        // pretend the connection has been up and silent past the deadline
        watch.state.handle_start = Instant::now().checked_sub(Duration::from_secs(6));
        assert!(watch.state.last_bytes_read.is_none());

        watch.cycle(&mut out).unwrap();
        assert_eq!(backend.connections_opened(), 2);
        assert_eq!(watch.state.last_success.as_deref(), Some("7"));
        assert!(out.is_empty());
    }

    #[test]
    fn clean_eof_terminates_with_server_timeout() {
        let backend = Rc::new(ScriptedBackend::new(vec![vec![
            Op::Data("{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"1\"}}}\n"),
            Op::Eof,
        ]]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/pods").timeout(290));

        // unbounded stream: must end on its own via the clean EOF
        let events: Vec<_> = watch.stream(0).collect::<Result<_>>().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(backend.connections_opened(), 1);
    }

    #[test]
    fn replayed_adds_are_suppressed_after_tripwire() {
        let backend = Rc::new(ScriptedBackend::new(vec![vec![
            Op::Data("{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"100\"}}}\n"),
            Op::Timeout, // idle marks the end of the initial burst
            Op::Data("{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"100\"}}}\n"),
            Op::Data("{\"type\":\"MODIFIED\",\"object\":{\"metadata\":{\"resourceVersion\":\"101\"}}}\n"),
        ]]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/nodes"));

        let events: Vec<_> = watch.stream(4).collect::<Result<_>>().unwrap();
        assert_eq!(events.iter().map(rv).collect::<Vec<_>>(), vec!["100", "101"]);
        assert!(watch.state.initial_load_finished);
    }

    #[test]
    fn versions_compare_numerically() {
        assert!(rv_newer("100", Some("99")));
        assert!(!rv_newer("99", Some("100")));
        assert!(!rv_newer("100", Some("100")));
        assert!(rv_newer("2", None));
        assert!(!rv_newer("", Some("1")));
    }

    #[test]
    fn undecodable_frames_are_skipped() {
        let backend = Rc::new(ScriptedBackend::new(vec![vec![
            Op::Data("this is not json\n"),
            Op::Data("{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"5\"}}}\n"),
        ]]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/nodes"));

        let events: Vec<_> = watch.stream(2).collect::<Result<_>>().unwrap();
        assert_eq!(events.iter().map(rv).collect::<Vec<_>>(), vec!["5"]);
    }

    #[test]
    fn partial_lines_wait_for_the_rest() {
        let backend = Rc::new(ScriptedBackend::new(vec![vec![
            Op::Data("{\"type\":\"ADDED\",\"object\":{\"metadata\":"),
            Op::Data("{\"resourceVersion\":\"9\"}}}\n"),
        ]]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/nodes"));

        let mut out = Vec::new();
        watch.cycle(&mut out).unwrap();
        assert!(out.is_empty());
        assert!(!watch.state.buffer.is_empty());

        watch.cycle(&mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert!(watch.state.buffer.is_empty());
    }

    #[test]
    fn raw_mode_delivers_undecoded_lines() {
        let frame = "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"3\"}}}";
        let backend = Rc::new(ScriptedBackend::new(vec![vec![Op::Data(
            "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"3\"}}}\n",
        )]]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/nodes").decode(false));

        let events: Vec<_> = watch.stream(1).collect::<Result<_>>().unwrap();
        assert_eq!(events, vec![WatchEvent::Raw(frame.to_string())]);
        // bookkeeping still ran on the decoded copy
        assert_eq!(watch.state.last_success.as_deref(), Some("3"));
    }

    #[test]
    fn stop_is_cooperative_and_restartable() {
        // three complete frames arriving in one read
        let burst = concat!(
            "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"1\"}}}\n",
            "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"2\"}}}\n",
            "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"3\"}}}\n",
        );
        let backend = Rc::new(ScriptedBackend::new(vec![
            vec![Op::Data(burst)],
            vec![Op::Data(
                "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"4\"}}}\n",
            )],
        ]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/nodes"));
        let handle = watch.handle();

        let mut seen = Vec::new();
        for event in watch.stream(0) {
            let event = event.unwrap();
            seen.push(rv(&event));
            if seen.len() == 2 {
                handle.stop();
            }
        }
        // the third event was already buffered in the same parse pass
        assert_eq!(seen, vec!["1", "2", "3"]);
        assert!(!watch.state.stop.get(), "stop flag clears once honoured");
        assert!(watch.state.handle.is_none());

        // a stopped watch may be started again on a fresh connection
        let events: Vec<_> = watch.stream(1).collect::<Result<_>>().unwrap();
        assert_eq!(events.iter().map(rv).collect::<Vec<_>>(), vec!["4"]);
        assert_eq!(backend.connections_opened(), 2);
    }

    #[test]
    fn callback_mode_delivers_with_handle() {
        let burst = concat!(
            "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"1\"}}}\n",
            "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"resourceVersion\":\"2\"}}}\n",
        );
        let backend = Rc::new(ScriptedBackend::new(vec![vec![Op::Data(burst)]]));
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut watch = Watch::new(
            backend.clone() as Rc<dyn Backend>,
            WatchConfig::new("/api/v1/nodes"),
            Some(Box::new(move |event, handle| {
                sink.borrow_mut()
                    .push(event.resource_version().unwrap_or_default().to_string());
                handle.stop();
            })),
        );

        watch.start(0).unwrap();
        assert_eq!(*seen.borrow(), vec!["1", "2"]);
    }

    #[test]
    fn fork_is_unsupported() {
        let backend = Rc::new(ScriptedBackend::new(vec![]));
        let mut watch = watch_over(&backend, WatchConfig::new("/api/v1/nodes"));
        assert!(!watch.fork());
    }
}

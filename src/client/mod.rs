//! The user-facing client surface
//!
//! A [`Client`] binds resolved [`Credentials`] to the blocking transport
//! and hands out one-shot requests, [`Watch`]es and [`PagedList`]s over it.

pub(crate) mod transport;
mod verb;

use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    api::{
        list::PagedList,
        watch::{Watch, WatchConfig, WatchEvent, WatchHandle},
    },
    config::Credentials,
    Error, Result,
};
use transport::{Backend, Transport};

pub use transport::Query;
pub use verb::Verb;

/// Per-call codec tuning
///
/// Resolution order is call-site, then the client default, then the
/// built-in default.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestOptions {
    /// Pretty-print encoded request bodies
    pub pretty: bool,
}

/// Client for requests, watches and lists against one cluster
///
/// The client exclusively owns its credentials; watches and paged lists
/// hold a shared reference to the client's transport.
pub struct Client {
    transport: Rc<Transport>,
    options: RequestOptions,
}

impl Client {
    /// Build a client over resolved credentials
    pub fn new(creds: Credentials) -> Self {
        Client {
            transport: Rc::new(Transport::new(creds)),
            options: RequestOptions::default(),
        }
    }

    /// Replace the client-level default [`RequestOptions`]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// The default namespace of the underlying credentials
    pub fn namespace(&self) -> String {
        self.transport.namespace()
    }

    /// Perform a request and decode the response body
    ///
    /// `T` is commonly [`Value`] for schema-agnostic use. Non-2xx responses
    /// are not errors at this layer: the server's `kind: Status` body
    /// decodes like any other, so callers can inspect it.
    pub fn request<T>(
        &self,
        endpoint: &str,
        verb: Verb,
        query: &Query,
        body: Option<&Value>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.request_with(endpoint, verb, query, body, None)
    }

    /// [`Client::request`] with call-site [`RequestOptions`]
    pub fn request_with<T>(
        &self,
        endpoint: &str,
        verb: Verb,
        query: &Query,
        body: Option<&Value>,
        options: Option<RequestOptions>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let text = self.request_text_with(endpoint, verb, query, body, options)?;
        serde_json::from_str(&text).map_err(|e| {
            tracing::warn!("{}, {:?}", text, e);
            Error::SerdeError(e)
        })
    }

    /// Perform a request and return the raw response body undecoded
    pub fn request_text(
        &self,
        endpoint: &str,
        verb: Verb,
        query: &Query,
        body: Option<&Value>,
    ) -> Result<String> {
        self.request_text_with(endpoint, verb, query, body, None)
    }

    /// [`Client::request_text`] with call-site [`RequestOptions`]
    pub fn request_text_with(
        &self,
        endpoint: &str,
        verb: Verb,
        query: &Query,
        body: Option<&Value>,
        options: Option<RequestOptions>,
    ) -> Result<String> {
        let options = options.unwrap_or(self.options);
        self.transport
            .request(endpoint, verb, query, body, options.pretty)
    }

    /// Create a watch over a collection endpoint
    pub fn watch(&self, config: WatchConfig) -> Watch {
        Watch::new(self.transport.clone() as Rc<dyn Backend>, config, None)
    }

    /// Create a watch delivering through a callback
    ///
    /// The callback receives each event and a [`WatchHandle`] whose only
    /// power is to stop the watch; sharing richer state with surrounding
    /// code is up to the caller.
    pub fn watch_with<F>(&self, config: WatchConfig, callback: F) -> Watch
    where
        F: FnMut(&WatchEvent, &WatchHandle) + 'static,
    {
        Watch::new(
            self.transport.clone() as Rc<dyn Backend>,
            config,
            Some(Box::new(callback)),
        )
    }

    /// Create a paged traversal of a list endpoint
    pub fn list(&self, endpoint: impl Into<String>, params: Query) -> PagedList {
        PagedList::new(
            self.transport.clone() as Rc<dyn Backend>,
            endpoint.into(),
            params,
        )
    }
}

//! A synchronous client for the Kubernetes API with a watch-first design.
//!
//! This crate talks to the apiserver over plain blocking HTTP and is built
//! around long-lived watch connections: it reconnects after server-side
//! timeouts and dead peers, resumes from the last delivered
//! `resourceVersion`, and suppresses duplicate delivery across reconnects.
//! Events are schema-agnostic [`serde_json::Value`] documents; no typed
//! resource models are required.
//!
//! Everything is single-threaded and cooperative: a [`Watch`] only advances
//! when you drive it, either by callback ([`Watch::start`]) or by pulling
//! from the lazy iterator ([`Watch::stream`]). Multiple watches can be
//! merged round-robin with a [`WatchSet`].
//!
//! ```no_run
//! use kube_sync::{Client, Credentials, WatchConfig};
//!
//! fn main() -> kube_sync::Result<()> {
//!     let client = Client::new(Credentials::infer()?);
//!     let mut watch = client.watch(
//!         WatchConfig::new("/api/v1/nodes")
//!             .param("watch", "true")
//!             .timeout(290),
//!     );
//!     for ev in watch.stream(0) {
//!         println!("{:?}", ev?);
//!     }
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod jsonpath;

#[doc(inline)] pub use api::{
    list::PagedList,
    watch::{Watch, WatchConfig, WatchEvent, WatchHandle},
    watch_set::WatchSet,
};
#[doc(inline)] pub use client::{Client, Query, RequestOptions, Verb};
#[doc(inline)] pub use config::{ConfigOptions, Credentials};
#[doc(inline)] pub use error::{Error, ErrorResponse};

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

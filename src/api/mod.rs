//! Streaming and paging machinery on top of the transport

pub mod list;
pub mod watch;
pub mod watch_set;

pub use list::PagedList;
pub use watch::{Watch, WatchConfig, WatchEvent, WatchHandle, WatchStream};
pub use watch_set::WatchSet;

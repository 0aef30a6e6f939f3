//! Implementations of the ports (in-memory store, HTTP collaborators, runners).

pub mod attribution;
pub mod ci_crawler;
pub mod http_sink;
pub mod http_upstream;
pub mod memory_sink;
pub mod memory_store;
pub mod paged_fetch;
pub mod sink_runner;

pub use attribution::{find_attribution, find_attribution_within};
pub use ci_crawler::CiCrawler;
pub use http_sink::HttpSink;
pub use http_upstream::HttpUpstream;
pub use memory_sink::MemorySink;
pub use memory_store::InMemoryStateStore;
pub use paged_fetch::{ChildCollection, PageRequest, PagedFetchRunner};
pub use sink_runner::SinkRunner;

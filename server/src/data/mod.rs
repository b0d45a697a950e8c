//! Data access layer: the search-index Store (C7), object storage (C5),
//! ticket tracker client (C10), chat client (C12), and the cache (C13).

pub mod cache;
pub mod chat;
pub mod error;
pub mod objectstore;
pub mod store;
pub mod text_matcher;
pub mod tracker;

pub use chat::{ChatClient, SlackChatClient};
pub use error::{ChatError, ObjectStoreError, SchedulerError, StoreError, TrackerError};
pub use objectstore::ObjectStoreClient;
pub use store::{InMemoryStore, SearchIndexStore, Store};
pub use tracker::{JiraTrackerClient, TrackerClient};

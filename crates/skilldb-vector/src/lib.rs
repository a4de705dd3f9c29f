//! LanceDB-backed collection of embedded chunks: indexing pipeline and search.

pub mod cache;
pub mod context;
pub mod indexer;
pub mod schema;
pub mod search;
pub mod store;
pub mod table;

pub use context::Context;
pub use indexer::{BatchFailure, IndexOptions, IndexReport, Indexer};
pub use schema::ChunkRecord;
pub use search::{similarity_from_distance, SearchQuery, Searcher};
pub use store::{ChunkStore, Fingerprint};

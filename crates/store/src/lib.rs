pub mod analytics;
pub mod db;
pub mod memory;
pub mod projects;
pub mod query;
pub mod r2;
pub mod retention;
pub mod schema;
pub mod sink;
pub mod tinybird;
pub mod write;

pub use db::{DuckDbSink, StoreStatus};
pub use memory::MemorySink;
pub use r2::R2MirrorSink;
pub use projects::{CachedProjects, PgProjects, ProjectLookup, StaticProjects};
pub use retention::PruneReport;
pub use sink::{Batch, Collection, Sink};
pub use tinybird::{TinybirdConfig, TinybirdSink};

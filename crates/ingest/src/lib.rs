pub mod aggregate;
pub mod dispatch;
pub mod events;
pub mod hierarchy;
pub mod http;
pub mod index;
pub mod normalize;
pub mod otlp;
pub mod server;

pub use aggregate::aggregate_trace;
pub use dispatch::{Dispatcher, IngestSummary};
pub use hierarchy::{build_forest, find_root};
pub use index::group_by_trace;
pub use normalize::{enrich_span, enrich_trace};
pub use server::run_ingest_server;

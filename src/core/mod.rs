//! Core abstractions and types shared by the pipeline

pub mod config;
pub mod layout;
pub mod log;
pub mod snapshot;
pub mod source;
pub mod store;

// Re-export main types for cleaner imports
pub use config::{ConnectionDescriptor, DatabaseConfig, StoreKind};
pub use layout::Layout;
pub use snapshot::{Currency, PersistedRow, PriceSnapshot, RateQuote};
pub use source::SnapshotSource;
pub use store::{RowSet, Statement, Store, Value};

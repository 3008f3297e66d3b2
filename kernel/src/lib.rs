// Strata Kernel
//
// Transactional append-only table storage: partitioned Parquet data files
// made visible by an optimistically committed, versioned log.

pub mod batch;
pub mod config;
pub mod invariants;
pub mod log;
pub mod partition;
pub mod replay;
pub mod schema;
pub mod state;
pub mod storage;
pub mod table;
pub mod writer;

pub use batch::{RowBatch, Value};
pub use config::{CompressionCodec, TableConfig};
pub use log::Version;
pub use schema::{DataType, Field, Schema};
pub use state::TableState;
pub use storage::{StorageBackend, StorageOptions};
pub use table::{Table, TableError, WriteMode, WriteResult};

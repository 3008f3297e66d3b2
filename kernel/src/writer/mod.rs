// Data file writing: Parquet encoding plus per-file statistics.

pub mod file;
pub mod stats;

pub use file::{FileWriteError, FileWriter, DATA_TMP_DIR};
pub use stats::collect_stats;

//! `ext-merge-sort` is an external sort implementation for fixed-width numeric records.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it sorts chunks of data that each fit in RAM and spills each of them as a run, during the second
//! pass it merges the runs together. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Raw record format:**
//!   records are fixed-width little-endian integers (`i32`, `u32`, `i64`, `u64`) with no header. Input, runs and
//!   output share the same encoding.
//! * **Bounded memory:**
//!   run production holds at most one chunk in memory, merging holds one small buffer per run.
//! * **Multithreading support:**
//!   chunks are sorted in a thread pool utilizing maximum CPU resources.
//! * **Deterministic cleanup:**
//!   runs are deleted after a successful merge and on every failure path.
//!
//! # Example
//!
//! ```no_run
//! use std::path;
//!
//! use ext_merge_sort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let sorter: ExternalSorter<i32> = ExternalSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_memory_budget(100 * 1024 * 1024)
//!         .build()
//!         .unwrap();
//!
//!     let count = sorter
//!         .sort_file(path::Path::new("large_input.bin"), path::Path::new("sorted_output.bin"))
//!         .unwrap();
//!     println!("sorted {} records", count);
//! }
//! ```

pub mod buffer;
pub mod merger;
pub mod producer;
pub mod record;
pub mod run;
pub mod sort;

pub use buffer::LimitedBuffer;
pub use merger::{BinaryHeapMerger, RunMerger};
pub use producer::RunProducer;
pub use record::{Record, RecordError, RecordReader, RecordWriter};
pub use run::Run;
pub use sort::{DataSource, ErrorKind, ExternalSorter, ExternalSorterBuilder, SortError};

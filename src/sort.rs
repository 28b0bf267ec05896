//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::fs;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Instant;

use crate::merger::RunMerger;
use crate::producer::RunProducer;
use crate::record::Record;
use crate::run::Run;

/// Default memory budget of a single chunk in bytes.
pub const DEFAULT_MEMORY_BUDGET: usize = 100 * 1024 * 1024;
/// Default number of records buffered per run during merging.
pub const DEFAULT_MERGE_BUFFER_CAPACITY: usize = 1024;
/// Default number of merged records accumulated before being written out.
pub const DEFAULT_OUTPUT_BUFFER_CAPACITY: usize = 8192;
/// Default run file read/write buffer size in bytes.
pub const DEFAULT_RW_BUF_SIZE: usize = 64 * 1024;

/// Origin of malformed record data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Input stream.
    Input,
    /// Run with the given sequence number.
    Run(usize),
}

impl Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Input => write!(f, "input stream"),
            DataSource::Run(seq) => write!(f, "run {}", seq),
        }
    }
}

/// Sorting error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input stream or run is unreadable.
    ReadFailure,
    /// Output or run storage is unwritable.
    WriteFailure,
    /// Stored data is not aligned to the record width or does not match the recorded run length.
    MalformedRecordData,
    /// Sorter configuration or environment error.
    Setup,
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Invalid sorter configuration.
    InvalidConfig(String),
    /// Input data stream read error.
    InputRead(io::Error),
    /// Run read error.
    RunRead(usize, io::Error),
    /// Run write error.
    RunWrite(usize, io::Error),
    /// Run removal error.
    RunCleanup(usize, io::Error),
    /// Output stream write error.
    OutputWrite(io::Error),
    /// Data length is not a multiple of the record width.
    MalformedRecord {
        source: DataSource,
        offset: u64,
        trailing: usize,
    },
    /// Run holds a different number of records than it was created with.
    RunLengthMismatch { run: usize, expected: u64, actual: u64 },
}

impl SortError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SortError::TempDir(_) | SortError::ThreadPoolBuildError(_) | SortError::InvalidConfig(_) => {
                ErrorKind::Setup
            }
            SortError::InputRead(_) | SortError::RunRead(..) => ErrorKind::ReadFailure,
            SortError::RunWrite(..) | SortError::RunCleanup(..) | SortError::OutputWrite(_) => {
                ErrorKind::WriteFailure
            }
            SortError::MalformedRecord { .. } | SortError::RunLengthMismatch { .. } => {
                ErrorKind::MalformedRecordData
            }
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::InputRead(err) => Some(err),
            SortError::RunRead(_, err) => Some(err),
            SortError::RunWrite(_, err) => Some(err),
            SortError::RunCleanup(_, err) => Some(err),
            SortError::OutputWrite(err) => Some(err),
            SortError::InvalidConfig(_) | SortError::MalformedRecord { .. } | SortError::RunLengthMismatch { .. } => {
                None
            }
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::InvalidConfig(msg) => write!(f, "invalid sorter configuration: {}", msg),
            SortError::InputRead(err) => write!(f, "input data stream read error: {}", err),
            SortError::RunRead(seq, err) => write!(f, "run {} read error: {}", seq, err),
            SortError::RunWrite(seq, err) => write!(f, "run {} write error: {}", seq, err),
            SortError::RunCleanup(seq, err) => write!(f, "run {} removal error: {}", seq, err),
            SortError::OutputWrite(err) => write!(f, "output stream write error: {}", err),
            SortError::MalformedRecord {
                source,
                offset,
                trailing,
            } => write!(
                f,
                "malformed record data in {}: {} trailing bytes at offset {}",
                source, trailing, offset
            ),
            SortError::RunLengthMismatch { run, expected, actual } => write!(
                f,
                "run {} length mismatch: expected {} records, found {}",
                run, expected, actual
            ),
        }
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<T: Record> {
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Number of records sorted together in memory. Overrides the memory budget.
    chunk_capacity: Option<usize>,
    /// Memory budget of a single chunk in bytes.
    memory_budget: usize,
    /// Number of records buffered per run during merging.
    merge_buffer_capacity: usize,
    /// Number of merged records accumulated before being written out.
    output_buffer_capacity: usize,
    /// Run file read/write buffer size.
    rw_buf_size: usize,

    /// Record type.
    item_type: PhantomData<T>,
}

impl<T: Record> ExternalSorterBuilder<T> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<T>, SortError> {
        let chunk_capacity = self.chunk_capacity.unwrap_or(self.memory_budget / T::WIDTH);
        if chunk_capacity == 0 {
            return Err(SortError::InvalidConfig(format!(
                "chunk capacity must be at least 1 record ({} bytes)",
                T::WIDTH
            )));
        }
        if self.merge_buffer_capacity == 0 {
            return Err(SortError::InvalidConfig("merge buffer capacity must be at least 1".into()));
        }
        if self.output_buffer_capacity == 0 {
            return Err(SortError::InvalidConfig("output buffer capacity must be at least 1".into()));
        }

        ExternalSorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            chunk_capacity,
            self.merge_buffer_capacity,
            self.output_buffer_capacity,
            self.rw_buf_size,
        )
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<T> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<T> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets number of records sorted together in memory.
    pub fn with_chunk_capacity(mut self, chunk_capacity: usize) -> ExternalSorterBuilder<T> {
        self.chunk_capacity = Some(chunk_capacity);
        return self;
    }

    /// Sets chunk memory budget in bytes. Chunk capacity is derived from it unless set explicitly.
    pub fn with_memory_budget(mut self, memory_budget: usize) -> ExternalSorterBuilder<T> {
        self.memory_budget = memory_budget;
        self.chunk_capacity = None;
        return self;
    }

    /// Sets number of records buffered per run during merging.
    pub fn with_merge_buffer_capacity(mut self, capacity: usize) -> ExternalSorterBuilder<T> {
        self.merge_buffer_capacity = capacity;
        return self;
    }

    /// Sets number of merged records accumulated before being written out.
    pub fn with_output_buffer_capacity(mut self, capacity: usize) -> ExternalSorterBuilder<T> {
        self.output_buffer_capacity = capacity;
        return self;
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<T> {
        self.rw_buf_size = buf_size;
        return self;
    }
}

impl<T: Record> Default for ExternalSorterBuilder<T> {
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            chunk_capacity: None,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            merge_buffer_capacity: DEFAULT_MERGE_BUFFER_CAPACITY,
            output_buffer_capacity: DEFAULT_OUTPUT_BUFFER_CAPACITY,
            rw_buf_size: DEFAULT_RW_BUF_SIZE,
            item_type: PhantomData,
        }
    }
}

/// External sorter.
pub struct ExternalSorter<T: Record> {
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: tempfile::TempDir,
    /// Number of records sorted together in memory.
    chunk_capacity: usize,
    /// Number of records buffered per run during merging.
    merge_buffer_capacity: usize,
    /// Number of merged records accumulated before being written out.
    output_buffer_capacity: usize,
    /// Run file read/write buffer size.
    rw_buf_size: usize,

    /// Record type.
    item_type: PhantomData<T>,
}

impl<T: Record> ExternalSorter<T> {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `chunk_capacity` - Number of records sorted together in memory.
    /// * `merge_buffer_capacity` - Number of records buffered per run during merging.
    /// * `output_buffer_capacity` - Number of merged records accumulated before being written out.
    /// * `rw_buf_size` - Run files read/write buffer size.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        chunk_capacity: usize,
        merge_buffer_capacity: usize,
        output_buffer_capacity: usize,
        rw_buf_size: usize,
    ) -> Result<Self, SortError> {
        return Ok(ExternalSorter {
            chunk_capacity,
            merge_buffer_capacity,
            output_buffer_capacity,
            rw_buf_size,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
            item_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Returns number of records sorted together in memory.
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Returns directory run files are stored in.
    pub fn run_dir(&self) -> &Path {
        self.tmp_dir.path()
    }

    fn block_records(&self) -> usize {
        (self.rw_buf_size / T::WIDTH).max(1)
    }

    /// Splits the input into sorted runs.
    /// Returns runs in creation order.
    ///
    /// # Arguments
    /// * `input` - Input stream of fixed-width records
    pub fn produce_runs<R: Read>(&self, input: R) -> Result<Vec<Run>, SortError> {
        RunProducer::<T>::new(
            self.chunk_capacity,
            self.tmp_dir.path(),
            self.block_records(),
            &self.thread_pool,
        )
        .produce_runs(input)
    }

    /// Merges runs into the output and deletes them.
    /// Returns the number of records written.
    ///
    /// # Arguments
    /// * `runs` - Sorted runs, usually produced by [`ExternalSorter::produce_runs`]
    /// * `output` - Output stream sorted records are written to
    pub fn merge<W: Write>(&self, runs: Vec<Run>, output: W) -> Result<u64, SortError> {
        RunMerger::<T>::new(
            self.merge_buffer_capacity,
            self.output_buffer_capacity,
            self.block_records(),
        )
        .merge(runs, output)
    }

    /// Sorts records from the input to the output.
    /// Returns the number of records written.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `output` - Output stream sorted records are written to
    pub fn sort<R: Read, W: Write>(&self, input: R, output: W) -> Result<u64, SortError> {
        let started = Instant::now();
        let runs = self.produce_runs(input)?;
        let split_time = started.elapsed();
        log::info!(
            "split into {} runs in {:.2} seconds",
            runs.len(),
            split_time.as_secs_f64()
        );

        let started = Instant::now();
        let count = self.merge(runs, output)?;
        let merge_time = started.elapsed();
        log::info!("merged {} records in {:.2} seconds", count, merge_time.as_secs_f64());

        return Ok(count);
    }

    /// Sorts the input file to the output file.
    /// The output file is replaced only if sorting succeeds, a failed sort never leaves partial output behind.
    ///
    /// # Arguments
    /// * `input_path` - File to be sorted
    /// * `output_path` - Result file
    pub fn sort_file(&self, input_path: &Path, output_path: &Path) -> Result<u64, SortError> {
        let input = fs::File::open(input_path).map_err(SortError::InputRead)?;

        let output_dir = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut output = tempfile::Builder::new()
            .prefix(".sorting-")
            .tempfile_in(output_dir)
            .map_err(SortError::OutputWrite)?;

        let count = self.sort(input, output.as_file_mut())?;

        output.as_file().sync_all().map_err(SortError::OutputWrite)?;
        output
            .persist(output_path)
            .map_err(|err| SortError::OutputWrite(err.error))?;

        return Ok(count);
    }
}

impl<T: Record> Debug for ExternalSorter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalSorter")
            .field("tmp_dir", &self.tmp_dir.path())
            .field("chunk_capacity", &self.chunk_capacity)
            .field("merge_buffer_capacity", &self.merge_buffer_capacity)
            .field("output_buffer_capacity", &self.output_buffer_capacity)
            .field("rw_buf_size", &self.rw_buf_size)
            .finish()
    }
}

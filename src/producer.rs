//! Run producer.

use std::io::Read;
use std::marker::PhantomData;
use std::path::Path;

use log;

use crate::buffer::LimitedBuffer;
use crate::record::{Record, RecordError, RecordReader};
use crate::run::Run;
use crate::sort::{DataSource, SortError};

/// Splits an input stream into sorted runs.
///
/// Each chunk of at most `chunk_capacity` records is sorted in memory and spilled to its own run file.
pub struct RunProducer<'a, T> {
    chunk_capacity: usize,
    run_dir: &'a Path,
    block_records: usize,
    thread_pool: &'a rayon::ThreadPool,

    item_type: PhantomData<T>,
}

impl<'a, T: Record> RunProducer<'a, T> {
    /// Creates a run producer.
    ///
    /// # Arguments
    /// * `chunk_capacity` - Maximum number of records sorted together in memory, must be at least 1
    /// * `run_dir` - Directory run files are created in
    /// * `block_records` - Number of records per read/write call
    /// * `thread_pool` - Pool chunk sorting runs in
    pub fn new(
        chunk_capacity: usize,
        run_dir: &'a Path,
        block_records: usize,
        thread_pool: &'a rayon::ThreadPool,
    ) -> Self {
        RunProducer {
            chunk_capacity,
            run_dir,
            block_records,
            thread_pool,
            item_type: PhantomData,
        }
    }

    /// Reads the input to the end and returns the produced runs in creation order.
    /// Empty input produces no runs. If production fails, runs created so far are deleted.
    pub fn produce_runs<R: Read>(&self, input: R) -> Result<Vec<Run>, SortError> {
        if self.chunk_capacity == 0 {
            return Err(SortError::InvalidConfig("chunk capacity must be at least 1".into()));
        }

        let mut reader = RecordReader::<T, R>::with_block_records(input, self.block_records);
        let mut chunk_buf = LimitedBuffer::new(self.chunk_capacity);
        let mut runs = Vec::new();

        loop {
            let read = chunk_buf.fill(&mut reader).map_err(|err| match err {
                RecordError::IO(err) => SortError::InputRead(err),
                RecordError::Misaligned { offset, trailing } => SortError::MalformedRecord {
                    source: DataSource::Input,
                    offset,
                    trailing,
                },
            })?;
            if read == 0 {
                break;
            }

            runs.push(self.create_run(&mut chunk_buf, runs.len())?);

            if !chunk_buf.is_full() {
                // a short window means the input is exhausted
                break;
            }
        }

        log::debug!(
            "run production done (runs: {}, records: {})",
            runs.len(),
            runs.iter().map(Run::len).sum::<u64>()
        );

        return Ok(runs);
    }

    fn create_run(&self, chunk_buf: &mut LimitedBuffer<T>, seq: usize) -> Result<Run, SortError> {
        log::debug!("sorting chunk data (records: {}) ...", chunk_buf.len());
        self.thread_pool.install(|| {
            chunk_buf.par_sort();
        });

        log::debug!("saving chunk data as run {}", seq);
        let run = Run::create(self.run_dir, seq, chunk_buf.as_slice(), self.block_records)
            .map_err(|err| SortError::RunWrite(seq, err))?;

        return Ok(run);
    }
}

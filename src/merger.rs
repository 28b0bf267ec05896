//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;

use log;

use crate::buffer::MergeBuffer;
use crate::record::{Record, RecordError, RecordReader, RecordWriter};
use crate::run::Run;
use crate::sort::{DataSource, SortError};

/// Frontier entry: candidate value of one run.
///
/// Fields are compared in declaration order, so entries are ordered by value first and by run sequence number
/// on ties. `cursor` only matters when two runs share a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FrontierEntry<T> {
    value: T,
    run_seq: usize,
    cursor: usize,
    position: usize,
}

/// Per-run merge state.
struct RunCursor<T> {
    seq: usize,
    expected_len: u64,
    consumed: u64,
    reader: RecordReader<T, fs::File>,
    buffer: MergeBuffer<T>,
}

impl<T: Record> RunCursor<T> {
    /// Loads the next buffer window. Returns `false` when the run is fully consumed.
    fn refill(&mut self) -> Result<bool, SortError> {
        let seq = self.seq;
        let read = self.buffer.refill(&mut self.reader).map_err(|err| match err {
            RecordError::IO(err) => SortError::RunRead(seq, err),
            RecordError::Misaligned { offset, trailing } => SortError::MalformedRecord {
                source: DataSource::Run(seq),
                offset,
                trailing,
            },
        })?;
        self.consumed += read as u64;

        if read > 0 {
            return Ok(true);
        }

        if self.consumed != self.expected_len {
            return Err(SortError::RunLengthMismatch {
                run: seq,
                expected: self.expected_len,
                actual: self.consumed,
            });
        }

        log::debug!("run {} exhausted ({} records)", seq, self.consumed);
        return Ok(false);
    }
}

/// Binary heap merger implementation.
/// Merges multiple sorted runs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of runs.
pub struct BinaryHeapMerger<T: Record> {
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    frontier: BinaryHeap<Reverse<FrontierEntry<T>>>,
    cursors: Vec<RunCursor<T>>,
    failed: bool,
}

impl<T: Record> BinaryHeapMerger<T> {
    /// Opens every run and loads its first buffer window.
    /// Run records should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `runs` - Runs to be merged into a single sorted stream
    /// * `buffer_capacity` - Number of records buffered in memory per run
    /// * `block_records` - Number of records per underlying read call
    pub fn open(runs: &[Run], buffer_capacity: usize, block_records: usize) -> Result<Self, SortError> {
        if buffer_capacity == 0 {
            return Err(SortError::InvalidConfig("merge buffer capacity must be at least 1".into()));
        }

        let mut cursors = Vec::with_capacity(runs.len());
        let mut frontier = BinaryHeap::with_capacity(runs.len());

        for run in runs {
            let reader = run.open(block_records).map_err(|err| SortError::RunRead(run.seq(), err))?;
            let mut cursor = RunCursor {
                seq: run.seq(),
                expected_len: run.len(),
                consumed: 0,
                reader,
                buffer: MergeBuffer::new(buffer_capacity),
            };

            if !cursor.refill()? {
                continue;
            }

            let idx = cursors.len();
            if let Some(value) = cursor.buffer.get(0) {
                frontier.push(Reverse(FrontierEntry {
                    value,
                    run_seq: cursor.seq,
                    cursor: idx,
                    position: 0,
                }));
            }
            cursors.push(cursor);
        }

        return Ok(BinaryHeapMerger {
            frontier,
            cursors,
            failed: false,
        });
    }

    #[cfg(test)]
    fn active_runs(&self) -> usize {
        self.frontier.len()
    }

    fn advance(&mut self, entry: FrontierEntry<T>) -> Result<(), SortError> {
        let cursor = &mut self.cursors[entry.cursor];
        let mut position = entry.position + 1;

        if position >= cursor.buffer.len() {
            if !cursor.refill()? {
                return Ok(());
            }
            position = 0;
        }

        if let Some(value) = cursor.buffer.get(position) {
            self.frontier.push(Reverse(FrontierEntry {
                value,
                run_seq: entry.run_seq,
                cursor: entry.cursor,
                position,
            }));
        }

        return Ok(());
    }
}

impl<T: Record> Iterator for BinaryHeapMerger<T> {
    type Item = Result<T, SortError>;

    /// Returns the next record from the runs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let Reverse(entry) = self.frontier.pop()?;
        if let Err(err) = self.advance(entry) {
            self.failed = true;
            self.frontier.clear();
            return Some(Err(err));
        }

        return Some(Ok(entry.value));
    }
}

/// Run merger. Merges runs into an output stream and retires them.
pub struct RunMerger<T> {
    buffer_capacity: usize,
    output_buffer_capacity: usize,
    block_records: usize,

    item_type: PhantomData<T>,
}

impl<T: Record> RunMerger<T> {
    /// Creates a run merger.
    ///
    /// # Arguments
    /// * `buffer_capacity` - Number of records buffered in memory per run
    /// * `output_buffer_capacity` - Number of merged records accumulated before being written out
    /// * `block_records` - Number of records per underlying read call
    pub fn new(buffer_capacity: usize, output_buffer_capacity: usize, block_records: usize) -> Self {
        RunMerger {
            buffer_capacity,
            output_buffer_capacity,
            block_records,
            item_type: PhantomData,
        }
    }

    /// Merges `runs` into `output` and returns the number of records written.
    ///
    /// Runs are deleted once the merge completes. If the merge fails, open runs are closed and deleted on a
    /// best-effort basis and the output is left incomplete; it must not be used.
    pub fn merge<W: Write>(&self, runs: Vec<Run>, output: W) -> Result<u64, SortError> {
        if runs.is_empty() {
            log::info!("no runs to merge");
            let mut output = output;
            output.flush().map_err(SortError::OutputWrite)?;
            return Ok(0);
        }

        log::debug!(
            "merging {} runs ({} records) ...",
            runs.len(),
            runs.iter().map(Run::len).sum::<u64>()
        );

        let merger = BinaryHeapMerger::<T>::open(&runs, self.buffer_capacity, self.block_records)?;
        let mut writer = RecordWriter::with_capacity(output, self.output_buffer_capacity);
        for item in merger {
            writer.push(item?).map_err(SortError::OutputWrite)?;
        }

        let (_, count) = writer.finish().map_err(SortError::OutputWrite)?;

        Self::remove_runs(runs)?;
        log::debug!("merge done ({} records)", count);

        return Ok(count);
    }

    fn remove_runs(runs: Vec<Run>) -> Result<(), SortError> {
        let mut result = Ok(());
        for run in runs {
            let seq = run.seq();
            if let Err(err) = run.remove() {
                log::warn!("run {} removal failed: {}", seq, err);
                if result.is_ok() {
                    result = Err(SortError::RunCleanup(seq, err));
                }
            }
        }

        return result;
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;

    use rstest::*;

    use super::{BinaryHeapMerger, RunMerger};
    use crate::record::encode_all;
    use crate::run::Run;
    use crate::sort::{DataSource, ErrorKind, SortError};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn create_runs(dir: &tempfile::TempDir, runs: Vec<Vec<i32>>) -> Vec<Run> {
        Vec::from_iter(
            runs.into_iter()
                .enumerate()
                .map(|(seq, records)| Run::create(dir.path(), seq, &records, 2).unwrap()),
        )
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![3, 5, 8],
            vec![1, 2, 9],
            vec![4, 6, 7],
        ],
        vec![1, 2, 3, 4, 5, 6, 7, 8, 9],
    )]
    #[case(
        vec![
            vec![4, 5, 7],
            vec![1, 6],
            vec![3],
            vec![],
        ],
        vec![1, 3, 4, 5, 6, 7],
    )]
    #[case(
        vec![
            vec![2, 2],
            vec![1],
        ],
        vec![1, 2, 2],
    )]
    #[case(
        vec![
            vec![-5, 0, 0, 0, 10, 11, 12],
            vec![0, 0, 10],
        ],
        vec![-5, 0, 0, 0, 0, 0, 10, 10, 11, 12],
    )]
    #[case(
        vec![
            vec![i32::MIN, i32::MAX],
            vec![-1, 1],
        ],
        vec![i32::MIN, -1, 1, i32::MAX],
    )]
    fn test_merger(
        tmp_dir: tempfile::TempDir,
        #[case] runs: Vec<Vec<i32>>,
        #[case] expected_result: Vec<i32>,
        #[values(1, 2, 1024)] buffer_capacity: usize,
    ) {
        let runs = create_runs(&tmp_dir, runs);
        let merger = BinaryHeapMerger::<i32>::open(&runs, buffer_capacity, 2).unwrap();

        let actual_result: Result<Vec<i32>, _> = merger.collect();
        assert_eq!(actual_result.unwrap(), expected_result);
    }

    #[rstest]
    fn test_merge_writes_output_and_removes_runs(tmp_dir: tempfile::TempDir) {
        let runs = create_runs(&tmp_dir, vec![vec![3, 5, 8], vec![1, 2, 9], vec![4, 6, 7]]);
        let paths = Vec::from_iter(runs.iter().map(|run| run.path().to_path_buf()));

        let mut output = Vec::new();
        let count = RunMerger::<i32>::new(2, 4, 2).merge(runs, &mut output).unwrap();

        assert_eq!(count, 9);
        assert_eq!(output, encode_all(&[1i32, 2, 3, 4, 5, 6, 7, 8, 9]));
        assert!(paths.iter().all(|path| !path.exists()));
    }

    struct FailingWriter;

    impl io::Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    #[case(1)]
    #[case(1000)]
    fn test_merge_counts_buffered_output(tmp_dir: tempfile::TempDir, #[case] output_buffer_capacity: usize) {
        let runs = create_runs(&tmp_dir, vec![vec![2, 2], vec![1]]);

        let mut output = Vec::new();
        let count = RunMerger::<i32>::new(2, output_buffer_capacity, 2)
            .merge(runs, &mut output)
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(output, encode_all(&[1i32, 2, 2]));
    }

    #[rstest]
    #[case(1)]
    #[case(1000)]
    fn test_output_write_failure_cleans_up(tmp_dir: tempfile::TempDir, #[case] output_buffer_capacity: usize) {
        let runs = create_runs(&tmp_dir, vec![vec![1, 4, 7], vec![2, 5, 8], vec![3, 6, 9]]);

        let err = RunMerger::<i32>::new(1, output_buffer_capacity, 2)
            .merge(runs, FailingWriter)
            .unwrap_err();

        assert!(matches!(err, SortError::OutputWrite(_)));
        assert_eq!(err.kind(), ErrorKind::WriteFailure);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_merge_single_run_is_identity(tmp_dir: tempfile::TempDir) {
        let records = vec![-3, -3, 0, 7, 7, 7, 100];
        let runs = create_runs(&tmp_dir, vec![records.clone()]);

        let mut output = Vec::new();
        let count = RunMerger::<i32>::new(3, 2, 2).merge(runs, &mut output).unwrap();

        assert_eq!(count, records.len() as u64);
        assert_eq!(output, encode_all(&records));
    }

    #[test]
    fn test_merge_zero_runs() {
        let mut output = Vec::new();
        let count = RunMerger::<i32>::new(3, 2, 2).merge(Vec::new(), &mut output).unwrap();

        assert_eq!(count, 0);
        assert!(output.is_empty());
    }

    #[rstest]
    fn test_tie_break_prefers_lower_sequence(tmp_dir: tempfile::TempDir) {
        let runs = create_runs(&tmp_dir, vec![vec![1, 1], vec![1]]);
        let mut merger = BinaryHeapMerger::<i32>::open(&runs, 1, 2).unwrap();
        assert_eq!(merger.active_runs(), 2);

        let first = merger.frontier.peek().map(|entry| entry.0).unwrap();
        assert_eq!((first.value, first.run_seq), (1, 0));

        assert_eq!(merger.by_ref().count(), 3);
        assert_eq!(merger.active_runs(), 0);
    }

    #[rstest]
    fn test_truncated_run_fails_merge(tmp_dir: tempfile::TempDir) {
        let runs = create_runs(&tmp_dir, vec![vec![1, 2, 3, 4], vec![0, 5]]);
        let paths = Vec::from_iter(runs.iter().map(|run| run.path().to_path_buf()));
        fs::write(&paths[0], encode_all(&[1i32, 2])).unwrap();

        let mut output = Vec::new();
        let err = RunMerger::<i32>::new(1, 1, 2).merge(runs, &mut output).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MalformedRecordData);
        match err {
            SortError::RunLengthMismatch { run, expected, actual } => {
                assert_eq!((run, expected, actual), (0, 4, 2));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(paths.iter().all(|path| !path.exists()));
    }

    #[rstest]
    fn test_misaligned_run_fails_merge(tmp_dir: tempfile::TempDir) {
        let runs = create_runs(&tmp_dir, vec![vec![1, 2], vec![3]]);
        let mut corrupted = encode_all(&[3i32]);
        corrupted.extend_from_slice(&[0, 0, 0]);
        fs::write(runs[1].path(), corrupted).unwrap();

        let mut output = Vec::new();
        let err = RunMerger::<i32>::new(4, 4, 2).merge(runs, &mut output).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MalformedRecordData);
        assert!(matches!(
            err,
            SortError::MalformedRecord {
                source: DataSource::Run(1),
                offset: 4,
                trailing: 3,
            }
        ));
    }
}

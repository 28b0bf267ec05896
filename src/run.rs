use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use tempfile;

use crate::record::{Record, RecordReader, RecordWriter};

/// Sorted run persisted in a temporary file.
///
/// A run is sealed on creation and is only read sequentially afterwards. The backing file is owned by the
/// run: [`Run::remove`] deletes it reporting errors, dropping the run deletes it on a best-effort basis.
pub struct Run {
    seq: usize,
    len: u64,
    path: tempfile::TempPath,
}

impl Run {
    /// Writes `records` to a new file in `dir` and seals it as a run.
    ///
    /// # Arguments
    /// * `dir` - Directory the run file is created in
    /// * `seq` - Run sequence number reflecting creation order
    /// * `records` - Records sorted in ascending order
    /// * `block_records` - Number of records encoded per write call
    pub fn create<T: Record>(dir: &Path, seq: usize, records: &[T], block_records: usize) -> io::Result<Self> {
        let mut tmp_file = tempfile::Builder::new()
            .prefix(&format!("run-{:06}-", seq))
            .suffix(".bin")
            .tempfile_in(dir)?;

        let mut writer = RecordWriter::with_capacity(tmp_file.as_file_mut(), block_records);
        writer.write_records(records)?;
        writer.finish()?;

        return Ok(Run {
            seq,
            len: records.len() as u64,
            path: tmp_file.into_temp_path(),
        });
    }

    /// Opens the run for sequential reading from its first record.
    pub fn open<T: Record>(&self, block_records: usize) -> io::Result<RecordReader<T, fs::File>> {
        let file = fs::File::open(&self.path)?;
        Ok(RecordReader::with_block_records(file, block_records))
    }

    /// Deletes the run storage.
    pub fn remove(self) -> io::Result<()> {
        self.path.close()
    }

    /// Returns the run sequence number.
    pub fn seq(&self) -> usize {
        self.seq
    }

    /// Returns the number of records in the run.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole run into memory.
    #[cfg(test)]
    pub(crate) fn read_all<T: Record>(&self) -> io::Result<Vec<T>> {
        let bytes = fs::read(&self.path)?;
        if bytes.len() % T::WIDTH != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("run {} length is not a multiple of {} bytes", self.seq, T::WIDTH),
            ));
        }

        return Ok(bytes.chunks_exact(T::WIDTH).map(T::decode).collect());
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("seq", &self.seq)
            .field("len", &self.len)
            .field("path", &self.path.display())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::Run;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_run(tmp_dir: tempfile::TempDir) {
        let saved = Vec::from_iter(-50i32..50);

        let run = Run::create(tmp_dir.path(), 7, &saved, 16).unwrap();
        assert_eq!(run.seq(), 7);
        assert_eq!(run.len(), 100);
        assert_eq!(std::fs::metadata(run.path()).unwrap().len(), 400);

        let mut reader = run.open::<i32>(16).unwrap();
        let mut restored = Vec::new();
        while reader.read_into(&mut restored, 30).unwrap() > 0 {}
        assert_eq!(restored, saved);
        assert_eq!(run.read_all::<i32>().unwrap(), saved);
    }

    #[rstest]
    fn test_run_removal(tmp_dir: tempfile::TempDir) {
        let removed = Run::create(tmp_dir.path(), 0, &[1u32, 2], 4).unwrap();
        let removed_path = removed.path().to_path_buf();
        removed.remove().unwrap();
        assert!(!removed_path.exists());

        let dropped = Run::create(tmp_dir.path(), 1, &[3u32], 4).unwrap();
        let dropped_path = dropped.path().to_path_buf();
        drop(dropped);
        assert!(!dropped_path.exists());
    }
}

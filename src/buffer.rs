//! In-memory record windows.

use std::io::Read;

use rayon::slice::ParallelSliceMut;

use crate::record::{Record, RecordError, RecordReader};

/// Chunk buffer limited by records count.
///
/// Holds one chunk of input during run production. Storage grows with the records actually read and never
/// holds more than `limit` records, so a large limit costs nothing for small inputs.
pub struct LimitedBuffer<T> {
    limit: usize,
    inner: Vec<T>,
}

impl<T: Record> LimitedBuffer<T> {
    pub fn new(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::new(),
        }
    }

    /// Replaces the buffer content with the next window of records from the reader.
    /// Returns the number of records loaded, zero if the reader is exhausted.
    pub fn fill<R: Read>(&mut self, reader: &mut RecordReader<T, R>) -> Result<usize, RecordError> {
        self.inner.clear();
        reader.read_into(&mut self.inner, self.limit)
    }

    /// Sorts the buffered records in place using rayon.
    pub fn par_sort(&mut self) {
        self.inner.par_sort_unstable();
    }

    /// Returns buffer length
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }

    pub fn as_slice(&self) -> &[T] {
        self.inner.as_slice()
    }
}

/// Window of records read from the front of one run during merging.
pub struct MergeBuffer<T> {
    capacity: usize,
    records: Vec<T>,
}

impl<T: Record> MergeBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        MergeBuffer {
            capacity,
            records: Vec::new(),
        }
    }

    /// Drops the current window and loads the next one. Returns zero when the run has no more records.
    pub fn refill<R: Read>(&mut self, reader: &mut RecordReader<T, R>) -> Result<usize, RecordError> {
        self.records.clear();
        reader.read_into(&mut self.records, self.capacity)
    }

    pub(crate) fn get(&self, position: usize) -> Option<T> {
        self.records.get(position).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use super::{LimitedBuffer, MergeBuffer};
    use crate::record::{encode_all, RecordReader};

    #[test]
    fn test_limited_buffer() {
        let mut reader = RecordReader::<i32, _>::new(io::Cursor::new(encode_all(&[5, 3, 8, 1, 9])));
        let mut buffer = LimitedBuffer::new(3);

        assert_eq!(buffer.fill(&mut reader).unwrap(), 3);
        assert_eq!(buffer.is_full(), true);
        buffer.par_sort();
        assert_eq!(buffer.as_slice(), &[3, 5, 8]);

        assert_eq!(buffer.fill(&mut reader).unwrap(), 2);
        assert_eq!(buffer.is_full(), false);
        assert_eq!(buffer.as_slice(), &[1, 9]);

        assert_eq!(buffer.fill(&mut reader).unwrap(), 0);
        assert_eq!(buffer.is_empty(), true);
    }

    #[test]
    fn test_merge_buffer_refill() {
        let mut reader = RecordReader::<u64, _>::new(io::Cursor::new(encode_all(&[1u64, 2, 3])));
        let mut buffer = MergeBuffer::new(2);
        assert_eq!(buffer.get(0), None);

        assert_eq!(buffer.refill(&mut reader).unwrap(), 2);
        assert_eq!(buffer.get(0), Some(1));
        assert_eq!(buffer.get(2), None);

        assert_eq!(buffer.refill(&mut reader).unwrap(), 1);
        assert_eq!(buffer.get(0), Some(3));
        assert_eq!(buffer.len(), 1);

        assert_eq!(buffer.refill(&mut reader).unwrap(), 0);
        assert_eq!(buffer.len(), 0);
    }
}

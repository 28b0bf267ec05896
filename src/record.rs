//! Fixed-width record encoding.
//!
//! Records are stored as raw little-endian values with no header and no count prefix. Input streams, runs and
//! the merged output all share this encoding, so any run is itself a valid input stream.

use std::fmt::Debug;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;

/// Number of records decoded or encoded per underlying I/O call when no block size is given.
pub const DEFAULT_BLOCK_RECORDS: usize = 8192;

/// Fixed-width sortable record.
pub trait Record: Copy + Ord + Send + Sync + Debug {
    /// Encoded record width in bytes.
    const WIDTH: usize;

    /// Decodes a record from exactly [`Record::WIDTH`] bytes.
    fn decode(bytes: &[u8]) -> Self;

    /// Encodes the record into exactly [`Record::WIDTH`] bytes.
    fn encode(&self, out: &mut [u8]);
}

macro_rules! impl_record {
    ($($ty:ty),*) => {
        $(
            impl Record for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn encode(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_record!(i32, u32, i64, u64);

/// Record stream reading error.
#[derive(Debug)]
pub enum RecordError {
    /// Underlying reader failed.
    IO(io::Error),
    /// The stream ended in the middle of a record.
    Misaligned {
        /// Byte offset of the incomplete record.
        offset: u64,
        /// Number of bytes left over after the last complete record.
        trailing: usize,
    },
}

/// Sequential fixed-width record reader.
///
/// End of stream is detected by a short read. A stream whose length is not a multiple of the record width
/// is reported as [`RecordError::Misaligned`].
pub struct RecordReader<T, R> {
    inner: R,
    block: Vec<u8>,
    block_records: usize,
    offset: u64,

    item_type: PhantomData<T>,
}

impl<T: Record, R: Read> RecordReader<T, R> {
    pub fn new(inner: R) -> Self {
        Self::with_block_records(inner, DEFAULT_BLOCK_RECORDS)
    }

    /// Creates a reader that requests at most `block_records` records per underlying read call.
    pub fn with_block_records(inner: R, block_records: usize) -> Self {
        RecordReader {
            inner,
            block: Vec::new(),
            block_records: block_records.max(1),
            offset: 0,
            item_type: PhantomData,
        }
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Appends up to `max` records to `out`. Returns the number of records appended, zero meaning the stream
    /// is exhausted.
    pub fn read_into(&mut self, out: &mut Vec<T>, max: usize) -> Result<usize, RecordError> {
        let mut appended = 0;

        while appended < max {
            let want = (max - appended).min(self.block_records) * T::WIDTH;
            let filled = self.fill_block(want)?;

            let complete = filled - filled % T::WIDTH;
            out.extend(self.block[..complete].chunks_exact(T::WIDTH).map(T::decode));
            appended += complete / T::WIDTH;
            self.offset += complete as u64;

            if filled < want {
                if complete != filled {
                    return Err(RecordError::Misaligned {
                        offset: self.offset,
                        trailing: filled - complete,
                    });
                }
                break;
            }
        }

        return Ok(appended);
    }

    fn fill_block(&mut self, want: usize) -> Result<usize, RecordError> {
        self.block.resize(want, 0);

        let mut filled = 0;
        while filled < want {
            match self.inner.read(&mut self.block[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(RecordError::IO(err)),
            }
        }

        return Ok(filled);
    }
}

/// Batching fixed-width record writer.
///
/// Records are accumulated in memory and encoded to the underlying writer in blocks, so emission order is
/// preserved while the number of write calls stays low.
pub struct RecordWriter<T, W: Write> {
    inner: W,
    pending: Vec<T>,
    capacity: usize,
    scratch: Vec<u8>,
    written: u64,
}

impl<T: Record, W: Write> RecordWriter<T, W> {
    pub fn new(inner: W) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_RECORDS)
    }

    /// Creates a writer that buffers up to `capacity` records before writing them out.
    pub fn with_capacity(inner: W, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RecordWriter {
            inner,
            pending: Vec::with_capacity(capacity.min(DEFAULT_BLOCK_RECORDS)),
            capacity,
            scratch: Vec::new(),
            written: 0,
        }
    }

    /// Appends a single record.
    pub fn push(&mut self, record: T) -> io::Result<()> {
        self.pending.push(record);
        if self.pending.len() >= self.capacity {
            self.flush_pending()?;
        }

        return Ok(());
    }

    /// Appends a slice of records.
    pub fn write_records(&mut self, records: &[T]) -> io::Result<()> {
        self.flush_pending()?;
        for block in records.chunks(self.capacity) {
            Self::encode_block(&mut self.scratch, block);
            self.inner.write_all(&self.scratch)?;
            self.written += block.len() as u64;
        }

        return Ok(());
    }

    /// Number of records handed to the underlying writer so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Writes all pending records and flushes the underlying writer.
    /// Returns the underlying writer together with the total number of records written.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.flush_pending()?;
        self.inner.flush()?;

        return Ok((self.inner, self.written));
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        Self::encode_block(&mut self.scratch, &self.pending);
        self.inner.write_all(&self.scratch)?;
        self.written += self.pending.len() as u64;
        self.pending.clear();

        return Ok(());
    }

    fn encode_block(scratch: &mut Vec<u8>, records: &[T]) {
        scratch.resize(records.len() * T::WIDTH, 0);
        for (record, out) in records.iter().zip(scratch.chunks_exact_mut(T::WIDTH)) {
            record.encode(out);
        }
    }
}

/// Encodes records into a freshly allocated byte vector.
pub fn encode_all<T: Record>(records: &[T]) -> Vec<u8> {
    let mut bytes = vec![0u8; records.len() * T::WIDTH];
    for (record, out) in records.iter().zip(bytes.chunks_exact_mut(T::WIDTH)) {
        record.encode(out);
    }

    return bytes;
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{encode_all, Record, RecordError, RecordReader, RecordWriter};

    #[test]
    fn test_i32_encoding_is_little_endian() {
        let mut out = [0u8; 4];
        (-2i32).encode(&mut out);
        assert_eq!(out, [0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(i32::decode(&out), -2);
    }

    #[rstest]
    #[case(0, 4, vec![])]
    #[case(10, 4, vec![4, 4, 2])]
    #[case(8, 4, vec![4, 4])]
    #[case(5, 1, vec![1, 1, 1, 1, 1])]
    fn test_reader_windows(#[case] total: i32, #[case] window: usize, #[case] expected_sizes: Vec<usize>) {
        let data = Vec::from_iter(0..total);
        let mut reader = RecordReader::<i32, _>::with_block_records(io::Cursor::new(encode_all(&data)), 3);

        let mut sizes = Vec::new();
        let mut restored = Vec::new();
        loop {
            let mut window_buf = Vec::new();
            let read = reader.read_into(&mut window_buf, window).unwrap();
            if read == 0 {
                break;
            }
            sizes.push(read);
            restored.extend(window_buf);
        }

        assert_eq!(sizes, expected_sizes);
        assert_eq!(restored, data);
        assert_eq!(reader.offset(), total as u64 * 4);
    }

    #[test]
    fn test_reader_misaligned_tail() {
        let mut bytes = encode_all(&[1i32, 2]);
        bytes.extend_from_slice(&[0xaa, 0xbb]);
        let mut reader = RecordReader::<i32, _>::new(io::Cursor::new(bytes));

        let mut out = Vec::new();
        match reader.read_into(&mut out, 10) {
            Err(RecordError::Misaligned { offset, trailing }) => {
                assert_eq!(offset, 8);
                assert_eq!(trailing, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_writer_batches_in_order() {
        let mut writer = RecordWriter::<i64, _>::with_capacity(Vec::new(), 2);
        for value in [5i64, -1, 3] {
            writer.push(value).unwrap();
        }
        assert_eq!(writer.written(), 2);
        writer.write_records(&[7, 8, 9]).unwrap();
        assert_eq!(writer.written(), 6);

        let (bytes, written) = writer.finish().unwrap();
        assert_eq!(written, 6);
        assert_eq!(bytes, encode_all(&[5i64, -1, 3, 7, 8, 9]));
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    #[case(usize::MAX / 2)]
    fn test_writer_finish_counts_pending(#[case] capacity: usize) {
        let mut writer = RecordWriter::<i32, _>::with_capacity(Vec::new(), capacity);
        for value in [3, 1, 2] {
            writer.push(value).unwrap();
        }

        let (bytes, written) = writer.finish().unwrap();
        assert_eq!(written, 3);
        assert_eq!(bytes, encode_all(&[3i32, 1, 2]));
    }
}

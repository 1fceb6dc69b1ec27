//! Multichannel sample buffer shared between threads.
//!
//! Data and metadata live behind one lock. The buffer is created in one
//! thread, then handles obtained with [`SampleBuffer::share`] are given to
//! the others. Every handle points to the same storage.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::CoreError;

/// Element types the buffer can hold.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    /// Data type stored in the header.
    const DATA_TYPE: DataType;
}

impl Sample for f32 {
    const DATA_TYPE: DataType = DataType::F32;
}

impl Sample for i16 {
    const DATA_TYPE: DataType = DataType::I16;
}

/// Supported element types and their header codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    /// Code 0.
    F32,
    /// Code 1.
    I16,
}

impl DataType {
    /// Header code of this type.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            DataType::F32 => 0,
            DataType::I16 => 1,
        }
    }

    /// Type for a header code.
    ///
    /// # Errors
    /// Returns `UnknownDataType` for codes other than 0 and 1.
    pub fn from_code(code: u32) -> Result<Self, CoreError> {
        match code {
            0 => Ok(DataType::F32),
            1 => Ok(DataType::I16),
            other => Err(CoreError::UnknownDataType(other)),
        }
    }

    /// Bytes per element.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::I16 => 2,
        }
    }
}

/// Metadata describing the buffer contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHeader {
    /// Size of the data region in bytes.
    pub buf_size_bytes: usize,
    /// Element type code.
    pub data_type: u32,
    /// Sample dimensionality.
    pub n_channels: usize,
    /// Capacity per channel.
    pub n_samples: usize,
}

/// Outcome of [`SampleBuffer::check_availability`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    /// The range is held by the buffer.
    Ready,
    /// Part of the range lies beyond the buffer capacity.
    Partial,
    /// Nothing of the range can be served.
    Unavailable,
}

struct Inner<T> {
    header: BufferHeader,
    /// Channel-major: `data[ch * n_samples + s]`.
    data: Vec<T>,
}

/// One-dimensional storage of `n_channels x n_samples` homogeneous elements.
///
/// # Example
/// ```
/// use dm_core::buffer::SampleBuffer;
/// let buf = SampleBuffer::<f32>::new(2, 15).unwrap();
/// let other = buf.share();
/// buf.put_data(&[1.0, 2.0, 3.0, 4.0], 0).unwrap();
/// let mut out = Vec::new();
/// other.get_data(0, 2, &mut out).unwrap();
/// assert_eq!(out, vec![1.0, 3.0, 2.0, 4.0]);
/// ```
pub struct SampleBuffer<T: Sample> {
    inner: Arc<RwLock<Inner<T>>>,
}

impl<T: Sample> SampleBuffer<T> {
    /// Allocate a zeroed buffer.
    ///
    /// # Errors
    /// Returns `InvalidDimensions` if either dimension is zero.
    pub fn new(n_channels: usize, n_samples: usize) -> Result<Self, CoreError> {
        if n_channels < 1 || n_samples < 1 {
            log::error!("n_channels and n_samples must be positive integers");
            return Err(CoreError::InvalidDimensions {
                n_channels,
                n_samples,
            });
        }
        let len = n_channels * n_samples;
        let header = BufferHeader {
            buf_size_bytes: len * T::DATA_TYPE.size(),
            data_type: T::DATA_TYPE.code(),
            n_channels,
            n_samples,
        };
        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                header,
                data: vec![T::default(); len],
            })),
        })
    }

    /// Another handle on the same storage.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer metadata.
    #[must_use]
    pub fn header(&self) -> BufferHeader {
        self.read().header
    }

    /// Sample dimensionality.
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.read().header.n_channels
    }

    /// Capacity per channel.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.read().header.n_samples
    }

    /// Element type.
    #[must_use]
    pub fn dtype(&self) -> DataType {
        T::DATA_TYPE
    }

    /// Whether `start..end` can be read.
    #[must_use]
    pub fn check_availability(&self, start: usize, end: usize) -> Availability {
        let n_samples = self.n_samples();
        if start >= end || start >= n_samples {
            Availability::Unavailable
        } else if end > n_samples {
            Availability::Partial
        } else {
            Availability::Ready
        }
    }

    /// Write row-major data (`[sample][channel]`) starting at sample `start`.
    ///
    /// # Errors
    /// `IncompatibleData` if `data` is not made of whole rows,
    /// `Unavailable` if the rows do not fit.
    pub fn put_data(&self, data: &[T], start: usize) -> Result<(), CoreError> {
        let mut inner = self.write();
        let BufferHeader {
            n_channels,
            n_samples,
            ..
        } = inner.header;
        if data.len() % n_channels != 0 {
            return Err(CoreError::IncompatibleData {
                len: data.len(),
                n_channels,
            });
        }
        let rows = data.len() / n_channels;
        let end = start + rows;
        if end > n_samples {
            return Err(CoreError::Unavailable { start, end });
        }
        for (r, row) in data.chunks_exact(n_channels).enumerate() {
            for (ch, &v) in row.iter().enumerate() {
                inner.data[ch * n_samples + start + r] = v;
            }
        }
        Ok(())
    }

    /// Write channel-major data holding `len` samples per channel.
    ///
    /// # Errors
    /// `IncompatibleData` if `data.len() != n_channels * len`,
    /// `Unavailable` if the samples do not fit.
    pub fn put_channels(&self, data: &[T], start: usize, len: usize) -> Result<(), CoreError> {
        let mut inner = self.write();
        let BufferHeader {
            n_channels,
            n_samples,
            ..
        } = inner.header;
        if data.len() != n_channels * len {
            return Err(CoreError::IncompatibleData {
                len: data.len(),
                n_channels,
            });
        }
        let end = start + len;
        if end > n_samples {
            return Err(CoreError::Unavailable { start, end });
        }
        for (ch, chunk) in data.chunks_exact(len.max(1)).enumerate().take(n_channels) {
            let base = ch * n_samples + start;
            inner.data[base..base + len].copy_from_slice(&chunk[..len]);
        }
        Ok(())
    }

    /// Copy `start..end` of every channel into `out`, channel-major.
    ///
    /// `out` is cleared first and keeps its allocation between calls.
    ///
    /// # Errors
    /// `Unavailable` unless the whole range is held by the buffer.
    pub fn get_data(&self, start: usize, end: usize, out: &mut Vec<T>) -> Result<(), CoreError> {
        if self.check_availability(start, end) != Availability::Ready {
            return Err(CoreError::Unavailable { start, end });
        }
        let inner = self.read();
        let n_samples = inner.header.n_samples;
        out.clear();
        for ch in 0..inner.header.n_channels {
            let base = ch * n_samples;
            out.extend_from_slice(&inner.data[base + start..base + end]);
        }
        Ok(())
    }
}

impl<T: Sample> std::fmt::Debug for SampleBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("header", &self.header())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_dimensions() {
        assert_eq!(
            SampleBuffer::<f32>::new(0, 10).unwrap_err(),
            CoreError::InvalidDimensions {
                n_channels: 0,
                n_samples: 10
            }
        );
        assert!(SampleBuffer::<i16>::new(4, 0).is_err());
    }

    #[test]
    fn header_describes_layout() {
        let buf = SampleBuffer::<i16>::new(3, 100).unwrap();
        let hdr = buf.header();
        assert_eq!(hdr.buf_size_bytes, 600);
        assert_eq!(hdr.data_type, 1);
        assert_eq!(DataType::from_code(hdr.data_type).unwrap(), DataType::I16);
        assert_eq!(buf.dtype(), DataType::I16);
        assert!(DataType::from_code(7).is_err());
    }

    #[test]
    fn shared_handles_see_each_other() {
        let buf1 = SampleBuffer::<f32>::new(2, 15).unwrap();
        let buf2 = buf1.share();

        buf1.put_data(&[1.0, 2.0, 3.0, 4.0], 0).unwrap();
        buf2.put_data(&[5.0, 6.0, 7.0, 8.0], 2).unwrap();

        let mut out = Vec::new();
        buf1.get_data(0, 4, &mut out).unwrap();
        assert_eq!(out, vec![1.0, 3.0, 5.0, 7.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn incompatible_rows_rejected() {
        let buf = SampleBuffer::<f32>::new(2, 15).unwrap();
        assert_eq!(
            buf.put_data(&[1.0, 2.0, 3.0], 0).unwrap_err(),
            CoreError::IncompatibleData {
                len: 3,
                n_channels: 2
            }
        );
    }

    #[test]
    fn writes_past_capacity_rejected() {
        let buf = SampleBuffer::<f32>::new(1, 4).unwrap();
        assert!(buf.put_data(&[1.0, 2.0], 3).is_err());
        assert!(buf.put_channels(&[1.0, 2.0], 3, 2).is_err());
    }

    #[test]
    fn availability_classification() {
        let buf = SampleBuffer::<f32>::new(1, 10).unwrap();
        assert_eq!(buf.check_availability(0, 10), Availability::Ready);
        assert_eq!(buf.check_availability(5, 12), Availability::Partial);
        assert_eq!(buf.check_availability(4, 4), Availability::Unavailable);
        assert_eq!(buf.check_availability(10, 12), Availability::Unavailable);
        let mut out = Vec::new();
        assert!(buf.get_data(5, 12, &mut out).is_err());
    }

    #[test]
    fn channel_major_write_round_trip() {
        let buf = SampleBuffer::<f32>::new(2, 6).unwrap();
        buf.put_channels(&[1.0, 2.0, 3.0, 10.0, 20.0, 30.0], 1, 3)
            .unwrap();
        let mut out = Vec::new();
        buf.get_data(0, 4, &mut out).unwrap();
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0, 0.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn shared_across_threads() {
        let buf = SampleBuffer::<f32>::new(1, 8).unwrap();
        let writer = buf.share();
        std::thread::spawn(move || writer.put_data(&[9.0; 8], 0).unwrap())
            .join()
            .unwrap();
        let mut out = Vec::new();
        buf.get_data(0, 8, &mut out).unwrap();
        assert!(out.iter().all(|&v| (v - 9.0).abs() < f32::EPSILON));
    }
}

//! Core data models for the image request queue

use crate::completion::AioCompletion;
use crate::error::{AioError, Result};
use bytes::Bytes;

/// Callback invoked once a write blocker or a shutdown request is satisfied
pub type Callback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Classification of a request for gating purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
    /// Flush: ordered behind every write and gated like both directions
    Both,
}

impl Direction {
    /// Whether this direction is subject to read gating
    pub fn includes_read(self) -> bool {
        matches!(self, Direction::Read | Direction::Both)
    }

    /// Whether this direction is subject to write gating
    pub fn includes_write(self) -> bool {
        matches!(self, Direction::Write | Direction::Both)
    }
}

/// A single unit of image I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRequest {
    /// Read `len` bytes starting at `offset`
    Read { offset: u64, len: u64, op_flags: u32 },
    /// Write `data` at `offset`
    Write {
        offset: u64,
        data: Bytes,
        op_flags: u32,
    },
    /// Deallocate `len` bytes starting at `offset`
    Discard { offset: u64, len: u64 },
    /// Persist every write that completed before this flush was submitted
    Flush,
}

impl ImageRequest {
    /// Get the gating direction of this request
    pub fn direction(&self) -> Direction {
        match self {
            ImageRequest::Read { .. } => Direction::Read,
            ImageRequest::Write { .. } | ImageRequest::Discard { .. } => Direction::Write,
            ImageRequest::Flush => Direction::Both,
        }
    }

    /// Whether the request counts as a write for blocking and draining
    pub fn is_write_op(&self) -> bool {
        self.direction().includes_write()
    }

    /// Whether the request modifies image data
    pub fn modifies_data(&self) -> bool {
        matches!(
            self,
            ImageRequest::Write { .. } | ImageRequest::Discard { .. }
        )
    }

    /// Short name used in log messages
    pub fn kind(&self) -> &'static str {
        match self {
            ImageRequest::Read { .. } => "read",
            ImageRequest::Write { .. } => "write",
            ImageRequest::Discard { .. } => "discard",
            ImageRequest::Flush => "flush",
        }
    }

    /// Byte extent `(offset, len)` touched by the request, if any
    pub fn extent(&self) -> Option<(u64, u64)> {
        match self {
            ImageRequest::Read { offset, len, .. } => Some((*offset, *len)),
            ImageRequest::Write { offset, data, .. } => Some((*offset, data.len() as u64)),
            ImageRequest::Discard { offset, len } => Some((*offset, *len)),
            ImageRequest::Flush => None,
        }
    }

    /// Clip the request to the image size
    ///
    /// # Returns
    /// * `Ok(ImageRequest)` shortened so it ends at or before `image_size`
    /// * `Err(AioError::InvalidArgument)` if the request starts past the end
    pub fn clip_to(self, image_size: u64) -> Result<Self> {
        let Some((offset, len)) = self.extent() else {
            return Ok(self);
        };

        if offset > image_size {
            return Err(AioError::InvalidArgument(format!(
                "{} offset {} is beyond the image size {}",
                self.kind(),
                offset,
                image_size
            )));
        }

        let clipped = len.min(image_size - offset);
        if clipped == len {
            return Ok(self);
        }

        Ok(match self {
            ImageRequest::Read {
                offset, op_flags, ..
            } => ImageRequest::Read {
                offset,
                len: clipped,
                op_flags,
            },
            ImageRequest::Write {
                offset,
                data,
                op_flags,
            } => ImageRequest::Write {
                offset,
                data: data.slice(..clipped as usize),
                op_flags,
            },
            ImageRequest::Discard { offset, .. } => ImageRequest::Discard {
                offset,
                len: clipped,
            },
            ImageRequest::Flush => ImageRequest::Flush,
        })
    }
}

/// A request accepted by the queue, carried through every gate it parks on
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub(crate) request: ImageRequest,
    pub(crate) completion: AioCompletion,
    /// Position in the write order, for requests that modify data
    pub(crate) write_seq: Option<u64>,
    /// Last write sequence a flush must wait for
    pub(crate) flush_barrier: Option<u64>,
    /// Number of refresh rounds this request has been resumed from
    pub(crate) refresh_attempts: u32,
}

impl QueuedRequest {
    pub(crate) fn new(request: ImageRequest, completion: AioCompletion) -> Self {
        QueuedRequest {
            request,
            completion,
            write_seq: None,
            flush_barrier: None,
            refresh_attempts: 0,
        }
    }

    pub(crate) fn direction(&self) -> Direction {
        self.request.direction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_derivation() {
        let read = ImageRequest::Read {
            offset: 0,
            len: 10,
            op_flags: 0,
        };
        let write = ImageRequest::Write {
            offset: 0,
            data: Bytes::from_static(b"abc"),
            op_flags: 0,
        };
        let discard = ImageRequest::Discard { offset: 0, len: 4 };

        assert_eq!(read.direction(), Direction::Read);
        assert_eq!(write.direction(), Direction::Write);
        assert_eq!(discard.direction(), Direction::Write);
        assert_eq!(ImageRequest::Flush.direction(), Direction::Both);

        assert!(!read.is_write_op());
        assert!(discard.is_write_op());
        assert!(ImageRequest::Flush.is_write_op());
        assert!(!ImageRequest::Flush.modifies_data());
    }

    #[test]
    fn test_both_includes_each_direction() {
        assert!(Direction::Both.includes_read());
        assert!(Direction::Both.includes_write());
        assert!(!Direction::Read.includes_write());
        assert!(!Direction::Write.includes_read());
    }

    #[test]
    fn test_clip_within_image_is_unchanged() {
        let read = ImageRequest::Read {
            offset: 100,
            len: 50,
            op_flags: 0,
        };
        assert_eq!(read.clone().clip_to(1024).unwrap(), read);
    }

    #[test]
    fn test_clip_shortens_past_end() {
        let write = ImageRequest::Write {
            offset: 1000,
            data: Bytes::from(vec![7u8; 100]),
            op_flags: 0,
        };
        let clipped = write.clip_to(1024).unwrap();
        assert_eq!(clipped.extent(), Some((1000, 24)));

        let discard = ImageRequest::Discard {
            offset: 1024,
            len: 8,
        };
        assert_eq!(discard.clip_to(1024).unwrap().extent(), Some((1024, 0)));
    }

    #[test]
    fn test_clip_rejects_offset_past_end() {
        let read = ImageRequest::Read {
            offset: 2048,
            len: 1,
            op_flags: 0,
        };
        let err = read.clip_to(1024).unwrap_err();
        assert!(matches!(err, AioError::InvalidArgument(_)));
    }

    #[test]
    fn test_flush_is_never_clipped() {
        assert_eq!(ImageRequest::Flush.clip_to(0).unwrap(), ImageRequest::Flush);
    }
}

//! Provides the immutable value handle which is handed out by all cache operations.
//!
//! A [ByteView](ByteView) wraps a **bytes::Bytes** buffer. Cloning a view is cheap, as only a
//! reference count is incremented, and the underlying data is never modified once the view has
//! been created. Therefore a view can be stored in a cache and handed to many callers at the same
//! time without any synchronization.
//!
//! Whenever the data leaves the view as an owned buffer (**byte_slice**, **as_string**) a copy is
//! created, so that a caller can never corrupt the cached contents.
//!
//! # Example
//!
//! ```
//! # use peercache::byteview::ByteView;
//! let view = ByteView::from("111");
//!
//! assert_eq!(view.len(), 3);
//! assert_eq!(view.as_string(), "111");
//!
//! // Modifying the copy doesn't affect the view...
//! let mut copy = view.byte_slice();
//! copy[0] = b'2';
//! assert_eq!(view.as_string(), "111");
//! ```
use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::lru::ByteSize;

/// Represents an immutable chunk of bytes stored in or fetched by a cache.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Creates a view by copying the given data.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if the view contains no data at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a copy of the underlying data.
    pub fn byte_slice(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Returns the data as string.
    ///
    /// Invalid UTF-8 sequences are replaced by the unicode replacement character.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Provides a cheap handle to the underlying buffer.
    ///
    /// As **Bytes** itself is immutable, this doesn't permit to modify the view.
    pub fn as_bytes(&self) -> Bytes {
        self.data.clone()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(data),
        }
    }
}

impl From<Bytes> for ByteView {
    fn from(data: Bytes) -> Self {
        ByteView { data }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::copy_from_slice(data.as_bytes())
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.data.len()
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl std::fmt::Debug for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteView({:?})", String::from_utf8_lossy(&self.data))
    }
}

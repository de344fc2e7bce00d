//! Buffer management.
//!
//! [`IoBuf`] is the buffer the caller exchanges with the engines: it holds
//! unread bytes behind a read cursor and refuses to grow past a capacity
//! limit, which is how an engine learns that the caller must drain output
//! before it can make progress. [`BufferPool`] and [`Buf`] are the scratch
//! buffers engines use internally for record and handshake assembly.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};

use zeroize::Zeroize;

/// Buffer pool for reusing allocated buffers.
///
/// Each engine owns one pool. Scratch buffers are taken with [`pop`](Self::pop)
/// and handed back with [`push`](Self::push) on every path, including errors.
#[derive(Default)]
pub struct BufferPool {
    free: VecDeque<Buf>,
}

impl BufferPool {
    /// Take a Buffer from the pool.
    ///
    /// Creates a new buffer if none is free.
    pub fn pop(&mut self) -> Buf {
        self.free.pop_front().unwrap_or_default()
    }

    /// Return a buffer to the pool.
    ///
    /// The contents are wiped, since scratch buffers regularly hold key material.
    pub fn push(&mut self, mut buffer: Buf) {
        buffer.0.zeroize();
        self.free.push_front(buffer);
    }

    /// Number of buffers waiting for reuse.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("free", &self.free.len())
            .finish()
    }
}

/// Growable buffer wrapper used for scratch space.
///
/// A newtype around `Vec<u8>` that supports in-place AEAD operations.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Buf(Vec<u8>);

impl Buf {
    /// Create a new empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new buffer from a slice.
    pub fn from_slice(data: &[u8]) -> Self {
        Buf(data.to_vec())
    }

    /// Clear the buffer, removing all data.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Extend the buffer with a slice of bytes.
    pub fn extend_from_slice(&mut self, other: &[u8]) {
        self.0.extend_from_slice(other);
    }

    /// Push a single byte onto the buffer.
    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    /// Resize the buffer to the specified length, filling with the given value.
    pub fn resize(&mut self, len: usize, value: u8) {
        self.0.resize(len, value);
    }

    /// Truncate the buffer to the specified length.
    /// If `len` is greater than the buffer's current length, this has no effect.
    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    /// Convert the buffer into the underlying `Vec<u8>`.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.0)
    }
}

impl Deref for Buf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<[u8]> for Buf {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for Buf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buf").field("len", &self.0.len()).finish()
    }
}

/// Temporary mutable buffer wrapper for in-place decryption.
///
/// Wraps a mutable slice and tracks how much of it is still valid after the
/// AEAD tag has been stripped.
#[allow(clippy::len_without_is_empty)]
pub struct TmpBuf<'a>(&'a mut [u8], usize);

impl<'a> TmpBuf<'a> {
    /// Create a new temporary buffer from a mutable slice.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let len = buf.len();
        Self(buf, len)
    }

    /// Get the length of the buffer
    pub fn len(&self) -> usize {
        self.1
    }

    /// Truncate the buffer to the specified length
    pub fn truncate(&mut self, len: usize) {
        self.1 = len.min(self.1);
    }
}

impl<'a> AsRef<[u8]> for TmpBuf<'a> {
    fn as_ref(&self) -> &[u8] {
        &self.0[..self.1]
    }
}

impl<'a> AsMut<[u8]> for TmpBuf<'a> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0[..self.1]
    }
}

impl<'a> aes_gcm::aead::Buffer for TmpBuf<'a> {
    fn extend_from_slice(&mut self, other: &[u8]) -> Result<(), aes_gcm::aead::Error> {
        let available = self.0.len() - self.1;
        if available < other.len() {
            return Err(aes_gcm::aead::Error);
        }
        self.0[self.1..self.1 + other.len()].copy_from_slice(other);
        self.1 += other.len();
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        if len <= self.1 {
            self.1 = len;
        }
    }
}

impl aes_gcm::aead::Buffer for Buf {
    fn extend_from_slice(&mut self, other: &[u8]) -> Result<(), aes_gcm::aead::Error> {
        self.0.extend_from_slice(other);
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

/// Transport buffer passed between the caller and an engine.
///
/// Bytes are appended at the back and consumed from the front. The buffer
/// never holds more than `capacity` unread bytes; consumed space is reclaimed
/// automatically on the next write.
///
/// ```
/// use mss::IoBuf;
///
/// let mut buf = IoBuf::with_capacity(4);
/// assert_eq!(buf.put_slice(b"hello"), 4);
/// assert_eq!(buf.readable(), b"hell");
/// buf.advance(3);
/// assert_eq!(buf.writable_bytes(), 3);
/// ```
#[derive(Clone, Default)]
pub struct IoBuf {
    data: Vec<u8>,
    pos: usize,
    capacity: usize,
}

impl IoBuf {
    /// An empty buffer that accepts up to `capacity` unread bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        IoBuf {
            data: Vec::with_capacity(capacity.min(64 * 1024)),
            pos: 0,
            capacity,
        }
    }

    /// A buffer holding `data` as unread bytes, with capacity equal to its length.
    pub fn from_slice(data: &[u8]) -> Self {
        IoBuf {
            data: data.to_vec(),
            pos: 0,
            capacity: data.len(),
        }
    }

    /// Change the capacity limit.
    ///
    /// Lowering it below the number of unread bytes does not drop any data,
    /// it only blocks further writes.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The unread bytes.
    pub fn readable(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Number of unread bytes.
    pub fn readable_bytes(&self) -> usize {
        self.data.len() - self.pos
    }

    /// How many more bytes can be written before hitting the capacity limit.
    pub fn writable_bytes(&self) -> usize {
        self.capacity.saturating_sub(self.readable_bytes())
    }

    pub fn is_empty(&self) -> bool {
        self.readable_bytes() == 0
    }

    /// Mark `n` unread bytes as consumed.
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
        if self.pos == self.data.len() {
            self.data.clear();
            self.pos = 0;
        }
    }

    /// Append as much of `src` as fits, returning the number of bytes written.
    pub fn put_slice(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.writable_bytes());
        if n == 0 {
            return 0;
        }
        self.compact();
        self.data.extend_from_slice(&src[..n]);
        n
    }

    /// Remove and return all unread bytes.
    pub fn take_readable(&mut self) -> Vec<u8> {
        let out = self.data.split_off(self.pos);
        self.data.clear();
        self.pos = 0;
        out
    }

    /// Drop all unread bytes.
    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.data.drain(..self.pos);
            self.pos = 0;
        }
    }
}

impl fmt::Debug for IoBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBuf")
            .field("readable", &self.readable_bytes())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pool_reuses_and_wipes() {
        let mut pool = BufferPool::default();
        let mut b = pool.pop();
        b.extend_from_slice(b"secret");
        pool.push(b);
        assert_eq!(pool.free_len(), 1);
        let b = pool.pop();
        assert!(b.is_empty());
        assert_eq!(pool.free_len(), 0);
    }

    #[test]
    fn io_buf_capacity_limits_writes() {
        let mut buf = IoBuf::with_capacity(8);
        assert_eq!(buf.put_slice(b"0123456789"), 8);
        assert_eq!(buf.writable_bytes(), 0);
        assert_eq!(buf.put_slice(b"x"), 0);

        buf.advance(5);
        assert_eq!(buf.readable(), b"567");
        assert_eq!(buf.writable_bytes(), 5);
        assert_eq!(buf.put_slice(b"abcde"), 5);
        assert_eq!(buf.readable(), b"567abcde");
    }

    #[test]
    fn io_buf_take_readable() {
        let mut buf = IoBuf::from_slice(b"abcdef");
        buf.advance(2);
        assert_eq!(buf.take_readable(), b"cdef".to_vec());
        assert!(buf.is_empty());
        assert_eq!(buf.writable_bytes(), 6);
    }

    #[test]
    fn tmp_buf_truncate() {
        let mut raw = [1u8, 2, 3, 4];
        let mut t = TmpBuf::new(&mut raw);
        t.truncate(2);
        assert_eq!(t.as_ref(), &[1, 2]);
        t.truncate(3);
        assert_eq!(t.len(), 2);
    }
}

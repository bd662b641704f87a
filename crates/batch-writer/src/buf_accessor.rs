//! The contiguous region behind the in-place data path.
//!
//! Packets are serialized straight into one reusable region instead of being
//! allocated one by one. The protocol layer and the in-place writers take turns
//! owning that region: [`BufAccessor::obtain`] moves it out and
//! [`BufAccessor::release`] moves it back. Lending it twice, or returning a
//! different region, is a caller bug and panics.

use std::{
    fmt,
    mem,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed-capacity byte region with a movable data window.
///
/// The layout is `[headroom | data | tailroom]`. Writers only ever grow the
/// data window at the tail; a flush either clears it or shifts the unsent
/// residue back to offset zero.
pub struct PacketBuf {
    id: u64,
    storage: Box<[u8]>,
    start: usize,
    end: usize,
}

impl PacketBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            id: NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed),
            storage: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// Stand-in left behind while a scoped guard gives the real region back.
    fn detached() -> Self {
        Self {
            id: 0,
            storage: Box::default(),
            start: 0,
            end: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Unused bytes in front of the data window.
    pub fn headroom(&self) -> usize {
        self.start
    }

    /// Unused bytes after the data window.
    pub fn tailroom(&self) -> usize {
        self.storage.len() - self.end
    }

    pub fn data(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    /// Writable space after the data window. Bytes written here become part of
    /// the data once [`PacketBuf::append`] is called.
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.end..]
    }

    /// Extend the data window over `len` bytes already written to the tail.
    pub fn append(&mut self, len: usize) {
        assert!(
            len <= self.tailroom(),
            "append of {len} bytes exceeds tailroom {}",
            self.tailroom()
        );
        self.end += len;
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        self.tail_mut()[..len].copy_from_slice(bytes);
        self.end += len;
    }

    /// Drop `len` bytes from the front of the data window, leaving headroom.
    pub fn advance(&mut self, len: usize) {
        assert!(len <= self.len(), "cannot advance past the data window");
        self.start += len;
    }

    /// Drop `len` bytes from the front and move whatever follows to offset
    /// zero, so the residue keeps the whole capacity as tailroom.
    pub fn consume_front(&mut self, len: usize) {
        assert!(len <= self.len(), "cannot consume past the data window");
        let residue = self.start + len..self.end;
        let residue_len = residue.len();
        self.storage.copy_within(residue, 0);
        self.start = 0;
        self.end = residue_len;
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("headroom", &self.headroom())
            .field("len", &self.len())
            .finish()
    }
}

/// Owner of one [`PacketBuf`] region, lending it out one borrower at a time.
pub struct BufAccessor {
    slot: Mutex<Option<PacketBuf>>,
    region_id: u64,
    capacity: usize,
}

impl BufAccessor {
    pub fn new(capacity: usize) -> Self {
        let buf = PacketBuf::with_capacity(capacity);
        Self {
            region_id: buf.id,
            capacity,
            slot: Mutex::new(Some(buf)),
        }
    }

    /// Take exclusive ownership of the region, content included.
    ///
    /// # Panics
    /// If the region is already lent out.
    pub fn obtain(&self) -> PacketBuf {
        match self.slot.lock().take() {
            Some(buf) => buf,
            None => panic!("buffer region {} is already lent out", self.region_id),
        }
    }

    /// Give the region back.
    ///
    /// # Panics
    /// If `buf` is not the region this accessor lent out, or if the accessor
    /// already holds it.
    pub fn release(&self, buf: PacketBuf) {
        assert_eq!(
            buf.id, self.region_id,
            "released buffer {} is not region {}",
            buf.id, self.region_id
        );
        let mut slot = self.slot.lock();
        assert!(slot.is_none(), "buffer region {} released twice", self.region_id);
        *slot = Some(buf);
    }

    /// True while nobody has the region checked out.
    pub fn owns_buffer(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Borrow the region for the lifetime of the returned guard.
    pub fn scoped(&self) -> ScopedBuf<'_> {
        ScopedBuf {
            buf: self.obtain(),
            accessor: self,
        }
    }

    /// Current length of the region's data window.
    pub fn length(&self) -> usize {
        self.scoped().len()
    }

    pub fn clear(&self) {
        self.scoped().clear();
    }
}

impl fmt::Debug for BufAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufAccessor")
            .field("region_id", &self.region_id)
            .field("capacity", &self.capacity)
            .field("owns_buffer", &self.owns_buffer())
            .finish()
    }
}

/// Region checked out of a [`BufAccessor`], returned when dropped.
pub struct ScopedBuf<'a> {
    buf: PacketBuf,
    accessor: &'a BufAccessor,
}

impl Deref for ScopedBuf<'_> {
    type Target = PacketBuf;

    fn deref(&self) -> &PacketBuf {
        &self.buf
    }
}

impl DerefMut for ScopedBuf<'_> {
    fn deref_mut(&mut self) -> &mut PacketBuf {
        &mut self.buf
    }
}

impl Drop for ScopedBuf<'_> {
    fn drop(&mut self) {
        let buf = mem::replace(&mut self.buf, PacketBuf::detached());
        self.accessor.release(buf);
    }
}

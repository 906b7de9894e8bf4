//! Payload store
//!
//! A growable byte region holding the plain-data part of queued tasks in FIFO
//! order. Live bytes sit between `start` and `end`; dequeued space before
//! `start` is only reclaimed when the region would otherwise have to grow.

use tracing::{debug, trace};

use super::StoreError;

/// FIFO byte store for task payloads
#[derive(Debug, Default)]
pub struct PayloadStore {
    buffer: Vec<u8>,
    start: usize,
    end: usize,
}

impl PayloadStore {
    /// Create an empty store without a backing region
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with `capacity` bytes reserved
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            start: 0,
            end: 0,
        }
    }

    /// Number of live bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether no bytes are live
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Size of the backing region in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Offset of the first live byte inside the backing region
    pub fn start(&self) -> usize {
        self.start
    }

    /// Make room for `additional` bytes after `end`.
    ///
    /// Compacts when the live bytes plus the new entry fit the current region,
    /// otherwise reallocates to at least double the capacity.
    fn reserve(&mut self, additional: usize) {
        if self.end + additional <= self.buffer.len() {
            return;
        }

        let live = self.len();
        if live + additional <= self.buffer.len() {
            self.buffer.copy_within(self.start..self.end, 0);
            trace!(
                "Compacted payload store: {} live bytes moved from offset {}",
                live,
                self.start
            );
        } else {
            let capacity = (self.buffer.len() * 2).max(live + additional);
            let mut buffer = vec![0; capacity];
            buffer[..live].copy_from_slice(&self.buffer[self.start..self.end]);
            debug!(
                "Grew payload store from {} to {} bytes",
                self.buffer.len(),
                capacity
            );
            self.buffer = buffer;
        }

        self.start = 0;
        self.end = live;
    }

    /// Consume `size` bytes from the front, resetting the cursors when empty
    fn advance(&mut self, size: usize) {
        self.start += size;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    fn check_live(&self, size: usize) -> Result<(), StoreError> {
        if self.is_empty() {
            Err(StoreError::Empty)
        } else if self.len() < size {
            Err(StoreError::Underflow {
                requested: size,
                available: self.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Append `size` bytes written by `write`.
    ///
    /// Nothing is appended if `write` fails.
    pub fn enqueue_with(
        &mut self,
        size: usize,
        write: impl FnOnce(&mut [u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.reserve(size);
        write(&mut self.buffer[self.end..self.end + size])?;
        self.end += size;
        Ok(())
    }

    /// Read and consume the first `size` bytes.
    ///
    /// The bytes are consumed before `read` runs, so the store stays aligned
    /// with the entries around it even if `read` fails or panics.
    pub fn dequeue_with<R>(
        &mut self,
        size: usize,
        read: impl FnOnce(&[u8]) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.check_live(size)?;
        let at = self.start;
        self.advance(size);
        // Consumed bytes stay untouched until the next write, which needs `&mut self`
        read(&self.buffer[at..at + size])
    }

    /// Consume the first `size` bytes without reading them
    pub fn skip(&mut self, size: usize) -> Result<(), StoreError> {
        self.check_live(size)?;
        self.advance(size);
        Ok(())
    }

    /// Insert `size` bytes at `offset` bytes past the first live byte.
    ///
    /// The entry is written into free space behind the live bytes and only
    /// rotated into place once `write` succeeds. Inserting at `len()` is the
    /// same as [`enqueue_with`](Self::enqueue_with).
    pub fn insert_with(
        &mut self,
        offset: usize,
        size: usize,
        write: impl FnOnce(&mut [u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let len = self.len();
        if offset > len {
            return Err(StoreError::OutOfRange { offset, len });
        }

        self.reserve(size);
        write(&mut self.buffer[self.end..self.end + size])?;

        let at = self.start + offset;
        self.buffer[at..self.end + size].rotate_right(size);
        self.end += size;
        Ok(())
    }

    /// Drop every live byte and reset the cursors
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(store: &mut PayloadStore, bytes: &[u8]) {
        store
            .enqueue_with(bytes.len(), |dst| {
                dst.copy_from_slice(bytes);
                Ok(())
            })
            .unwrap();
    }

    fn pop(store: &mut PayloadStore, size: usize) -> Vec<u8> {
        store.dequeue_with(size, |src| Ok(src.to_vec())).unwrap()
    }

    #[test]
    fn test_fifo_and_cursor_reset() {
        let mut store = PayloadStore::with_capacity(8);
        push(&mut store, &[1, 2]);
        push(&mut store, &[3, 4, 5]);
        assert_eq!(store.len(), 5);

        assert_eq!(pop(&mut store, 2), vec![1, 2]);
        assert_eq!(store.start(), 2);
        assert_eq!(pop(&mut store, 3), vec![3, 4, 5]);

        assert!(store.is_empty());
        assert_eq!(store.start(), 0);
    }

    #[test]
    fn test_compacts_before_growing() {
        let mut store = PayloadStore::with_capacity(4);
        push(&mut store, &[1, 2]);
        push(&mut store, &[3, 4]);
        assert_eq!(pop(&mut store, 2), vec![1, 2]);

        // Two live bytes plus two new ones fit once the dead prefix is reclaimed
        push(&mut store, &[5, 6]);
        assert_eq!(store.capacity(), 4);
        assert_eq!(store.start(), 0);
        assert_eq!(pop(&mut store, 2), vec![3, 4]);
        assert_eq!(pop(&mut store, 2), vec![5, 6]);
    }

    #[test]
    fn test_grows_to_double_or_exact_fit() {
        let mut store = PayloadStore::with_capacity(4);
        push(&mut store, &[1, 2, 3]);
        push(&mut store, &[4, 5]);
        assert_eq!(store.capacity(), 8);

        push(&mut store, &[0; 20]);
        assert_eq!(store.capacity(), 25);
        assert_eq!(pop(&mut store, 5), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_store_errors() {
        let mut store = PayloadStore::new();
        assert!(matches!(
            store.dequeue_with(1, |_| Ok(())),
            Err(StoreError::Empty)
        ));
        assert!(matches!(store.skip(1), Err(StoreError::Empty)));

        push(&mut store, &[1]);
        assert!(matches!(
            store.skip(2),
            Err(StoreError::Underflow {
                requested: 2,
                available: 1
            })
        ));
    }

    #[test]
    fn test_skip_discards_front() {
        let mut store = PayloadStore::new();
        push(&mut store, &[1, 1]);
        push(&mut store, &[2, 2]);
        store.skip(2).unwrap();
        assert_eq!(pop(&mut store, 2), vec![2, 2]);
    }

    #[test]
    fn test_insert_in_the_middle() {
        let mut store = PayloadStore::with_capacity(4);
        push(&mut store, &[9]);
        push(&mut store, &[1, 2]);
        push(&mut store, &[5, 6]);
        store.skip(1).unwrap();

        store
            .insert_with(2, 2, |dst| {
                dst.copy_from_slice(&[3, 4]);
                Ok(())
            })
            .unwrap();

        assert_eq!(pop(&mut store, 6), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_insert_at_end_matches_enqueue() {
        let mut store = PayloadStore::new();
        push(&mut store, &[1]);
        store
            .insert_with(1, 1, |dst| {
                dst[0] = 2;
                Ok(())
            })
            .unwrap();
        assert_eq!(pop(&mut store, 2), vec![1, 2]);

        assert!(matches!(
            store.insert_with(1, 1, |_| Ok(())),
            Err(StoreError::OutOfRange { offset: 1, len: 0 })
        ));
    }

    #[test]
    fn test_failed_write_appends_nothing() {
        let mut store = PayloadStore::new();
        push(&mut store, &[1, 2]);
        let result = store.insert_with(0, 1, |_| Err(StoreError::Empty));
        assert!(result.is_err());
        assert!(store.enqueue_with(3, |_| Err(StoreError::Empty)).is_err());
        assert_eq!(pop(&mut store, 2), vec![1, 2]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_panicking_reader_still_consumes() {
        let mut store = PayloadStore::new();
        push(&mut store, &[1, 1]);
        push(&mut store, &[2, 2]);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.dequeue_with(2, |_| -> Result<(), StoreError> { panic!("bad read") })
        }));
        assert!(result.is_err());
        assert_eq!(store.len(), 2);
        assert_eq!(pop(&mut store, 2), vec![2, 2]);
    }

    #[test]
    fn test_panicking_insert_keeps_live_bytes() {
        let mut store = PayloadStore::new();
        push(&mut store, &[1, 2]);
        push(&mut store, &[5, 6]);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.insert_with(2, 2, |dst| {
                dst[0] = 9;
                panic!("bad write")
            })
        }));
        assert!(result.is_err());
        assert_eq!(pop(&mut store, 4), vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_clear_resets() {
        let mut store = PayloadStore::with_capacity(4);
        push(&mut store, &[1, 2, 3]);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.start(), 0);
        assert_eq!(store.capacity(), 4);
    }
}

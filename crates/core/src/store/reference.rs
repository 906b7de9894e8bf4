//! Reference store
//!
//! The counterpart of the payload store for owned references. Slots follow
//! the same start/end/compaction discipline, and every slot outside the live
//! window is kept empty: a consumed or skipped reference is released at once
//! instead of lingering until the slot is overwritten.

use tracing::{debug, trace};

use super::StoreError;
use crate::data::{RefReader, RefSlot, RefWriter};

/// FIFO store of reference slots
#[derive(Default)]
pub struct ReferenceStore {
    slots: Vec<RefSlot>,
    start: usize,
    end: usize,
}

impl std::fmt::Debug for ReferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceStore")
            .field("capacity", &self.slots.len())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

impl ReferenceStore {
    /// Create an empty store without any slots
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with `capacity` slots reserved
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            start: 0,
            end: 0,
        }
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether no slots are live
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Index of the first live slot
    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of slots currently holding a reference
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn reserve(&mut self, additional: usize) {
        if self.end + additional <= self.slots.len() {
            return;
        }

        let live = self.len();
        if live + additional <= self.slots.len() {
            // Slots before `start` are all empty, so rotating moves them behind the live window
            self.slots[..self.end].rotate_left(self.start);
            trace!(
                "Compacted reference store: {} live slots moved from index {}",
                live,
                self.start
            );
        } else {
            let capacity = (self.slots.len() * 2).max(live + additional);
            let mut slots = Vec::with_capacity(capacity);
            slots.extend(self.slots[self.start..self.end].iter_mut().map(Option::take));
            slots.resize_with(capacity, || None);
            debug!(
                "Grew reference store from {} to {} slots",
                self.slots.len(),
                capacity
            );
            self.slots = slots;
        }

        self.start = 0;
        self.end = live;
    }

    fn advance(&mut self, count: usize) {
        self.start += count;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    fn check_live(&self, count: usize) -> Result<(), StoreError> {
        if self.is_empty() {
            Err(StoreError::Empty)
        } else if self.len() < count {
            Err(StoreError::Underflow {
                requested: count,
                available: self.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Fill `window` through `write`, checking the writer used every slot.
    ///
    /// On failure or unwind the window is left empty.
    fn write_window(
        window: &mut [RefSlot],
        write: impl FnOnce(&mut RefWriter<'_>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut guard = WindowGuard::new(window);
        let mut writer = RefWriter::new(guard.slots());
        write(&mut writer)?;
        writer.finish()?;
        guard.disarm();
        Ok(())
    }

    /// Append `count` slots filled by `write`.
    ///
    /// Nothing is appended if `write` fails or fills a different number of slots.
    pub fn enqueue_with(
        &mut self,
        count: usize,
        write: impl FnOnce(&mut RefWriter<'_>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.reserve(count);
        Self::write_window(&mut self.slots[self.end..self.end + count], write)?;
        self.end += count;
        Ok(())
    }

    /// Take and consume the first `count` slots.
    ///
    /// The slots are consumed before `read` runs, and whatever `read` leaves
    /// behind is released afterwards, even if it fails or panics.
    pub fn dequeue_with<R>(
        &mut self,
        count: usize,
        read: impl FnOnce(&mut RefReader<'_>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.check_live(count)?;
        let at = self.start;
        self.advance(count);

        let mut guard = WindowGuard::new(&mut self.slots[at..at + count]);
        let result = read(&mut RefReader::new(guard.slots()));
        result
    }

    /// Release and consume the first `count` slots
    pub fn skip(&mut self, count: usize) -> Result<(), StoreError> {
        self.check_live(count)?;
        self.slots[self.start..self.start + count]
            .iter_mut()
            .for_each(|slot| *slot = None);
        self.advance(count);
        Ok(())
    }

    /// Insert `count` slots at `offset` slots past the first live one.
    ///
    /// The entry is written into the empty slots behind the live window and
    /// only rotated into place once `write` succeeds. Inserting at `len()` is
    /// the same as [`enqueue_with`](Self::enqueue_with).
    pub fn insert_with(
        &mut self,
        offset: usize,
        count: usize,
        write: impl FnOnce(&mut RefWriter<'_>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let len = self.len();
        if offset > len {
            return Err(StoreError::OutOfRange { offset, len });
        }

        self.reserve(count);
        Self::write_window(&mut self.slots[self.end..self.end + count], write)?;

        let at = self.start + offset;
        self.slots[at..self.end + count].rotate_right(count);
        self.end += count;
        Ok(())
    }

    /// Release every live reference and reset the cursors
    pub fn clear(&mut self) {
        self.slots[self.start..self.end]
            .iter_mut()
            .for_each(|slot| *slot = None);
        self.start = 0;
        self.end = 0;
    }
}

/// Empties a slot window on drop unless disarmed
struct WindowGuard<'a> {
    slots: &'a mut [RefSlot],
    armed: bool,
}

impl<'a> WindowGuard<'a> {
    fn new(slots: &'a mut [RefSlot]) -> Self {
        Self { slots, armed: true }
    }

    fn slots(&mut self) -> &mut [RefSlot] {
        &mut *self.slots
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WindowGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slots.iter_mut().for_each(|slot| *slot = None);
        }
    }
}

//! Task storage
//!
//! Queued tasks are split across two FIFO stores that stay aligned by
//! enqueue order:
//! - [`PayloadStore`] - the plain-data bytes of each task
//! - [`ReferenceStore`] - the owned references of each task
//!
//! Neither store records where an entry begins; positions are recovered by
//! replaying the same sizes in the same order on the way out.

mod payload;
mod reference;

pub use payload::PayloadStore;
pub use reference::ReferenceStore;

use crate::data::{DataError, RefReader, RefSlot, RefWriter, TaskData};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Dequeue or skip on a store with no live data
    #[error("Store is empty")]
    Empty,

    /// Fewer live units than the entry requires
    #[error("Requested {requested} units but only {available} are live")]
    Underflow { requested: usize, available: usize },

    /// Insert offset beyond the live data
    #[error("Insert offset {offset} is past the live length {len}")]
    OutOfRange { offset: usize, len: usize },

    /// The stores were accessed after the queue lock was given up
    #[error("Stores accessed after the queue lock was released")]
    Released,

    /// The payload could not be written or rebuilt
    #[error(transparent)]
    Data(#[from] DataError),
}

/// The payload and reference stores of one queue
#[derive(Debug, Default)]
pub struct TaskStores {
    pub payload: PayloadStore,
    pub references: ReferenceStore,
}

impl TaskStores {
    /// Create empty stores
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty stores with reserved capacity
    pub fn with_capacity(payload_bytes: usize, reference_slots: usize) -> Self {
        Self {
            payload: PayloadStore::with_capacity(payload_bytes),
            references: ReferenceStore::with_capacity(reference_slots),
        }
    }

    /// Whether both stores are empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty() && self.references.is_empty()
    }

    /// Append a value at the back of both stores.
    ///
    /// A store is only touched if the type has something to put in it.
    pub fn enqueue<T: TaskData>(&mut self, value: T) -> Result<(), StoreError> {
        let Self {
            payload,
            references,
        } = self;

        let write = move |bytes: &mut [u8]| -> Result<(), StoreError> {
            if T::REFERENCES == 0 {
                write_without_references(value, bytes)
            } else {
                references.enqueue_with(T::REFERENCES, move |refs| {
                    value.serialize(bytes, refs);
                    Ok(())
                })
            }
        };

        if T::SIZE == 0 {
            write(&mut [])
        } else {
            payload.enqueue_with(T::SIZE, write)
        }
    }

    /// Insert a value at the given offsets into the live data of each store.
    ///
    /// Offsets are relative to the first live byte/slot and must fall on entry
    /// boundaries; inserting at each store's `len()` is the same as
    /// [`enqueue`](Self::enqueue).
    pub fn insert<T: TaskData>(
        &mut self,
        payload_offset: usize,
        reference_offset: usize,
        value: T,
    ) -> Result<(), StoreError> {
        let Self {
            payload,
            references,
        } = self;

        let write = move |bytes: &mut [u8]| -> Result<(), StoreError> {
            if T::REFERENCES == 0 {
                write_without_references(value, bytes)
            } else {
                references.insert_with(reference_offset, T::REFERENCES, move |refs| {
                    value.serialize(bytes, refs);
                    Ok(())
                })
            }
        };

        if T::SIZE == 0 {
            write(&mut [])
        } else {
            payload.insert_with(payload_offset, T::SIZE, write)
        }
    }

    /// Remove and rebuild the value at the front of both stores
    pub fn dequeue<T: TaskData>(&mut self) -> Result<T, StoreError> {
        let Self {
            payload,
            references,
        } = self;

        let mut read = |bytes: &[u8]| -> Result<T, StoreError> {
            if T::REFERENCES == 0 {
                let mut empty: [RefSlot; 0] = [];
                Ok(T::deserialize(bytes, &mut RefReader::new(&mut empty))?)
            } else {
                references.dequeue_with(T::REFERENCES, |refs| Ok(T::deserialize(bytes, refs)?))
            }
        };

        if T::SIZE == 0 {
            read(&[])
        } else {
            payload.dequeue_with(T::SIZE, read)
        }
    }

    /// Discard an entry of `size` bytes and `references` slots unread
    pub fn skip(&mut self, size: usize, references: usize) -> Result<(), StoreError> {
        if size > 0 {
            self.payload.skip(size)?;
        }
        if references > 0 {
            self.references.skip(references)?;
        }
        Ok(())
    }

    /// Empty both stores, releasing every held reference
    pub fn clear(&mut self) {
        self.payload.clear();
        self.references.clear();
    }
}

fn write_without_references<T: TaskData>(value: T, bytes: &mut [u8]) -> Result<(), StoreError> {
    let mut empty: [RefSlot; 0] = [];
    let mut writer = RefWriter::new(&mut empty);
    value.serialize(bytes, &mut writer);
    writer.finish()?;
    Ok(())
}

/// Access to the stores for a single dequeue.
///
/// The queue hands tasks an access backed by its lock guard; once the task's
/// data has been rebuilt, [`release`](DataAccess::release) gives the lock up
/// before the task body runs.
pub trait DataAccess {
    /// The stores, or [`StoreError::Released`] after `release`
    fn stores(&mut self) -> Result<&mut TaskStores, StoreError>;

    /// Give up access; further `stores` calls fail
    fn release(&mut self);
}

impl DataAccess for TaskStores {
    fn stores(&mut self) -> Result<&mut TaskStores, StoreError> {
        Ok(self)
    }

    fn release(&mut self) {}
}

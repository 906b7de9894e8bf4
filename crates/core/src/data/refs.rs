//! Reference slot writer and reader
//!
//! Task payloads keep plain data and owned references apart. The plain part is
//! copied into the payload bytes, the references are moved into slots of the
//! reference store through a [`RefWriter`] and moved back out through a
//! [`RefReader`].

use std::any::{type_name, Any};
use std::sync::Arc;

use super::DataError;

/// A strong, type-erased reference held by a reference slot
pub type Reference = Arc<dyn Any + Send + Sync>;

/// A reference slot; `None` once consumed or when the field was absent
pub type RefSlot = Option<Reference>;

/// Writes references into a fixed window of reference slots.
///
/// The writer counts every slot it is asked to fill, including slots beyond
/// its window, so the store can verify that a serializer wrote exactly as many
/// references as it declared.
pub struct RefWriter<'a> {
    slots: &'a mut [RefSlot],
    written: usize,
}

impl<'a> RefWriter<'a> {
    pub(crate) fn new(slots: &'a mut [RefSlot]) -> Self {
        Self { slots, written: 0 }
    }

    /// Move a reference into the next slot
    pub fn push<T: Any + Send + Sync>(&mut self, value: Arc<T>) {
        self.push_slot(Some(value as Reference));
    }

    /// Move an optional reference into the next slot
    pub fn push_optional<T: Any + Send + Sync>(&mut self, value: Option<Arc<T>>) {
        self.push_slot(value.map(|v| v as Reference));
    }

    /// Move an already erased reference into the next slot
    pub fn push_slot(&mut self, slot: RefSlot) {
        if let Some(target) = self.slots.get_mut(self.written) {
            *target = slot;
        }
        self.written += 1;
    }

    /// Number of slots written so far
    pub fn written(&self) -> usize {
        self.written
    }

    /// Verify that exactly the window was filled
    pub(crate) fn finish(self) -> Result<(), DataError> {
        if self.written == self.slots.len() {
            Ok(())
        } else {
            let expected = self.slots.len();
            let actual = self.written;
            for slot in self.slots.iter_mut() {
                *slot = None;
            }
            Err(DataError::ReferenceCount { expected, actual })
        }
    }
}

/// Reads references back out of a fixed window of reference slots.
///
/// Every read takes the reference out of its slot, leaving the slot empty.
pub struct RefReader<'a> {
    slots: &'a mut [RefSlot],
    read: usize,
}

impl<'a> RefReader<'a> {
    pub(crate) fn new(slots: &'a mut [RefSlot]) -> Self {
        Self { slots, read: 0 }
    }

    /// Take the next slot as-is
    pub fn take_slot(&mut self) -> Result<RefSlot, DataError> {
        let index = self.read;
        let expected = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(DataError::ReferenceCount {
                expected,
                actual: index + 1,
            })?;
        self.read += 1;
        Ok(slot.take())
    }

    /// Take the next slot, which must hold an `Arc<T>`
    pub fn take<T: Any + Send + Sync>(&mut self) -> Result<Arc<T>, DataError> {
        let index = self.read;
        self.take_optional::<T>()?
            .ok_or(DataError::MissingReference { index })
    }

    /// Take the next slot, which must be empty or hold an `Arc<T>`
    pub fn take_optional<T: Any + Send + Sync>(&mut self) -> Result<Option<Arc<T>>, DataError> {
        let index = self.read;
        match self.take_slot()? {
            None => Ok(None),
            Some(reference) => reference
                .downcast::<T>()
                .map(Some)
                .map_err(|_| DataError::ReferenceType {
                    index,
                    expected: type_name::<T>(),
                }),
        }
    }

    /// Number of slots read so far
    pub fn read(&self) -> usize {
        self.read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_counts_overflow() {
        let mut slots: Vec<RefSlot> = vec![None];
        let mut writer = RefWriter::new(&mut slots);
        writer.push(Arc::new(1u32));
        writer.push(Arc::new(2u32));
        assert_eq!(writer.written(), 2);
        assert!(matches!(
            writer.finish(),
            Err(DataError::ReferenceCount {
                expected: 1,
                actual: 2
            })
        ));
        assert!(slots[0].is_none());
    }

    #[test]
    fn test_reader_takes_and_clears() {
        let value = Arc::new(String::from("payload"));
        let mut slots: Vec<RefSlot> = vec![Some(value.clone() as Reference), None];

        let mut reader = RefReader::new(&mut slots);
        let taken = reader.take::<String>().unwrap();
        assert!(Arc::ptr_eq(&taken, &value));
        assert!(reader.take_optional::<String>().unwrap().is_none());
        assert!(slots.iter().all(Option::is_none));
    }

    #[test]
    fn test_reader_type_mismatch() {
        let mut slots: Vec<RefSlot> = vec![Some(Arc::new(5u64) as Reference)];
        let mut reader = RefReader::new(&mut slots);
        assert!(matches!(
            reader.take::<String>(),
            Err(DataError::ReferenceType { index: 0, .. })
        ));
    }
}

//! Task payload serialization
//!
//! Every task type stored in a queue implements [`TaskData`]: a fixed-size
//! plain-data part copied into payload bytes, and a fixed number of owned
//! references moved into reference slots. Both sizes are associated constants,
//! so they are known once per type and never measured per instance.
//!
//! Implementations are provided for primitives, arrays, tuples, `Arc<T>` and
//! `Option<Arc<T>>`. Structs derive it:
//!
//! ```ignore
//! use std::sync::Arc;
//! use tasq_core::TaskData;
//!
//! #[derive(TaskData)]
//! struct Upload {
//!     frame: u64,
//!     bounds: [f32; 4],
//!     mesh: Arc<Mesh>,
//! }
//!
//! assert_eq!(Upload::SIZE, 8 + 16);
//! assert_eq!(Upload::REFERENCES, 1);
//! ```

mod refs;

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

pub use refs::{RefReader, RefSlot, RefWriter, Reference};

/// Errors raised while moving a payload in or out of the stores
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// A reference slot that must hold a value was empty
    #[error("Reference slot {index} is empty")]
    MissingReference { index: usize },

    /// A reference slot held a value of another type
    #[error("Reference slot {index} does not hold a `{expected}`")]
    ReferenceType { index: usize, expected: &'static str },

    /// A serializer used a different number of slots than it declared
    #[error("Expected {expected} reference slots, {actual} were used")]
    ReferenceCount { expected: usize, actual: usize },

    /// Fewer payload bytes were available than the type requires
    #[error("Payload holds {actual} bytes, {expected} required")]
    Truncated { expected: usize, actual: usize },

    /// A stored `char` was not a valid scalar value
    #[error("Invalid char value: {0:#x}")]
    InvalidChar(u32),
}

/// Per-type serializer for task payloads.
///
/// `serialize` must write exactly [`SIZE`](TaskData::SIZE) bytes and exactly
/// [`REFERENCES`](TaskData::REFERENCES) reference slots; `deserialize` must
/// read back the same layout.
pub trait TaskData: Sized {
    /// Size of the plain-data part in bytes
    const SIZE: usize;

    /// Number of reference slots
    const REFERENCES: usize;

    /// Move `self` into `bytes` (exactly `SIZE` long) and `refs`
    fn serialize(self, bytes: &mut [u8], refs: &mut RefWriter<'_>);

    /// Rebuild a value from `bytes` (exactly `SIZE` long) and `refs`
    fn deserialize(bytes: &[u8], refs: &mut RefReader<'_>) -> Result<Self, DataError>;
}

/// Borrow the first `len` bytes of a payload window, or report truncation
#[inline]
pub fn payload_bytes(bytes: &[u8], len: usize) -> Result<&[u8], DataError> {
    bytes.get(..len).ok_or(DataError::Truncated {
        expected: len,
        actual: bytes.len(),
    })
}

macro_rules! impl_plain {
    ($($ty:ty),* $(,)?) => {$(
        impl TaskData for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();
            const REFERENCES: usize = 0;

            #[inline]
            fn serialize(self, bytes: &mut [u8], _refs: &mut RefWriter<'_>) {
                bytes[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
            }

            #[inline]
            fn deserialize(bytes: &[u8], _refs: &mut RefReader<'_>) -> Result<Self, DataError> {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(payload_bytes(bytes, Self::SIZE)?);
                Ok(<$ty>::from_ne_bytes(raw))
            }
        }
    )*};
}

impl_plain!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl TaskData for bool {
    const SIZE: usize = 1;
    const REFERENCES: usize = 0;

    #[inline]
    fn serialize(self, bytes: &mut [u8], _refs: &mut RefWriter<'_>) {
        bytes[0] = self as u8;
    }

    #[inline]
    fn deserialize(bytes: &[u8], _refs: &mut RefReader<'_>) -> Result<Self, DataError> {
        Ok(payload_bytes(bytes, 1)?[0] != 0)
    }
}

impl TaskData for char {
    const SIZE: usize = 4;
    const REFERENCES: usize = 0;

    #[inline]
    fn serialize(self, bytes: &mut [u8], refs: &mut RefWriter<'_>) {
        (self as u32).serialize(bytes, refs);
    }

    #[inline]
    fn deserialize(bytes: &[u8], refs: &mut RefReader<'_>) -> Result<Self, DataError> {
        let raw = u32::deserialize(bytes, refs)?;
        char::from_u32(raw).ok_or(DataError::InvalidChar(raw))
    }
}

impl TaskData for () {
    const SIZE: usize = 0;
    const REFERENCES: usize = 0;

    #[inline]
    fn serialize(self, _bytes: &mut [u8], _refs: &mut RefWriter<'_>) {}

    #[inline]
    fn deserialize(_bytes: &[u8], _refs: &mut RefReader<'_>) -> Result<Self, DataError> {
        Ok(())
    }
}

impl<T: ?Sized> TaskData for PhantomData<T> {
    const SIZE: usize = 0;
    const REFERENCES: usize = 0;

    #[inline]
    fn serialize(self, _bytes: &mut [u8], _refs: &mut RefWriter<'_>) {}

    #[inline]
    fn deserialize(_bytes: &[u8], _refs: &mut RefReader<'_>) -> Result<Self, DataError> {
        Ok(PhantomData)
    }
}

impl<T: Any + Send + Sync> TaskData for Arc<T> {
    const SIZE: usize = 0;
    const REFERENCES: usize = 1;

    #[inline]
    fn serialize(self, _bytes: &mut [u8], refs: &mut RefWriter<'_>) {
        refs.push(self);
    }

    #[inline]
    fn deserialize(_bytes: &[u8], refs: &mut RefReader<'_>) -> Result<Self, DataError> {
        refs.take::<T>()
    }
}

impl<T: Any + Send + Sync> TaskData for Option<Arc<T>> {
    const SIZE: usize = 0;
    const REFERENCES: usize = 1;

    #[inline]
    fn serialize(self, _bytes: &mut [u8], refs: &mut RefWriter<'_>) {
        refs.push_optional(self);
    }

    #[inline]
    fn deserialize(_bytes: &[u8], refs: &mut RefReader<'_>) -> Result<Self, DataError> {
        refs.take_optional::<T>()
    }
}

impl<T: TaskData, const N: usize> TaskData for [T; N] {
    const SIZE: usize = T::SIZE * N;
    const REFERENCES: usize = T::REFERENCES * N;

    fn serialize(self, bytes: &mut [u8], refs: &mut RefWriter<'_>) {
        let mut offset = 0;
        for item in self {
            item.serialize(&mut bytes[offset..offset + T::SIZE], refs);
            offset += T::SIZE;
        }
    }

    fn deserialize(bytes: &[u8], refs: &mut RefReader<'_>) -> Result<Self, DataError> {
        let bytes = payload_bytes(bytes, Self::SIZE)?;
        let mut offset = 0;
        let mut failure = None;
        let items: [Option<T>; N] = std::array::from_fn(|_| {
            if failure.is_some() {
                return None;
            }
            match T::deserialize(&bytes[offset..offset + T::SIZE], refs) {
                Ok(item) => {
                    offset += T::SIZE;
                    Some(item)
                }
                Err(e) => {
                    failure = Some(e);
                    None
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(items.map(|item| item.unwrap_or_else(|| unreachable!("array element left unread")))),
        }
    }
}

macro_rules! impl_tuple {
    ($($name:ident $var:ident),+) => {
        impl<$($name: TaskData),+> TaskData for ($($name,)+) {
            const SIZE: usize = 0 $(+ $name::SIZE)+;
            const REFERENCES: usize = 0 $(+ $name::REFERENCES)+;

            #[allow(unused_assignments)]
            fn serialize(self, bytes: &mut [u8], refs: &mut RefWriter<'_>) {
                let ($($var,)+) = self;
                let mut offset = 0;
                $(
                    $var.serialize(&mut bytes[offset..offset + $name::SIZE], refs);
                    offset += $name::SIZE;
                )+
            }

            #[allow(unused_assignments)]
            fn deserialize(bytes: &[u8], refs: &mut RefReader<'_>) -> Result<Self, DataError> {
                let bytes = payload_bytes(bytes, Self::SIZE)?;
                let mut offset = 0;
                $(
                    let $var = $name::deserialize(&bytes[offset..offset + $name::SIZE], refs)?;
                    offset += $name::SIZE;
                )+
                Ok(($($var,)+))
            }
        }
    };
}

impl_tuple!(A a);
impl_tuple!(A a, B b);
impl_tuple!(A a, B b, C c);
impl_tuple!(A a, B b, C c, D d);
impl_tuple!(A a, B b, C c, D d, E e);
impl_tuple!(A a, B b, C c, D d, E e, F f);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskData;
    use parking_lot::Mutex;

    fn round_trip<T: TaskData>(value: T) -> T {
        let mut bytes = vec![0u8; T::SIZE];
        let mut slots: Vec<RefSlot> = (0..T::REFERENCES).map(|_| None).collect();

        let mut writer = RefWriter::new(&mut slots);
        value.serialize(&mut bytes, &mut writer);
        writer.finish().unwrap();

        let mut reader = RefReader::new(&mut slots);
        let value = T::deserialize(&bytes, &mut reader).unwrap();
        assert_eq!(reader.read(), T::REFERENCES);
        assert!(slots.iter().all(Option::is_none));
        value
    }

    #[derive(TaskData)]
    struct Transform {
        entity: u32,
        position: [f32; 3],
        visible: bool,
        label: Arc<String>,
        parent: Option<Arc<Mutex<u32>>>,
    }

    #[derive(TaskData)]
    struct Pair(u16, Arc<Vec<u8>>);

    #[derive(TaskData)]
    struct Tick;

    #[derive(TaskData)]
    struct Wrapper<T> {
        inner: T,
        sequence: u64,
    }

    #[derive(TaskData)]
    struct Cached {
        key: u32,
        #[task_data(skip)]
        scratch: Vec<u8>,
    }

    #[test]
    fn test_sizes_are_summed() {
        assert_eq!(Transform::SIZE, 4 + 12 + 1);
        assert_eq!(Transform::REFERENCES, 2);
        assert_eq!(Pair::SIZE, 2);
        assert_eq!(Pair::REFERENCES, 1);
        assert_eq!(Tick::SIZE, 0);
        assert_eq!(Tick::REFERENCES, 0);
        assert_eq!(<Wrapper<Pair>>::SIZE, 2 + 8);
        assert_eq!(<Wrapper<Pair>>::REFERENCES, 1);
        assert_eq!(Cached::SIZE, 4);
        assert_eq!(<(u8, Arc<u8>, [u16; 2])>::SIZE, 5);
        assert_eq!(<(u8, Arc<u8>, [u16; 2])>::REFERENCES, 1);
    }

    #[test]
    fn test_struct_round_trip_preserves_identity() {
        let label = Arc::new(String::from("camera"));
        let parent = Arc::new(Mutex::new(7));

        let value = round_trip(Transform {
            entity: 42,
            position: [1.0, -2.5, 3.25],
            visible: true,
            label: label.clone(),
            parent: Some(parent.clone()),
        });

        assert_eq!(value.entity, 42);
        assert_eq!(value.position, [1.0, -2.5, 3.25]);
        assert!(value.visible);
        assert!(Arc::ptr_eq(&value.label, &label));
        assert!(Arc::ptr_eq(value.parent.as_ref().unwrap(), &parent));
    }

    #[test]
    fn test_absent_optional_reference() {
        let value = round_trip(Transform {
            entity: 1,
            position: [0.0; 3],
            visible: false,
            label: Arc::new(String::new()),
            parent: None,
        });
        assert!(value.parent.is_none());
    }

    #[test]
    fn test_generic_and_tuple_structs() {
        let bytes = Arc::new(vec![1u8, 2, 3]);
        let value = round_trip(Wrapper {
            inner: Pair(9, bytes.clone()),
            sequence: u64::MAX,
        });
        assert_eq!(value.inner.0, 9);
        assert!(Arc::ptr_eq(&value.inner.1, &bytes));
        assert_eq!(value.sequence, u64::MAX);

        let Tick = round_trip(Tick);
    }

    #[test]
    fn test_skipped_field_is_defaulted() {
        let value = round_trip(Cached {
            key: 3,
            scratch: vec![1, 2, 3],
        });
        assert_eq!(value.key, 3);
        assert!(value.scratch.is_empty());
    }

    #[test]
    fn test_primitives() {
        assert_eq!(round_trip('λ'), 'λ');
        assert_eq!(round_trip(-17i64), -17);
        assert_eq!(round_trip(u128::MAX), u128::MAX);
        assert_eq!(round_trip((1u8, 2.5f64, false)), (1, 2.5, false));
        assert_eq!(round_trip([[1u16, 2], [3, 4]]), [[1, 2], [3, 4]]);
    }

    #[test]
    fn test_invalid_char_rejected() {
        let bytes = 0xD800u32.to_ne_bytes();
        let mut slots: Vec<RefSlot> = Vec::new();
        let mut reader = RefReader::new(&mut slots);
        assert!(matches!(
            char::deserialize(&bytes, &mut reader),
            Err(DataError::InvalidChar(0xD800))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut slots: Vec<RefSlot> = Vec::new();
        let mut reader = RefReader::new(&mut slots);
        assert!(matches!(
            u64::deserialize(&[0u8; 4], &mut reader),
            Err(DataError::Truncated {
                expected: 8,
                actual: 4
            })
        ));
    }
}

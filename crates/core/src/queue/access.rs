//! Store access backed by the queue lock

use parking_lot::MutexGuard;

use super::QueueState;
use crate::store::{DataAccess, StoreError, TaskStores};

/// Holds the queue lock from pop through deserialize; `release` drops it
pub(super) struct LockedStores<'a> {
    guard: Option<MutexGuard<'a, QueueState>>,
}

impl<'a> LockedStores<'a> {
    pub(super) fn new(guard: MutexGuard<'a, QueueState>) -> Self {
        Self { guard: Some(guard) }
    }

    pub(super) fn is_released(&self) -> bool {
        self.guard.is_none()
    }
}

impl DataAccess for LockedStores<'_> {
    fn stores(&mut self) -> Result<&mut TaskStores, StoreError> {
        match self.guard.as_mut() {
            Some(state) => Ok(&mut state.stores),
            None => Err(StoreError::Released),
        }
    }

    fn release(&mut self) {
        self.guard = None;
    }
}

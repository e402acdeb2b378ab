use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// RAII guard that releases an engine slot when dropped.
///
/// Callers must hold this until the corresponding submission has reached a
/// terminal outcome.
pub struct Permit {
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish()
    }
}

/// Bounds the number of engine submissions in flight.
///
/// The scheduler runs with [`AdmissionGate::single`], so at most one job is
/// ever outstanding against the engine. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    /// A gate with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// A gate that admits exactly one submission at a time.
    pub fn single() -> Self {
        Self::new(1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot.
    ///
    /// The semaphore is never closed, so this only returns `None` if that
    /// invariant is broken.
    pub async fn acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .ok()
            .map(|permit| Permit { permit })
    }

    /// Take a slot if one is free, without waiting.
    pub fn try_acquire(&self) -> Option<Permit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(Permit { permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::single()
    }
}

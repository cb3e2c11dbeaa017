//! Bounding the number of concurrent downloads from the origin.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// The deadline passed before the operation could complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

impl DeadlineExceeded {
    /// Fails if `deadline` has already passed.
    pub fn check(deadline: Instant) -> Result<(), Self> {
        if Instant::now() >= deadline {
            Err(DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// A fixed-capacity pool of download permits.
///
/// At most `capacity` [`AdmissionTicket`]s exist at any point in time. Waiters are not
/// guaranteed to be served in arrival order.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    /// Creates a gate handing out at most `capacity` tickets.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or larger than [`Semaphore::MAX_PERMITS`].
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "admission gate needs at least one permit");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a ticket until `deadline`.
    ///
    /// The ticket is returned to the pool when it is dropped. No ticket is handed out once the
    /// deadline has passed, even if one is available.
    pub async fn acquire(&self, deadline: Instant) -> Result<AdmissionTicket, DeadlineExceeded> {
        if let Err(err) = DeadlineExceeded::check(deadline) {
            metric!(counter("admission.timeout") += 1);
            return Err(err);
        }

        let semaphore = Arc::clone(&self.semaphore);
        match tokio::time::timeout_at(deadline, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => {
                metric!(gauge("admission.available") = self.available() as u64);
                Ok(AdmissionTicket { _permit: permit })
            }
            // The semaphore is owned by the gate and never closed.
            Ok(Err(_closed)) => unreachable!("admission semaphore closed"),
            Err(_elapsed) => {
                metric!(counter("admission.timeout") += 1);
                Err(DeadlineExceeded)
            }
        }
    }

    /// The number of tickets that can currently be handed out without waiting.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Permission to run one download.
///
/// Dropping the ticket releases it, which also happens when the holding future is
/// cancelled or unwinds.
#[derive(Debug)]
pub struct AdmissionTicket {
    _permit: OwnedSemaphorePermit,
}

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Ordered set of RPC endpoints: index 0 is the primary, the rest are
/// backups tried in order. Only one endpoint is active at a time.
///
/// The active index lives in an atomic so that retried calls holding a
/// shared reference can fail over.
pub struct EndpointPool<E> {
    endpoints: Vec<E>,
    labels: Vec<String>,
    active: AtomicUsize,
}

impl<E> EndpointPool<E> {
    /// Builds a pool from `(label, endpoint)` pairs. Returns `None` when the
    /// list is empty, since a pool always has an active endpoint.
    pub fn new(endpoints: Vec<(String, E)>) -> Option<Self> {
        if endpoints.is_empty() {
            return None;
        }
        let (labels, endpoints) = endpoints.into_iter().unzip();
        Some(Self {
            endpoints,
            labels,
            active: AtomicUsize::new(0),
        })
    }

    pub fn current(&self) -> &E {
        &self.endpoints[self.active_index()]
    }

    pub fn current_label(&self) -> &str {
        &self.labels[self.active_index()]
    }

    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire).min(self.endpoints.len() - 1)
    }

    pub fn primary(&self) -> &E {
        &self.endpoints[0]
    }

    pub fn primary_label(&self) -> &str {
        &self.labels[0]
    }

    pub fn is_on_primary(&self) -> bool {
        self.active_index() == 0
    }

    pub fn backups_remaining(&self) -> usize {
        self.endpoints.len() - 1 - self.active_index()
    }

    /// Makes the next backup active. Returns `false` once every backup has
    /// been used; the pool never wraps back to an endpoint it left.
    pub fn failover(&self) -> bool {
        let last = self.endpoints.len() - 1;
        let switched = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < last).then_some(current + 1)
            });

        match switched {
            Ok(previous) => {
                warn!(
                    from = %self.labels[previous],
                    to = %self.labels[previous + 1],
                    "Switched to backup RPC endpoint"
                );
                true
            }
            Err(_) => {
                warn!(
                    endpoint = %self.current_label(),
                    "No backup RPC endpoints left"
                );
                false
            }
        }
    }

    pub fn restore_primary(&self) -> bool {
        let previous = self.active.swap(0, Ordering::AcqRel);
        if previous != 0 {
            info!(
                from = %self.labels[previous.min(self.labels.len() - 1)],
                to = %self.labels[0],
                "Restored primary RPC endpoint"
            );
        }
        previous != 0
    }
}

use crate::error::RpcError;
use crate::rpc::pool::EndpointPool;
use std::future::Future;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, warn};

/// Bounded retry with a fixed delay between attempts. Errors that look like
/// an unhealthy endpoint move the pool to its next backup before the
/// following attempt; other errors retry the same endpoint.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        FixedInterval::new(self.delay).take(self.max_attempts - 1)
    }

    /// Runs `operation` against the pool's active endpoint until it succeeds
    /// or the attempt budget is spent, returning the last error in that case.
    pub async fn run<E, T, F, Fut>(
        &self,
        pool: &EndpointPool<E>,
        what: &str,
        mut operation: F,
    ) -> Result<T, RpcError>
    where
        E: Clone,
        F: FnMut(E) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0usize;

        Retry::spawn(self.strategy(), || {
            attempt += 1;
            let current_attempt = attempt;
            let call = operation(pool.current().clone());

            async move {
                debug!(
                    what,
                    attempt = current_attempt,
                    endpoint = %pool.current_label(),
                    "RPC call"
                );
                let err = match call.await {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                };

                if current_attempt < max_attempts {
                    warn!(
                        what,
                        endpoint = %pool.current_label(),
                        "RPC error: {}, retrying... {} attempts remaining",
                        err,
                        max_attempts - current_attempt
                    );
                    if err.is_endpoint_unhealthy() && !pool.failover() {
                        warn!(what, "Retrying on the same endpoint, no backups left");
                    }
                } else {
                    warn!(what, attempts = max_attempts, "RPC retries exhausted: {}", err);
                }
                Err(err)
            }
        })
        .await
    }
}

pub mod pool;
pub mod retry;

use crate::error::RpcError;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use pool::EndpointPool;
pub use retry::RetryPolicy;

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

/// The chain reads the sync engine depends on. Implementations are expected
/// to apply their own retry and failover; an error returned here means the
/// attempt budget is spent.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError>;

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, RpcError>;

    /// Moves to the next backup endpoint. Returns `false` when none is left.
    fn failover(&self) -> bool {
        false
    }

    /// Gives the source a chance to move back to its primary endpoint.
    /// Returns `true` when it did.
    async fn try_restore_primary(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    async fn block_number(&self) -> Result<u64, RpcError> {
        (**self).block_number().await
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        (**self).logs(filter).await
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, RpcError> {
        (**self).block_timestamp(block_number).await
    }

    fn failover(&self) -> bool {
        (**self).failover()
    }

    async fn try_restore_primary(&self) -> bool {
        (**self).try_restore_primary().await
    }
}

/// JSON-RPC client over a primary endpoint and ordered backups.
pub struct RpcClient {
    pool: EndpointPool<AlloyFullProvider>,
    retry: RetryPolicy,
    primary_recheck: Option<Duration>,
    last_failover_check: Mutex<Option<Instant>>,
}

impl RpcClient {
    pub fn new(
        primary_url: &str,
        backup_urls: &[String],
        retry: RetryPolicy,
        primary_recheck: Option<Duration>,
    ) -> Result<Self, RpcError> {
        let mut providers = Vec::with_capacity(backup_urls.len() + 1);
        for url in std::iter::once(primary_url).chain(backup_urls.iter().map(String::as_str)) {
            let parsed_url = url
                .parse()
                .map_err(|_| RpcError::InvalidUrl(url.to_string()))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push((url.to_string(), provider));
        }

        let pool = EndpointPool::new(providers).ok_or(RpcError::NoEndpoints)?;
        info!(
            primary = %pool.current_label(),
            backups = pool.backups_remaining(),
            "RPC client configured"
        );

        Ok(RpcClient {
            pool,
            retry,
            primary_recheck,
            last_failover_check: Mutex::new(None),
        })
    }

    pub fn current_url(&self) -> &str {
        self.pool.current_label()
    }

    fn primary_recheck_due(&self) -> bool {
        let Some(interval) = self.primary_recheck else {
            return false;
        };
        let Ok(mut last) = self.last_failover_check.lock() else {
            return false;
        };
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < interval => false,
            Some(_) => {
                *last = Some(now);
                true
            }
            // First time we notice we are off the primary: start the clock.
            None => {
                *last = Some(now);
                false
            }
        }
    }
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        self.retry
            .run(&self.pool, "eth_blockNumber", |provider| async move {
                provider
                    .get_block_number()
                    .await
                    .map_err(|e| RpcError::from_message(e.to_string()))
            })
            .await
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.retry
            .run(&self.pool, "eth_getLogs", |provider| async move {
                provider
                    .get_logs(filter)
                    .await
                    .map_err(|e| RpcError::from_message(e.to_string()))
            })
            .await
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, RpcError> {
        self.retry
            .run(&self.pool, "eth_getBlockByNumber", |provider| async move {
                let block = provider
                    .get_block_by_number(BlockNumberOrTag::Number(block_number))
                    .await
                    .map_err(|e| RpcError::from_message(e.to_string()))?;
                block
                    .map(|block| block.header.timestamp)
                    .ok_or(RpcError::BlockNotFound(block_number))
            })
            .await
    }

    fn failover(&self) -> bool {
        self.pool.failover()
    }

    async fn try_restore_primary(&self) -> bool {
        if self.pool.is_on_primary() {
            if let Ok(mut last) = self.last_failover_check.lock() {
                *last = None;
            }
            return false;
        }
        if !self.primary_recheck_due() {
            return false;
        }

        debug!(primary = %self.pool.primary_label(), "Probing primary RPC endpoint");
        match self.pool.primary().get_block_number().await {
            Ok(block) => {
                info!(block, "Primary RPC endpoint is healthy again");
                self.pool.restore_primary()
            }
            Err(e) => {
                warn!("Primary RPC endpoint still unhealthy: {}", e);
                false
            }
        }
    }
}

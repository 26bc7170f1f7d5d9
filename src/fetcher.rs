use crate::error::RpcError;
use crate::events::{decode_transfer_event, incoming_transfer_filter};
use crate::repository::NewTransfer;
use crate::rpc::ChainSource;
use alloy_primitives::Address;
use futures::{StreamExt, TryStreamExt, stream};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

const TIMESTAMP_CONCURRENCY: usize = 4;

/// What the fetcher looks for: `Transfer` events of one token paid to one
/// recipient, tagged with the network they came from.
#[derive(Debug, Clone)]
pub struct TransferTarget {
    pub mode: String,
    pub token_address: Address,
    pub token_symbol: String,
    pub recipient: Address,
}

/// Lists the incoming transfers in a block range and stamps each one with
/// its block time. The caller keeps ranges within provider limits.
pub struct BatchFetcher<'a, C: ChainSource + ?Sized> {
    chain: &'a C,
    target: &'a TransferTarget,
}

impl<'a, C: ChainSource + ?Sized> BatchFetcher<'a, C> {
    pub fn new(chain: &'a C, target: &'a TransferTarget) -> Self {
        Self { chain, target }
    }

    /// Transfers in `[from_block, to_block]`, ordered by block then log
    /// index. An empty range result is not an error.
    pub async fn fetch_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<NewTransfer>, RpcError> {
        let filter = incoming_transfer_filter(
            self.target.token_address,
            self.target.recipient,
            from_block,
            to_block,
        );

        info!(
            "Querying blocks {} to {} ({} blocks)",
            from_block,
            to_block,
            to_block.saturating_sub(from_block) + 1
        );
        let logs = self.chain.logs(&filter).await?;
        if logs.is_empty() {
            debug!("No transfers found in blocks {}-{}", from_block, to_block);
            return Ok(Vec::new());
        }

        let mut pending = Vec::with_capacity(logs.len());
        for log in &logs {
            let (Some(block_number), Some(transaction_hash)) =
                (log.block_number, log.transaction_hash)
            else {
                warn!("Skipping transfer log without block metadata: {:?}", log);
                continue;
            };

            match decode_transfer_event(log) {
                Ok(event) if event.to == self.target.recipient => {
                    pending.push((block_number, transaction_hash, log.log_index.unwrap_or(0), event));
                }
                Ok(event) => {
                    debug!(to = %event.to, "Ignoring transfer to another recipient");
                }
                Err(e) => {
                    warn!("Failed to decode transfer event: {}", e);
                }
            }
        }

        let blocks: BTreeSet<u64> = pending.iter().map(|(block, ..)| *block).collect();
        let timestamps = self.block_timestamps(blocks).await?;

        let mut transfers: Vec<NewTransfer> = pending
            .into_iter()
            .filter_map(|(block_number, transaction_hash, log_index, event)| {
                let timestamp = *timestamps.get(&block_number)?;
                Some(NewTransfer {
                    mode: self.target.mode.clone(),
                    block_number,
                    transaction_hash,
                    log_index,
                    from_address: event.from,
                    to_address: event.to,
                    token_address: self.target.token_address,
                    token_symbol: self.target.token_symbol.clone(),
                    value: event.value,
                    timestamp,
                })
            })
            .collect();
        transfers.sort_by_key(|t| (t.block_number, t.log_index));

        debug!(
            "Fetched {} transfers from blocks {}-{}",
            transfers.len(),
            from_block,
            to_block
        );
        Ok(transfers)
    }

    async fn block_timestamps(
        &self,
        blocks: BTreeSet<u64>,
    ) -> Result<HashMap<u64, u64>, RpcError> {
        stream::iter(blocks)
            .map(|block| async move {
                let timestamp = self.chain.block_timestamp(block).await?;
                Ok::<_, RpcError>((block, timestamp))
            })
            .buffered(TIMESTAMP_CONCURRENCY)
            .try_collect()
            .await
    }
}

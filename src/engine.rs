use crate::config::{Config, SyncSettings};
use crate::error::{StoreError, SyncError};
use crate::fetcher::{BatchFetcher, TransferTarget};
use crate::repository::{Database, NewTransfer, TransferRepository};
use crate::rpc::ChainSource;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Lifecycle of the polling loop. There is no way back to `Idle`, and a
/// stopped engine stays stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingState {
    Idle,
    Polling,
    Stopped,
}

impl PollingState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PollingState::Idle,
            1 => PollingState::Polling,
            _ => PollingState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PollingState::Idle => 0,
            PollingState::Polling => 1,
            PollingState::Stopped => 2,
        }
    }
}

/// Cloneable handle on an engine's polling state, used to stop the loop
/// from another task. Stopping is cooperative: the loop notices at the top
/// of its next iteration or after the chunk it is working on.
#[derive(Debug, Clone)]
pub struct PollingControl {
    state: Arc<AtomicU8>,
}

impl Default for PollingControl {
    fn default() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PollingState::Idle.as_u8())),
        }
    }
}

impl PollingControl {
    pub fn state(&self) -> PollingState {
        PollingState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_polling(&self) -> bool {
        self.state() == PollingState::Polling
    }

    /// `Idle -> Polling`. Returns `Ok(false)` when already polling and
    /// refuses to leave `Stopped`.
    fn try_start(&self) -> Result<bool, SyncError> {
        match self.state.compare_exchange(
            PollingState::Idle.as_u8(),
            PollingState::Polling.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(true),
            Err(current) => match PollingState::from_u8(current) {
                PollingState::Stopped => Err(SyncError::Stopped),
                _ => Ok(false),
            },
        }
    }

    pub fn stop(&self) -> bool {
        self.state.swap(PollingState::Stopped.as_u8(), Ordering::AcqRel)
            != PollingState::Stopped.as_u8()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub chunks: usize,
    pub inserted: usize,
    pub cursor: Option<u64>,
}

/// Keeps the transfer table in step with the chain: a one-shot backfill up
/// to the head seen at start, then a polling loop that follows new blocks.
/// Block ranges are processed strictly in order and the cursor (last synced
/// block, `None` before anything is synced) only moves forward after a chunk
/// has been committed.
pub struct SyncEngine<C: ChainSource> {
    chain: C,
    db: Database,
    target: TransferTarget,
    start_block: u64,
    settings: SyncSettings,
    control: PollingControl,
    cursor: Option<u64>,
}

impl<C: ChainSource> SyncEngine<C> {
    pub fn new(
        chain: C,
        db: Database,
        target: TransferTarget,
        start_block: u64,
        settings: SyncSettings,
    ) -> Self {
        Self {
            chain,
            db,
            target,
            start_block,
            settings,
            control: PollingControl::default(),
            cursor: None,
        }
    }

    pub fn from_config(chain: C, db: Database, config: &Config) -> Self {
        let target = TransferTarget {
            mode: config.mode.clone(),
            token_address: config.token_address,
            token_symbol: config.token_symbol.clone(),
            recipient: config.recipient_address,
        };
        Self::new(chain, db, target, config.start_block, config.sync.clone())
    }

    pub fn control(&self) -> PollingControl {
        self.control.clone()
    }

    pub fn polling_state(&self) -> PollingState {
        self.control.state()
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn latest_synced_block(&self) -> Result<u64, SyncError> {
        let repo = TransferRepository::new(self.db.conn()?);
        Ok(repo.latest_synced_block(&self.target.mode)?)
    }

    /// Syncs from the stored cursor (or the configured start block) up to
    /// the chain head as seen when the call starts. Blocks that arrive
    /// meanwhile are left to polling. Any failure aborts the backfill; the
    /// next run resumes from what was committed.
    pub async fn backfill(&mut self) -> Result<SyncReport, SyncError> {
        if !self.db.is_alive() {
            self.db.reconnect()?;
        }
        self.db.ensure_schema()?;

        let cursor = self.resume_cursor()?;
        let head = self.chain.block_number().await?;

        if cursor.is_some_and(|cursor| cursor >= head) {
            info!(?cursor, head, mode = %self.target.mode, "Historical sync: already up to date");
            return Ok(SyncReport {
                cursor,
                ..Default::default()
            });
        }

        info!(
            mode = %self.target.mode,
            "Starting historical sync from block {} to {}",
            next_block(cursor),
            head
        );
        let started = Instant::now();
        let report = self.sync_through(cursor, head, false).await.map_err(|e| {
            error!("Historical sync failed: {}", e);
            e
        })?;

        info!(
            chunks = report.chunks,
            inserted = report.inserted,
            cursor = ?report.cursor,
            "Historical sync completed in {:?}",
            started.elapsed()
        );
        Ok(report)
    }

    /// Follows the chain until stopped through `PollingControl`. Errors
    /// inside an iteration are logged and retried after `retry_delay`; the
    /// loop itself only ends when stopped, after which the store connection
    /// is released.
    pub async fn poll(&mut self) -> Result<(), SyncError> {
        match self.control.state() {
            PollingState::Stopped => return Err(SyncError::Stopped),
            PollingState::Polling => {
                info!("Polling is already running");
                return Ok(());
            }
            PollingState::Idle => {}
        }

        if !self.db.is_alive() {
            self.db.reconnect()?;
        }
        if !self.control.try_start()? {
            info!("Polling is already running");
            return Ok(());
        }

        info!(mode = %self.target.mode, "Starting polling for new transfers...");
        match self.resume_cursor() {
            Ok(cursor) => self.cursor = cursor,
            Err(e) => warn!("Could not read stored cursor, using {:?}: {}", self.cursor, e),
        }

        while self.control.is_polling() {
            if self.chain.try_restore_primary().await {
                info!("Polling resumed on primary RPC endpoint");
            }

            match self.poll_once().await {
                Ok(None) => {
                    info!(cursor = ?self.cursor, "No new blocks, waiting...");
                    sleep(self.settings.poll_interval).await;
                }
                Ok(Some(report)) => {
                    if report.inserted > 0 {
                        info!(
                            inserted = report.inserted,
                            cursor = ?report.cursor,
                            "Synced new transfers"
                        );
                    }
                    sleep(self.settings.poll_interval).await;
                }
                Err(e) => {
                    self.recover(&e);
                    sleep(self.settings.retry_delay).await;
                }
            }
        }

        info!(cursor = ?self.cursor, "Polling stopped");
        self.release_store();
        Ok(())
    }

    pub fn stop(&mut self) {
        info!("Stopping polling...");
        self.control.stop();
        self.release_store();
    }

    async fn poll_once(&mut self) -> Result<Option<SyncReport>, SyncError> {
        let head = self.chain.block_number().await?;
        if self.cursor.is_some_and(|cursor| head <= cursor) {
            return Ok(None);
        }

        info!("Found {} new blocks", head + 1 - next_block(self.cursor));
        let report = self.sync_through(self.cursor, head, true).await?;
        Ok(Some(report))
    }

    // Stop requests are only honoured between chunks when polling
    async fn sync_through(
        &mut self,
        cursor: Option<u64>,
        target: u64,
        interruptible: bool,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport {
            cursor,
            ..Default::default()
        };
        let span = self.settings.batch_size.max(1) - 1;
        let mut from_block = next_block(cursor);

        while from_block <= target {
            if interruptible && !self.control.is_polling() {
                break;
            }

            let to_block = from_block.saturating_add(span).min(target);

            let transfers = BatchFetcher::new(&self.chain, &self.target)
                .fetch_range(from_block, to_block)
                .await?;
            let inserted = self.persist(&transfers)?;
            if inserted > 0 {
                info!(
                    "Inserted {} transfers from blocks {}-{}",
                    inserted, from_block, to_block
                );
            }

            self.cursor = self.cursor.max(Some(to_block));
            report.chunks += 1;
            report.inserted += inserted;
            report.cursor = Some(to_block);

            if to_block >= target {
                break;
            }
            from_block = to_block + 1;
            if !self.settings.batch_delay.is_zero() {
                sleep(self.settings.batch_delay).await;
            }
        }

        Ok(report)
    }

    fn persist(&self, transfers: &[NewTransfer]) -> Result<usize, StoreError> {
        if transfers.is_empty() {
            return Ok(0);
        }
        TransferRepository::new(self.db.conn()?).insert_batch(transfers)
    }

    fn resume_cursor(&self) -> Result<Option<u64>, SyncError> {
        let stored =
            TransferRepository::new(self.db.conn()?).max_synced_block(&self.target.mode)?;
        Ok(stored
            .max(self.start_block.checked_sub(1))
            .max(self.cursor))
    }

    fn recover(&mut self, err: &SyncError) {
        error!("Error during polling: {}", err);

        if !self.db.is_alive() {
            if let Err(e) = self.db.reconnect() {
                error!("Failed to reconnect to database: {}", e);
            }
        }

        if err.is_endpoint_unhealthy() && !self.chain.failover() {
            warn!("RPC endpoint unhealthy and no backups left");
        }
    }

    fn release_store(&mut self) {
        if let Err(e) = self.db.close() {
            warn!("Error closing database: {}", e);
        }
    }
}

fn next_block(cursor: Option<u64>) -> u64 {
    cursor.map_or(0, |cursor| cursor + 1)
}

use super::models::{
    NewTransfer, PeriodStatusSummary, StatusExtra, TransferFilter, TransferRecord,
    TransferStats, TransferStatus, to_lower_hex,
};
use crate::error::StoreError;
use bigdecimal::BigDecimal;
use rusqlite::{OptionalExtension, Row, ToSql, params, params_from_iter};
use std::collections::BTreeMap;
use std::str::FromStr;

pub struct TransferRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TransferRepository<'a> {
    // Skips rows already stored under the same (mode, transaction_hash, log_index)
    const INSERT_TRANSFER: &'static str = "INSERT INTO token_transfers (
            mode, block_number, transaction_hash, log_index, from_address,
            to_address, token_address, token_symbol, value, timestamp
        )
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
        WHERE NOT EXISTS (
            SELECT 1 FROM token_transfers
            WHERE mode = ?1 AND transaction_hash = ?3 AND log_index = ?4
        )";

    const SELECT_LATEST_BLOCK: &'static str =
        "SELECT MAX(block_number) FROM token_transfers WHERE mode = ?1";

    // Touches at most one row, and only while it is still in the expected state
    const UPDATE_STATUS: &'static str = "UPDATE token_transfers
        SET status = ?1,
            lottery_numbers = COALESCE(?2, lottery_numbers),
            lottery_period = COALESCE(?3, lottery_period),
            updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
        WHERE status = ?5
          AND id = (
            SELECT id FROM token_transfers
            WHERE transaction_hash = ?4 AND status = ?5
            ORDER BY block_number ASC, id ASC
            LIMIT 1
          )";

    const UPDATE_STATUS_BY_ID: &'static str = "UPDATE token_transfers
        SET status = ?1,
            lottery_numbers = COALESCE(?2, lottery_numbers),
            lottery_period = COALESCE(?3, lottery_period),
            updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
        WHERE id = ?4 AND status = ?5";

    const SELECT_TRANSFER: &'static str = "SELECT id, mode, block_number, transaction_hash,
        log_index, from_address, to_address, token_address, token_symbol, value, timestamp,
        status, lottery_numbers, lottery_period, created_at, updated_at FROM token_transfers";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Inserts the whole batch in one transaction. Either every new row is
    /// committed or none is. Returns the number of rows actually inserted.
    pub fn insert_batch(&self, transfers: &[NewTransfer]) -> Result<usize, StoreError> {
        if transfers.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;

        {
            let mut stmt = tx.prepare(Self::INSERT_TRANSFER)?;

            for transfer in transfers {
                count += stmt.execute(params![
                    transfer.mode,
                    transfer.block_number,
                    to_lower_hex(transfer.transaction_hash.as_slice()),
                    transfer.log_index,
                    to_lower_hex(transfer.from_address.as_slice()),
                    to_lower_hex(transfer.to_address.as_slice()),
                    to_lower_hex(transfer.token_address.as_slice()),
                    transfer.token_symbol,
                    transfer.value.to_string(),
                    transfer.timestamp,
                ])?;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    /// Highest block stored for `mode`, or 0 when nothing has been synced.
    pub fn latest_synced_block(&self, mode: &str) -> Result<u64, StoreError> {
        Ok(self.max_synced_block(mode)?.unwrap_or(0))
    }

    pub fn max_synced_block(&self, mode: &str) -> Result<Option<u64>, StoreError> {
        let block = self
            .conn
            .query_row(Self::SELECT_LATEST_BLOCK, params![mode], |row| row.get(0))?;
        Ok(block)
    }

    /// Conditional transition of one row from `from` to `to`. A transaction
    /// can carry several transfer logs (or be stored under several modes);
    /// this acts on the first row with the hash still in `from`, lowest block
    /// then id. Returns the number of rows changed: 0 means the hash is
    /// unknown or no row with it is in `from`.
    pub fn update_status(
        &self,
        transaction_hash: &str,
        from: TransferStatus,
        to: TransferStatus,
        extra: &StatusExtra,
    ) -> Result<usize, StoreError> {
        let changed = self.conn.execute(
            Self::UPDATE_STATUS,
            params![
                to.as_str(),
                extra.lottery_numbers,
                extra.lottery_period,
                transaction_hash.trim().to_lowercase(),
                from.as_str(),
            ],
        )?;
        Ok(changed)
    }

    /// Same transition as `update_status`, keyed on the row id.
    pub fn update_status_by_id(
        &self,
        id: i64,
        from: TransferStatus,
        to: TransferStatus,
        extra: &StatusExtra,
    ) -> Result<usize, StoreError> {
        let changed = self.conn.execute(
            Self::UPDATE_STATUS_BY_ID,
            params![
                to.as_str(),
                extra.lottery_numbers,
                extra.lottery_period,
                id,
                from.as_str(),
            ],
        )?;
        Ok(changed)
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<TransferRecord>, StoreError> {
        let query = format!("{} WHERE id = ?1", Self::SELECT_TRANSFER);
        let record = self
            .conn
            .query_row(&query, params![id], Self::row_to_transfer)
            .optional()?;
        Ok(record)
    }

    /// First row stored for the hash (lowest id), whatever its mode or log
    /// index.
    pub fn find_by_hash(&self, transaction_hash: &str) -> Result<Option<TransferRecord>, StoreError> {
        let query = format!(
            "{} WHERE transaction_hash = ?1 ORDER BY id ASC LIMIT 1",
            Self::SELECT_TRANSFER
        );
        let record = self
            .conn
            .query_row(
                &query,
                params![transaction_hash.trim().to_lowercase()],
                Self::row_to_transfer,
            )
            .optional()?;
        Ok(record)
    }

    /// Pending transfers matching `filter`, newest block first.
    pub fn find_pending(&self, filter: &TransferFilter) -> Result<Vec<TransferRecord>, StoreError> {
        self.query_matching(filter, " ORDER BY block_number DESC, id DESC", None)
    }

    /// The pending transfer matching `filter` that should be served next:
    /// lowest block first, insertion order within a block.
    pub fn oldest_unassigned(
        &self,
        filter: &TransferFilter,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let mut rows = self.query_matching(
            filter,
            " AND lottery_numbers IS NULL ORDER BY block_number ASC, id ASC",
            Some(1),
        )?;
        Ok(rows.pop())
    }

    /// Most recently assigned transfer sent by `from_address`.
    pub fn latest_assigned(
        &self,
        mode: &str,
        from_address: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let query = format!(
            "{} WHERE mode = ?1 AND from_address = ?2 AND status = ?3
             ORDER BY updated_at DESC, id DESC LIMIT 1",
            Self::SELECT_TRANSFER
        );
        let record = self
            .conn
            .query_row(
                &query,
                params![
                    mode,
                    from_address.trim().to_lowercase(),
                    TransferStatus::NumbersAssigned.as_str()
                ],
                Self::row_to_transfer,
            )
            .optional()?;
        Ok(record)
    }

    /// Per lottery period and status: row count and exact sum of `value`.
    /// Rows without a period are grouped under `None`.
    pub fn period_summaries(
        &self,
        mode: &str,
        period: Option<u64>,
    ) -> Result<Vec<PeriodStatusSummary>, StoreError> {
        let mut query =
            "SELECT lottery_period, status, value FROM token_transfers WHERE mode = ?".to_string();
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(mode.to_string())];
        if let Some(period) = period {
            query.push_str(" AND lottery_period = ?");
            params.push(Box::new(period));
        }

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok((
                    row.get::<_, Option<u64>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut groups: BTreeMap<(Option<u64>, TransferStatus), (u64, BigDecimal)> =
            BTreeMap::new();
        for (lottery_period, status, value) in rows {
            let status = TransferStatus::from_str(&status).map_err(StoreError::InvalidValue)?;
            let value = Self::parse_amount(&value)?;
            let entry = groups
                .entry((lottery_period, status))
                .or_insert_with(|| (0, BigDecimal::default()));
            entry.0 += 1;
            entry.1 += value;
        }

        Ok(groups
            .into_iter()
            .map(|((lottery_period, status), (count, total_value))| PeriodStatusSummary {
                lottery_period,
                status,
                count,
                total_value,
            })
            .collect())
    }

    pub fn get_statistics(&self, mode: &str) -> Result<TransferStats, StoreError> {
        let (total_transfers, unique_senders, earliest_block, latest_block): (
            u64,
            u64,
            Option<u64>,
            Option<u64>,
        ) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT from_address), MIN(block_number), MAX(block_number)
             FROM token_transfers WHERE mode = ?1",
            params![mode],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT value FROM token_transfers WHERE mode = ?1")?;
        let values = stmt
            .query_map(params![mode], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let total_value = Self::sum_values(&values)?;

        Ok(TransferStats {
            total_transfers,
            unique_senders,
            earliest_block,
            latest_block,
            total_value,
        })
    }

    fn query_matching(
        &self,
        filter: &TransferFilter,
        suffix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TransferRecord>, StoreError> {
        let mut query = format!(
            "{} WHERE mode = ?1 AND value = ?2 AND to_address = ?3 AND token_address = ?4 AND status = ?5",
            Self::SELECT_TRANSFER
        );
        query.push_str(suffix);
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&query)?;
        let transfers = stmt
            .query_map(
                params![
                    filter.mode,
                    filter.value,
                    filter.to_address,
                    filter.token_address,
                    TransferStatus::Pending.as_str()
                ],
                Self::row_to_transfer,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transfers)
    }

    fn row_to_transfer(row: &Row) -> rusqlite::Result<TransferRecord> {
        let status = row.get::<_, String>(11)?.parse::<TransferStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(TransferRecord {
            id: row.get(0)?,
            mode: row.get(1)?,
            block_number: row.get(2)?,
            transaction_hash: row.get(3)?,
            log_index: row.get(4)?,
            from_address: row.get(5)?,
            to_address: row.get(6)?,
            token_address: row.get(7)?,
            token_symbol: row.get(8)?,
            value: row.get(9)?,
            timestamp: row.get(10)?,
            status,
            lottery_numbers: row.get(12)?,
            lottery_period: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn parse_amount(value: &str) -> Result<BigDecimal, StoreError> {
        BigDecimal::from_str(value)
            .map_err(|_| StoreError::InvalidValue(format!("invalid value format: {value}")))
    }

    fn sum_values(values: &[String]) -> Result<BigDecimal, StoreError> {
        let mut total = BigDecimal::default();
        for value in values {
            total += Self::parse_amount(value)?;
        }
        Ok(total)
    }
}

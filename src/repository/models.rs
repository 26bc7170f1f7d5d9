use alloy_primitives::{Address, B256, U256, hex};
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    NumbersAssigned,
    Claimed,
    Failed,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 4] = [
        TransferStatus::Pending,
        TransferStatus::NumbersAssigned,
        TransferStatus::Claimed,
        TransferStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::NumbersAssigned => "NUMBERS_ASSIGNED",
            TransferStatus::Claimed => "CLAIMED",
            TransferStatus::Failed => "FAILED",
        }
    }

    /// PENDING -> NUMBERS_ASSIGNED -> {CLAIMED, FAILED}. Nothing moves
    /// backwards and the last two states are terminal.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        matches!(
            (self, next),
            (TransferStatus::Pending, TransferStatus::NumbersAssigned)
                | (TransferStatus::NumbersAssigned, TransferStatus::Claimed)
                | (TransferStatus::NumbersAssigned, TransferStatus::Failed)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown transfer status: {s}"))
    }
}

/// A decoded transfer log, enriched with its block time, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub mode: String,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub from_address: Address,
    pub to_address: Address,
    pub token_address: Address,
    pub token_symbol: String,
    pub value: U256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: i64,
    pub mode: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub from_address: String,
    pub to_address: String,
    pub token_address: String,
    pub token_symbol: String,
    pub value: String,
    pub timestamp: u64,
    pub status: TransferStatus,
    pub lottery_numbers: Option<String>,
    pub lottery_period: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Columns a status transition may fill in alongside the status itself.
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusExtra {
    pub lottery_numbers: Option<String>,
    pub lottery_period: Option<u64>,
}

/// Selects transfers of one exact amount paid to one recipient in one token.
#[derive(Debug, Clone)]
pub struct TransferFilter {
    pub mode: String,
    pub value: String,
    pub to_address: String,
    pub token_address: String,
}

impl TransferFilter {
    pub fn new(mode: &str, value: &str, to_address: &str, token_address: &str) -> Self {
        Self {
            mode: mode.trim().to_string(),
            value: value.trim().to_string(),
            to_address: to_address.trim().to_lowercase(),
            token_address: token_address.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodStatusSummary {
    pub lottery_period: Option<u64>,
    pub status: TransferStatus,
    pub count: u64,
    pub total_value: BigDecimal,
}

#[derive(Debug)]
pub struct TransferStats {
    pub total_transfers: u64,
    pub unique_senders: u64,
    pub earliest_block: Option<u64>,
    pub latest_block: Option<u64>,
    pub total_value: BigDecimal,
}

/// `0x`-prefixed lower-case hex, the form addresses and hashes are stored in.
pub fn to_lower_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode_prefixed(bytes)
}

/// Renders an integral token amount without exponent notation.
pub fn amount_to_string(amount: &BigDecimal) -> String {
    let (digits, _) = amount.with_scale(0).into_bigint_and_exponent();
    digits.to_string()
}

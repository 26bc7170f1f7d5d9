//! In-memory chain used by the fetcher and engine tests.

use crate::error::RpcError;
use crate::events::Transfer;
use crate::fetcher::TransferTarget;
use crate::rpc::ChainSource;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256, address};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Mutex;

pub const TOKEN: Address = address!("0xa7ab21686d40aa35cb51137a795d84a57352f593");
pub const RECIPIENT: Address = address!("0xbebaf2a9ad714feb9dd151d81dd6d61ae0535646");

pub fn target() -> TransferTarget {
    TransferTarget {
        mode: "base".to_string(),
        token_address: TOKEN,
        token_symbol: "USDC".to_string(),
        recipient: RECIPIENT,
    }
}

#[derive(Default)]
struct FakeState {
    head: u64,
    logs: Vec<Log>,
    log_queries: Vec<(u64, u64)>,
    timestamp_queries: Vec<u64>,
    head_failures: VecDeque<RpcError>,
    log_failures: VecDeque<RpcError>,
    fail_timestamps: bool,
    failovers: usize,
}

pub struct FakeChain {
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new(head: u64) -> Self {
        Self {
            state: Mutex::new(FakeState {
                head,
                ..Default::default()
            }),
        }
    }

    pub fn timestamp_of(block: u64) -> u64 {
        1_700_000_000 + block * 2
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Adds a transfer of `value` to the recipient; `seed` picks the sender
    /// and transaction hash.
    pub fn add_transfer(&self, block: u64, seed: u8, log_index: u64, value: &str) {
        let event = Transfer {
            from: Address::repeat_byte(seed),
            to: RECIPIENT,
            value: U256::from_str(value).unwrap(),
        };
        let log = Log {
            inner: alloy_primitives::Log {
                address: TOKEN,
                data: event.encode_log_data(),
            },
            block_number: Some(block),
            transaction_hash: Some(B256::repeat_byte(seed)),
            log_index: Some(log_index),
            ..Default::default()
        };
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn fail_next_head(&self, error: RpcError) {
        self.state.lock().unwrap().head_failures.push_back(error);
    }

    pub fn fail_next_logs(&self, error: RpcError) {
        self.state.lock().unwrap().log_failures.push_back(error);
    }

    pub fn fail_timestamps(&self, fail: bool) {
        self.state.lock().unwrap().fail_timestamps = fail;
    }

    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().log_queries.clone()
    }

    pub fn timestamp_queries(&self) -> Vec<u64> {
        let mut queries = self.state.lock().unwrap().timestamp_queries.clone();
        queries.sort_unstable();
        queries
    }

    pub fn failovers(&self) -> usize {
        self.state.lock().unwrap().failovers
    }
}

#[async_trait]
impl ChainSource for FakeChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let mut state = self.state.lock().unwrap();
        match state.head_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(state.head),
        }
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        let mut state = self.state.lock().unwrap();
        let from = filter.get_from_block().unwrap_or(0);
        let to = filter.get_to_block().unwrap_or(u64::MAX);
        state.log_queries.push((from, to));
        if let Some(error) = state.log_failures.pop_front() {
            return Err(error);
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| log.block_number.is_some_and(|b| (from..=to).contains(&b)))
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.timestamp_queries.push(block_number);
        if state.fail_timestamps {
            return Err(RpcError::from_message("header not found"));
        }
        Ok(Self::timestamp_of(block_number))
    }

    fn failover(&self) -> bool {
        self.state.lock().unwrap().failovers += 1;
        true
    }
}

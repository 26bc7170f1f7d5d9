use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::Address;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

pub fn decode_transfer_event(log: &Log) -> anyhow::Result<Transfer> {
    let log_data = log.data();
    let decoded = Transfer::decode_raw_log(log.topics(), &log_data.data)?;
    Ok(decoded)
}

/// `Transfer` logs emitted by `token` whose indexed `to` is `recipient`.
pub fn incoming_transfer_filter(
    token: Address,
    recipient: Address,
    from_block: u64,
    to_block: u64,
) -> Filter {
    Filter::new()
        .address(token)
        .event_signature(Transfer::SIGNATURE_HASH)
        .topic2(recipient.into_word())
        .from_block(from_block)
        .to_block(to_block)
}

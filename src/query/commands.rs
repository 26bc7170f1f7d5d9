use crate::error::AssignError;
use crate::lottery::{AssignmentRequest, LotteryAssigner};
use crate::query::formatters::{
    OutputFormat, format_assignment, format_cursor, format_stats, format_summaries,
    format_transfer, format_transfers,
};
use crate::repository::{TransferFilter, TransferRepository, TransferStatus};
use alloy_primitives::Address;
use anyhow::{Result, anyhow};
use std::str::FromStr;

pub struct OutputOptions {
    pub decimals: u8,
    pub format: OutputFormat,
}

pub fn cmd_cursor(repo: &TransferRepository, mode: &str, output: &OutputOptions) -> Result<()> {
    let block = repo.latest_synced_block(mode)?;
    println!("{}", format_cursor(mode, block, &output.format));
    Ok(())
}

pub fn cmd_info(repo: &TransferRepository, transaction_hash: &str, output: &OutputOptions) -> Result<()> {
    let transfer = repo
        .find_by_hash(transaction_hash)?
        .ok_or_else(|| anyhow!("Transfer not found: {}", transaction_hash))?;
    println!(
        "{}",
        format_transfer(&transfer, output.decimals, &output.format)
    );
    Ok(())
}

pub struct PendingQuery {
    pub mode: String,
    pub value: String,
    pub to: String,
    pub token: String,
    pub limit: usize,
}

pub fn cmd_pending(repo: &TransferRepository, query: PendingQuery, output: &OutputOptions) -> Result<()> {
    parse_address("to", &query.to)?;
    parse_address("token", &query.token)?;

    let filter = TransferFilter::new(&query.mode, &query.value, &query.to, &query.token);
    let mut transfers = repo.find_pending(&filter)?;
    transfers.truncate(query.limit);

    println!(
        "{}",
        format_transfers(&transfers, output.decimals, &output.format)
    );
    Ok(())
}

pub fn cmd_latest(
    repo: &TransferRepository,
    mode: &str,
    from: &str,
    output: &OutputOptions,
) -> Result<()> {
    parse_address("from", from)?;

    match repo.latest_assigned(mode, from)? {
        Some(transfer) => println!(
            "{}",
            format_transfer(&transfer, output.decimals, &output.format)
        ),
        None => println!("No assigned transfer found for {from}"),
    }
    Ok(())
}

pub fn cmd_assign(
    assigner: &LotteryAssigner,
    request: AssignmentRequest,
    output: &OutputOptions,
) -> Result<()> {
    match assigner.assign_next(&request) {
        Ok(assignment) => {
            println!(
                "{}",
                format_assignment(&assignment, output.decimals, &output.format)
            );
            Ok(())
        }
        Err(AssignError::NotFound) => {
            println!("No eligible transfer found");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Moves an assigned transfer to a terminal state (`CLAIMED` or `FAILED`).
pub fn cmd_settle(
    assigner: &LotteryAssigner,
    transaction_hash: &str,
    to: TransferStatus,
) -> Result<()> {
    assigner.transition(transaction_hash, TransferStatus::NumbersAssigned, to)?;
    println!("Transfer {transaction_hash} marked as {to}");
    Ok(())
}

pub fn cmd_stats(
    repo: &TransferRepository,
    mode: &str,
    period: Option<u64>,
    output: &OutputOptions,
) -> Result<()> {
    let stats = repo.get_statistics(mode)?;
    println!(
        "{}",
        format_stats(&stats, output.decimals, &output.format)
    );

    let summaries = repo.period_summaries(mode, period)?;
    println!(
        "{}",
        format_summaries(&summaries, output.decimals, &output.format)
    );
    Ok(())
}

fn parse_address(field: &str, address: &str) -> Result<Address> {
    Address::from_str(address.trim())
        .map_err(|_| anyhow!("Invalid {} address format: {}", field, address))
}

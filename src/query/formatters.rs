use crate::lottery::Assignment;
use crate::repository::models::amount_to_string;
use crate::repository::{PeriodStatusSummary, TransferRecord, TransferStats};
use alloy_primitives::U256;
use alloy_primitives::utils::format_units;
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::json;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

/// Human-readable amount for `decimals`; falls back to the raw integer.
fn display_amount(raw: &str, decimals: u8) -> String {
    U256::from_str(raw)
        .ok()
        .and_then(|value| format_units(value, decimals).ok())
        .unwrap_or_else(|| raw.to_string())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

fn csv_string(wtr: Writer<Vec<u8>>) -> String {
    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map_or("N/A".to_string(), |v| v.to_string())
}

pub fn format_transfers(transfers: &[TransferRecord], decimals: u8, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_transfers_table(transfers, decimals),
        OutputFormat::Json => serde_json::to_string_pretty(transfers).unwrap_or_else(|_| "[]".to_string()),
        OutputFormat::Csv => format_transfers_csv(transfers),
    }
}

fn format_transfers_table(transfers: &[TransferRecord], decimals: u8) -> String {
    if transfers.is_empty() {
        return "No transfers found.".to_string();
    }

    let mut table = new_table(vec![
        "Block", "From", "Value", "Value (Raw)", "Status", "Period", "Numbers", "Tx Hash",
    ]);
    for transfer in transfers {
        table.add_row(vec![
            Cell::new(transfer.block_number),
            Cell::new(&transfer.from_address),
            Cell::new(display_amount(&transfer.value, decimals)),
            Cell::new(&transfer.value),
            Cell::new(transfer.status),
            Cell::new(or_na(transfer.lottery_period)),
            Cell::new(transfer.lottery_numbers.as_deref().unwrap_or("-")),
            Cell::new(format_tx_hash(&transfer.transaction_hash)),
        ]);
    }

    table.to_string()
}

fn format_transfers_csv(transfers: &[TransferRecord]) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    let _ = wtr.write_record([
        "mode",
        "block_number",
        "transaction_hash",
        "log_index",
        "from",
        "to",
        "token",
        "symbol",
        "value",
        "timestamp",
        "status",
        "lottery_numbers",
        "lottery_period",
    ]);

    for t in transfers {
        let _ = wtr.write_record([
            t.mode.as_str(),
            &t.block_number.to_string(),
            &t.transaction_hash,
            &t.log_index.to_string(),
            &t.from_address,
            &t.to_address,
            &t.token_address,
            &t.token_symbol,
            &t.value,
            &t.timestamp.to_string(),
            t.status.as_str(),
            t.lottery_numbers.as_deref().unwrap_or(""),
            &t.lottery_period.map(|p| p.to_string()).unwrap_or_default(),
        ]);
    }

    csv_string(wtr)
}

pub fn format_transfer(transfer: &TransferRecord, decimals: u8, format: &OutputFormat) -> String {
    let rows = [
        ("id", transfer.id.to_string()),
        ("mode", transfer.mode.clone()),
        ("block_number", transfer.block_number.to_string()),
        ("transaction_hash", transfer.transaction_hash.clone()),
        ("log_index", transfer.log_index.to_string()),
        ("from", transfer.from_address.clone()),
        ("to", transfer.to_address.clone()),
        ("token", format!("{} ({})", transfer.token_address, transfer.token_symbol)),
        ("value", display_amount(&transfer.value, decimals)),
        ("value_raw", transfer.value.clone()),
        ("timestamp", transfer.timestamp.to_string()),
        ("status", transfer.status.to_string()),
        ("lottery_numbers", or_na(transfer.lottery_numbers.as_ref())),
        ("lottery_period", or_na(transfer.lottery_period)),
        ("created_at", transfer.created_at.clone()),
        ("updated_at", transfer.updated_at.clone()),
    ];

    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Field", "Value"]);
            for (field, value) in rows {
                table.add_row(vec![Cell::new(field), Cell::new(value)]);
            }
            table.to_string()
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(transfer).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Csv => format_transfers_csv(std::slice::from_ref(transfer)),
    }
}

pub fn format_summaries(summaries: &[PeriodStatusSummary], decimals: u8, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if summaries.is_empty() {
                return "No transfers found.".to_string();
            }
            let mut table = new_table(vec!["Period", "Status", "Count", "Total", "Total (Raw)"]);
            for summary in summaries {
                let total = amount_to_string(&summary.total_value);
                table.add_row(vec![
                    Cell::new(or_na(summary.lottery_period)),
                    Cell::new(summary.status),
                    Cell::new(summary.count),
                    Cell::new(display_amount(&total, decimals)),
                    Cell::new(total),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => {
            let rows: Vec<_> = summaries
                .iter()
                .map(|s| {
                    json!({
                        "lotteryPeriod": s.lottery_period,
                        "status": s.status,
                        "count": s.count,
                        "totalValue": amount_to_string(&s.total_value),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["lottery_period", "status", "count", "total_value"]);
            for s in summaries {
                let period = s.lottery_period.map(|p| p.to_string()).unwrap_or_default();
                let _ = wtr.write_record([
                    period.as_str(),
                    s.status.as_str(),
                    &s.count.to_string(),
                    &amount_to_string(&s.total_value),
                ]);
            }
            csv_string(wtr)
        }
    }
}

pub fn format_stats(stats: &TransferStats, decimals: u8, format: &OutputFormat) -> String {
    let total = amount_to_string(&stats.total_value);
    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Metric", "Value"]);
            table.add_row(vec![
                Cell::new("Total Transfers"),
                Cell::new(stats.total_transfers),
            ]);
            table.add_row(vec![
                Cell::new("Unique Senders"),
                Cell::new(stats.unique_senders),
            ]);
            table.add_row(vec![
                Cell::new("Earliest Block"),
                Cell::new(or_na(stats.earliest_block)),
            ]);
            table.add_row(vec![
                Cell::new("Latest Block"),
                Cell::new(or_na(stats.latest_block)),
            ]);
            table.add_row(vec![
                Cell::new("Total Value"),
                Cell::new(display_amount(&total, decimals)),
            ]);
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "totalTransfers": stats.total_transfers,
            "uniqueSenders": stats.unique_senders,
            "earliestBlock": stats.earliest_block,
            "latestBlock": stats.latest_block,
            "totalValue": total,
        }))
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["metric", "value"]);
            let _ = wtr.write_record(["total_transfers", &stats.total_transfers.to_string()]);
            let _ = wtr.write_record(["unique_senders", &stats.unique_senders.to_string()]);
            let _ = wtr.write_record(["earliest_block", &or_na(stats.earliest_block)]);
            let _ = wtr.write_record(["latest_block", &or_na(stats.latest_block)]);
            let _ = wtr.write_record(["total_value", &total]);
            csv_string(wtr)
        }
    }
}

pub fn format_cursor(mode: &str, block: u64, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Mode", "Latest Synced Block"]);
            table.add_row(vec![Cell::new(mode), Cell::new(block)]);
            table.to_string()
        }
        OutputFormat::Json => json!({ "mode": mode, "latestSyncedBlock": block }).to_string(),
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["mode", "latest_synced_block"]);
            let _ = wtr.write_record([mode, &block.to_string()]);
            csv_string(wtr)
        }
    }
}

pub fn format_assignment(assignment: &Assignment, decimals: u8, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(assignment).unwrap_or_else(|_| "{}".to_string())
        }
        _ => format_transfer(&assignment.transfer, decimals, format),
    }
}

fn format_tx_hash(hash: &str) -> String {
    if hash.len() <= 10 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::TransferStatus;
    use bigdecimal::BigDecimal;

    fn record() -> TransferRecord {
        TransferRecord {
            id: 1,
            mode: "base".to_string(),
            block_number: 42,
            transaction_hash: format!("0x{}", "ab".repeat(32)),
            log_index: 3,
            from_address: format!("0x{}", "11".repeat(20)),
            to_address: format!("0x{}", "22".repeat(20)),
            token_address: format!("0x{}", "33".repeat(20)),
            token_symbol: "USDC".to_string(),
            value: "1500000".to_string(),
            timestamp: 1_700_000_000,
            status: TransferStatus::NumbersAssigned,
            lottery_numbers: Some("1,2,3".to_string()),
            lottery_period: Some(9),
            created_at: "2024-01-01 00:00:00.000".to_string(),
            updated_at: "2024-01-01 00:00:01.000".to_string(),
        }
    }

    #[test]
    fn amounts_use_token_decimals() {
        assert_eq!(display_amount("1500000", 6), "1.500000");
        assert_eq!(display_amount("not-a-number", 6), "not-a-number");
    }

    #[test]
    fn transfers_csv_has_header_and_row() {
        let csv = format_transfers(&[record()], 6, &OutputFormat::Csv);
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("mode,block_number,transaction_hash"));
        assert!(lines[1].contains("NUMBERS_ASSIGNED"));
        assert!(lines[1].ends_with("\"1,2,3\",9"));
    }

    #[test]
    fn transfer_json_is_camel_case() {
        let json = format_transfer(&record(), 6, &OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["transactionHash"], record().transaction_hash);
        assert_eq!(value["status"], "NUMBERS_ASSIGNED");
        assert_eq!(value["lotteryPeriod"], 9);
    }

    #[test]
    fn summaries_keep_exact_totals() {
        let summaries = [PeriodStatusSummary {
            lottery_period: None,
            status: TransferStatus::Pending,
            count: 2,
            total_value: BigDecimal::from_str("246913578024691357802469135780").unwrap(),
        }];
        let json = format_summaries(&summaries, 6, &OutputFormat::Json);
        assert!(json.contains("\"246913578024691357802469135780\""));
        assert!(json.contains("\"lotteryPeriod\": null"));
    }

    #[test]
    fn empty_results_read_naturally() {
        assert_eq!(
            format_transfers(&[], 6, &OutputFormat::Table),
            "No transfers found."
        );
        let cursor: serde_json::Value =
            serde_json::from_str(&format_cursor("base", 0, &OutputFormat::Json)).unwrap();
        assert_eq!(cursor["latestSyncedBlock"], 0);
        assert_eq!(cursor["mode"], "base");
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use transfer_sync::config::Config;
use transfer_sync::lottery::{AssignmentRequest, LotteryAssigner};
use transfer_sync::query::commands::{
    OutputOptions, PendingQuery, cmd_assign, cmd_cursor, cmd_info, cmd_latest, cmd_pending,
    cmd_settle, cmd_stats,
};
use transfer_sync::query::formatters::OutputFormat;
use transfer_sync::repository::models::to_lower_hex;
use transfer_sync::repository::{Database, TransferRepository, TransferStatus};

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Query synced transfers and manage lottery assignments", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Token decimals used when rendering amounts
    #[arg(long, default_value = "6")]
    decimals: u8,

    /// Network tag; defaults to MODE from the environment
    #[arg(long)]
    mode: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Highest block synced for the mode
    Cursor,
    /// Show one transfer by transaction hash
    Info {
        tx_hash: String,
    },
    /// Pending transfers of an exact amount, newest first
    Pending {
        value: String,

        #[arg(long)]
        to: Option<String>,

        #[arg(long)]
        token: Option<String>,

        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Latest transfer from a sender that has numbers assigned
    Latest {
        from: String,
    },
    /// Assign lottery numbers to the oldest eligible transfer
    Assign {
        value: String,

        #[arg(long)]
        numbers: String,

        #[arg(long)]
        period: u64,

        #[arg(long)]
        to: Option<String>,

        #[arg(long)]
        token: Option<String>,
    },
    Claim {
        tx_hash: String,
    },
    Fail {
        tx_hash: String,
    },
    /// Totals per lottery period and status
    Stats {
        #[arg(long)]
        period: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = OutputOptions {
        decimals: cli.decimals,
        format: OutputFormat::from(cli.format.as_str()),
    };

    let config = Config::from_env()?;
    let mode = cli.mode.unwrap_or_else(|| config.mode.clone());
    let recipient = to_lower_hex(config.recipient_address.as_slice());
    let token = to_lower_hex(config.token_address.as_slice());

    let db = Database::new(&config.database_url)?;
    let repo = TransferRepository::new(db.conn()?);
    let assigner = LotteryAssigner::new(db.conn()?);

    match cli.command {
        Commands::Cursor => cmd_cursor(&repo, &mode, &output)?,
        Commands::Info { tx_hash } => cmd_info(&repo, &tx_hash, &output)?,
        Commands::Pending {
            value,
            to,
            token: token_override,
            limit,
        } => {
            let query = PendingQuery {
                mode,
                value,
                to: to.unwrap_or(recipient),
                token: token_override.unwrap_or(token),
                limit,
            };
            cmd_pending(&repo, query, &output)?;
        }
        Commands::Latest { from } => cmd_latest(&repo, &mode, &from, &output)?,
        Commands::Assign {
            value,
            numbers,
            period,
            to,
            token: token_override,
        } => {
            let request = AssignmentRequest {
                mode,
                value,
                to_address: to.unwrap_or(recipient),
                token_address: token_override.unwrap_or(token),
                lottery_numbers: numbers,
                lottery_period: period,
            };
            cmd_assign(&assigner, request, &output)?;
        }
        Commands::Claim { tx_hash } => cmd_settle(&assigner, &tx_hash, TransferStatus::Claimed)?,
        Commands::Fail { tx_hash } => cmd_settle(&assigner, &tx_hash, TransferStatus::Failed)?,
        Commands::Stats { period } => cmd_stats(&repo, &mode, period, &output)?,
    }

    Ok(())
}

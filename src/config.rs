use alloy_primitives::Address;
use anyhow::{Context, Result, bail};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: String,
    pub start_block: u64,
    pub token_address: Address,
    pub token_symbol: String,
    pub recipient_address: Address,
    pub rpc_url: String,
    pub backup_rpc_urls: Vec<String>,
    pub database_url: String,
    pub sync: SyncSettings,
    pub primary_recheck: Option<Duration>,
}

/// Tuning knobs for the sync engine and its RPC retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub batch_size: u64,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub batch_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 2000,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(3000),
            batch_delay: Duration::from_millis(500),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &str| var(key).with_context(|| format!("{key} must be set in .env"));

        let mode = var("MODE").unwrap_or_else(|| "base".to_string());

        let start_block = required("START_BLOCK")?
            .parse::<u64>()
            .context("Invalid START_BLOCK format")?;

        let token_address = Address::from_str(&required("TOKEN_ADDRESS")?)
            .context("Invalid TOKEN_ADDRESS format")?;

        let token_symbol = var("TOKEN_SYMBOL").unwrap_or_else(|| "USDC".to_string());

        let recipient_address = Address::from_str(&required("RECIPIENT_ADDRESS")?)
            .context("Invalid RECIPIENT_ADDRESS format")?;

        let rpc_url = required("RPC_URL")?;
        let backup_rpc_urls = var("BACKUP_RPC_URLS")
            .map(|urls| {
                urls.split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let database_url =
            var("DATABASE_URL").unwrap_or_else(|| "sqlite:./transfers.db".to_string());

        let defaults = SyncSettings::default();
        let batch_size = parse_or(&var, "BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            bail!("BATCH_SIZE must be greater than zero");
        }
        let sync = SyncSettings {
            batch_size,
            max_retries: parse_or(&var, "MAX_RETRIES", defaults.max_retries)?,
            retry_delay: millis_or(&var, "RETRY_DELAY_MS", defaults.retry_delay)?,
            poll_interval: millis_or(&var, "POLL_INTERVAL_MS", defaults.poll_interval)?,
            batch_delay: millis_or(&var, "BATCH_DELAY_MS", defaults.batch_delay)?,
        };

        let primary_recheck = var("PRIMARY_RECHECK_SECS")
            .map(|secs| {
                secs.parse::<u64>()
                    .map(Duration::from_secs)
                    .context("Invalid PRIMARY_RECHECK_SECS format")
            })
            .transpose()?;

        Ok(Config {
            mode,
            start_block,
            token_address,
            token_symbol,
            recipient_address,
            rpc_url,
            backup_rpc_urls,
            database_url,
            sync,
            primary_recheck,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid {key} format: {value}")),
        None => Ok(default),
    }
}

fn millis_or<F>(var: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, key, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("START_BLOCK", "17987929"),
        ("TOKEN_ADDRESS", "0xA7ab21686D40Aa35Cb51137A795D84A57352F593"),
        ("RECIPIENT_ADDRESS", "0xbebaf2a9ad714feb9dd151d81dd6d61ae0535646"),
        ("RPC_URL", "https://sepolia.base.org"),
    ];

    #[test]
    fn defaults_fill_optional_settings() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.mode, "base");
        assert_eq!(config.start_block, 17_987_929);
        assert_eq!(config.token_symbol, "USDC");
        assert!(config.backup_rpc_urls.is_empty());
        assert_eq!(config.database_url, "sqlite:./transfers.db");
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(config.primary_recheck, None);
    }

    #[test]
    fn parses_backups_and_tuning() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("MODE", "flow"),
            (
                "BACKUP_RPC_URLS",
                "https://1rpc.io/base-sepolia, https://base-sepolia.blockpi.network/v1/rpc/public,",
            ),
            ("BATCH_SIZE", "1000"),
            ("MAX_RETRIES", "5"),
            ("RETRY_DELAY_MS", "250"),
            ("POLL_INTERVAL_MS", "8000"),
            ("BATCH_DELAY_MS", "0"),
            ("PRIMARY_RECHECK_SECS", "300"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.mode, "flow");
        assert_eq!(
            config.backup_rpc_urls,
            vec![
                "https://1rpc.io/base-sepolia".to_string(),
                "https://base-sepolia.blockpi.network/v1/rpc/public".to_string(),
            ]
        );
        assert_eq!(config.sync.batch_size, 1000);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.retry_delay, Duration::from_millis(250));
        assert_eq!(config.sync.poll_interval, Duration::from_millis(8000));
        assert_eq!(config.sync.batch_delay, Duration::ZERO);
        assert_eq!(config.primary_recheck, Some(Duration::from_secs(300)));
    }

    #[test]
    fn missing_required_key_is_reported() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "RPC_URL")
            .collect();
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("RPC_URL"));
    }

    #[test]
    fn malformed_values_are_configuration_errors() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RECIPIENT_ADDRESS", "0x1234"));
        // later entries win in the lookup map
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("BATCH_SIZE", "0"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RETRY_DELAY_MS", "soon"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }
}

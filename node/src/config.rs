// Node configuration
// CLI args and runtime configuration

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use umbra_core::Address;

/// Block time used when `--dev` is set
const DEV_BLOCK_TIME: Duration = Duration::from_secs(2);

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Umbra - proof-of-storage blockchain node", long_about = None)]
pub struct NodeConfig {
    /// Data directory for blockchain storage
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Directory scanned for plot files (repeatable)
    #[arg(long = "plot-dir")]
    pub plot_dirs: Vec<PathBuf>,

    /// Run in development mode (short block time, dev VDF modulus)
    #[arg(long)]
    pub dev: bool,

    /// Enable block production
    #[arg(long)]
    pub produce: bool,

    /// Miner address (S-prefixed hex); defaults to the genesis address
    #[arg(long)]
    pub miner_address: Option<String>,

    /// Target block time in seconds
    #[arg(long, default_value = "60")]
    pub block_time: u64,

    /// Mempool byte budget
    #[arg(long, default_value = "20971520")]
    pub mempool_max_bytes: usize,

    /// Mempool transaction cap
    #[arg(long, default_value = "10000")]
    pub mempool_max_txs: usize,

    /// Seconds before a pooled transaction expires
    #[arg(long, default_value = "3600")]
    pub tx_expiry_secs: u64,

    /// Farming challenge queue depth
    #[arg(long, default_value = "64")]
    pub farming_queue: usize,

    /// VDF time parameter; 0 disables the VDF worker
    #[arg(long, default_value = "0")]
    pub vdf_time: u64,

    /// VDF modulus in hex; the small dev modulus is used when omitted
    #[arg(long)]
    pub vdf_modulus: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl NodeConfig {
    pub fn parse_args() -> Self {
        NodeConfig::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref addr) = self.miner_address {
            if !Address::is_valid_encoding(addr) {
                return Err(format!("invalid miner address {addr:?}"));
            }
        }
        if self.block_time == 0 {
            return Err("block time must be at least 1 second".to_string());
        }
        if self.mempool_max_bytes == 0 || self.mempool_max_txs == 0 {
            return Err("mempool limits must be positive".to_string());
        }
        if self.farming_queue == 0 {
            return Err("farming queue depth must be positive".to_string());
        }
        if self.produce && self.plot_dirs.is_empty() {
            return Err("block production requires at least one --plot-dir".to_string());
        }
        if let Some(ref modulus) = self.vdf_modulus {
            if hex::decode(modulus).is_err() {
                return Err("vdf modulus must be hex".to_string());
            }
        }
        Ok(())
    }

    /// Chain store directory
    pub fn blockchain_dir(&self) -> PathBuf {
        self.data_dir.join("blockchain")
    }

    /// Plot index directory; wiped and rebuilt on every start
    pub fn plot_index_dir(&self) -> PathBuf {
        self.data_dir.join("plot-index")
    }

    pub fn effective_block_time(&self) -> Duration {
        if self.dev {
            DEV_BLOCK_TIME
        } else {
            Duration::from_secs(self.block_time)
        }
    }

    /// Miner address if one was supplied
    pub fn miner(&self) -> Option<Address> {
        self.miner_address
            .as_deref()
            .and_then(|addr| Address::decode(addr).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> NodeConfig {
        NodeConfig {
            data_dir: PathBuf::from("./data"),
            plot_dirs: vec![PathBuf::from("./plots")],
            dev: false,
            produce: false,
            miner_address: None,
            block_time: 60,
            mempool_max_bytes: 1024 * 1024,
            mempool_max_txs: 100,
            tx_expiry_secs: 3600,
            farming_queue: 64,
            vdf_time: 0,
            vdf_modulus: None,
            verbose: false,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_miner_address_checked() {
        let mut config = base_config();
        config.miner_address = Some("not-an-address".to_string());
        assert!(config.validate().is_err());

        config.miner_address = Some(crate::genesis::genesis_address().encode());
        assert!(config.validate().is_ok());
        assert_eq!(config.miner(), Some(crate::genesis::genesis_address()));
    }

    #[test]
    fn test_produce_requires_plots() {
        let mut config = base_config();
        config.produce = true;
        config.plot_dirs.clear();
        assert!(config.validate().is_err());

        config.plot_dirs.push(PathBuf::from("./plots"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dev_mode_shortens_block_time() {
        let mut config = base_config();
        assert_eq!(config.effective_block_time(), Duration::from_secs(60));
        config.dev = true;
        assert!(config.effective_block_time() < Duration::from_secs(60));
    }
}

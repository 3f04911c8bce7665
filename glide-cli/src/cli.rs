use crate::error::{AppError, Result};
use clap::{Parser, Subcommand};
use glide_engine::GlideConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "glide", version, about = "Headless HLS probe", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Prefetch window length in seconds
    #[arg(long, global = true, default_value_t = 10.0)]
    pub warm: f64,

    /// Maximum simultaneous segment downloads
    #[arg(long, global = true, default_value_t = 3)]
    pub concurrency: usize,

    /// Directory for cached manifests
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Request timeout in seconds (0 disables it)
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout: u64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a manifest and print its qualities and timeline
    Probe {
        /// Master or media playlist URL
        url: String,
    },

    /// Download the window around a position and report what arrived
    Prefetch {
        /// Master or media playlist URL
        url: String,

        /// Position in seconds
        #[arg(long, default_value_t = 0.0)]
        at: f64,

        /// Highest pixel height to select (lowest available when omitted)
        #[arg(long)]
        quality: Option<u32>,
    },
}

impl Args {
    pub fn config(&self) -> Result<GlideConfig> {
        let mut config = GlideConfig::default();
        config.downloader.timeout = Duration::from_secs(self.timeout);
        if let Some(dir) = &self.cache_dir {
            config.downloader.cache_dir = dir.clone();
        }
        config.provider.warm_duration = Duration::try_from_secs_f64(self.warm)
            .map_err(|e| AppError::InvalidInput(format!("--warm {}: {e}", self.warm)))?;
        config.provider.download_concurrency = self.concurrency;
        Ok(config)
    }
}

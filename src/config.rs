//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::correlate::PollPolicy;

/// Name of the state file under `$HOME`.
pub const STATE_FILE_NAME: &str = "opened-files.log";

/// Record which applications are open, and with which files.
#[derive(Debug, Parser)]
#[command(name = "launchtrackd", version, about)]
pub struct Cli {
    /// State file [default: ~/opened-files.log]
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Delay before each window check after a launch.
    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Window checks per launch before giving up.
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub max_attempts: u32,

    /// Do not record launches that opened no files.
    #[arg(long)]
    pub skip_empty: bool,

    /// Do not connect to X11; every launch times out.
    #[arg(long)]
    pub no_x11: bool,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot determine home directory; pass --state-file")]
    NoHome,

    #[error("--poll-interval-ms must be greater than zero")]
    ZeroInterval,

    #[error("--max-attempts must be greater than zero")]
    ZeroAttempts,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_file: PathBuf,
    pub poll: PollPolicy,
    pub skip_empty: bool,
    pub x11: bool,
}

impl Cli {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        let state_file = match self.state_file {
            Some(path) => path,
            None => dirs::home_dir()
                .ok_or(ConfigError::NoHome)?
                .join(STATE_FILE_NAME),
        };

        Ok(Config {
            state_file,
            poll: PollPolicy {
                interval: Duration::from_millis(self.poll_interval_ms),
                max_attempts: self.max_attempts,
            },
            skip_empty: self.skip_empty,
            x11: !self.no_x11,
        })
    }
}

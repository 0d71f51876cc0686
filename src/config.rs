use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Runtime configuration. Every tuning knob that used to be a buried literal
/// (retry counts, timeouts, pacing, wait windows) is a named flag here.
#[derive(Parser, Debug, Clone)]
#[command(name = "uireplay", version, about = "Replay UI action sequences against a persistent Chrome session")]
pub struct Config {
    /// HTTP port. Falls back to the PORT environment variable, then 3000.
    #[arg(long)]
    pub port: Option<u16>,

    /// Launch Chrome with a visible window (enables the manual login flow;
    /// without it the guided form login flow is active).
    #[arg(long)]
    pub interactive: bool,

    /// Directory screenshots are written to and served from.
    #[arg(long, default_value = "screenshots")]
    pub screenshot_dir: PathBuf,

    /// Cookie file location. Defaults to the platform data directory.
    #[arg(long)]
    pub cookie_file: Option<PathBuf>,

    /// Navigation attempts before the request fails.
    #[arg(long, default_value_t = 3)]
    pub nav_attempts: u32,

    /// Seconds to wait for a page load to settle.
    #[arg(long, default_value_t = 60)]
    pub nav_timeout_secs: u64,

    /// Seconds between navigation attempts.
    #[arg(long, default_value_t = 5)]
    pub nav_retry_delay_secs: u64,

    /// Reference pacing interval in milliseconds; per-action delay is this
    /// divided by the request's speed.
    #[arg(long, default_value_t = 1000)]
    pub pace_interval_ms: u64,

    /// Seconds to hold the visible browser open for a manual login.
    #[arg(long, default_value_t = 30)]
    pub login_wait_secs: u64,
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(3000)
    }

    pub fn cookie_file(&self) -> PathBuf {
        self.cookie_file.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("uireplay")
                .join("cookies.json")
        })
    }

    pub fn nav_timeout(&self) -> Duration {
        Duration::from_secs(self.nav_timeout_secs)
    }

    pub fn nav_retry_delay(&self) -> Duration {
        Duration::from_secs(self.nav_retry_delay_secs)
    }

    pub fn login_wait(&self) -> Duration {
        Duration::from_secs(self.login_wait_secs)
    }
}

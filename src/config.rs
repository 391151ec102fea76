use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Pulse real-time server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "pulse-server", version, about = "Real-time presence and notification server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PULSE_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PULSE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./pulse.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PULSE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (SQLite database)
    #[arg(long, env = "PULSE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Idle reaper configuration (loaded from [realtime] section in TOML)
    #[arg(skip)]
    #[serde(default = "default_realtime_config")]
    pub realtime: Option<RealtimeConfig>,
}

/// Configuration for the idle reaper's background sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Interval in seconds between presence idle sweeps (default: 300 = 5 minutes)
    #[serde(default = "default_presence_sweep")]
    pub presence_sweep_secs: u64,

    /// Interval in seconds between connection keepalive sweeps (default: 60)
    #[serde(default = "default_connection_sweep")]
    pub connection_sweep_secs: u64,

    /// Minutes of silence before an online user is demoted to offline (default: 30)
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_mins: u64,

    /// Seconds to pause a sweep loop after a failed iteration (default: 30)
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            presence_sweep_secs: 300,
            connection_sweep_secs: 60,
            idle_threshold_mins: 30,
            error_backoff_secs: 30,
        }
    }
}

fn default_presence_sweep() -> u64 {
    300
}

fn default_connection_sweep() -> u64 {
    60
}

fn default_idle_threshold() -> u64 {
    30
}

fn default_error_backoff() -> u64 {
    30
}

fn default_realtime_config() -> Option<RealtimeConfig> {
    Some(RealtimeConfig::default())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./pulse.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            realtime: Some(RealtimeConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PULSE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PULSE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Pulse Real-time Server Configuration
# Place this file at ./pulse.toml or specify with --config <path>
# All settings can be overridden via environment variables (PULSE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# ---- Idle Reaper ----
# [realtime]

# Interval in seconds between presence idle sweeps (default: 300 = 5 minutes)
# presence_sweep_secs = 300

# Interval in seconds between connection keepalive sweeps (default: 60)
# connection_sweep_secs = 60

# Minutes of silence before an online user is demoted to offline (default: 30)
# idle_threshold_mins = 30

# Seconds to pause a sweep loop after a failed iteration (default: 30)
# error_backoff_secs = 30
"#
    .to_string()
}

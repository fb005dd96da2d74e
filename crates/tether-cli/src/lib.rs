//! CLI argument models and validation for the `tether` binary.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use tether_gateway::GatewayConfig;
use tether_session::IdlePolicy;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "tether",
    about = "OpenAI-compatible proxy for the Cursor agent backend",
    version
)]
/// Public struct `Cli` used across Tether components.
pub struct Cli {
    #[arg(
        long,
        env = "TETHER_BIND",
        default_value = "127.0.0.1:8844",
        help = "Address the gateway listens on."
    )]
    pub bind: String,

    #[arg(
        long,
        env = "TETHER_BASE_URL",
        default_value = "https://api2.cursor.sh",
        help = "Cursor agent backend base URL."
    )]
    pub base_url: String,

    #[arg(
        long,
        env = "TETHER_MODEL",
        default_value = "sonnet-4.5",
        help = "Model used when a request does not name one."
    )]
    pub model: String,

    #[arg(
        long,
        env = "TETHER_WORKSPACE",
        help = "Workspace path advertised to the agent. Defaults to the current directory."
    )]
    pub workspace: Option<PathBuf>,

    #[arg(
        long,
        env = "TETHER_REQUEST_TIMEOUT_MS",
        default_value_t = 120_000,
        value_parser = parse_positive_u64,
        help = "Wall-clock deadline per session in milliseconds."
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long,
        default_value_t = 180_000,
        value_parser = parse_positive_u64,
        help = "Idle cutoff in ms while no progress event has arrived yet."
    )]
    pub heartbeat_idle_ms_no_progress: u64,

    #[arg(
        long,
        default_value_t = 120_000,
        value_parser = parse_positive_u64,
        help = "Idle cutoff in ms after the first progress event."
    )]
    pub heartbeat_idle_ms_progress: u64,

    #[arg(
        long,
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Heartbeat budget while no progress event has arrived yet."
    )]
    pub heartbeat_max_beats_no_progress: u64,

    #[arg(
        long,
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Heartbeat budget after the first progress event."
    )]
    pub heartbeat_max_beats_progress: u64,

    #[arg(long, env = "TETHER_TIMEZONE", help = "IANA timezone sent to the backend.")]
    pub timezone: Option<String>,

    #[arg(
        long,
        env = "TETHER_CREDENTIALS",
        help = "Credential file path. Defaults to the per-OS Cursor auth.json location."
    )]
    pub credentials_path: Option<PathBuf>,

    #[arg(long, action = ArgAction::SetTrue, help = "Verbose protocol logging.")]
    pub debug: bool,

    #[arg(long, action = ArgAction::SetTrue, help = "Log per-turn timing.")]
    pub timing: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
/// Enumerates supported `Command` values.
pub enum Command {
    /// Run the gateway server (the default).
    Serve,
    /// Log in via the browser, or exchange an API key with --api-key.
    Login {
        #[arg(long, help = "Exchange this user API key instead of browser login.")]
        api_key: Option<String>,
    },
    /// Show credential status.
    Status,
    /// List models usable by this account.
    Models,
    /// Remove stored credentials.
    Logout,
}

impl Cli {
    pub fn timezone(&self) -> String {
        self.timezone
            .clone()
            .or_else(|| std::env::var("TZ").ok())
            .filter(|tz| !tz.trim().is_empty())
            .unwrap_or_else(|| "UTC".to_string())
    }

    pub fn workspace_path(&self) -> String {
        self.workspace
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| {
                std::env::current_dir()
                    .map(|dir| dir.display().to_string())
                    .unwrap_or_else(|_| ".".to_string())
            })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            bind: self.bind.clone(),
            base_url: self.base_url.clone(),
            workspace_path: self.workspace_path(),
            default_model: self.model.clone(),
            request_timeout_ms: self.request_timeout_ms,
            idle_policy: IdlePolicy {
                idle_ms_before_progress: self.heartbeat_idle_ms_no_progress,
                max_beats_before_progress: self.heartbeat_max_beats_no_progress,
                idle_ms_after_progress: self.heartbeat_idle_ms_progress,
                max_beats_after_progress: self.heartbeat_max_beats_progress,
            },
            timezone: self.timezone(),
            debug: self.debug,
            timing: self.timing,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_match_the_documented_knobs() {
        let cli = Cli::parse_from(["tether"]);
        assert_eq!(cli.bind, "127.0.0.1:8844");
        assert_eq!(cli.base_url, "https://api2.cursor.sh");
        assert_eq!(cli.request_timeout_ms, 120_000);
        assert_eq!(cli.heartbeat_idle_ms_no_progress, 180_000);
        assert_eq!(cli.heartbeat_idle_ms_progress, 120_000);
        assert_eq!(cli.heartbeat_max_beats_no_progress, 1_000);
        assert!(cli.command.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn gateway_config_carries_idle_policy_overrides() {
        let cli = Cli::parse_from([
            "tether",
            "--heartbeat-idle-ms-progress",
            "5000",
            "--heartbeat-max-beats-progress",
            "7",
            "--model",
            "gpt-5.2",
        ]);
        let config = cli.gateway_config();
        assert_eq!(config.idle_policy.idle_ms_after_progress, 5_000);
        assert_eq!(config.idle_policy.max_beats_after_progress, 7);
        assert_eq!(config.default_model, "gpt-5.2");
    }

    #[test]
    fn regression_zero_timeout_is_rejected() {
        let result = Cli::try_parse_from(["tether", "--request-timeout-ms", "0"]);
        assert!(result.is_err());
    }
}

pub mod config;
pub mod vault;

use clap::{Parser, Subcommand};

/// ModelGate: a multi-tenant provider registry and inference routing gateway.
#[derive(Debug, Parser)]
#[command(name = "modelgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Credential vault utilities.
    #[command(subcommand)]
    Vault(VaultCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum VaultCommand {
    /// Encrypt a plaintext credential read from stdin and print the
    /// ciphertext, using the platform secret from the environment.
    Encrypt,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `MG_CONFIG` (or
/// `config.toml` by default). A missing file means all defaults. Returns
/// the parsed [`Config`](mg_domain::config::Config) and the path that was
/// used.
pub fn load_config() -> anyhow::Result<(mg_domain::config::Config, String)> {
    let config_path = std::env::var("MG_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<mg_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(mg_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}

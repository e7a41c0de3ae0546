//! vellum - operator CLI
//!
//! Inspect the operation catalog, compute cache-key fingerprints and
//! validate configuration files.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vellum::key::user_fingerprint;
use vellum::{AiOperation, CacheKey, Config, KeyValue};

/// Vellum operator CLI
#[derive(Parser)]
#[command(name = "vellum")]
#[command(version = vellum::PKG_VERSION)]
#[command(about = "Response cache and credit ledger tooling")]
struct Args {
    /// Config file (default: ~/.vellum/config.toml, then /etc/vellum/config.toml)
    #[arg(short, long, env = "VELLUM_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the operation catalog with effective cache settings
    Costs,

    /// Print the cache-key fingerprints for a JSON payload
    Fingerprint {
        /// User id the key is scoped to
        #[arg(short, long)]
        user: String,
        /// Payload JSON (or omit to read from stdin)
        payload: Option<String>,
    },

    /// Load and validate the configuration
    CheckConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Costs => {
            let config = Config::load(args.config.as_deref())?;
            println!(
                "{:<18} {:>7} {:>8} {:>11} {:>9} {:>13}",
                "operation", "credits", "premium", "max entries", "ttl", "cost per miss"
            );
            for op in AiOperation::ALL {
                let cache = config.cache_config(op);
                println!(
                    "{:<18} {:>7} {:>8} {:>11} {:>8}s {:>13.3}",
                    op.as_str(),
                    op.credit_cost(),
                    if op.is_premium_only() { "yes" } else { "no" },
                    cache.max_entries,
                    cache.ttl.as_secs(),
                    cache.cost_per_miss,
                );
            }
        }

        Command::Fingerprint { user, payload } => {
            let payload = resolve_text(payload, "fingerprint")?;
            let json: serde_json::Value = serde_json::from_str(&payload)?;
            let key = CacheKey::new(&user, &KeyValue::from(json));
            println!("user:    {}", user_fingerprint(&user));
            println!("payload: {}", key.payload());
            println!("key:     {}", key.fingerprint());
        }

        Command::CheckConfig => {
            let config = Config::load(args.config.as_deref())?;
            println!("configuration ok");
            println!(
                "free plan: {} credits/month",
                config.credits.free_monthly_credits
            );
            println!(
                "ledger: {} attempts, {}ms initial retry delay",
                config.ledger.max_attempts, config.ledger.retry_delay_ms
            );
            let overrides: Vec<&str> = config
                .cache
                .operations
                .keys()
                .map(AiOperation::as_str)
                .collect();
            if overrides.is_empty() {
                println!("cache overrides: none");
            } else {
                println!("cache overrides: {}", overrides.join(", "));
            }
            if config.credits.bypass {
                println!("WARNING: credit bypass is ON, AI operations are not metered");
            }
        }
    }

    Ok(())
}

/// Read an argument, falling back to piped stdin.
fn resolve_text(arg: Option<String>, command: &str) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(text) = arg {
        return Ok(text);
    }
    if io::stdin().is_terminal() {
        return Err(format!("{command}: no input provided (pass it as an argument or via stdin)").into());
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    let trimmed = buf.trim();
    if trimmed.is_empty() {
        return Err(format!("{command}: no input provided (pass it as an argument or via stdin)").into());
    }
    Ok(trimmed.to_string())
}

//! ScopeKV CLI
//!
//! Command-line interface for inspecting and maintaining a namespaced store.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use skv_client::{Config, Store, StoreFactory, DEFAULT_INSTANCE};
use skv_common::codec::decode_lenient;

/// ScopeKV CLI
#[derive(Parser, Debug)]
#[command(name = "skv")]
#[command(about = "CLI for namespaced key-value store maintenance")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store URL, overrides the configuration
    #[arg(short, long)]
    url: Option<String>,

    /// Key namespace, overrides the configuration
    #[arg(short, long)]
    namespace: Option<String>,

    /// Configured instance to use
    #[arg(short, long, default_value = DEFAULT_INSTANCE)]
    instance: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the server
    Ping,

    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// JSON value; anything else is stored as a string
        value: String,

        /// Expiration in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Set hash fields
    Hset {
        /// The hash key
        key: String,

        /// FIELD=VALUE pairs
        #[arg(required = true)]
        fields: Vec<String>,
    },

    /// Print all fields of a hash
    Hgetall {
        /// The hash key
        key: String,
    },

    /// List keys matching a pattern
    Keys {
        #[arg(default_value = "*")]
        pattern: String,
    },

    /// Count keys matching a pattern
    Count {
        #[arg(default_value = "*")]
        pattern: String,
    },

    /// Delete keys matching a pattern
    Clear {
        pattern: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args, |name| std::env::var(name).ok())?;
    debug!(?config, "configuration loaded");

    let factory = StoreFactory::new(config)?;
    let store = factory.store(&args.instance).await?;
    let result = run(&store, args.command).await;

    let closed = factory.shutdown().await?;
    info!(closed, "shutdown complete");
    result
}

/// Builds the configuration: file (or defaults), then `SKV_*` variables
/// looked up through `var`, then command-line flags.
fn load_config(args: &Args, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env_with(var);

    if let Some(url) = &args.url {
        config.store.url = url.clone();
    }
    if let Some(namespace) = &args.namespace {
        config.store.namespace = Some(namespace.clone()).filter(|ns| !ns.is_empty());
    }
    Ok(config)
}

async fn run(store: &Store, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Ping => println!("{}", store.ping().await?),
        Commands::Get { key } => match store.get_lenient(&key).await? {
            Some(value) => println!("{}", render(&value)),
            None => println!("(nil)"),
        },
        Commands::Set { key, value, ttl } => {
            let value = decode_lenient(&value);
            match ttl {
                Some(seconds) => store.set_with_ttl(&key, &value, Duration::from_secs(seconds)).await?,
                None => store.set(&key, &value).await?,
            }
            println!("OK");
        }
        Commands::Del { key } => println!("{}", u8::from(store.delete(&key).await?)),
        Commands::Hset { key, fields } => {
            let pairs = parse_fields(&fields)?;
            println!("{}", store.hset(&key, pairs).await?);
        }
        Commands::Hgetall { key } => {
            let raw: std::collections::HashMap<String, Value> = store.hgetall(&key).await?;
            let mut fields: Vec<_> = raw.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            for (field, value) in fields {
                println!("{field}\t{}", render(&value));
            }
        }
        Commands::Keys { pattern } => {
            for key in store.keys(&pattern).await? {
                println!("{key}");
            }
        }
        Commands::Count { pattern } => println!("{}", store.count(&pattern).await?),
        Commands::Clear { pattern } => {
            let deleted = store.clear(&pattern).await?;
            info!(pattern = %pattern, deleted, "pattern cleared");
            println!("{deleted}");
        }
    }
    Ok(())
}

/// Splits `FIELD=VALUE` arguments. Values that parse as JSON are kept as
/// JSON, anything else becomes a string.
fn parse_fields(pairs: &[String]) -> anyhow::Result<Vec<(String, Value)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((field, value)) if !field.is_empty() => Ok((field.to_string(), decode_lenient(value))),
            _ => bail!("expected FIELD=VALUE, got `{pair}`"),
        })
        .collect()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

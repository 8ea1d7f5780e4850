use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use ratings_seed::{seed_database, SeedPaths, SEED_CONTRACT_VERSION};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "seed")]
#[command(about = "Reseed the ratings database from MovieLens source files")]
struct Cli {
    #[arg(long, default_value = "./ratings.sqlite3")]
    db: PathBuf,

    /// Directory holding u.user, u.item and u.data.
    #[arg(long, default_value = "seed_data")]
    data_dir: PathBuf,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(SEED_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": SEED_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let run = seed_database(&cli.db, &SeedPaths::in_dir(&cli.data_dir))?;
    emit_json(serde_json::to_value(&run)?)
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use llmaven_backend::auth::SqliteKeyStore;
use llmaven_backend::core::config::{AppPaths, ConfigService};

#[derive(Parser)]
#[command(name = "llmaven-users", about = "Manage proxy API keys")]
struct Cli {
    /// Key store database (defaults to KEY_STORE_DB or the data dir)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Register a user and print their new API key
    Add {
        name: String,
        #[arg(long)]
        user_id: Option<String>,
    },
    /// List registered users
    List {
        /// Print full keys instead of a prefix
        #[arg(long)]
        show_keys: bool,
    },
    /// Remove a user and revoke their key
    Remove { user_id: String },
}

fn key_prefix(api_key: &str) -> String {
    let prefix: String = api_key.chars().take(8).collect();
    format!("{}…", prefix)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let db = match cli.db {
        Some(db) => db,
        None => {
            let paths = Arc::new(AppPaths::new());
            let settings = ConfigService::new(paths.clone())
                .load_settings()
                .context("Failed to load settings")?;
            settings
                .auth
                .key_store_db
                .unwrap_or_else(|| paths.key_store_db.clone())
        }
    };
    let store = SqliteKeyStore::open(&db)
        .await
        .with_context(|| format!("Failed to open key store {}", db.display()))?;

    match cli.cmd {
        Cmd::Add { name, user_id } => {
            let record = store.add_user(&name, user_id).await?;
            println!("user_id:  {}", record.user_id);
            println!("name:     {}", record.user_name);
            println!("api_key:  {}", record.api_key);
        }
        Cmd::List { show_keys } => {
            let users = store.list_users().await?;
            if users.is_empty() {
                println!("No users registered in {}", db.display());
            }
            for user in users {
                let key = if show_keys {
                    user.api_key.clone()
                } else {
                    key_prefix(&user.api_key)
                };
                let created = user
                    .created_at
                    .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{}\t{}\t{}\t{}", user.user_id, user.user_name, key, created);
            }
        }
        Cmd::Remove { user_id } => {
            if store.remove_user(&user_id).await? {
                println!("Removed {}", user_id);
            } else {
                anyhow::bail!("No user with ID {}", user_id);
            }
        }
    }

    Ok(())
}

//! Ops CLI for the ontology management daemon's store.
//!
//! Talks straight to Postgres (same env var as the daemon), so it works
//! when the daemon is down — which is exactly when force-unlock matters.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "oms")]
#[command(about = "Ontology management system ops CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Lock administration
    Locks {
        #[command(subcommand)]
        cmd: LockCmd,
    },

    /// Outbox inspection
    Outbox {
        #[command(subcommand)]
        cmd: OutboxCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum LockCmd {
    /// List every lock row with its liveness.
    List,
    /// Drop all locks on a branch and return it to ACTIVE.
    ForceUnlock {
        #[arg(long)]
        branch: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand)]
enum OutboxCmd {
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = oms_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = oms_db::status(&pool).await?;
                    println!("db_ok={} has_core_schema={}", s.ok, s.has_core_schema);
                }
                DbCmd::Migrate => {
                    oms_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Locks { cmd } => {
            let pool = oms_db::connect_from_env().await?;
            let cfg = oms_config::CoreConfig::from_env()?;
            match cmd {
                LockCmd::List => {
                    let now = Utc::now();
                    let grace = cfg.locks.heartbeat_grace_factor;
                    let locks = oms_db::locks_all(&pool)
                        .await
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    for l in locks {
                        println!(
                            "lock_id={} branch={} scope={} type={} holder={} expires_at={} expired={}",
                            l.id,
                            l.branch,
                            l.scope.as_str(),
                            l.lock_type.as_str(),
                            l.holder,
                            l.expires_at_utc.to_rfc3339(),
                            l.is_expired(now, grace),
                        );
                    }
                }
                LockCmd::ForceUnlock { branch, reason } => {
                    let manager = oms_locks::LockManager::new(pool, cfg.locks);
                    let released = manager
                        .force_unlock(&branch, &reason, "oms-cli", true)
                        .await
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    println!("force_unlocked=true branch={branch} released={released}");
                }
            }
        }

        Commands::Outbox { cmd } => {
            let pool = oms_db::connect_from_env().await?;
            match cmd {
                OutboxCmd::Stats => {
                    let s = oms_db::outbox_stats(&pool)
                        .await
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    println!(
                        "pending={} processing={} published={} failed={} dead_letters={}",
                        s.pending, s.processing, s.published, s.failed, s.dead_letters
                    );
                }
            }
        }
    }

    Ok(())
}

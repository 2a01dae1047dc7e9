use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sp_config::UnusedKeyPolicy;
use sp_ledger::{LedgerClient, LedgerError};
use sp_settlement::{bootstrap, EngineSettings, PgSessionStore, SettlementEngine, SettlementError, ValidateRequest};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sp")]
#[command(about = "Shift settlement operator CLI", long_about = None)]
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

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Shift settlement operations
    Shift {
        #[command(subcommand)]
        cmd: ShiftCmd,
    },

    /// Write-ahead settlement intents
    Intents {
        #[command(subcommand)]
        cmd: IntentsCmd,
    },

    /// Read-only ledger queries
    Ledger {
        #[command(subcommand)]
        cmd: LedgerCmd,
    },

    /// Hours and drops totals across sessions
    Stats,
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Refuses while settlement intents are open unless --yes is given.
    Migrate {
        /// Acknowledge that settlements are in flight.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ShiftCmd {
    /// Print the stored session
    Show {
        #[arg(long)]
        id: Uuid,
    },

    /// ongoing -> proposed
    Checkout {
        #[arg(long)]
        id: Uuid,

        /// RFC 3339 end time (default: now)
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },

    /// proposed -> validated: escrow the shift amount and mint a certificate
    Validate {
        #[arg(long)]
        id: Uuid,

        /// Hourly rate override
        #[arg(long)]
        rate: Option<f64>,

        /// RFC 3339 start time override
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// RFC 3339 end time override
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },

    /// validated -> paid: release the escrow
    Release {
        #[arg(long)]
        id: Uuid,
    },

    /// proposed -> refused
    Refuse {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum IntentsCmd {
    /// List open (PENDING / SUBMITTED) and abandoned intents
    List,

    /// Resolve open intents against the ledger
    Reconcile,

    /// Unblock a shift held by an ABANDONED intent. Check the platform account on the ledger first.
    Resolve {
        #[arg(long)]
        id: Uuid,

        /// What the ledger showed
        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Subcommand)]
enum LedgerCmd {
    /// Balance and activation state of an account
    Balance {
        #[arg(long)]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = sp_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = sp_db::status(&pool).await?;
                    println!("db_ok={} has_sessions_table={}", s.ok, s.has_sessions_table);
                }
                DbCmd::Migrate { yes } => {
                    let s = sp_db::status(&pool).await?;
                    if s.has_sessions_table {
                        let open = sp_db::intents_list_open(&pool).await?.len();
                        if open > 0 && !yes {
                            anyhow::bail!(
                                "REFUSING MIGRATE: {} settlement intent(s) are open. Re-run with: `sp-cli db migrate --yes`",
                                open
                            );
                        }
                    }
                    sp_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = sp_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Shift { cmd } => {
            let engine = engine_from_env().await?;
            let out = run_shift(&engine, cmd).await;
            engine.shutdown().await;
            out?;
        }

        Commands::Intents { cmd } => {
            let engine = engine_from_env().await?;
            let out = run_intents(&engine, cmd).await;
            engine.shutdown().await;
            out?;
        }

        Commands::Ledger { cmd } => match cmd {
            LedgerCmd::Balance { address } => {
                let settings = bootstrap::load_settings_from_env(UnusedKeyPolicy::Warn)?;
                let wiring = bootstrap::connect_ledger(&settings.config, &settings.secrets).await?;
                let lookup = wiring.ledger.account_info(&address).await;
                wiring.ledger.disconnect().await;
                match lookup {
                    Ok(info) => println!(
                        "address={} activated=true balance_xrp={:.6} sequence={}",
                        info.address,
                        info.balance.as_xrp(),
                        info.sequence
                    ),
                    Err(LedgerError::AccountNotFound(_)) => {
                        println!("address={} activated=false balance_xrp=0.000000", address)
                    }
                    Err(e) => return Err(anyhow!(e).context("account lookup failed")),
                }
            }
        },

        Commands::Stats => {
            let pool = sp_db::connect_from_env().await?;
            let s = sp_db::settlement_stats(&pool).await?;
            println!("total_hours={:.4}", s.total_hours);
            println!("escrowed_xrp={:.6}", sp_ledger::drops_to_xrp(s.escrowed_drops));
            println!("paid_xrp={:.6}", sp_ledger::drops_to_xrp(s.paid_drops));
            for (status, n) in &s.by_status {
                println!("sessions_{}={}", status, n);
            }
        }
    }

    Ok(())
}

async fn run_shift(engine: &SettlementEngine, cmd: ShiftCmd) -> Result<()> {
    match cmd {
        ShiftCmd::Show { id } => {
            let row = settle(engine.get_shift(id).await)?;
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
        ShiftCmd::Checkout { id, end } => {
            let out = settle(engine.check_out_shift(id, end).await)?;
            println!(
                "session_id={} status={} end_time_utc={}",
                out.session_id,
                out.status,
                out.end_time_utc.to_rfc3339()
            );
        }
        ShiftCmd::Validate { id, rate, start, end } => {
            let req = ValidateRequest {
                hourly_rate: rate,
                start_time_utc: start,
                end_time_utc: end,
            };
            let out = settle(engine.validate_shift(id, &req).await)?;
            println!("session_id={}", out.session_id);
            println!("status={}", out.status);
            println!("hours={:.4}", out.hours);
            println!("amount_total={:.6}", out.amount_total);
            println!("escrow_tx={}", out.escrow_tx);
            println!("certificate_id={}", out.certificate_id.as_deref().unwrap_or(""));
            println!("release_after_utc={}", out.release_after_utc.to_rfc3339());
        }
        ShiftCmd::Release { id } => {
            let out = settle(engine.release_shift_payment(id).await)?;
            println!(
                "session_id={} status={} payment_tx={}",
                out.session_id, out.status, out.payment_tx
            );
        }
        ShiftCmd::Refuse { id } => {
            let out = settle(engine.refuse_shift(id).await)?;
            println!("session_id={} status={}", out.session_id, out.status);
        }
    }
    Ok(())
}

async fn run_intents(engine: &SettlementEngine, cmd: IntentsCmd) -> Result<()> {
    match cmd {
        IntentsCmd::List => {
            let open = settle(engine.open_intents().await)?;
            let abandoned = settle(engine.abandoned_intents().await)?;
            println!("open_intents={}", open.len());
            println!("abandoned_intents={}", abandoned.len());
            for i in open.iter().chain(abandoned.iter()) {
                println!(
                    "intent_id={} session_id={} kind={} status={} tx_hash={} created_at_utc={}",
                    i.intent_id,
                    i.session_id,
                    i.kind.as_str(),
                    i.status.as_str(),
                    i.tx_hash.as_deref().unwrap_or(""),
                    i.created_at_utc.to_rfc3339()
                );
            }
        }
        IntentsCmd::Reconcile => {
            let r = settle(engine.reconcile_open_intents(Utc::now()).await)?;
            println!(
                "inspected={} committed={} failed={} abandoned={} untouched={}",
                r.inspected, r.committed, r.failed, r.abandoned, r.untouched
            );
        }
        IntentsCmd::Resolve { id, note } => {
            settle(engine.resolve_abandoned_intent(id, note.as_deref()).await)?;
            println!("intent_id={} status=RESOLVED", id);
        }
    }
    Ok(())
}

/// Logs go to stderr so stdout stays `key=value`.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn engine_from_env() -> Result<SettlementEngine> {
    let settings = bootstrap::load_settings_from_env(UnusedKeyPolicy::Warn)?;
    let pool = sp_db::connect_from_env().await?;
    let wiring = bootstrap::connect_ledger(&settings.config, &settings.secrets)
        .await
        .context("ledger wiring failed")?;
    Ok(SettlementEngine::new(
        Arc::new(PgSessionStore::new(pool)),
        wiring.ledger,
        wiring.platform,
        EngineSettings::from_config(&settings.config),
    ))
}

/// Attach the category and remediation hint to a settlement failure.
fn settle<T>(r: std::result::Result<T, SettlementError>) -> Result<T> {
    r.map_err(|e| anyhow!("{e} [category={}]\nhint: {}", e.category(), e.hint()))
}

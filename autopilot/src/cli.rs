//! Command-line surface: `run`, `tick`, `reconcile`, `simulate`, `doctor`.
//!
//! Every command prints JSON lines to stdout and exits non-zero on
//! unrecoverable errors; `run` exits 0 on a cooperative stop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use engine::manifest::{DeliverableManifest, sign, verify};
use engine::policy::PolicyOverrides;
use engine::simulator::{SimulationInput, simulate_tick};
use market::api::{JobQuery, MarketApi};
use market::client::HttpMarketClient;
use store::StateStore;

use crate::config::{AppConfig, StateDriver};
use crate::orchestrator::{self, LoopOptions};

#[derive(Debug, Parser)]
#[clap(name = "autopilot", version, about = "Autonomous NEAR job-marketplace worker")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the tick loop until interrupted.
    Run {
        #[clap(long)]
        config: PathBuf,

        /// Milliseconds between tick starts.
        #[clap(long, default_value_t = 60_000)]
        interval_ms: u64,
    },

    /// Execute exactly one tick and print its result.
    Tick {
        #[clap(long)]
        config: PathBuf,
    },

    /// Rebuild the settlement report; no bids, withdrawals, or submissions.
    Reconcile {
        #[clap(long)]
        config: PathBuf,

        /// Completed jobs to scan.
        #[clap(long, default_value_t = 100)]
        limit: u32,
    },

    /// Project a tick over a snapshot file. Pure: no network, no state.
    Simulate {
        #[clap(long)]
        input: PathBuf,

        /// Policy overrides file; replaces the snapshot's policy when set.
        #[clap(long)]
        policy: Option<PathBuf>,
    },

    /// Validate config, state store, marketplace reachability, and signing.
    Doctor {
        #[clap(long)]
        config: PathBuf,
    },
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run {
            config,
            interval_ms,
        } => run(&config, interval_ms).await,
        Command::Tick { config } => tick(&config).await,
        Command::Reconcile { config, limit } => reconcile(&config, limit).await,
        Command::Simulate { input, policy } => simulate(&input, policy.as_deref()),
        Command::Doctor { config } => doctor(&config).await,
    }
}

async fn run(config_path: &Path, interval_ms: u64) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let pilot = orchestrator::bootstrap(&config).await?;

    pilot.telemetry().subscribe(|event| {
        tracing::debug!(
            target: "telemetry",
            event_type = %event.event_type,
            fields = %event.fields,
            "telemetry event"
        );
    });

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received; stopping after the current tick");
            stop_flag.store(true, Ordering::SeqCst);
        }
    });

    let options = LoopOptions {
        interval_ms,
        max_ticks: None,
    };

    // A halted tick ends the run; no further cycles until an operator
    // intervenes.
    let mut halted = false;
    let stop_on_halt = stop.clone();
    let ticks = pilot
        .run_loop(options, stop, |result| {
            print_json(result);
            if result.halted {
                halted = true;
                stop_on_halt.store(true, Ordering::SeqCst);
            }
        })
        .await;

    info!(ticks, halted, "run loop exited");
    if halted {
        anyhow::bail!("tick halted");
    }
    Ok(())
}

async fn tick(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let pilot = orchestrator::bootstrap(&config).await?;

    let result = pilot.run_tick().await;
    print_json(&result);

    if result.halted {
        anyhow::bail!("tick halted");
    }
    Ok(())
}

async fn reconcile(config_path: &Path, limit: u32) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let pilot = orchestrator::bootstrap(&config).await?;

    let report = pilot.reconcile(limit).await?;
    print_json(&report);
    Ok(())
}

fn simulate(input_path: &Path, policy_path: Option<&Path>) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(input_path)
        .with_context(|| format!("read snapshot {}", input_path.display()))?;
    let mut input: SimulationInput =
        serde_json::from_str(&raw).context("parse simulation snapshot")?;

    if let Some(policy_path) = policy_path {
        let raw = std::fs::read_to_string(policy_path)
            .with_context(|| format!("read policy {}", policy_path.display()))?;
        let overrides: PolicyOverrides =
            serde_json::from_str(&raw).context("parse policy overrides")?;
        input.policy = Some(overrides);
    }

    let output = simulate_tick(&input)?;
    print_json(&output);
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DoctorCheck {
    name: &'static str,
    ok: bool,
    detail: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DoctorReport {
    healthy: bool,
    checks: Vec<DoctorCheck>,
}

async fn doctor(config_path: &Path) -> anyhow::Result<()> {
    let mut checks = Vec::new();

    let config = match AppConfig::load(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config",
                ok: true,
                detail: format!("agent {}", config.agent_id),
            });
            config
        }
        Err(err) => {
            checks.push(DoctorCheck {
                name: "config",
                ok: false,
                detail: err.to_string(),
            });
            let report = DoctorReport {
                healthy: false,
                checks,
            };
            print_json(&report);
            anyhow::bail!("configuration invalid");
        }
    };

    checks.push(probe_store(&config).await);
    checks.push(probe_market(&config).await);
    checks.push(probe_signing(&config));
    if config.near_price_usd.is_none() {
        checks.push(DoctorCheck {
            name: "near_price",
            ok: true,
            detail: "nearPriceUsd not set; settlement USD totals will be zero".to_string(),
        });
    }

    let healthy = checks.iter().all(|check| check.ok);
    let report = DoctorReport { healthy, checks };
    print_json(&report);

    if !healthy {
        anyhow::bail!("doctor found problems");
    }
    Ok(())
}

async fn probe_store(config: &AppConfig) -> DoctorCheck {
    const PROBE_KEY: &str = "doctor:probe";

    let store: Box<dyn StateStore> = match config.state.driver {
        StateDriver::File => match store::file::FileStore::open(&config.state.path).await {
            Ok(store) => Box::new(store),
            Err(err) => {
                return DoctorCheck {
                    name: "state_store",
                    ok: false,
                    detail: err.to_string(),
                };
            }
        },
        StateDriver::Sqlite => match store::sqlite::SqliteStore::open(&config.state.path).await {
            Ok(store) => Box::new(store),
            Err(err) => {
                return DoctorCheck {
                    name: "state_store",
                    ok: false,
                    detail: err.to_string(),
                };
            }
        },
    };

    let round_trip = async {
        store.set(PROBE_KEY, "ok").await?;
        let read = store.get(PROBE_KEY).await?;
        store.del(PROBE_KEY).await?;
        Ok::<_, store::StoreError>(read)
    };

    match round_trip.await {
        Ok(Some(value)) if value == "ok" => DoctorCheck {
            name: "state_store",
            ok: true,
            detail: format!("{} driver writable", config.state.path),
        },
        Ok(_) => DoctorCheck {
            name: "state_store",
            ok: false,
            detail: "probe value did not round-trip".to_string(),
        },
        Err(err) => DoctorCheck {
            name: "state_store",
            ok: false,
            detail: err.to_string(),
        },
    }
}

async fn probe_market(config: &AppConfig) -> DoctorCheck {
    let client = match HttpMarketClient::new(config.market_config()) {
        Ok(client) => client,
        Err(err) => {
            return DoctorCheck {
                name: "market",
                ok: false,
                detail: err.to_string(),
            };
        }
    };

    let query = JobQuery {
        limit: Some(1),
        ..JobQuery::default()
    };
    match client.list_jobs(&query).await {
        Ok(_) => DoctorCheck {
            name: "market",
            ok: true,
            detail: format!("{} reachable", config.market.base_url),
        },
        Err(err) => DoctorCheck {
            name: "market",
            ok: false,
            detail: err.to_string(),
        },
    }
}

fn probe_signing(config: &AppConfig) -> DoctorCheck {
    let Some(key) = &config.submit_signing_key else {
        return DoctorCheck {
            name: "signing",
            ok: true,
            detail: "no signing key configured; manifests ship unsigned".to_string(),
        };
    };

    let manifest = DeliverableManifest {
        job_id: "probe".to_string(),
        assignment_id: "probe".to_string(),
        bid_id: "probe".to_string(),
        agent_id: config.agent_id.clone(),
        deliverable_url: "https://probe.invalid/artifact".to_string(),
        artifact_hash: "0".repeat(64),
        created_at: "1970-01-01T00:00:00.000Z".to_string(),
        metadata: serde_json::json!({}),
    };

    match sign(&manifest, key.as_bytes(), config.signer_id())
        .and_then(|signed| verify(&signed, key.as_bytes()))
    {
        Ok(true) => DoctorCheck {
            name: "signing",
            ok: true,
            detail: format!("hmac-sha256 as {}", config.signer_id()),
        },
        Ok(false) => DoctorCheck {
            name: "signing",
            ok: false,
            detail: "sign/verify round-trip failed".to_string(),
        },
        Err(err) => DoctorCheck {
            name: "signing",
            ok: false,
            detail: err.to_string(),
        },
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::error!(error = %err, "could not serialize output"),
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use sremedic::config::Config;
use sremedic::model::{Incident, InjectRequest};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sremedic",
    about = "Agentic, read-only SRE incident responder for Kubernetes",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + incident pipeline)
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Inject a demo incident and run the pipeline to completion
    Inject {
        /// Incident type: crashloop, rollout_failure or high_latency
        #[arg(long)]
        incident_type: String,

        /// Target namespace
        #[arg(long, default_value = "default")]
        namespace: String,

        /// Target workload name
        #[arg(long)]
        workload: Option<String>,

        /// Alert severity label
        #[arg(long, default_value = "high")]
        severity: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Inspect stored incidents
    Incidents {
        #[command(subcommand)]
        action: IncidentAction,
    },
}

#[derive(Subcommand)]
enum IncidentAction {
    /// List incident summaries, newest first
    List,

    /// Show one full incident record as JSON
    Show {
        /// Incident id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        cfg.db_path = db;
    }

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.bind = bind;
            }
            tracing::info!(bind = %cfg.bind, "starting sremedic daemon");
            sremedic::serve(cfg).await?;
        }
        Commands::Inject { incident_type, namespace, workload, severity, json } => {
            let runtime = sremedic::build_runtime(&cfg)?;
            let req = InjectRequest { incident_type, namespace, workload, severity };
            let ingested = runtime
                .orchestrator
                .handle_inject(&req, uuid::Uuid::new_v4().to_string())?;
            let incident_id = ingested.incident.incident_id.clone();
            if let Err(err) = runtime.orchestrator.run_pipeline(&incident_id).await {
                tracing::warn!(error = %err, "pipeline did not complete");
            }
            let incident = runtime
                .store
                .get_incident(&incident_id)?
                .ok_or_else(|| anyhow::anyhow!("incident {} disappeared", incident_id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&incident)?);
            } else {
                print_report(&incident);
            }
        }
        Commands::Incidents { action } => {
            let runtime = sremedic::build_runtime(&cfg)?;
            match action {
                IncidentAction::List => {
                    let summaries = runtime.store.list_incidents()?;
                    if summaries.is_empty() {
                        println!("No incidents recorded.");
                    } else {
                        println!(
                            "{:<38} | {:<13} | {:<16} | {:<8} | Summary",
                            "Incident", "Status", "Type", "Severity"
                        );
                        println!(
                            "{:-<38}-|-{:-<13}-|-{:-<16}-|-{:-<8}-|-{:-<30}",
                            "", "", "", "", ""
                        );
                        for s in summaries {
                            println!(
                                "{:<38} | {:<13} | {:<16} | {:<8} | {}",
                                s.incident_id, s.status.to_string(), s.incident_type.to_string(),
                                s.severity.to_string(), s.summary
                            );
                        }
                    }
                }
                IncidentAction::Show { id } => {
                    match runtime.store.get_incident(&id)? {
                        Some(incident) => {
                            println!("{}", serde_json::to_string_pretty(&incident)?)
                        }
                        None => println!("Incident {} not found.", id),
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_report(incident: &Incident) {
    println!("\n=== sremedic Incident Report ===");
    println!("Incident:   {}", incident.incident_id);
    println!("Type:       {}", incident.incident_type);
    println!("Severity:   {}", incident.severity);
    println!("Status:     {}", incident.status);
    println!("Degraded:   {}", incident.degraded);
    println!("Summary:    {}", incident.summary);

    println!("\nEvidence:");
    for e in &incident.evidence {
        println!(" - [{}] {}", e.source, e.detail);
    }

    println!("\nRoot-cause hypotheses:");
    for h in &incident.root_cause_hypotheses {
        println!(" - {} (confidence {:.2})", h.hypothesis, h.confidence);
    }

    println!("\nRecommended actions:");
    for a in &incident.recommended_actions {
        println!(" - [{} risk] {} (confidence {:.2})", a.risk, a.action, a.confidence);
    }

    if !incident.links.is_empty() {
        println!("\nUseful commands:");
        for link in &incident.links {
            println!(" - {}", link);
        }
    }

    println!("\nStage timings:");
    for t in &incident.stage_timings {
        println!(" - {:<12} {} ms", t.stage.to_string(), t.duration_ms);
    }
    println!("================================\n");
}

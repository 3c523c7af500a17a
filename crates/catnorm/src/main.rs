//! Thin CLI driving `NormalizationService` locally (§6a): a control-plane
//! client paired with the core the way `casparian-sentinel`'s own binary
//! is a thin ZMQ front end over `Sentinel`, minus the transport — every
//! subcommand here calls the facade directly in-process.

mod config;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use catnorm_db::{create_pool, DbConfig};
use catnorm_events::EventBus;
use catnorm_ids::{ProjectId, SessionId, SourceDatabaseId};
use catnorm_llm::{GatewayConfig, GenericOpenAiCompatible, LlmGateway, ProviderRouter, RouteConfig, RoutedProvider};
use catnorm_logging::{init_logging, LogConfig};
use catnorm_protocol::config::{Config, ProviderConfig};
use catnorm_protocol::{ProjectType, Stage};
use catnorm_session::NormalizationService;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "catnorm", about = "Catalog Normalizer core CLI")]
struct Cli {
    /// Path to the persisted configuration document (§6).
    #[arg(long, global = true, env = "CATNORM_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the redacted configuration document currently on disk.
    ConfigShow,
    /// Register a client.
    ClientAdd {
        name: String,
        #[arg(long)]
        country: Option<String>,
    },
    ClientList,
    /// Register a project under a client.
    ProjectAdd {
        #[arg(long)]
        client: String,
        name: String,
        #[arg(long, default_value = "nomenclature")]
        project_type: ProjectType,
    },
    ProjectList {
        #[arg(long)]
        client: String,
    },
    /// Bind a source-database file to a project and mark it active.
    SourceDbBind {
        #[arg(long)]
        project: String,
        #[arg(long)]
        display_name: Option<String>,
        path: PathBuf,
        #[arg(long, default_value = "nomenclature")]
        database_type: ProjectType,
    },
    SourceDbList {
        #[arg(long)]
        project: String,
    },
    /// Start a normalization session.
    SessionStart {
        #[arg(long)]
        project: String,
        #[arg(long)]
        source_db: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long, default_value_t = 0)]
        timeout_seconds: u64,
    },
    SessionStop {
        session: String,
    },
    SessionStatus {
        session: String,
    },
    SessionHistory {
        session: String,
    },
    SessionRevert {
        session: String,
        stage: Stage,
    },
    SessionApplyPatterns {
        session: String,
    },
    SessionApplyAi {
        session: String,
    },
    SessionApplyCategorization {
        session: String,
    },
    /// Stream events as server-sent-event text, optionally scoped to one session.
    SessionWatch {
        #[arg(long)]
        session: Option<String>,
    },
    /// Read-only project statistics ahead of a run (§4.10).
    Preview {
        project: String,
    },
    /// Block, handling SIGINT/SIGTERM with a graceful drain (§6).
    Serve,
}

struct App {
    db: catnorm_db::DbPool,
    service: NormalizationService,
}

impl App {
    async fn new(config: &Config) -> Result<Self> {
        let db = create_pool(DbConfig::read_write(
            config.service_database_path.clone(),
            config.max_open_conns,
            config.conn_max_lifetime_seconds,
        ))
        .await
        .context("failed to open service database")?;
        catnorm_state::schema::ensure_schema(&db)
            .await
            .context("failed to ensure schema")?;

        let events = EventBus::new();
        let llm = build_gateway(&config.providers);
        let service = NormalizationService::new(db.clone(), events, llm);

        Ok(Self { db, service })
    }
}

/// Build the LLM gateway from configured providers (§4.4, §6). Every
/// provider is treated as an OpenAI-wire-compatible endpoint: the
/// persisted config carries no provider "kind" field to branch on.
fn build_gateway(providers: &[ProviderConfig]) -> Option<Arc<LlmGateway>> {
    if providers.is_empty() {
        return None;
    }

    let routed: Vec<RoutedProvider> = providers
        .iter()
        .map(|provider| {
            let client = GenericOpenAiCompatible::new(
                provider.name.clone(),
                provider.endpoint.clone(),
                provider.api_key.clone(),
            );
            let route = RouteConfig {
                priority: provider.priority,
                weight: provider.weight,
                enabled: provider.enabled,
                max_concurrent: provider.max_workers,
                rate_per_sec: provider.rate_per_sec,
                breaker_threshold: 5,
                breaker_cooldown: Duration::from_secs(30),
                max_wait: Duration::from_secs(5),
            };
            RoutedProvider::new(Arc::new(client), route)
        })
        .collect();

    let router = ProviderRouter::new(routed);
    Some(Arc::new(LlmGateway::new(router, GatewayConfig::default())))
}

fn parse_project(s: &str) -> Result<ProjectId> {
    ProjectId::parse(s).map_err(|e| anyhow::anyhow!(e.to_string()))
}

fn parse_source_db(s: &str) -> Result<SourceDatabaseId> {
    SourceDatabaseId::parse(s).map_err(|e| anyhow::anyhow!(e.to_string()))
}

fn parse_session(s: &str) -> Result<SessionId> {
    SessionId::parse(s).map_err(|e| anyhow::anyhow!(e.to_string()))
}

fn parse_client(s: &str) -> Result<catnorm_ids::ClientId> {
    catnorm_ids::ClientId::parse(s).map_err(|e| anyhow::anyhow!(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "catnorm",
        verbose: cli.verbose,
        quiet_console: false,
    })
    .context("failed to initialize logging")?;

    let config_path = cli.config.clone().unwrap_or_else(config::default_path);

    if matches!(cli.command, Command::ConfigShow) {
        let config = config::load(&config_path)?;
        println!("{}", serde_json::to_string_pretty(&config.to_public())?);
        return Ok(());
    }

    let config = config::load(&config_path)?;
    let live_config = Arc::new(ArcSwap::from_pointer(Box::into_raw(Box::new(config.clone()))));
    let app = App::new(&config).await?;

    let result = run_command(&app, cli.command).await;

    // The live config cell exists so a long-running `serve` invocation can
    // observe `config reload` elsewhere in the process tree; nothing in
    // this short-lived CLI path needs it beyond keeping it alive.
    drop(live_config);

    result
}

async fn run_command(app: &App, command: Command) -> Result<()> {
    match command {
        Command::ConfigShow => unreachable!("handled before App::new"),
        Command::ClientAdd { name, country } => {
            let id = catnorm_state::clients::create(&app.db, &name, country.as_deref()).await?;
            println!("{id}");
        }
        Command::ClientList => {
            let clients = list_all_clients(&app.db).await?;
            for client in clients {
                println!("{}\t{}\t{}", client.id, client.name, client.country.unwrap_or_default());
            }
        }
        Command::ProjectAdd { client, name, project_type } => {
            let client_id = parse_client(&client)?;
            let id = catnorm_state::projects::create(&app.db, client_id, &name, project_type).await?;
            println!("{id}");
        }
        Command::ProjectList { client } => {
            let client_id = parse_client(&client)?;
            for project in catnorm_state::projects::list_for_client(&app.db, client_id).await? {
                println!("{}\t{}\t{}", project.id, project.name, project.project_type);
            }
        }
        Command::SourceDbBind { project, display_name, path, database_type } => {
            let project_id = parse_project(&project)?;
            catnorm_db::validate_source_database(&path).context("source database failed validation")?;
            let file_size = std::fs::metadata(&path)?.len();
            let path_str = path.to_string_lossy().to_string();
            let display_name = catnorm_state::source_databases::resolve_display_name(
                display_name.as_deref(),
                path.file_name().and_then(|n| n.to_str()).unwrap_or("source"),
            );
            let id = catnorm_state::source_databases::create(
                &app.db,
                project_id,
                &display_name,
                &path_str,
                database_type,
                file_size,
            )
            .await?;
            catnorm_state::source_databases::set_status(
                &app.db,
                id,
                catnorm_state::models::SourceDatabaseStatus::Active,
            )
            .await?;
            println!("{id}");
        }
        Command::SourceDbList { project } => {
            let project_id = parse_project(&project)?;
            for source in catnorm_state::source_databases::list_for_project(&app.db, project_id).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    source.id, source.display_name, source.database_type, source.status, source.path
                );
            }
        }
        Command::SessionStart { project, source_db, priority, timeout_seconds } => {
            let project_id = parse_project(&project)?;
            let source_database_id = parse_source_db(&source_db)?;
            let id = app.service.start(project_id, source_database_id, priority, timeout_seconds).await?;
            println!("{id}");
        }
        Command::SessionStop { session } => {
            app.service.stop(parse_session(&session)?).await?;
        }
        Command::SessionStatus { session } => {
            println!("{}", app.service.status(parse_session(&session)?).await?);
        }
        Command::SessionHistory { session } => {
            for outcome in app.service.history(parse_session(&session)?).await? {
                println!(
                    "{}\tv{}\tin={}\tout={}\tfailed={}",
                    outcome.stage, outcome.version, outcome.rows_in, outcome.rows_out, outcome.rows_failed
                );
            }
        }
        Command::SessionRevert { session, stage } => {
            app.service.revert(parse_session(&session)?, stage).await?;
        }
        Command::SessionApplyPatterns { session } => {
            print_stats(app.service.apply_patterns(parse_session(&session)?).await?);
        }
        Command::SessionApplyAi { session } => {
            print_stats(app.service.apply_ai(parse_session(&session)?).await?);
        }
        Command::SessionApplyCategorization { session } => {
            print_stats(app.service.apply_categorization(parse_session(&session)?).await?);
        }
        Command::SessionWatch { session } => {
            let filter = session.as_deref().map(parse_session).transpose()?;
            let mut stream = app.service.subscribe(filter);
            loop {
                match stream.recv().await {
                    Ok(event) => print!("{}", event.to_sse()?),
                    Err(_closed) => break,
                }
            }
        }
        Command::Preview { project } => {
            let project_id = parse_project(&project)?;
            let preview = app.service.preview_stats(project_id).await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        Command::Serve => {
            serve().await?;
            app.service.shutdown(Duration::from_secs(30)).await;
            info!("graceful shutdown complete");
        }
    }
    Ok(())
}

fn print_stats(stats: catnorm_stages_stats_shim::StageStats) {
    println!(
        "in={}\tout={}\tfailed={}\textra={}",
        stats.rows_in, stats.rows_out, stats.rows_failed, stats.extra
    );
}

/// Re-exported purely so `print_stats` doesn't need `catnorm_stages` as a
/// direct dependency just for one type name.
mod catnorm_stages_stats_shim {
    pub use catnorm_session::StageStatsAlias as StageStats;
}

async fn list_all_clients(pool: &catnorm_db::DbPool) -> Result<Vec<catnorm_state::models::Client>> {
    // No list-all-clients repository function exists (clients are always
    // looked up by id or enumerated per project in this schema); the CLI's
    // `client list` therefore reads the table directly rather than adding
    // a repository function only the CLI would call.
    let rows = sqlx::query("SELECT id, name, country, created_at FROM clients ORDER BY created_at")
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| {
            catnorm_state::models::Client::from_row(row).map_err(|e| anyhow::anyhow!(e.to_string()))
        })
        .collect()
}

/// Block until SIGINT/SIGTERM, then return so the caller can drain
/// sessions and close pools (§6 "Exit/status signals").
async fn serve() -> Result<()> {
    info!("catnorm serve: waiting for shutdown signal");
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    info!("shutdown signal received, draining");
    Ok(())
}

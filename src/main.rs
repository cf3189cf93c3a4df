use std::sync::Arc;

use alerter::{TelegramAlerter, WebhookAlerter, run_alerter_service};
use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use configuration::load_settings;
use engine::{Context, run_maintenance, run_reconciler, run_scheduler};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref()).context("failed to load config.toml")?;
    init_tracing(&settings.logging.level);

    tracing::info!("zenith engine starting up");

    match cli.command {
        Commands::Migrate => handle_migrate().await,
        Commands::Run => handle_run(settings).await,
        Commands::Scheduler => handle_scheduler(settings).await,
        Commands::Reconciler => handle_reconciler(settings).await,
        Commands::Worker => handle_worker(settings).await,
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file (defaults to `config.toml`).
    #[arg(long, short)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations and exit.
    Migrate,
    /// Run the scheduler sweep, the position-sync reconciler, and the
    /// action-log maintenance task together in a single process.
    Run,
    /// Run only the scheduler sweep and the maintenance task.
    Scheduler,
    /// Run only the position-sync reconciler.
    Reconciler,
    /// Alias for `run`, kept for deployments that launch one process per role.
    Worker,
}

async fn handle_migrate() -> Result<()> {
    let pool = database::connect().await.context("failed to connect to postgres")?;
    database::run_migrations(&pool).await.context("migration failed")?;
    tracing::info!("migrations applied");
    Ok(())
}

async fn handle_run(settings: configuration::Settings) -> Result<()> {
    let ctx = Arc::new(Context::build(settings).await.context("failed to build engine context")?);
    spawn_alerter(&ctx);

    let scheduler = tokio::spawn(run_scheduler(Arc::clone(&ctx)));
    let maintenance = tokio::spawn(run_maintenance(Arc::clone(&ctx)));
    let reconciler = tokio::spawn(run_reconciler(Arc::clone(&ctx)));

    tokio::select! {
        res = scheduler => tracing::error!(?res, "scheduler task exited"),
        res = maintenance => tracing::error!(?res, "maintenance task exited"),
        res = reconciler => tracing::error!(?res, "reconciler task exited"),
    }

    Ok(())
}

async fn handle_scheduler(settings: configuration::Settings) -> Result<()> {
    let ctx = Arc::new(Context::build(settings).await.context("failed to build engine context")?);
    spawn_alerter(&ctx);

    let scheduler = tokio::spawn(run_scheduler(Arc::clone(&ctx)));
    let maintenance = tokio::spawn(run_maintenance(ctx));

    tokio::select! {
        res = scheduler => tracing::error!(?res, "scheduler task exited"),
        res = maintenance => tracing::error!(?res, "maintenance task exited"),
    }

    Ok(())
}

async fn handle_reconciler(settings: configuration::Settings) -> Result<()> {
    let ctx = Arc::new(Context::build(settings).await.context("failed to build engine context")?);
    spawn_alerter(&ctx);

    run_reconciler(ctx).await;
    Ok(())
}

async fn handle_worker(settings: configuration::Settings) -> Result<()> {
    handle_run(settings).await
}

/// Subscribes the Telegram/webhook alerters to the context's event bus, if configured.
fn spawn_alerter(ctx: &Arc<Context>) {
    if let Some(alerter) = TelegramAlerter::new(&ctx.settings.telegram) {
        let webhook = WebhookAlerter::new(&ctx.settings.notification);
        if webhook.is_some() {
            tracing::info!("webhook notification sink enabled");
        }
        let rx = ctx.events.subscribe();
        tokio::spawn(run_alerter_service(alerter, webhook, rx));
        tracing::info!("telegram alerter service started");
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

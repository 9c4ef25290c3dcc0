//! `iam-admin`: migrations, event export and the projection runner.
//!
//! ```bash
//! EVENTS_DATABASE_URL=postgres://localhost/iam iam-admin migrate
//! iam-admin export INSTANCE > instance.jsonl
//! RUST_LOG=sourced_iam_projections=debug iam-admin project
//! ```

use anyhow::Context;
use clap::Parser;
use sourced_iam_admin::{AdminConfig, Cli, Command, ProjectionStores, export_events, run_projections};
use sourced_iam_postgres::PostgresEventStore;
use sourced_iam_projections::{PostgresFailedEvents, PostgresProjectionStore};
use sqlx::PgPool;
use std::io::BufWriter;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so `export` output stays clean.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sourced_iam=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(command: Command) -> anyhow::Result<()> {
    let config = AdminConfig::from_env().context("loading configuration")?;
    let (events_pool, projections_pool) = connect(&config).await?;
    let event_store = PostgresEventStore::from_pool(events_pool);

    match command {
        Command::Migrate => {
            event_store.migrate().await.context("migrating event log")?;
            PostgresProjectionStore::new(projections_pool)
                .migrate()
                .await
                .context("migrating projection tables")?;
            tracing::info!("Migrations applied");
        }
        Command::Export { instance_id } => {
            let mut out = BufWriter::new(std::io::stdout());
            export_events(&event_store, &instance_id, config.export_page_size, &mut out)
                .await
                .with_context(|| format!("exporting instance {instance_id}"))?;
        }
        Command::Project => {
            let stores = ProjectionStores {
                events: Arc::new(event_store),
                store: Arc::new(PostgresProjectionStore::new(projections_pool.clone())),
                failed_events: Arc::new(PostgresFailedEvents::new(projections_pool)),
            };
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
            };
            run_projections(stores, &config, shutdown)
                .await
                .context("running projections")?;
        }
    }

    Ok(())
}

/// One pool when both databases are the same, two otherwise.
async fn connect(config: &AdminConfig) -> anyhow::Result<(PgPool, PgPool)> {
    let events = config.events.connect().await.context("connecting to event log")?;
    if config.shared_database() {
        return Ok((events.clone(), events));
    }
    let projections = config
        .projections
        .connect()
        .await
        .context("connecting to projection database")?;
    Ok((events, projections))
}

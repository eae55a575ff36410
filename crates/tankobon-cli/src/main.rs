use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use tankobon_cli::{Command, Config};
use tankobon_client::anilist::ANILIST_URL;
use tankobon_client::google_books::GOOGLE_BOOKS_URL;
use tankobon_client::{AniListClient, GoogleBooksClient, HttpImageFetcher};
use tankobon_core::{
    load_config, AppConfig, AppError, CleanupMode, CleanupOptions, CleanupSummary, HarvestPorts,
    HarvestStats, Harvester, HttpConfig, JsonStateStore, Outlier, OutlierReport, RateGovernor,
    ReviewDecision, RunFlag, ServiceLimit, SystemClock, VolumeCleaner, CATALOG_SERVICE,
    VOLUME_SERVICE,
};
use tankobon_db::{open_object_store, CatalogRepository, MIGRATOR};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::parse();

    // Setup logging (stderr to keep stdout clean for reports)
    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(config).await {
        match e.downcast_ref::<AppError>() {
            Some(app) => eprintln!("\n{}\n", app.user_message()),
            None => eprintln!("\n{:#}\n", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let app = load_config(config.config.as_deref()).context("Failed to load configuration")?;

    // Database connection
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(app.database.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let repo = Arc::new(CatalogRepository::new(pool));

    match config.command {
        Command::Harvest { once } => {
            harvest(repo, &app, config.google_books_api_key, once).await?;
        }
        Command::Clean {
            min_severity,
            delete,
            yes,
            interactive,
        } => {
            let min_severity = min_severity.unwrap_or(app.cleanup.min_severity);
            clean(repo, &app, min_severity, delete, yes, interactive).await?;
        }
        Command::Stats => {
            show_stats(&repo).await?;
        }
    }

    Ok(())
}

fn rate_limits(app: &AppConfig) -> Result<HashMap<String, ServiceLimit>, AppError> {
    [CATALOG_SERVICE, VOLUME_SERVICE]
        .into_iter()
        .map(|service| {
            let limit = ServiceLimit::from_config(&app.rate_limit(service))?;
            Ok((service.to_string(), limit))
        })
        .collect()
}

/// Clears the run flag on Ctrl-C or SIGTERM.
fn spawn_shutdown_listener(running: RunFlag) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown requested, finishing current step");
        running.stop();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Harvest series from AniList and their volumes from Google Books
async fn harvest(
    repo: Arc<CatalogRepository>,
    app: &AppConfig,
    api_key: Option<String>,
    once: bool,
) -> anyhow::Result<()> {
    let http = HttpConfig::default();
    let catalog = AniListClient::new(ANILIST_URL, &http).context("Invalid AniList URL")?;
    let volumes = GoogleBooksClient::new(GOOGLE_BOOKS_URL, api_key, &http)
        .context("Invalid Google Books URL")?;
    if !volumes.has_api_key() {
        warn!("GOOGLE_BOOKS_API_KEY not set, volume searches run with the anonymous quota");
    }
    let images = HttpImageFetcher::new(&http)?;
    let objects = open_object_store(&app.storage)
        .await
        .context("Failed to open image storage")?;

    let governor = RateGovernor::new(
        JsonStateStore::new(&app.storage.rate_state_path),
        SystemClock,
        rate_limits(app)?,
    )
    .context("Failed to load rate limit state")?;

    let running = RunFlag::new();
    spawn_shutdown_listener(running.clone());

    let ports = HarvestPorts {
        catalog: Arc::new(catalog),
        volumes: Arc::new(volumes),
        images: Arc::new(images),
        objects,
        store: repo,
    };
    let mut harvester = Harvester::new(ports, governor, app.harvest.clone(), running).await?;

    let stats = if once {
        harvester.run_once().await?
    } else {
        harvester.run_continuous().await
    };
    print_harvest_summary(&stats);

    Ok(())
}

fn print_harvest_summary(stats: &HarvestStats) {
    println!("\nHarvest Summary\n");
    println!("  Series created:        {}", stats.created);
    println!("  Series updated:        {}", stats.updated);
    println!("  Skipped at cap:        {}", stats.capped);
    println!("  Series failed:         {}", stats.failed);
    println!("  Catalog pages failed:  {}", stats.pages_failed);
    println!("  Volume checks:         {}", stats.volume_checks);
    println!("  Volumes added:         {}", stats.volumes.added);
    println!("  Volumes filtered:      {}", stats.volumes.filtered);
    println!("  Publisher mismatches:  {}", stats.volumes.publisher_skipped);
    println!("  Duplicates:            {}", stats.volumes.duplicate);
    println!("  Volume failures:       {}", stats.volumes.failed);
    println!();
}

/// Detect outlier volumes and optionally delete them
async fn clean(
    repo: Arc<CatalogRepository>,
    app: &AppConfig,
    min_severity: u32,
    delete: bool,
    yes: bool,
    interactive: bool,
) -> anyhow::Result<()> {
    let mode = if delete {
        CleanupMode::Delete
    } else {
        CleanupMode::DryRun
    };

    if mode == CleanupMode::Delete && !yes && !confirm_delete()? {
        println!("Cancelled.");
        return Ok(());
    }

    let objects = open_object_store(&app.storage)
        .await
        .context("Failed to open image storage")?;
    let cleaner = VolumeCleaner::new(repo, objects);

    let summary = if interactive {
        cleaner.review(mode, prompt_decision).await?
    } else {
        cleaner
            .run(CleanupOptions { min_severity, mode })
            .await?
    };
    print_cleanup_summary(&summary, mode, min_severity);

    Ok(())
}

fn confirm_delete() -> anyhow::Result<bool> {
    println!("\nWARNING: this will DELETE volumes from the database.");
    print!("Type 'DELETE' to confirm: ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "DELETE")
}

fn prompt_decision(report: &OutlierReport, outlier: &Outlier) -> ReviewDecision {
    println!(
        "\n{} - volume {} (severity {})",
        report.series_title, outlier.volume.id, outlier.severity
    );
    println!(
        "  Title:     {}",
        outlier.volume.title.as_deref().unwrap_or("<untitled>")
    );
    println!(
        "  Publisher: {}",
        outlier.volume.publisher.as_deref().unwrap_or("<none>")
    );
    for issue in &outlier.issues {
        println!("  - {}", issue);
    }

    loop {
        print!("Delete this volume? [y]es / [n]o / [q]uit: ");
        if io::stdout().flush().is_err() {
            return ReviewDecision::Quit;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => return ReviewDecision::Quit,
            Ok(_) => {}
        }
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => return ReviewDecision::Delete,
            "n" | "no" => return ReviewDecision::Skip,
            "q" | "quit" => return ReviewDecision::Quit,
            _ => continue,
        }
    }
}

fn print_cleanup_summary(summary: &CleanupSummary, mode: CleanupMode, min_severity: u32) {
    println!("\nCleanup Summary\n");
    println!("  Series analyzed:       {}", summary.series_analyzed);
    println!("  Series with issues:    {}", summary.series_with_issues);
    println!("  Outliers found:        {}", summary.total_outliers);
    println!(
        "  Eligible (severity >= {}): {}",
        min_severity, summary.eligible
    );
    match mode {
        CleanupMode::DryRun => {
            println!("  Would delete:          {}", summary.pending);
            println!("\n  Dry run, nothing deleted. Re-run with --delete to apply.");
        }
        CleanupMode::Delete => {
            println!("  Deleted:               {}", summary.deleted);
            if summary.object_delete_failures > 0 {
                println!(
                    "  Image delete failures: {}",
                    summary.object_delete_failures
                );
            }
        }
    }
    println!();
}

/// Show database statistics
async fn show_stats(repo: &CatalogRepository) -> anyhow::Result<()> {
    let stats = repo.get_stats().await?;

    println!("\nDatabase Statistics\n");
    println!("  Series:                {}", stats.total_series);
    println!("  Volumes:               {}", stats.total_volumes);
    println!("  Trusted publishers:    {}", stats.trusted_publishers);
    if let Some(last_check) = stats.last_volume_check {
        println!("  Last volume check:     {}", last_check);
    }
    println!();

    Ok(())
}

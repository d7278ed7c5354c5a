use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use clap::CommandFactory;
use clap_complete::{generate, Shell};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cli::Cli;
use crate::config::{Config, LoggingConfig, Priority};
use crate::error::{Error, Result};
use crate::feed::{Category, RefreshTarget, RssNewsSource};
use crate::refresh::{TaskRecord, TaskStatus};
use crate::service::{NewsService, NewsView};

/// Write a commented default configuration file.
pub fn init(config_path: &Path, force: bool) -> Result<()> {
    info!("Initializing novine configuration");

    if config_path.exists() && !force {
        warn!("Configuration file already exists: {}", config_path.display());
        println!("Configuration already exists: {}", config_path.display());
        println!("   Use --force to overwrite it.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(config_path, default_config_content(config_path)?)?;
    info!("Created default configuration: {}", config_path.display());

    println!("✅ novine initialized successfully!");
    println!("   Config file: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("   1. Set REDIS_URL and ANTHROPIC_API_KEY (or edit the config)");
    println!("   2. Warm the cache: novine refresh all");
    println!("   3. Keep it fresh: novine run");

    Ok(())
}

/// Start the scheduler and block until Ctrl+C.
pub async fn run(config: &Config) -> Result<()> {
    let service = connect(config).await?;
    service.start();

    println!("📰 novine running (backend: {:?}). Press Ctrl+C to stop.", service.stats().await.backend);
    for entry in service.scheduler_status().await.categories {
        println!(
            "   {:<10} next refresh {}",
            entry.category.name(),
            entry
                .next_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "on demand".to_string())
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    service.stop();

    let stats = service.admin_report(0).await.refresh_stats;
    println!(
        "Stopped after {} refreshes ({} failed).",
        stats.total, stats.failed
    );
    Ok(())
}

pub async fn show(config: &Config, category: Category, cached_only: bool, json: bool) -> Result<()> {
    let service = connect(config).await?;
    // A one-shot process waits for the refresh of stale data, otherwise
    // it would be cancelled on exit.
    let view = if cached_only {
        service.get_news(category).await
    } else {
        service.get_or_refresh_and_wait(category).await
    };

    if json {
        return print_json(&view);
    }

    match view {
        NewsView::Available(news) => {
            let age = format_age(news.age(Utc::now()));
            let marker = if news.is_stale { " (stale)" } else { "" };
            println!("📰 {} - updated {}{}", category.name(), age, marker);
            println!("==============================");
            for (i, article) in news.articles.iter().enumerate() {
                println!("\n{}. {}", i + 1, article.title);
                println!("   {}", article.source);
                println!("   {}", article.preview(240));
                if let Some(link) = &article.link {
                    println!("   {}", link);
                }
            }
        }
        NewsView::Unavailable { category } => {
            println!("⚠️  News for {} is currently unavailable.", category.name());
            println!("   Try again later or run: novine refresh {}", category.slug());
        }
    }
    Ok(())
}

pub async fn refresh(config: &Config, target: RefreshTarget, priority: Option<Priority>) -> Result<()> {
    let service = connect(config).await?;

    let tickets = match priority {
        Some(priority) => {
            info!("Refreshing {} priority categories", priority);
            println!("🔄 Refreshing {} priority categories...", priority);
            service.refresh_priority(priority)
        }
        None => {
            info!("Refreshing {}", target);
            println!("🔄 Refreshing {}...", target);
            service.refresh(target)
        }
    };
    let outcomes = futures::future::join_all(tickets.into_iter().map(|t| t.wait())).await;

    let mut failed = 0;
    for outcome in &outcomes {
        print_task(&outcome.record);
        if !outcome.succeeded() {
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(Error::FetchFailure(format!(
            "{} of {} categories failed to refresh",
            failed,
            outcomes.len()
        )));
    }
    println!("✅ Refresh complete");
    Ok(())
}

pub async fn invalidate(config: &Config, target: RefreshTarget) -> Result<()> {
    let service = connect(config).await?;
    let removed = service.invalidate(target).await?;
    println!("🗑️  Invalidated {}: {} entries removed", target, removed);
    Ok(())
}

pub async fn stats(config: &Config, reset: bool, json: bool) -> Result<()> {
    let service = connect(config).await?;
    let stats = service.stats().await;

    if json {
        print_json(&stats)?;
    } else {
        println!("📊 Cache statistics");
        println!("===================");
        println!("   Backend:     {:?} ({})", stats.backend, if stats.connected { "connected" } else { "disconnected" });
        println!("   Cached:      {}/{} categories", stats.cached_categories, Category::ALL.len());
        println!("   Hits:        {}", stats.hits);
        println!("   Misses:      {}", stats.misses);
        println!("   Hit rate:    {:.1}%", stats.hit_rate() * 100.0);
        println!("   Sets:        {} ({} failed)", stats.sets, stats.set_failures);
        println!("   Deletes:     {}", stats.deletes);
    }

    if reset {
        service.reset_stats();
        debug!("Cache counters reset");
    }
    Ok(())
}

pub async fn keys(config: &Config, pattern: Option<String>, delete: bool, json: bool) -> Result<()> {
    let service = connect(config).await?;

    if delete {
        let pattern = pattern.unwrap_or_else(|| format!("{}*", config.cache.key_prefix));
        let removed = service.admin_delete_keys(&pattern).await?;
        if json {
            return print_json(&serde_json::json!({ "pattern": pattern, "deleted": removed }));
        }
        println!("🗑️  Deleted {} keys matching {}", removed, pattern);
        return Ok(());
    }

    let listing = service.admin_keys(pattern.as_deref()).await?;

    if json {
        return print_json(&listing);
    }

    if listing.keys.is_empty() {
        println!("🔑 No keys match {}", listing.pattern);
        return Ok(());
    }

    println!("🔑 Keys matching {}", listing.pattern);
    for meta in &listing.keys {
        let ttl = meta
            .ttl_remaining_secs
            .map(|s| format!("{}s", s))
            .unwrap_or_else(|| "none".to_string());
        println!("   {:<32} {:>8} bytes  ttl {}", meta.key, meta.size_bytes, ttl);
    }
    if listing.truncated {
        println!(
            "   ... showing the first {} matching keys, narrow the pattern to see more",
            listing.keys.len()
        );
    }
    Ok(())
}

pub async fn status(config: &Config, json: bool) -> Result<()> {
    let service = connect(config).await?;

    if json {
        return print_json(&service.admin_report(20).await);
    }

    let report = service.admin_report(0).await;
    println!("📊 novine status");
    println!("================");
    println!("   Backend: {:?} {:?}", report.health.kind, report.health.status);
    if let Some(latency) = report.health.latency_ms {
        println!("   Latency: {:.1} ms", latency);
    }

    for entry in service.scheduler_status().await.categories {
        let cached = match entry.cached_at {
            Some(at) => format!(
                "{} articles, updated {}{}",
                entry.article_count,
                format_age(Utc::now() - at),
                if entry.is_stale { " (stale)" } else { "" }
            ),
            None => "not cached".to_string(),
        };
        println!("\n   {} ({} priority)", entry.category.name(), entry.priority);
        println!("      Cache:    {}", cached);
        println!("      State:    {:?}", entry.state);
        if let Some(last) = &entry.last_run {
            println!("      Last run: #{} {:?} at {}", last.id, last.status, last.start_time.to_rfc3339());
        }
    }
    Ok(())
}

pub async fn tasks(config: &Config, limit: usize, json: bool) -> Result<()> {
    let service = connect(config).await?;
    let records = service.recent_tasks(limit);

    if json {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("📋 No refresh tasks recorded.");
        if config.refresh.history_file.is_none() {
            println!("   Set [refresh] history_file to keep task history between runs.");
        }
        return Ok(());
    }

    println!("📋 Recent refresh tasks");
    for record in &records {
        print_task(record);
    }
    Ok(())
}

pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let cmd_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, cmd_name, &mut std::io::stdout());
}

/// Load the configuration file with `.env` and environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::NotFound(format!(
            "Configuration file {} not found. Run 'novine init' first.",
            path.display()
        )));
    }
    Config::load_with_env(path)
}

/// Initialize tracing. The returned guard must be held for the file writer
/// to flush.
pub fn init_logging(
    debug: bool,
    verbose: bool,
    logging: &LoggingConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&logging.level))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let console = if logging.json_format {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_file(debug)
            .with_line_number(debug)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file, guard) = if logging.log_to_file {
        let path = Path::new(&logging.log_file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "novine.log".into());

        fs::create_dir_all(dir)?;
        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    debug!("Logging initialized");
    Ok(guard)
}

async fn connect(config: &Config) -> Result<NewsService> {
    let source = RssNewsSource::from_config(config)?;
    NewsService::connect(config, Arc::new(source)).await
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_task(record: &TaskRecord) {
    let icon = match record.status {
        TaskStatus::Completed => "✅",
        TaskStatus::Failed => "❌",
        TaskStatus::Running => "⏳",
    };
    let detail = match (&record.error_message, record.cache_used) {
        (Some(error), _) => error.clone(),
        (None, true) => "served from cache".to_string(),
        (None, false) => format!("{} articles", record.articles_count),
    };
    let took = record
        .execution_time_secs
        .map(|s| format!(" in {:.1}s", s))
        .unwrap_or_default();
    println!(
        "   {} #{:<4} {:<10} {:?}{} - {}",
        icon,
        record.id,
        record.category.name(),
        record.trigger,
        took,
        detail
    );
}

/// Human readable age such as "just now", "12 min ago" or "3 h ago".
pub fn format_age(age: chrono::Duration) -> String {
    let minutes = age.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{} min ago", minutes)
    } else if minutes < 48 * 60 {
        format!("{} h ago", minutes / 60)
    } else {
        format!("{} days ago", minutes / (24 * 60))
    }
}

fn default_config_content(config_path: &Path) -> Result<String> {
    let mut config = Config::default();
    config.refresh.history_file = Some(
        config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("task_history.json"),
    );

    let body = toml::to_string_pretty(&config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

    Ok(format!(
        r#"# novine configuration
# Generated on {}
#
# Environment overrides: REDIS_URL, NOVINE_CACHE_TTL, NOVINE_CACHE_PREFIX,
# NOVINE_LOG_LEVEL, ANTHROPIC_API_KEY. A .env file in the working
# directory is read as well.
#
# Without [backend] redis_url the cache lives in process memory only.

{}"#,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        body
    ))
}

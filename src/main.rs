//! CLI entry point for `mailindex`.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailindex::config::{self, Config};
use mailindex::error::IndexError;
use mailindex::index::IndexManager;
use mailindex::scan::Scope;
use mailindex::search::{self, SearchOptions};
use mailindex::sync;
use mailindex::watch;

#[derive(Parser)]
#[command(name = "mailindex", version, about = "Full-text index for on-disk mail stores")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Mail store root directory
    #[arg(long, global = true, env = "MAILINDEX_ROOT", value_name = "DIR")]
    root: Option<PathBuf>,

    /// Index database path
    #[arg(long, global = true, env = "MAILINDEX_DB", value_name = "FILE")]
    db: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the index with the mail store
    Index {
        /// Limit to one account
        #[arg(long)]
        account: Option<String>,
        /// Limit to one mailbox within the account
        #[arg(long, requires = "account")]
        mailbox: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show index statistics and staleness
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Search indexed messages
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        mailbox: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Drop and re-index from disk
    Rebuild {
        #[arg(long)]
        account: Option<String>,
        #[arg(long, requires = "account")]
        mailbox: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Search indexed messages by attachment file name
    Attachments {
        /// Substring of the attachment file name
        name: String,
        /// Exact content type, e.g. application/pdf
        #[arg(long = "type")]
        mime_type: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        mailbox: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Sync once, then keep the index converged
    Serve {
        /// React to filesystem events instead of polling
        #[arg(long)]
        watch: bool,
        /// Polling interval in seconds when not watching
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let root = resolve_root(&cli, &config)?;
    let db_path = cli
        .db
        .clone()
        .or_else(|| config.store.db_path.clone())
        .unwrap_or_else(|| config::db_path(&config));

    match cli.command {
        Commands::Index {
            account,
            mailbox,
            json,
        } => cmd_sync(&root, &db_path, &config, scope_of(account, mailbox), false, json),
        Commands::Rebuild {
            account,
            mailbox,
            json,
        } => cmd_sync(&root, &db_path, &config, scope_of(account, mailbox), true, json),
        Commands::Status { json } => cmd_status(&db_path, &config, json),
        Commands::Search {
            query,
            limit,
            account,
            mailbox,
            json,
        } => cmd_search(&db_path, &config, &query, limit, account, mailbox, json),
        Commands::Attachments {
            name,
            mime_type,
            limit,
            account,
            mailbox,
            json,
        } => cmd_attachments(
            &db_path,
            &config,
            &name,
            mime_type.as_deref(),
            limit,
            account,
            mailbox,
            json,
        ),
        Commands::Serve { watch, interval } => cmd_serve(&root, &db_path, &config, watch, interval),
    }
}

fn scope_of(account: Option<String>, mailbox: Option<String>) -> Scope {
    Scope { account, mailbox }
}

fn resolve_root(cli: &Cli, config: &Config) -> anyhow::Result<PathBuf> {
    cli.root
        .clone()
        .or_else(|| config.store.mail_root.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("no mail store root; pass --root, set MAILINDEX_ROOT, or configure store.mail_root")
        })
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailindex.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn sync_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Indexing [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb
}

/// Run one reconciliation (or rebuild) pass and print the counts.
fn cmd_sync(
    root: &Path,
    db_path: &Path,
    config: &Config,
    scope: Scope,
    rebuild: bool,
    json: bool,
) -> anyhow::Result<()> {
    let manager = IndexManager::open(db_path)?;
    let pb = sync_progress_bar();
    let progress = |current: u64, total: u64| {
        pb.set_length(total);
        pb.set_position(current);
    };

    let start = Instant::now();
    let counts = if rebuild {
        sync::rebuild_scope(&manager, root, &scope, &config.indexing, Some(&progress))?
    } else {
        sync::sync_scope(&manager, root, &scope, &config.indexing, Some(&progress))?
    };
    pb.finish_and_clear();
    let elapsed = start.elapsed();

    if json {
        let out = serde_json::json!({
            "scope": scope.to_string(),
            "inserted": counts.inserted,
            "deleted": counts.deleted,
            "moved": counts.moved,
            "skipped": counts.skipped,
            "elapsed_ms": elapsed.as_millis(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("  {:<12} {}", "Scope", scope);
        println!("  {:<12} {}", "Inserted", counts.inserted);
        println!("  {:<12} {}", "Deleted", counts.deleted);
        println!("  {:<12} {}", "Moved", counts.moved);
        println!("  {:<12} {}", "Skipped", counts.skipped);
        println!("  {:<12} {:.2?}", "Elapsed", elapsed);
        println!();
    }
    Ok(())
}

/// Show index statistics.
fn cmd_status(db_path: &Path, config: &Config, json: bool) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    if !IndexManager::has_index(db_path) {
        anyhow::bail!("no index at {}; run `mailindex index` first", db_path.display());
    }
    let manager = IndexManager::open(db_path)?;
    let status = manager.status()?;
    let stale = manager.is_stale(config.indexing.staleness_hours)?;

    if json {
        let mut out = serde_json::to_value(&status)?;
        out["stale"] = serde_json::Value::Bool(stale);
        out["db_path"] = serde_json::Value::String(db_path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {:<14} {}", "Index", db_path.display());
    println!("  {:<14} {}", "Messages", status.message_count);
    println!("  {:<14} {}", "Mailboxes", status.mailbox_count);
    println!("  {:<14} {}", "Accounts", status.account_count);
    match status.last_sync {
        Some(t) => println!("  {:<14} {}", "Last sync", t.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  {:<14} never", "Last sync"),
    }
    if let Some(ref err) = status.last_error {
        let when = status
            .last_error_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        println!("  {:<14} degraded: last sync failed at {} ({})", "Health", when, err);
    }
    if let Some(hours) = status.staleness_hours {
        println!(
            "  {:<14} {:.1}h{}",
            "Staleness",
            hours,
            if stale { " (stale)" } else { "" }
        );
    }
    println!(
        "  {:<14} {}",
        "Index size",
        format_size(status.db_size_bytes, BINARY)
    );
    println!();
    Ok(())
}

/// Search the index and print ranked results.
fn cmd_search(
    db_path: &Path,
    config: &Config,
    query: &str,
    limit: Option<usize>,
    account: Option<String>,
    mailbox: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    if !IndexManager::has_index(db_path) {
        anyhow::bail!("no index at {}; run `mailindex index` first", db_path.display());
    }
    let manager = IndexManager::open(db_path)?;
    let opts = SearchOptions {
        limit: limit.unwrap_or(config.search.default_limit),
        account,
        mailbox,
    };

    let conn = manager.read_conn()?;
    let hits = match search::search(&conn, query, &opts) {
        Ok(hits) => hits,
        Err(IndexError::InvalidQuery) => anyhow::bail!("search query is empty"),
        Err(IndexError::InvalidLimit(n)) => {
            anyhow::bail!("limit {} out of range (1..={})", n, search::MAX_LIMIT)
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        let out = serde_json::json!({
            "query": query,
            "result_count": hits.len(),
            "results": hits,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} result(s)", hits.len());
    println!();
    if hits.is_empty() {
        return Ok(());
    }

    println!(
        "  {:<4} {:<17} {:<22} {:<18} {:<36}",
        "#", "Date", "From", "Mailbox", "Subject"
    );
    println!("  {}", "-".repeat(100));
    for (i, hit) in hits.iter().enumerate() {
        let date = hit.date_received.format("%Y-%m-%d %H:%M").to_string();
        let from: String = hit.sender.chars().take(21).collect();
        let mailbox: String = hit.mailbox.chars().take(17).collect();
        let subject: String = hit.subject.chars().take(35).collect();
        println!("  {:<4} {:<17} {:<22} {:<18} {:<36}", i + 1, date, from, mailbox, subject);
        if !hit.excerpt.is_empty() {
            println!("       {}", hit.excerpt.replace('\n', " "));
        }
    }
    println!();
    Ok(())
}

/// Search by attachment name and print the matches.
#[allow(clippy::too_many_arguments)]
fn cmd_attachments(
    db_path: &Path,
    config: &Config,
    name: &str,
    mime_type: Option<&str>,
    limit: Option<usize>,
    account: Option<String>,
    mailbox: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    if !IndexManager::has_index(db_path) {
        anyhow::bail!("no index at {}; run `mailindex index` first", db_path.display());
    }
    let manager = IndexManager::open(db_path)?;
    let opts = SearchOptions {
        limit: limit.unwrap_or(config.search.default_limit),
        account,
        mailbox,
    };

    let conn = manager.read_conn()?;
    let hits = match search::search_attachments(&conn, name, mime_type, &opts) {
        Ok(hits) => hits,
        Err(IndexError::InvalidQuery) => anyhow::bail!("attachment name is empty"),
        Err(IndexError::InvalidLimit(n)) => {
            anyhow::bail!("limit {} out of range (1..={})", n, search::MAX_LIMIT)
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        let out = serde_json::json!({
            "name": name,
            "result_count": hits.len(),
            "results": hits,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} attachment(s)", hits.len());
    println!();
    if hits.is_empty() {
        return Ok(());
    }

    println!(
        "  {:<4} {:<17} {:<28} {:<22} {:<10} {:<30}",
        "#", "Date", "Filename", "Type", "Size", "Subject"
    );
    println!("  {}", "-".repeat(114));
    for (i, hit) in hits.iter().enumerate() {
        let date = hit.date_received.format("%Y-%m-%d %H:%M").to_string();
        let filename: String = hit.filename.chars().take(27).collect();
        let mime: String = hit.mime_type.chars().take(21).collect();
        let subject: String = hit.subject.chars().take(29).collect();
        println!(
            "  {:<4} {:<17} {:<28} {:<22} {:<10} {:<30}",
            i + 1,
            date,
            filename,
            mime,
            format_size(hit.size, BINARY),
            subject
        );
    }
    println!();
    Ok(())
}

/// Initial sync, then keep converging: via watcher events, or by polling.
fn cmd_serve(
    root: &Path,
    db_path: &Path,
    config: &Config,
    watch: bool,
    interval: u64,
) -> anyhow::Result<()> {
    let manager = IndexManager::open(db_path)?;

    let pb = sync_progress_bar();
    let progress = |current: u64, total: u64| {
        pb.set_length(total);
        pb.set_position(current);
    };
    let counts = sync::sync_scope(&manager, root, &Scope::all(), &config.indexing, Some(&progress))?;
    pb.finish_and_clear();
    eprintln!(
        "  Initial sync: {} inserted, {} deleted, {} moved, {} skipped",
        counts.inserted, counts.deleted, counts.moved, counts.skipped
    );

    if !watch {
        eprintln!("  Re-syncing every {interval}s (Ctrl-C to stop)");
        loop {
            std::thread::sleep(Duration::from_secs(interval));
            if let Err(e) = resync(&manager, root, &Scope::all(), config) {
                tracing::error!(error = %e, "Periodic sync failed");
            }
        }
    }

    let (tx, rx) = mpsc::channel();
    let _handle = watch::watch_tree(
        root,
        Duration::from_millis(config.watch.debounce_ms),
        tx,
    )?;
    manager.set_watcher_active(true);
    eprintln!("  Watching {} (Ctrl-C to stop)", root.display());

    // Channel closes when the watcher is torn down.
    while let Ok(scope) = rx.recv() {
        if let Err(e) = resync(&manager, root, &scope, config) {
            tracing::error!(scope = %scope, error = %e, "Sync after change failed");
        }
    }
    manager.set_watcher_active(false);
    Ok(())
}

fn resync(
    manager: &IndexManager,
    root: &Path,
    scope: &Scope,
    config: &Config,
) -> mailindex::error::Result<()> {
    let counts = sync::sync_scope(manager, root, scope, &config.indexing, None)?;
    if counts.total_changes() > 0 || counts.skipped > 0 {
        eprintln!(
            "  [{}] {} inserted, {} deleted, {} moved, {} skipped",
            scope, counts.inserted, counts.deleted, counts.moved, counts.skipped
        );
    }
    Ok(())
}

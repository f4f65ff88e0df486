use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use photoview::config::Config;
use photoview::release::ReleaseChecker;
use photoview::storage::{Article, Database, DEFAULT_PAGE_SIZE};
use photoview::sync::{Acquired, DataSync, UpdateStrategy};
use photoview::util::{create_http_client, fit_width, sanitize_line};

/// Get the config directory path (~/.config/photoview/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("photoview"))
}

/// Create `dir` if needed and restrict it to the current user.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %e,
                        "Failed to set directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to read directory metadata");
            }
        }
    }
    Ok(())
}

/// Terminal width from `COLUMNS`, falling back to 80.
fn terminal_columns() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.parse::<usize>().ok())
        .filter(|&c| c >= 40)
        .unwrap_or(80)
}

#[derive(Parser, Debug)]
#[command(name = "photoview", about = "Browse a photo-article library kept in sync with remote mirrors")]
struct Args {
    /// Config file (default: ~/.config/photoview/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the database if there is no local copy
    Init,
    /// List categories with article counts
    Categories,
    /// List articles, newest first
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Show one article with its images
    Show { id: i64 },
    /// Search article titles
    Search { keyword: String },
    /// Show a random article
    Random,
    /// Summarise the local database
    Inspect,
    /// Download the latest database and apply it
    Update {
        /// Merge into the local database instead of replacing it
        #[arg(long)]
        merge: bool,
    },
    /// Check whether a newer database is available
    CheckDb {
        /// Skip if already checked today
        #[arg(long)]
        auto: bool,
    },
    /// Check for a newer application release
    CheckRelease {
        /// Skip if already checked today
        #[arg(long)]
        auto: bool,
        /// Download the release asset into DIR
        #[arg(long, value_name = "DIR")]
        download: Option<PathBuf>,
        /// Open the asset download URL in the browser
        #[arg(long)]
        open: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Effective configuration");

    let data_dir = config.data_dir_or(&config_dir);
    ensure_private_dir(&data_dir)?;

    let client = create_http_client().context("Failed to build HTTP client")?;

    match args.command {
        Command::CheckRelease {
            auto,
            download,
            open,
        } => check_release(&config, &data_dir, client, auto, download, open).await,
        Command::CheckDb { auto } => {
            let sync = DataSync::from_config(&config, &data_dir, client)?;
            let status = if auto {
                match sync.auto_check(chrono::Local::now().date_naive()).await? {
                    Some(status) => status,
                    None => {
                        println!("Database already checked today.");
                        return Ok(());
                    }
                }
            } else {
                sync.check_for_update().await?
            };
            if status.available {
                println!("A newer database is available. Run `photoview update`.");
            } else {
                println!("Database is up to date.");
            }
            Ok(())
        }
        command => {
            let sync = DataSync::from_config(&config, &data_dir, client)?;
            browse(command, sync).await
        }
    }
}

async fn check_release(
    config: &Config,
    data_dir: &Path,
    client: reqwest::Client,
    auto: bool,
    download: Option<PathBuf>,
    open: bool,
) -> Result<()> {
    let checker = ReleaseChecker::from_config(config, client.clone())?
        .context("No release_repo configured")?;
    let info = if auto {
        let sync = DataSync::from_config(config, data_dir, client)?;
        let today = chrono::Local::now().date_naive();
        match checker.auto_check(sync.store().as_ref(), today).await? {
            Some(info) => info,
            None => {
                println!("Release already checked today.");
                return Ok(());
            }
        }
    } else {
        checker.check().await?
    };

    println!("Current version: {}", info.current_version);
    println!("Latest version:  {}", info.latest_version);
    if !info.update_available {
        println!("You are up to date.");
        return Ok(());
    }
    println!();
    for line in info.release_notes.lines() {
        println!("  {}", sanitize_line(line));
    }

    let Some(asset) = info.asset else {
        println!("No downloadable asset for this platform.");
        return Ok(());
    };
    if let Some(url) = asset.primary_url() {
        println!("Download: {url}");
        if open {
            open::that(url.as_str()).context("Failed to open browser")?;
        }
    }
    if let Some(dir) = download {
        let path = checker.download_asset(&asset, &dir).await?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}

/// Commands that read the local library, acquiring it first if needed.
async fn browse(command: Command, mut sync: DataSync) -> Result<()> {
    let (db, acquired) = sync
        .acquire()
        .await
        .context("Failed to obtain the article database")?;

    match command {
        Command::Init => {
            let inspection = db.inspect().await?;
            println!(
                "Database ready ({} backend): {} articles, {} images",
                sync.backend().kind(),
                inspection.article_count,
                inspection.image_count
            );
        }
        Command::Categories => {
            for c in db.get_categories().await? {
                let name = if c.category.is_empty() {
                    "(none)"
                } else {
                    c.category.as_str()
                };
                println!("{:>6}  {}", c.count, sanitize_line(name));
            }
        }
        Command::List {
            category,
            limit,
            offset,
        } => {
            print_articles(&db.get_articles(category.as_deref(), limit, offset).await?);
        }
        Command::Show { id } => {
            let detail = db
                .get_article_detail(id)
                .await?
                .with_context(|| format!("No article with id {id}"))?;
            print_article(&detail.article);
            for (i, image) in detail.images.iter().enumerate() {
                println!("  [{}] {}", i + 1, sanitize_line(image));
            }
        }
        Command::Search { keyword } => {
            print_articles(&db.search_articles(&keyword).await?);
        }
        Command::Random => match db.get_random_article().await? {
            Some(article) => print_article(&article),
            None => println!("The library is empty."),
        },
        Command::Inspect => print_inspection(&db).await?,
        Command::Update { .. } if acquired == Acquired::Downloaded => {
            // The copy just fetched is already the latest
            println!("Database downloaded.");
        }
        Command::Update { merge } => {
            if merge {
                sync = sync.with_strategy(UpdateStrategy::Merge);
            }
            let outcome = sync.update_database(db).await?;
            let complete = match &outcome.merge {
                Some(report) => {
                    for table in &report.tables {
                        match &table.error {
                            Some(e) => println!("  {:<16} failed: {}", table.name, e),
                            None => println!("  {:<16} {} rows", table.name, table.rows),
                        }
                    }
                    report.is_complete()
                }
                None => {
                    println!("Database replaced.");
                    true
                }
            };
            outcome.database.close().await;
            if !complete {
                anyhow::bail!("Merge finished with failures");
            }
            return Ok(());
        }
        // Handled in main without opening the library
        Command::CheckDb { .. } | Command::CheckRelease { .. } => {}
    }

    db.close().await;
    Ok(())
}

fn print_articles(articles: &[Article]) {
    if articles.is_empty() {
        println!("No articles.");
        return;
    }
    let columns = terminal_columns();
    // id, category and spacing
    let title_width = columns.saturating_sub(8 + 14);
    for a in articles {
        println!(
            "{:>6}  {}  {}",
            a.id,
            fit_width(&sanitize_line(&a.category), 12),
            fit_width(&sanitize_line(&a.title), title_width).trim_end()
        );
    }
}

fn print_article(article: &Article) {
    println!("#{} {}", article.id, sanitize_line(&article.title));
    if !article.category.is_empty() {
        println!("Category: {}", sanitize_line(&article.category));
    }
    if let Some(date) = &article.date {
        println!("Date:     {}", sanitize_line(date));
    }
    if !article.tags.is_empty() {
        println!("Tags:     {}", sanitize_line(&article.tags.join(", ")));
    }
    if let Some(url) = &article.detail_url {
        println!("Source:   {}", sanitize_line(url));
    }
    if let Some(description) = &article.description {
        println!();
        for line in description.lines() {
            println!("{}", sanitize_line(line));
        }
    }
}

async fn print_inspection(db: &Database) -> Result<()> {
    let inspection = db.inspect().await?;
    println!("Tables:   {}", inspection.tables.join(", "));
    println!("Articles: {}", inspection.article_count);
    println!("Images:   {}", inspection.image_count);
    println!();
    println!("Categories:");
    for c in &inspection.categories {
        println!("{:>6}  {}", c.count, sanitize_line(&c.category));
    }
    println!();
    println!("Latest:");
    print_articles(&inspection.latest);
    if let Some(log) = &inspection.scrape_log {
        println!();
        println!("Recent scrapes:");
        for entry in log {
            println!(
                "  {}  {:<12} {}",
                entry.scrape_date.as_deref().unwrap_or("-"),
                entry.category.as_deref().unwrap_or("-"),
                entry.articles_count.unwrap_or(0)
            );
        }
    }
    Ok(())
}

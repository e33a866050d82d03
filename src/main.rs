mod auth;
mod browser;
mod db;
mod extract;
mod pipeline;
mod session;
mod settings;
mod sitemap;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use browser::{ChromePage, Page};
use settings::{Mode, Settings};

#[derive(Parser)]
#[command(name = "mgscrape", about = "Catalog sitemap crawler: title metadata into SQLite")]
struct Cli {
    /// Config file (TOML); MGSCRAPE_* environment variables override it
    #[arg(short, long, global = true, default_value = "mgscrape.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the sitemap and scrape every title into the database
    Run {
        #[arg(long, value_enum)]
        mode: Option<Mode>,
        /// Records per bulk write (batched mode)
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Re-scrape URLs that are already stored
        #[arg(long)]
        refresh: bool,
        /// Max URLs to visit (default: whole sitemap)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Create the metadata table
    Init,
    /// Show how many titles are stored
    Stats,
    /// Print stored titles
    List {
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Open one page in the browser and save a screenshot
    Check {
        #[arg(long, default_value = "https://www.mgeko.cc/jumbo/manga/")]
        url: String,
        #[arg(short, long, default_value = "check-chromium.png")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            mode,
            batch_size,
            refresh,
            limit,
        } => {
            if let Some(m) = mode {
                settings.mode = m;
            }
            if let Some(b) = batch_size {
                settings.batch_size = b;
            }
            if refresh {
                settings.skip_existing = false;
            }
            settings.validate()?;

            let report = pipeline::run(settings, limit).await?;
            println!(
                "Done: {} URLs ({} scraped, {} skipped, {} errors), {} saved in {} writes, {}.",
                report.total,
                report.scraped,
                report.skipped_existing,
                report.failed,
                report.saved,
                report.bulk_writes,
                report.session
            );
            println!("Took {}", pipeline::format_elapsed(report.elapsed));
            Ok(())
        }
        Commands::Init => {
            let store = db::Store::new(&settings.db_path);
            store.init()?;
            println!("Database ready: {:?}", store.path());
            Ok(())
        }
        Commands::Stats => {
            let store = db::Store::new(&settings.db_path);
            store.init()?;
            println!("Titles: {}", store.count()?);
            Ok(())
        }
        Commands::List { limit } => {
            let store = db::Store::new(&settings.db_path);
            store.init()?;
            let rows = store.list(limit)?;
            if rows.is_empty() {
                println!("No titles stored. Run 'run' first.");
                return Ok(());
            }

            println!(
                "{:>5} | {:<32} | {:>6} | {:>7} | {:>8} | {:>8} | {:>9} | {:<16}",
                "id", "Title", "Rating", "Rated", "Chapters", "Views", "Bookmarks", "Updated"
            );
            println!("{}", "-".repeat(112));
            for r in &rows {
                let t = &r.record;
                println!(
                    "{:>5} | {:<32} | {:>6} | {:>7} | {:>8} | {:>8} | {:>9} | {:<16}",
                    r.id,
                    truncate(&t.title, 32),
                    t.rating,
                    t.user_rated,
                    t.chapters,
                    t.views,
                    t.bookmarked,
                    truncate(&t.last_update, 16)
                );
            }
            println!("\n{} of {} titles", rows.len(), store.count()?);
            Ok(())
        }
        Commands::Check { url, out } => {
            tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
                let mut page = ChromePage::launch(&settings.browser)?;
                page.goto(&url)?;
                page.screenshot(&out)
                    .with_context(|| format!("Failed to capture {}", url))?;
                info!("Loaded {}", page.current_url());
                println!("Screenshot saved to {:?}", out);
                Ok(())
            })
            .await?
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 3).collect();
        format!("{}...", truncated)
    }
}

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::auth;
use crate::browser::{ChromePage, Page};
use crate::db::{Saved, Store, TitleRecord};
use crate::extract::{self, ExtractError};
use crate::session;
use crate::settings::{Mode, Settings};
use crate::sitemap;

/// Counters returned after a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub total: usize,
    pub scraped: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub saved: usize,
    pub bulk_writes: usize,
    pub session: SessionState,
    pub elapsed: Duration,
}

/// How the browser session was established.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Anonymous,
    Restored,
    LoggedIn,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionState::Anonymous => "no session",
            SessionState::Restored => "restored session",
            SessionState::LoggedIn => "fresh login",
        })
    }
}

/// Buffers extraction outcomes and writes them in windows of `batch_size`.
///
/// Failed URLs take a slot in the window but write nothing, so a run of N
/// outcomes issues at most ceil(N / batch_size) writes.
pub struct BatchWriter<'a> {
    store: &'a Store,
    batch_size: usize,
    window: usize,
    pending: Vec<TitleRecord>,
    flushes: usize,
    saved: usize,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a Store, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            window: 0,
            pending: Vec::with_capacity(batch_size),
            flushes: 0,
            saved: 0,
        }
    }

    pub fn push(&mut self, outcome: Option<TitleRecord>) -> Result<()> {
        if let Some(record) = outcome {
            self.pending.push(record);
        }
        self.window += 1;
        if self.window >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.window = 0;
        if self.pending.is_empty() {
            return Ok(());
        }
        let n = self.store.save_batch(&self.pending)?;
        info!("Batch of {} records saved", n);
        self.pending.clear();
        self.flushes += 1;
        self.saved += n;
        Ok(())
    }

    /// Flush the tail and return (writes issued, rows written).
    pub fn finish(mut self) -> Result<(usize, usize)> {
        self.flush()?;
        Ok((self.flushes, self.saved))
    }
}

enum Sink<'a> {
    Single { store: &'a Store, saved: usize },
    Batched(BatchWriter<'a>),
}

impl Sink<'_> {
    fn accept(&mut self, outcome: Result<TitleRecord, ExtractError>) -> Result<()> {
        match self {
            Sink::Single { store, saved } => {
                if let Ok(record) = outcome {
                    match store.save_one(&record)? {
                        Saved::Inserted => info!("Saved {}", record.url),
                        Saved::Updated => info!("Updated {}", record.url),
                    }
                    *saved += 1;
                }
                Ok(())
            }
            Sink::Batched(writer) => writer.push(outcome.ok()),
        }
    }

    fn finish(self) -> Result<(usize, usize)> {
        match self {
            Sink::Single { saved, .. } => Ok((saved, saved)),
            Sink::Batched(writer) => writer.finish(),
        }
    }
}

/// Restore the saved cookie jar, or log in and save a fresh one.
///
/// A login that cannot be confirmed is not persisted; the crawl then goes
/// ahead without a session.
pub fn establish_session(page: &mut impl Page, settings: &Settings) -> SessionState {
    session::load(page, &settings.session_path);
    if page.cookies().map(|c| !c.is_empty()).unwrap_or(false) {
        return SessionState::Restored;
    }

    match auth::login(page, &settings.auth) {
        Ok(()) => {
            session::save(&*page, &settings.session_path);
            SessionState::LoggedIn
        }
        Err(e) => {
            warn!("Continuing without a session: {}", e);
            SessionState::Anonymous
        }
    }
}

/// Visit every URL with the one tab and persist what could be extracted.
pub fn crawl(
    page: &mut impl Page,
    store: &Store,
    settings: &Settings,
    urls: &[String],
) -> Result<RunReport> {
    let start = Instant::now();
    let mut report = RunReport {
        total: urls.len(),
        session: establish_session(page, settings),
        ..RunReport::default()
    };

    let skip_existing = settings.skip_existing && settings.mode == Mode::Batched;
    let mut sink = match settings.mode {
        Mode::Single => Sink::Single { store, saved: 0 },
        Mode::Batched => Sink::Batched(BatchWriter::new(store, settings.batch_size)),
    };

    let pb = ProgressBar::new(urls.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    for (index, url) in urls.iter().enumerate() {
        pb.inc(1);
        if skip_existing && store.exists(url)? {
            info!("Skipping {}, already in the database", url);
            report.skipped_existing += 1;
            continue;
        }

        let outcome = extract::scrape(page, url);
        match &outcome {
            Ok(_) => {
                report.scraped += 1;
                info!("[{}] Fetched metadata from {}", index + 1, url);
            }
            Err(e) => {
                report.failed += 1;
                warn!("[{}] Error fetching metadata from {}: {}", index + 1, url, e);
            }
        }
        sink.accept(outcome)?;
    }

    let (writes, saved) = sink.finish()?;
    report.bulk_writes = if settings.mode == Mode::Batched { writes } else { 0 };
    report.saved = saved;
    report.elapsed = start.elapsed();

    pb.finish_and_clear();
    Ok(report)
}

/// Full run: storage, sitemap, browser session, crawl, report.
pub async fn run(settings: Settings, limit: Option<usize>) -> Result<RunReport> {
    let start = Instant::now();

    let store = Store::new(&settings.db_path);
    info!("Initializing database {:?}", store.path());
    store.init()?;

    let client = reqwest::Client::new();
    let include = settings.include_regex()?;
    let mut urls = sitemap::fetch_urls(&client, &settings.sitemap_url, include.as_ref()).await;
    if let Some(n) = limit {
        urls.truncate(n);
    }
    if urls.is_empty() {
        info!("Nothing to crawl");
    }

    let mut report = tokio::task::spawn_blocking(move || -> Result<RunReport> {
        let mut page = ChromePage::launch(&settings.browser).context("Failed to start browser")?;
        let report = crawl(&mut page, &store, &settings, &urls)?;
        drop(page);
        info!("Browser closed. Finished processing all URLs.");
        Ok(report)
    })
    .await??;

    report.elapsed = start.elapsed();
    info!("Download completed in {}.", format_elapsed(report.elapsed));
    Ok(report)
}

pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    format!(
        "{} hours, {} minutes and {} seconds",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

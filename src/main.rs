use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use picgrid::app::restore_preferences;
use picgrid::layout::Viewport;
use picgrid::service::{HttpGalleryService, MemoryGalleryService, SharedService};
use picgrid::{AppState, GalleryConfig, GallerySession, Preferences, SessionNotice};

/// Records served by the in-memory service in demo mode.
const DEMO_RECORDS: u64 = 200;

/// Pages to load before stopping.
const PAGE_BUDGET: u32 = 20;

/// Consecutive fetch failures tolerated before giving up.
const MAX_FAILURES: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("picgrid=info".parse().unwrap()),
        )
        .init();

    let demo = std::env::args().nth(1).as_deref() == Some("demo");
    let config = GalleryConfig::load()?;

    let service: SharedService = if demo {
        info!(records = DEMO_RECORDS, "Using in-memory gallery");
        Arc::new(MemoryGalleryService::generated(DEMO_RECORDS))
    } else {
        info!(url = %config.api_url, "Using gallery API");
        Arc::new(
            HttpGalleryService::new(&config.api_url, config.http_timeout())
                .context("Failed to create API client")?,
        )
    };

    let state = Arc::new(AppState::new());
    let prefs_path = Preferences::default_path()?;
    restore_preferences(&state, &prefs_path);

    let mut session = GallerySession::new(config, service, state).with_preferences_path(prefs_path);
    browse(&mut session).await;
    session.teardown();
    Ok(())
}

/// Scrolls to the end of the collection page by page, logging what would render.
async fn browse(session: &mut GallerySession) {
    session.handle_resize(Viewport::new(1280.0, 900.0), Instant::now());
    session.start(Instant::now());
    let mut failures = log_notices(session.settle(Instant::now()).await);

    loop {
        let status = session.status();
        let window = session.window();
        info!(
            loaded = status.len,
            total = status.total_records,
            pages = status.pages,
            offset = session.scroll_offset(),
            visible = ?window.first_index().zip(window.last_index()),
            height = window.total_height,
            "Window"
        );
        if status.exhausted || status.pages >= PAGE_BUDGET || failures >= MAX_FAILURES {
            break;
        }

        let end = (session.layout().total_height() - session.layout().viewport().height).max(0.0);
        session.handle_scroll(end, Instant::now());
        if let Some(deadline) = session.next_deadline() {
            tokio::time::sleep(deadline.saturating_duration_since(Instant::now())).await;
        }
        // Deadlines are inclusive; a little slack avoids polling just before them.
        tokio::time::sleep(Duration::from_millis(5)).await;
        session.poll_timers(Instant::now());

        let failed = log_notices(session.settle(Instant::now()).await);
        failures = if failed > 0 { failures + failed } else { 0 };
    }

    session.request_stats();
    log_notices(session.settle(Instant::now()).await);
}

/// Logs notices and returns a failure weight; permanent errors count as
/// `MAX_FAILURES` so browsing stops at once.
fn log_notices(notices: Vec<SessionNotice>) -> u32 {
    let mut failures = 0;
    for notice in notices {
        match notice {
            SessionNotice::FetchFailed { page, error } => {
                warn!(page, transient = error.is_transient(), "Fetch failed: {}", error);
                // Retrying cannot fix a bad request or an unreadable response.
                failures += if error.is_transient() { 1 } else { MAX_FAILURES };
            }
            SessionNotice::StatsUpdated(stats) => info!(
                count = stats.count,
                images = stats.image_count,
                videos = stats.video_count,
                favorites = stats.favorite_count,
                "Stats"
            ),
            _ => {}
        }
    }
    failures
}

//! Replay a browsing session through the behavior tracker.
//!
//! Loads page globals from the environment (and `.env`), opens a page at
//! `--url`, initializes the engine through the lazy loader and then plays
//! the given steps in order. With `--catalog` the engine runs offline against
//! a local catalog file and prints what it would have posted.
//!
//! ```text
//! tracker-replay --url https://shop.test/ --html product.html \
//!     --step navigate:/campaign/spring --step click:.buy-btn
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use behavior_tracker::testing::MockTransport;
use behavior_tracker::types::parse_catalog;
use behavior_tracker::{
    BehaviorTracker, BrowserPage, EngineSlot, PageGlobals, TrackerLoader,
};
use clap::Parser;
use scraper::{Html, Selector};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tracker-replay")]
#[command(about = "Replay navigation and clicks through the behavior tracker")]
struct Cli {
    /// Initial page URL
    #[arg(long)]
    url: String,

    /// Referrer reported for the page
    #[arg(long)]
    referrer: Option<String>,

    /// HTML document that click steps select elements from
    #[arg(long)]
    html: Option<PathBuf>,

    /// Serve this JSON catalog locally and print deliveries instead of posting
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Steps to play in order: navigate:<path>, replace:<path>, back:<path>,
    /// click:<css selector>, refresh
    #[arg(long = "step")]
    steps: Vec<Step>,
}

#[derive(Debug, Clone)]
enum Step {
    Navigate(String),
    Replace(String),
    Back(String),
    Click(String),
    Refresh,
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "refresh" {
            return Ok(Step::Refresh);
        }
        let (kind, arg) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <kind>:<value>, got '{}'", s))?;
        match kind {
            "navigate" => Ok(Step::Navigate(arg.to_string())),
            "replace" => Ok(Step::Replace(arg.to_string())),
            "back" => Ok(Step::Back(arg.to_string())),
            "click" => Ok(Step::Click(arg.to_string())),
            other => Err(format!("unknown step kind '{}'", other)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,behavior_tracker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let globals = PageGlobals::from_env();

    let mut page = BrowserPage::open(&cli.url).context("Invalid --url")?;
    if let Some(referrer) = &cli.referrer {
        page = page.with_referrer(referrer.clone());
    }
    let page = Arc::new(page);

    let document = match &cli.html {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Some(Html::parse_document(&raw))
        }
        None => None,
    };

    let offline = match &cli.catalog {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let definitions = parse_catalog(raw.as_bytes())
                .context("Catalog is not a list of event definitions")?;
            Some(MockTransport::new().with_catalog(definitions))
        }
        None => None,
    };

    let slot = EngineSlot::new();
    let loader = TrackerLoader::new(globals.clone());
    let source = {
        let page = page.clone();
        let offline = offline.clone();
        move |script_src: &str| -> behavior_tracker::Result<BehaviorTracker> {
            tracing::info!(script_src, "Loading tracker engine");
            let mut builder = BehaviorTracker::builder(page.clone()).globals(globals.clone());
            if let Some(mock) = &offline {
                builder = builder.transport(Arc::new(mock.clone()));
            }
            Ok(builder.build())
        }
    };

    let tracker = loader
        .load(&slot, &source)
        .await
        .ok_or_else(|| anyhow!("Tracker engine failed to load"))?;
    tracing::info!(events = tracker.catalog().len(), "Tracker ready");

    for step in &cli.steps {
        tracing::info!(?step, "Replaying step");
        match step {
            Step::Navigate(path) => page.push_state(path)?,
            Step::Replace(path) => page.replace_state(path)?,
            Step::Back(path) => page.pop_state(path)?,
            Step::Click(css) => {
                let Some(document) = &document else {
                    bail!("click steps need --html");
                };
                let selector = Selector::parse(css)
                    .map_err(|e| anyhow!("Invalid selector '{}': {:?}", css, e))?;
                let element = document
                    .select(&selector)
                    .next()
                    .with_context(|| format!("No element matches '{}'", css))?;
                page.click(&element);
            }
            Step::Refresh => {
                let outcome = tracker.refresh_events().await;
                tracing::info!(?outcome, "Catalog refresh");
            }
        }
        tracker.flush().await;
    }

    if let Some(mock) = offline {
        for event in mock.delivered() {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    Ok(())
}

//! Card Scanner - scan a stack of card photos against a catalog
//!
//! Replays still images as a camera stream through the full recognition
//! pipeline and reports every accepted card.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use card_scanner::analysis::SetFilter;
use card_scanner::capture::StillImageSource;
use card_scanner::config::{self, AppConfig, Viewport};
use card_scanner::shared::PipelineState;
use card_scanner::storage::{self, load_catalog, CardKey, CatalogEntry};
use card_scanner::vision::TesseractEngine;
use card_scanner::ScanController;

/// Card Scanner - collector number OCR and catalog matching
#[derive(Parser, Debug)]
#[command(name = "card-scanner")]
#[command(about = "Recognize trading cards from camera frames")]
struct Args {
    /// Catalog JSON file (array of card entries)
    #[arg(short, long)]
    catalog: PathBuf,

    /// Image files replayed as camera frames, in order
    #[arg(short, long, num_args = 1.., required = true)]
    frames: Vec<PathBuf>,

    /// Restrict matches to one set code, or "all"
    #[arg(short, long, default_value = "all")]
    set: String,

    /// Displayed viewport size, e.g. 390x844 (defaults to the frame size)
    #[arg(long, value_parser = parse_viewport)]
    viewport: Option<Viewport>,

    /// How long to scan before closing
    #[arg(short, long, default_value = "10")]
    duration_secs: u64,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a diagnostics bundle on exit, to this file or the data directory
    #[arg(long, num_args = 0..=1)]
    diagnostics: Option<Option<PathBuf>>,

    /// Write debug crops of the last scanned frame into this directory
    #[arg(long)]
    debug_dir: Option<PathBuf>,
}

fn parse_viewport(value: &str) -> Result<Viewport, String> {
    Viewport::parse(value).ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = load_or_create_config(args.config.as_deref());
    if args.viewport.is_some() {
        config.scanner.viewport = args.viewport;
    }

    let catalog = load_catalog(&args.catalog)?;
    info!("Loaded {} cards from {:?}", catalog.len(), args.catalog);

    let source = Arc::new(StillImageSource::new(args.frames.clone()));
    let factory = TesseractEngine::factory(config.recognition.clone());
    let controller = ScanController::new(&config, source, factory, catalog);
    controller.set_set_filter(SetFilter::parse(&args.set));

    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    controller.set_on_match(move |card| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        println!(
            "[{}] {} - set {} #{} ({}, {})",
            n, card.full_name, card.set_code, card.collector_number, card.ink, card.rarity
        );
    });

    let watcher = tokio::spawn(watch_candidates(controller.clone()));

    controller.open().await.context("Could not start scanning")?;
    info!("Scanning for {}s", args.duration_secs);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    if let Some(dir) = &args.debug_dir {
        if let Err(e) = write_debug_images(&controller, dir) {
            warn!("Debug capture failed: {:#}", e);
        }
    }

    let report = controller.diagnostics();
    if let Some(target) = &args.diagnostics {
        let path = match target {
            Some(path) => path.clone(),
            None => storage::get_data_dir()?
                .join(format!("diagnostics-{}.json", report.environment.session_id)),
        };
        report.save(&path)?;
        info!("Diagnostics written to {:?}", path);
    }

    watcher.abort();
    controller.close().await;

    let summary = &report.summary;
    info!(
        "{} card(s) accepted, {} frame(s) evaluated, avg latency {}",
        accepted.load(Ordering::SeqCst),
        summary.frames_recorded,
        summary
            .avg_latency_ms
            .map_or_else(|| "n/a".to_string(), |ms| format!("{:.0}ms", ms))
    );

    Ok(())
}

/// Load configuration from file or create default
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => storage::get_config_dir().ok().map(|dir| dir.join("config.toml")),
    };

    if let Some(path) = path.filter(|p| p.exists()) {
        match config::load_config(&path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => warn!("Ignoring configuration: {:#}", e),
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

/// Remembers the last candidate list printed so a repeated offer stays quiet
#[derive(Default)]
struct CandidateLog {
    last_offered: Option<Vec<CardKey>>,
}

impl CandidateLog {
    /// Text to print for this offer, or `None` when it repeats the previous one
    fn render(&mut self, candidates: &[CatalogEntry], suppressed: usize) -> Option<String> {
        let keys: Vec<CardKey> = candidates.iter().map(CatalogEntry::key).collect();
        if self.last_offered.as_ref() == Some(&keys) {
            return None;
        }
        self.last_offered = Some(keys);

        let mut text = String::from("Ambiguous match:");
        for (i, card) in candidates.iter().enumerate() {
            text.push_str(&format!(
                "\n  {}. {} - set {} #{}",
                i + 1,
                card.full_name,
                card.set_code,
                card.collector_number
            ));
        }
        if suppressed > 0 {
            text.push_str(&format!("\n  ... and {} more", suppressed));
        }
        Some(text)
    }
}

/// Without a user to choose, list the candidates once and keep scanning
async fn watch_candidates(controller: Arc<ScanController>) {
    let mut states = controller.subscribe_state();
    let mut log = CandidateLog::default();
    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        match state {
            PipelineState::Disambiguating { candidates, suppressed } => {
                if let Some(text) = log.render(&candidates, suppressed) {
                    println!("{}", text);
                }
                if let Err(e) = controller.dismiss_candidates() {
                    warn!("Could not dismiss candidates: {}", e);
                }
            }
            PipelineState::Error(e) => warn!("{}", e),
            _ => {}
        }
    }
}

fn write_debug_images(controller: &ScanController, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let images = controller.debug_capture()?;
    for debug in images {
        let path = dir.join(format!("{}.png", debug.label));
        debug
            .image
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    info!("Debug images written to {:?}", dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use card_scanner::storage::parse_catalog;

    fn twelves() -> Vec<CatalogEntry> {
        parse_catalog(
            r#"[
                {"name": "Twelve One", "full_name": "Twelve One", "set_code": "1", "collector_number": "12", "ink": "Emerald"},
                {"name": "Twelve Two", "full_name": "Twelve Two", "set_code": "2", "collector_number": "12", "ink": "Sapphire"}
            ]"#,
        )
        .unwrap()
        .to_vec()
    }

    #[test]
    fn test_repeated_offer_prints_once() {
        let cards = twelves();
        let mut log = CandidateLog::default();

        let text = log.render(&cards, 3).unwrap();
        assert!(text.starts_with("Ambiguous match:"));
        assert!(text.contains("  2. Twelve Two - set 2 #12"));
        assert!(text.ends_with("... and 3 more"));

        // Same cards on the next tick
        assert_eq!(log.render(&cards, 3), None);

        // A different offer is printed again
        let text = log.render(&cards[..1], 0).unwrap();
        assert!(text.contains("1. Twelve One"));
        assert!(!text.contains("more"));
        assert!(log.render(&cards, 3).is_some());
    }
}

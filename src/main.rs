use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{LevelFilter, info};
use serde::{Deserialize, Serialize};
use simplelog::{Config, WriteLogger};

use pagequill::annotations::{Stroke, StrokeStyle};
use pagequill::event_source::{PointerEvent, SimulatedPointerSource};
use pagequill::geometry::{HighlightRect, merge_highlight_rects};
use pagequill::headless::{HeadlessHost, Layout};
use pagequill::host::AdapterEvent;
use pagequill::panic_handler;
use pagequill::pen::{DrawingMode, PointerOutcome};
use pagequill::search::{SearchOutcome, SpanMarkup, apply_highlight, count_matches};
use pagequill::settings;
use pagequill::viewer::{Viewer, ViewerConfig};

#[derive(Debug, Parser)]
#[command(name = "pagequill", version)]
#[command(about = "Page-anchored PDF annotation toolkit")]
struct Cli {
    /// Log level written to the log file
    #[arg(long, global = true, default_value_t = LevelFilter::Debug)]
    log_level: LevelFilter,

    #[arg(long, global = true, default_value = "pagequill.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Highlight a term in a text-layer dump (JSON array of span texts).
    Search {
        #[arg(long, value_name = "FILE")]
        layer: PathBuf,
        #[arg(long)]
        term: String,
    },
    /// Merge highlight rectangles (YAML list) and print them per page.
    Merge {
        #[arg(long, value_name = "FILE")]
        highlights: PathBuf,
        #[arg(long)]
        tolerance: Option<f64>,
    },
    /// Replay a pointer script against a page layout and print the strokes.
    Replay {
        #[arg(long, value_name = "FILE")]
        script: PathBuf,
    },
    /// Print the effective settings and where they are stored.
    Config,
}

#[derive(Debug, Serialize)]
struct SearchOutput {
    matches: usize,
    spans: Vec<SpanMarkup>,
}

#[derive(Debug, Deserialize)]
struct ReplaySearch {
    term: String,
    page: u32,
}

#[derive(Debug, Deserialize)]
struct ReplayScript {
    layout: Layout,
    #[serde(default = "default_mode")]
    mode: DrawingMode,
    #[serde(default)]
    style: Option<StrokeStyle>,
    #[serde(default)]
    scale: Option<f64>,
    events: Vec<PointerEvent>,
    #[serde(default)]
    search: Option<ReplaySearch>,
}

fn default_mode() -> DrawingMode {
    DrawingMode::Pen
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    pages: u32,
    mounted: Vec<u32>,
    strokes: Vec<Stroke>,
    erased: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_matches: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    WriteLogger::init(cli.log_level, Config::default(), File::create(&cli.log_file)?)?;
    panic_handler::initialize_panic_handler();
    settings::load_settings();

    info!("Starting pagequill {:?}", cli.command);

    match cli.command {
        Commands::Search { layer, term } => run_search(&layer, &term),
        Commands::Merge {
            highlights,
            tolerance,
        } => run_merge(&highlights, tolerance),
        Commands::Replay { script } => run_replay(&script),
        Commands::Config => run_config(),
    }
}

fn run_search(layer: &Path, term: &str) -> Result<()> {
    let content = fs::read_to_string(layer).with_context(|| format!("reading {layer:?}"))?;
    let spans: Vec<String> =
        serde_json::from_str(&content).with_context(|| format!("parsing {layer:?}"))?;

    let markup = apply_highlight(&spans, term);
    let output = SearchOutput {
        matches: count_matches(&markup),
        spans: markup,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_merge(path: &Path, tolerance: Option<f64>) -> Result<()> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    let rects: Vec<HighlightRect> =
        serde_yaml::from_str(&content).with_context(|| format!("parsing {path:?}"))?;
    let tolerance = tolerance.unwrap_or_else(|| settings::current().merge_tolerance);

    let merged = merge_highlight_rects(&rects, tolerance);
    info!("merged {} rects into {}", rects.len(), merged.len());
    print!("{}", serde_yaml::to_string(&merged)?);
    Ok(())
}

fn run_replay(path: &Path) -> Result<()> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    let script: ReplayScript =
        serde_yaml::from_str(&content).with_context(|| format!("parsing {path:?}"))?;

    let mut config = ViewerConfig::from_settings(&settings::current());
    if let Some(style) = script.style {
        config.pen_style = style;
    }
    let now = Instant::now();
    let mut viewer = Viewer::new(HeadlessHost::new(script.layout), config);
    viewer.open(&path.display().to_string(), now);
    for event in viewer.pump(now) {
        if let AdapterEvent::LoadFailed(err) = event {
            bail!("replay layout rejected: {err}");
        }
    }
    if let Some(scale) = script.scale {
        viewer.set_scale(scale);
        viewer.pump(now);
    }

    viewer.set_drawing_mode(script.mode);
    let mut source = SimulatedPointerSource::new(script.events);
    info!("replaying {} pointer events", source.remaining());
    let outcomes = viewer.drain_pointer_source(&mut source, now)?;
    let erased = outcomes
        .iter()
        .map(|outcome| match outcome {
            PointerOutcome::Erased(ids) => ids.len(),
            _ => 0,
        })
        .sum();

    let search_matches = script.search.map(|search| {
        match viewer.search(&search.term, search.page, now) {
            SearchOutcome::Applied { matches, .. } => matches,
            _ => 0,
        }
    });

    let output = ReplayOutput {
        pages: viewer.adapter().page_count(),
        mounted: viewer.registry().pages(),
        strokes: viewer.document_strokes().into_iter().cloned().collect(),
        erased,
        search_matches,
    };
    print!("{}", serde_yaml::to_string(&output)?);
    Ok(())
}

fn run_config() -> Result<()> {
    match settings::config_path() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config directory, using defaults"),
    }
    print!("{}", serde_yaml::to_string(&settings::current())?);
    Ok(())
}

//! autobattle CLI - desktop entry point for tuning templates and settings
//!
//! Runs the automation core against screenshots instead of a live device.
//! Every device command is printed as JSON rather than sent anywhere.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use autobattle::android::CommandQueue;
use autobattle::automation::ManualClock;
use autobattle::config::Settings;
use autobattle::game::SharedState;
use autobattle::vision::{Frame, TemplateDir, TemplateMatcher};
use autobattle::Bot;

#[derive(Parser, Debug)]
#[command(name = "autobattle")]
#[command(about = "Template-matching battle automation for mirrored Android screens")]
struct Args {
    /// Settings JSON file; defaults are used when omitted
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Use the fast polling preset instead of the defaults
    #[arg(long, global = true, conflicts_with = "settings")]
    fast: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective settings as JSON
    Config,

    /// Match one template against a screenshot
    Match {
        /// Screenshot (PNG) to search
        #[arg(short, long)]
        frame: PathBuf,

        /// Template name, resolved as `<templateDir>/<name>.png`
        #[arg(short, long)]
        template: String,
    },

    /// Replay a directory of screenshots through every loop
    Simulate {
        /// Directory of PNG screenshots, replayed in file name order
        #[arg(short, long)]
        frames: PathBuf,

        /// Virtual time between two screenshots
        #[arg(long, default_value_t = 1000)]
        frame_interval_ms: u64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = match &args.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None if args.fast => Settings::fast_polling(),
        None => Settings::default(),
    };

    match args.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Match { frame, template } => run_match(settings, &frame, &template)?,
        Command::Simulate {
            frames,
            frame_interval_ms,
        } => simulate(settings, &frames, Duration::from_millis(frame_interval_ms))?,
    }

    Ok(())
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_rgb8();
    Ok(Frame::from_rgb_image(&image))
}

fn run_match(settings: Settings, frame: &Path, template: &str) -> Result<()> {
    let frame = load_frame(frame)?;
    let source = Arc::new(TemplateDir::new(settings.template_dir.clone()));
    let matcher = TemplateMatcher::new(source, Arc::new(SharedState::new()))
        .with_threshold(settings.match_threshold);

    let result = matcher.match_template(&frame, template);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn simulate(settings: Settings, dir: &Path, frame_interval: Duration) -> Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        log::warn!("No PNG files in {}", dir.display());
        return Ok(());
    }

    let queue = Arc::new(CommandQueue::new());
    let clock = Arc::new(ManualClock::new());
    let templates = Arc::new(TemplateDir::new(settings.template_dir.clone()));
    let bot = Bot::with_parts(settings, queue.clone(), templates, clock.clone());
    let mut tasks = bot.tasks();

    for path in &paths {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        bot.on_frame(load_frame(path)?);

        for task in tasks.iter_mut() {
            task.tick();
        }

        println!("# {} {}", name, serde_json::to_string(&bot.snapshot())?);
        for command in queue.drain() {
            println!("{}", serde_json::to_string(&command)?);
        }
        clock.advance(frame_interval);
    }

    Ok(())
}

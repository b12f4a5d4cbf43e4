//! Diamondtui — match-3 diamond puzzle on a sprite-batch engine, in the terminal.

mod app;
mod batch;
mod engine;
mod game;
mod highscores;
mod input;
mod raster;
mod texture;
mod theme;
mod ui;

use anyhow::{Context, Result};
use app::App;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// Options derived from CLI that affect game behaviour (grid, timings, swap rules).
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub width: usize,
    pub height: usize,
    pub threshold: usize,
    pub colors: usize,
    pub match_seconds: f32,
    pub round_seconds: f32,
    pub swap_seconds: f32,
    pub fall_seconds: f32,
    pub initial_rows: Option<usize>,
    pub strict_swaps: bool,
    pub seed: u32,
}

impl GameConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            width: usize::from(args.width),
            height: usize::from(args.height),
            threshold: args.threshold,
            colors: args.colors,
            match_seconds: args.match_time,
            round_seconds: args.round_time,
            swap_seconds: args.swap_time,
            fall_seconds: args.fall_time,
            initial_rows: args.initial_rows,
            strict_swaps: args.strict_swaps,
            seed: args.seed.unwrap_or_else(clock_seed),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.log_file {
        init_logging(path, args.log_level)?;
    }
    let theme = match theme::Theme::load(args.theme.as_deref(), args.palette) {
        Ok(theme) => theme,
        Err(err) => {
            tracing::warn!(%err, "theme not loaded, using defaults");
            theme::Theme::default_for_palette(args.palette)
        }
    };
    let config = GameConfig::from_args(&args);
    tracing::info!(?config, "starting");
    let mut app = App::new(&args, config, theme)?;
    app.run()?;
    Ok(())
}

/// Logs go to a file; the terminal belongs to the game.
fn init_logging(path: &std::path::Path, level: LevelFilter) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_max_level(level)
        .init();
    Ok(())
}

fn clock_seed() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() ^ (d.as_secs() as u32))
        .unwrap_or(1)
}

/// Match-3 diamond puzzle in the terminal.
#[derive(Debug, Parser)]
#[command(
    name = "diamondtui",
    version,
    about = "Match-3 diamond puzzle in the terminal. Swap neighbours to line up diamonds before the board fills.",
    long_about = "Diamondtui is a terminal match-3 game.\n\n\
        Click a diamond, then click a neighbour to swap them. Lines of --threshold or more \
        identical diamonds explode; n diamonds exploding together score n squared. A new \
        diamond drops in every round; the match ends when time runs out or a column \
        overflows.\n\n\
        CONTROLS:\n  Mouse       Pick / swap    Enter/Space  Start match\n  R           Restart        P            Pause\n  Q / Esc     Quit\n\n\
        Use --theme to load a btop-style theme (e.g. onedark.theme)."
)]
pub struct Args {
    /// Path to theme file (btop-style theme[key]=\"value\"). Uses One Dark if not set.
    #[arg(short, long, value_name = "FILE")]
    pub theme: Option<PathBuf>,

    /// Colour palette: normal (theme), high-contrast, or colorblind.
    #[arg(long, default_value = "normal")]
    pub palette: Palette,

    /// Grid width in cells.
    #[arg(long, default_value = "8", value_name = "COLS")]
    pub width: u16,

    /// Grid height in cells.
    #[arg(long, default_value = "8", value_name = "ROWS")]
    pub height: u16,

    /// Minimum run length that explodes.
    #[arg(long, default_value = "3", value_name = "N")]
    pub threshold: usize,

    /// Number of diamond kinds in play (2-8).
    #[arg(short, long, default_value = "6", value_name = "N")]
    pub colors: usize,

    /// Match length in seconds.
    #[arg(long, default_value = "90", value_name = "SECS")]
    pub match_time: f32,

    /// Seconds between spawned diamonds.
    #[arg(long, default_value = "1.0", value_name = "SECS")]
    pub round_time: f32,

    /// Swap animation length in seconds.
    #[arg(long, default_value = "0.25", value_name = "SECS")]
    pub swap_time: f32,

    /// Fall animation length per cell travelled, in seconds.
    #[arg(long, default_value = "0.08", value_name = "SECS")]
    pub fall_time: f32,

    /// Rows filled when a match is dealt (default: bottom half of the grid).
    #[arg(long, value_name = "ROWS")]
    pub initial_rows: Option<usize>,

    /// Seed for the board and spawns; random if not set.
    #[arg(long, value_name = "N")]
    pub seed: Option<u32>,

    /// Only allow swaps that complete a run.
    #[arg(long)]
    pub strict_swaps: bool,

    /// Skip the start screen and begin a match immediately.
    #[arg(long)]
    pub no_menu: bool,

    /// Target render frames per second.
    #[arg(long, default_value = "60.0", value_name = "RATE")]
    pub frame_rate: f64,

    /// Write logs to this file (nothing is logged otherwise).
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log level for --log-file.
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    pub log_level: LevelFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Palette {
    #[default]
    Normal,

    #[value(alias = "highcontrast", alias = "contrast")]
    HighContrast,

    #[value(alias = "colourblind")]
    Colorblind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["diamondtui"]).unwrap();
        assert_eq!((args.width, args.height), (8, 8));
        assert_eq!(args.threshold, 3);
        assert!(!args.strict_swaps);
        assert_eq!(args.log_level, LevelFilter::INFO);
    }

    #[test]
    fn test_palette_alias() {
        let args = Args::try_parse_from(["diamondtui", "--palette", "colourblind"]).unwrap();
        assert_eq!(args.palette, Palette::Colorblind);
    }
}

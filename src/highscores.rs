//! Persist the best score to disk (XDG config or ~/.config/diamondtui).

use anyhow::Result;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

const DIRNAME: &str = "diamondtui";
const FILENAME: &str = "highscore";

/// Returns the path to the high score file (config dir / diamondtui / highscore).
fn config_path() -> PathBuf {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".config"))
            .unwrap_or_else(|_| PathBuf::from(".")),
    };
    base.join(DIRNAME).join(FILENAME)
}

/// First line as a score; 0 if missing or unparsable.
pub fn parse_high_score(content: &str) -> u32 {
    content
        .lines()
        .next()
        .and_then(|l| l.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

/// Load the high score from disk. 0 on missing file or parse error.
pub fn load_high_score() -> u32 {
    let path = config_path();
    match fs::read_to_string(&path) {
        Ok(content) => parse_high_score(&content),
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "no high score file");
            0
        }
    }
}

/// Save the high score to disk. Creates the config directory if needed.
pub fn save_high_score(score: u32) -> Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = fs::File::create(&path)?;
    writeln!(f, "{}", score)?;
    tracing::info!(score, path = %path.display(), "high score saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_high_score() {
        assert_eq!(parse_high_score("42\n"), 42);
        assert_eq!(parse_high_score("  7  \n99\n"), 7);
        assert_eq!(parse_high_score(""), 0);
        assert_eq!(parse_high_score("lots"), 0);
    }

    #[test]
    fn test_path_ends_in_app_dir() {
        let path = config_path();
        assert!(path.ends_with("diamondtui/highscore"));
    }
}

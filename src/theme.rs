//! Theme loading: btop-style `theme[key]="value"` and hex → ratatui Color / RGBA texels.

use crate::engine::{Background, Diamond};
use glam::Vec4;
use ratatui::style::Color;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Diamond and cell colours plus UI colours loaded from a theme file.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Diamond colours, indexed by `Diamond::index()`.
    pub diamonds: [Color; Diamond::COUNT],
    /// Cell background colours, indexed by `Background::index()`.
    pub cells: [Color; Background::COUNT],
    /// Framebuffer clear colour.
    pub bg: Color,
    /// Borders.
    pub div_line: Color,
    /// Text (score, timers).
    pub main_fg: Color,
    /// Highlight / titles.
    pub title: Color,
    /// Secondary text (controls help).
    pub inactive_fg: Color,
}

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

impl Default for Theme {
    fn default() -> Self {
        Self::onedark_default()
    }
}

// One Dark hex values; the keys in `from_map` look these up by the same names.
const DIAMOND_DEFAULTS: [(&str, &str); Diamond::COUNT] = [
    ("cpu_box", "#61AFEF"),
    ("mem_box", "#98C379"),
    ("net_box", "#C678DD"),
    ("cpu_end", "#E06C75"),
    ("title", "#E5C07B"),
    ("hi_fg", "#56B6C2"),
    ("inactive_fg", "#5C6370"),
    ("main_fg", "#DCDFE4"),
];

const CELL_DEFAULTS: [(&str, &str); Background::COUNT] = [
    ("meter_bg", "#31353F"),
    ("selected_bg", "#4B5263"),
    ("proc_box", "#3B4A3F"),
    ("temp_start", "#4A3035"),
];

impl Theme {
    /// Hardcoded One Dark defaults.
    pub fn onedark_default() -> Self {
        Self::from_map(&HashMap::new())
    }

    /// Load theme from a btop-style file: `theme[key]="value"` or `theme[key]='value'`.
    /// Falls back to One Dark defaults if path is None or the file is missing.
    pub fn load(path: Option<&Path>, palette: crate::Palette) -> Result<Self, ThemeError> {
        let path = match path {
            Some(p) if p.exists() => p,
            _ => return Ok(Self::default_for_palette(palette)),
        };
        let s = std::fs::read_to_string(path)?;
        let map = parse_theme_file(&s);
        let mut theme = Self::from_map(&map);
        theme.apply_palette(palette);
        Ok(theme)
    }

    /// One Dark with `palette` applied.
    pub fn default_for_palette(palette: crate::Palette) -> Self {
        let mut t = Self::onedark_default();
        t.apply_palette(palette);
        t
    }

    /// Override diamond colours for high-contrast or colorblind play.
    pub fn apply_palette(&mut self, palette: crate::Palette) {
        let hexes: [&str; Diamond::COUNT] = match palette {
            crate::Palette::Normal => return,
            crate::Palette::HighContrast => [
                "#0088FF", "#00FF00", "#FF00FF", "#FF0000", "#FFFF00", "#00FFFF", "#202020",
                "#FFFFFF",
            ],
            // Blue/orange axis first so the default six colours stay distinguishable
            crate::Palette::Colorblind => [
                "#0077BB", "#EE7733", "#009988", "#CC3311", "#EE3377", "#BBBB00", "#33BBEE",
                "#DDDDDD",
            ],
        };
        for (slot, hex) in self.diamonds.iter_mut().zip(hexes) {
            if let Ok(c) = parse_hex(hex) {
                *slot = c;
            }
        }
    }

    fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |key: &str, fallback: &str| {
            map.get(key)
                .and_then(|v| parse_hex(v.trim_matches('"').trim_matches('\'').trim()).ok())
                .or_else(|| parse_hex(fallback).ok())
                .unwrap_or(Color::Gray)
        };
        Self {
            diamonds: DIAMOND_DEFAULTS.map(|(key, hex)| get(key, hex)),
            cells: CELL_DEFAULTS.map(|(key, hex)| get(key, hex)),
            bg: get("main_bg", "#282C34"),
            div_line: get("div_line", "#3F444F"),
            main_fg: get("main_fg", "#ABB2BF"),
            title: get("title", "#E5C07B"),
            inactive_fg: get("inactive_fg", "#5C6370"),
        }
    }

    #[inline]
    pub fn diamond_rgba(&self, diamond: Diamond) -> Vec4 {
        color_to_rgba(self.diamonds[diamond.index()])
    }

    #[inline]
    pub fn cell_rgba(&self, background: Background) -> Vec4 {
        color_to_rgba(self.cells[background.index()])
    }
}

/// Parse btop-style theme file into key -> value map.
fn parse_theme_file(s: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("theme[") {
            if let Some(end) = stripped.find(']') {
                let key = stripped[..end].trim();
                let rest = stripped[end + 1..].trim();
                if let Some(eq) = rest.find('=') {
                    let value = rest[eq + 1..]
                        .trim()
                        .trim_matches('"')
                        .trim_matches('\'')
                        .to_string();
                    if !value.is_empty() {
                        map.insert(key.to_string(), value);
                    }
                }
            }
        }
    }
    map
}

/// Parse hex colour "#RRGGBB" or "#RGB" into ratatui Color.
pub fn parse_hex(s: &str) -> Result<Color, ThemeError> {
    let s = s.trim().trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>, scale: u8| {
        s.get(range)
            .and_then(|digits| u8::from_str_radix(digits, 16).ok())
            .map(|v| v * scale)
            .ok_or_else(|| ThemeError::InvalidHex(s.to_string()))
    };
    let (r, g, b) = match s.len() {
        6 => (channel(0..2, 1)?, channel(2..4, 1)?, channel(4..6, 1)?),
        3 => (channel(0..1, 17)?, channel(1..2, 17)?, channel(2..3, 17)?),
        _ => return Err(ThemeError::InvalidHex(s.to_string())),
    };
    Ok(Color::Rgb(r, g, b))
}

/// Opaque RGBA in `[0, 1]` for a terminal colour. Named colours map to mid grey.
pub fn color_to_rgba(color: Color) -> Vec4 {
    match color {
        Color::Rgb(r, g, b) => Vec4::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            1.0,
        ),
        Color::Black => Vec4::new(0.0, 0.0, 0.0, 1.0),
        Color::White => Vec4::ONE,
        _ => Vec4::new(0.5, 0.5, 0.5, 1.0),
    }
}

/// Terminal colour for an RGBA value; alpha is ignored.
pub fn rgba_to_color(rgba: Vec4) -> Color {
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Color::Rgb(to_u8(rgba.x), to_u8(rgba.y), to_u8(rgba.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_6() {
        let c = parse_hex("#98C379").unwrap();
        assert!(matches!(c, Color::Rgb(0x98, 0xC3, 0x79)));
    }

    #[test]
    fn test_parse_hex_3() {
        let c = parse_hex("#FFF").unwrap();
        assert!(matches!(c, Color::Rgb(255, 255, 255)));
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert!(parse_hex("#12345").is_err());
        assert!(parse_hex("#GGGGGG").is_err());
    }

    #[test]
    fn test_parse_theme_line() {
        let map = parse_theme_file(r##"theme[meter_bg]="#31353F""##);
        assert_eq!(map.get("meter_bg"), Some(&"#31353F".to_string()));
    }

    #[test]
    fn test_theme_file_overrides_diamond() {
        let map = parse_theme_file("theme[cpu_end]=\"#102030\"\n# comment\n");
        let theme = Theme::from_map(&map);
        assert_eq!(theme.diamonds[Diamond::Red.index()], Color::Rgb(0x10, 0x20, 0x30));
    }

    #[test]
    fn test_rgba_round_trip() {
        let c = Color::Rgb(12, 200, 99);
        assert_eq!(rgba_to_color(color_to_rgba(c)), c);
    }

    #[test]
    fn test_palette_changes_diamonds() {
        let mut theme = Theme::default();
        let before = theme.diamonds;
        theme.apply_palette(crate::Palette::HighContrast);
        assert_ne!(theme.diamonds, before);
        assert_eq!(theme.diamonds[Diamond::Red.index()], Color::Rgb(255, 0, 0));
    }
}

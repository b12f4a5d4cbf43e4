//! Layout and drawing: board (framebuffer), sidebar, start and pause overlays, effects.

use crate::game::{EndReason, Game, GameState, MatchOutcome};
use crate::raster::Framebuffer;
use crate::theme::Theme;
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Position, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Widget};
use std::collections::HashSet;
use std::time::Instant;
use tachyonfx::{
    CellFilter, Duration as TfxDuration, Effect, EffectRenderer, Interpolation, fx, ref_count,
};

const SIDEBAR_WIDTH: u16 = 24;
/// Smallest board cell: 2 pixels wide, 2 pixels (one terminal row) tall.
const MIN_CELL_PIXELS: u16 = 2;
const EXPLOSION_FADE_MS: u32 = 350;
const INTRO_FADE_MS: u32 = 600;

/// Where the board and sidebar go for the current terminal size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardLayout {
    /// Board including its border.
    pub outer: Rect,
    /// Framebuffer target, one terminal cell per two pixels stacked.
    pub board: Rect,
    pub sidebar: Rect,
    /// Pixels per grid cell edge; always even so a cell spans whole terminal rows.
    pub cell_pixels: u16,
    pub grid_width: u16,
    pub grid_height: u16,
}

impl BoardLayout {
    /// Framebuffer size in pixels.
    pub fn pixel_size(&self) -> (usize, usize) {
        (
            usize::from(self.grid_width * self.cell_pixels),
            usize::from(self.grid_height * self.cell_pixels),
        )
    }

    /// Terminal rect covered by the grid cell at `index` (row 0 at the bottom).
    pub fn cell_rect(&self, index: usize) -> Rect {
        let w = usize::from(self.grid_width.max(1));
        let col = (index % w) as u16;
        let row = (index / w) as u16;
        let rows_per_cell = self.cell_pixels / 2;
        Rect {
            x: self.board.x + col * self.cell_pixels,
            y: self.board.y + (self.grid_height.saturating_sub(row + 1)) * rows_per_cell,
            width: self.cell_pixels,
            height: rows_per_cell,
        }
    }
}

/// Fits the largest even cell size for the grid plus sidebar and centres it.
pub fn board_layout(area: Rect, grid_width: u16, grid_height: u16) -> BoardLayout {
    let gw = grid_width.max(1);
    let gh = grid_height.max(1);
    let fit_w = area.width.saturating_sub(SIDEBAR_WIDTH + 2) / gw;
    let fit_h = area.height.saturating_sub(2) * 2 / gh;
    let cell_pixels = (fit_w.min(fit_h) & !1).max(MIN_CELL_PIXELS);

    let board_w = gw * cell_pixels;
    let board_h = gh * cell_pixels / 2;
    let total_w = board_w + 2 + SIDEBAR_WIDTH;
    let outer = Rect {
        x: area.x + area.width.saturating_sub(total_w) / 2,
        y: area.y + area.height.saturating_sub(board_h + 2) / 2,
        width: (board_w + 2).min(area.width),
        height: (board_h + 2).min(area.height),
    };
    let board = Rect {
        x: outer.x + 1,
        y: outer.y + 1,
        width: board_w.min(outer.width.saturating_sub(2)),
        height: board_h.min(outer.height.saturating_sub(2)),
    };
    let sidebar_x = outer.x + outer.width;
    let sidebar = Rect {
        x: sidebar_x,
        y: outer.y,
        width: SIDEBAR_WIDTH.min(area.right().saturating_sub(sidebar_x)),
        height: outer.height,
    };
    BoardLayout {
        outer,
        board,
        sidebar,
        cell_pixels,
        grid_width: gw,
        grid_height: gh,
    }
}

/// Running tachyonfx effects over the board.
#[derive(Default)]
pub struct Effects {
    explosion: Option<Effect>,
    intro: Option<Effect>,
    last_process: Option<Instant>,
}

impl Effects {
    /// Flash the cells that just exploded.
    pub fn explode(&mut self, cells: &[usize], layout: &BoardLayout, theme: &Theme) {
        let mut positions = HashSet::new();
        for &index in cells {
            let r = layout.cell_rect(index);
            for y in r.top()..r.bottom() {
                for x in r.left()..r.right() {
                    positions.insert((x, y));
                }
            }
        }
        let filter = CellFilter::PositionFn(ref_count(move |pos: Position| {
            positions.contains(&(pos.x, pos.y))
        }));
        let effect = fx::fade_from(theme.title, Color::White, (EXPLOSION_FADE_MS, Interpolation::Linear))
            .with_filter(filter)
            .with_area(layout.board);
        self.explosion = Some(effect);
    }

    /// Fade the board in when a match begins.
    pub fn intro(&mut self, layout: &BoardLayout, theme: &Theme) {
        let effect = fx::fade_from(theme.bg, theme.bg, (INTRO_FADE_MS, Interpolation::Linear))
            .with_area(layout.board);
        self.intro = Some(effect);
    }

    #[cfg(test)]
    pub fn intro_pending(&self) -> bool {
        self.intro.is_some()
    }

    pub fn clear(&mut self) {
        self.explosion = None;
        self.intro = None;
    }

    fn process(&mut self, frame: &mut Frame, area: Rect, now: Instant) {
        let delta = self
            .last_process
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or(std::time::Duration::ZERO);
        let delta_ms = delta.as_millis().min(u128::from(u32::MAX)) as u32;
        let tfx_delta = TfxDuration::from_millis(delta_ms);
        self.last_process = Some(now);

        for slot in [&mut self.intro, &mut self.explosion] {
            if let Some(effect) = slot {
                frame.render_effect(effect, area, tfx_delta);
                if effect.done() {
                    *slot = None;
                }
            }
        }
    }
}

/// What one frame shows besides the framebuffer.
pub struct Hud<'a> {
    pub game: &'a Game,
    pub theme: &'a Theme,
    pub best: u32,
    pub paused: bool,
    pub last_outcome: Option<MatchOutcome>,
}

/// Draw board, sidebar, overlays, then run effects on top.
pub fn draw(
    frame: &mut Frame,
    hud: &Hud<'_>,
    framebuffer: &Framebuffer,
    layout: &BoardLayout,
    effects: &mut Effects,
    now: Instant,
) {
    let theme = hud.theme;
    let area = frame.area();
    frame
        .buffer_mut()
        .set_style(area, Style::default().bg(theme.bg));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.div_line).bg(theme.bg))
        .title(Span::styled(
            " Diamonds ",
            Style::default().fg(theme.title).add_modifier(Modifier::BOLD),
        ));
    block.render(layout.outer, frame.buffer_mut());
    framebuffer.present(frame.buffer_mut(), layout.board);

    draw_sidebar(frame, hud, layout.sidebar);

    match hud.game.state() {
        GameState::Init | GameState::Invalid => {
            draw_start_overlay(frame, hud, layout.outer);
        }
        _ if hud.paused => draw_pause_overlay(frame, theme, layout.outer),
        _ => {}
    }

    effects.process(frame, layout.board, now);
}

fn popup_rect(area: Rect, width: u16, height: u16) -> Rect {
    Rect {
        x: area.x + area.width.saturating_sub(width) / 2,
        y: area.y + area.height.saturating_sub(height) / 2,
        width: width.min(area.width),
        height: height.min(area.height),
    }
}

fn outcome_text(outcome: MatchOutcome) -> String {
    let why = match outcome.reason {
        EndReason::TimeUp => "Time up",
        EndReason::BoardFull => "Board full",
        EndReason::Restarted => "Restarted",
    };
    format!("{}! Score {}", why, outcome.score)
}

fn draw_start_overlay(frame: &mut Frame, hud: &Hud<'_>, area: Rect) {
    let theme = hud.theme;
    let mut lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            " Diamonds ",
            Style::default().fg(Color::Black).bg(theme.title),
        )),
        Line::from(""),
    ];
    if let Some(outcome) = hud.last_outcome {
        lines.push(Line::from(Span::styled(
            outcome_text(outcome),
            Style::default().fg(theme.main_fg),
        )));
        lines.push(Line::from(""));
    }
    lines.push(Line::from(Span::styled(
        " Enter: start   Q: quit ",
        Style::default().fg(theme.main_fg),
    )));
    let height = lines.len() as u16 + 2;
    let p = Paragraph::new(lines).alignment(Alignment::Center).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.div_line).bg(theme.bg))
            .style(Style::default().bg(theme.bg)),
    );
    p.render(popup_rect(area, 30, height), frame.buffer_mut());
}

fn draw_pause_overlay(frame: &mut Frame, theme: &Theme, area: Rect) {
    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            " Paused ",
            Style::default().fg(Color::Black).bg(Color::Yellow),
        )),
        Line::from(""),
        Line::from(Span::styled(
            " P: resume   Q: quit ",
            Style::default().fg(theme.main_fg),
        )),
    ];
    let p = Paragraph::new(lines).alignment(Alignment::Center).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.div_line).bg(theme.bg))
            .style(Style::default().bg(theme.bg)),
    );
    p.render(popup_rect(area, 28, 6), frame.buffer_mut());
}

fn timer_color(ratio: f64) -> Color {
    if ratio > 0.5 {
        Color::Green
    } else if ratio > 0.2 {
        Color::Yellow
    } else {
        Color::Red
    }
}

fn ratio(left: f32, total: f32) -> f64 {
    if total > 0.0 {
        f64::from(left / total).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn draw_sidebar(frame: &mut Frame, hud: &Hud<'_>, area: Rect) {
    let theme = hud.theme;
    let game = hud.game;
    let title_style = Style::default().fg(theme.title);
    let fg_style = Style::default().fg(theme.main_fg);
    let dim_style = Style::default().fg(theme.inactive_fg);
    let border_style = Style::default().fg(theme.div_line).bg(theme.bg);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5), // Score, best, state
            Constraint::Length(1), // gap
            Constraint::Length(6), // Match and spawn timers
            Constraint::Length(1), // gap
            Constraint::Length(6), // Controls
        ])
        .split(area);

    let stats_block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style);
    let stats_inner = stats_block.inner(chunks[0]);
    stats_block.render(chunks[0], frame.buffer_mut());
    let stats_lines = vec![
        Line::from(vec![
            Span::styled("Score: ", title_style),
            Span::styled(game.score().to_string(), fg_style),
        ]),
        Line::from(vec![
            Span::styled("Best: ", title_style),
            Span::styled(hud.best.max(game.score()).to_string(), fg_style),
        ]),
        Line::from(Span::styled(game.state().label(), dim_style)),
    ];
    Paragraph::new(Text::from(stats_lines)).render(stats_inner, frame.buffer_mut());

    let timers_block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style);
    let timers_inner = timers_block.inner(chunks[2]);
    timers_block.render(chunks[2], frame.buffer_mut());
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1); 4])
        .split(timers_inner);
    let rules = game.rules();
    let match_left = game.match_seconds_left();
    let match_ratio = ratio(match_left, rules.match_seconds);
    Paragraph::new(Line::from(Span::styled(
        format!("Time {:02}:{:02}", (match_left as u32) / 60, (match_left as u32) % 60),
        title_style,
    )))
    .render(rows[0], frame.buffer_mut());
    Gauge::default()
        .ratio(match_ratio)
        .label("")
        .gauge_style(Style::default().fg(timer_color(match_ratio)))
        .render(rows[1], frame.buffer_mut());
    Paragraph::new(Line::from(Span::styled("Next drop", title_style)))
        .render(rows[2], frame.buffer_mut());
    let round_ratio = ratio(game.round_seconds_left(), rules.round_seconds);
    Gauge::default()
        .ratio(round_ratio)
        .label("")
        .gauge_style(Style::default().fg(theme.div_line))
        .render(rows[3], frame.buffer_mut());

    let help_block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style);
    let help_inner = help_block.inner(chunks[4]);
    help_block.render(chunks[4], frame.buffer_mut());
    let help = vec![
        Line::from(Span::styled("Click: pick / swap", dim_style)),
        Line::from(Span::styled("Enter: start", dim_style)),
        Line::from(Span::styled("R: restart  P: pause", dim_style)),
        Line::from(Span::styled("Q / Esc: quit", dim_style)),
    ];
    Paragraph::new(Text::from(help)).render(help_inner, frame.buffer_mut());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_fits_and_is_even() {
        let area = Rect::new(0, 0, 120, 40);
        let l = board_layout(area, 8, 8);
        assert_eq!(l.cell_pixels % 2, 0);
        assert!(l.outer.right() + SIDEBAR_WIDTH <= area.right());
        assert!(l.outer.bottom() <= area.bottom());
        assert_eq!(l.board.width, 8 * l.cell_pixels);
        assert_eq!(l.board.height, 8 * l.cell_pixels / 2);
        // 120 - 26 = 94 / 8 = 11 -> 10 wide; 38 * 2 / 8 = 9 -> 8 tall
        assert_eq!(l.cell_pixels, 8);
    }

    #[test]
    fn test_layout_tiny_terminal_keeps_minimum() {
        let l = board_layout(Rect::new(0, 0, 10, 5), 8, 8);
        assert_eq!(l.cell_pixels, MIN_CELL_PIXELS);
        assert!(l.board.width <= l.outer.width);
    }

    #[test]
    fn test_cell_rect_row_zero_is_bottom() {
        let l = board_layout(Rect::new(0, 0, 120, 40), 8, 8);
        let bottom_left = l.cell_rect(0);
        assert_eq!(bottom_left.x, l.board.x);
        assert_eq!(bottom_left.bottom(), l.board.bottom());
        let top_right = l.cell_rect(63);
        assert_eq!(top_right.y, l.board.y);
        assert_eq!(top_right.right(), l.board.right());
    }

    #[test]
    fn test_pixel_size_matches_board() {
        let l = board_layout(Rect::new(0, 0, 100, 30), 6, 5);
        let (w, h) = l.pixel_size();
        assert_eq!(w, usize::from(l.board.width));
        assert_eq!(h, usize::from(l.board.height) * 2);
    }

    #[test]
    fn test_outcome_text() {
        let text = outcome_text(MatchOutcome {
            score: 12,
            reason: EndReason::BoardFull,
        });
        assert_eq!(text, "Board full! Score 12");
    }
}

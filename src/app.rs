//! App: terminal init, main loop, event routing and per-frame update/draw.

use crate::engine::Engine;
use crate::game::{Game, GameState, MatchOutcome, Rules};
use crate::highscores;
use crate::input::{Action, InputState, Viewport, key_to_action};
use crate::raster::Framebuffer;
use crate::theme::{Theme, color_to_rgba};
use crate::ui::{self, BoardLayout, Effects, Hud};
use crate::{Args, GameConfig};
use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::DefaultTerminal;
use ratatui::layout::Rect;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct App {
    theme: Theme,
    engine: Engine,
    game: Game,
    input: InputState,
    framebuffer: Framebuffer,
    effects: Effects,
    layout: BoardLayout,
    best: u32,
    last_outcome: Option<MatchOutcome>,
    paused: bool,
    frame_duration: Duration,
}

impl App {
    pub fn new(args: &Args, config: GameConfig, theme: Theme) -> Result<Self> {
        let mut engine = Engine::new(&theme, config.width, config.height)?;
        let mut game = Game::new(Rules::from(&config), config.seed);
        game.init(&mut engine);
        let layout = ui::board_layout(
            Rect::new(0, 0, 80, 24),
            config.width as u16,
            config.height as u16,
        );
        let mut effects = Effects::default();
        if args.no_menu {
            game.begin_match();
            effects.intro(&layout, &theme);
        }
        let (w, h) = layout.pixel_size();
        let framebuffer = Framebuffer::new(w, h, color_to_rgba(theme.bg));
        Ok(Self {
            theme,
            engine,
            game,
            input: InputState::default(),
            framebuffer,
            effects,
            layout,
            best: highscores::load_high_score(),
            last_outcome: None,
            paused: false,
            frame_duration: Duration::from_secs_f64(1.0 / args.frame_rate.max(1.0)),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        use crossterm::{
            event::{DisableMouseCapture, EnableMouseCapture},
            execute,
            terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
        };

        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let mut terminal =
            ratatui::DefaultTerminal::new(ratatui::backend::CrosstermBackend::new(stdout))?;

        let result = self.run_loop(&mut terminal);

        // Restore
        execute!(std::io::stdout(), DisableMouseCapture, LeaveAlternateScreen)?;
        disable_raw_mode()?;
        terminal.show_cursor()?;

        result
    }

    fn run_loop(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        let mut last_frame = Instant::now();
        loop {
            let now = Instant::now();
            self.input
                .set_frame_seconds(now.duration_since(last_frame).as_secs_f32());
            last_frame = now;

            let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
            self.relayout(Rect::new(0, 0, cols, rows));

            self.tick();

            self.framebuffer.reset(self.framebuffer.width(), self.framebuffer.height());
            self.engine.flush_and_draw(&mut self.framebuffer);

            let hud = Hud {
                game: &self.game,
                theme: &self.theme,
                best: self.best,
                paused: self.paused,
                last_outcome: self.last_outcome,
            };
            let framebuffer = &self.framebuffer;
            let layout = &self.layout;
            let effects = &mut self.effects;
            terminal.draw(|f| ui::draw(f, &hud, framebuffer, layout, effects, now))?;

            self.input.end_frame();

            let timeout = self.frame_duration.saturating_sub(now.elapsed());
            if self.handle_events(timeout)? == Flow::Quit {
                tracing::info!("quit");
                return Ok(());
            }
        }
    }

    /// Refits the board to the terminal and resizes the framebuffer to match.
    fn relayout(&mut self, area: Rect) {
        let layout = ui::board_layout(
            area,
            self.engine.grid_width() as u16,
            self.engine.grid_height() as u16,
        );
        if layout != self.layout {
            let (w, h) = layout.pixel_size();
            self.framebuffer.reset(w, h);
            self.layout = layout;
            tracing::debug!(w, h, cell = layout.cell_pixels, "relayout");
        }
    }

    /// Advances the simulation one frame unless paused.
    fn tick(&mut self) {
        if !self.paused {
            self.step();
        }
    }

    fn step(&mut self) {
        let before = self.game.state();
        self.game.update(&mut self.engine, &self.input);
        let after = self.game.state();

        if !self.game.exploded().is_empty() {
            self.effects
                .explode(self.game.exploded(), &self.layout, &self.theme);
        }
        if before != GameState::MatchBegun && after == GameState::MatchBegun {
            self.effects.intro(&self.layout, &self.theme);
        }

        if let Some(outcome) = self.game.take_outcome() {
            self.finish_match(outcome);
        }
    }

    fn finish_match(&mut self, outcome: MatchOutcome) {
        self.last_outcome = Some(outcome);
        self.effects.clear();
        if outcome.score > self.best {
            self.best = outcome.score;
            if let Err(err) = highscores::save_high_score(self.best) {
                tracing::warn!(%err, "could not save high score");
            }
        }
    }

    /// Drains terminal events until `timeout` runs out.
    fn handle_events(&mut self, timeout: Duration) -> Result<Flow> {
        if !event::poll(timeout)? {
            return Ok(Flow::Continue);
        }
        let viewport = Viewport::new(self.layout.board, self.engine.world_size());
        while event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if self.handle_action(key_to_action(key)) == Flow::Quit {
                        return Ok(Flow::Quit);
                    }
                }
                Event::Mouse(mouse) if !self.paused => self.input.apply_mouse(mouse, &viewport),
                _ => {}
            }
        }
        Ok(Flow::Continue)
    }

    /// Pause only toggles during a match; other keys are dropped while paused.
    fn handle_action(&mut self, action: Action) -> Flow {
        match action {
            Action::Quit => return Flow::Quit,
            Action::Pause => {
                if self.game.state().is_match_in_progress() {
                    self.paused = !self.paused;
                    tracing::debug!(paused = self.paused, "pause toggled");
                }
            }
            action => {
                if !self.paused {
                    self.input.press_key(action);
                }
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn app(flags: &[&str]) -> App {
        let args = Args::try_parse_from(["diamondtui", "--seed", "5"].iter().chain(flags).copied()).unwrap();
        let config = GameConfig::from_args(&args);
        App::new(&args, config, Theme::default()).unwrap()
    }

    fn frame(app: &mut App, seconds: f32) {
        app.input.set_frame_seconds(seconds);
        app.tick();
        app.input.end_frame();
    }

    #[test]
    fn test_pause_stops_the_clock() {
        let mut app = app(&["--no-menu"]);
        assert_eq!(app.game.state(), GameState::MatchBegun);
        frame(&mut app, 0.2);
        let left = app.game.match_seconds_left();
        assert!(left < 90.0);

        assert_eq!(app.handle_action(Action::Pause), Flow::Continue);
        assert!(app.paused);
        frame(&mut app, 0.2);
        frame(&mut app, 0.2);
        assert_eq!(app.game.match_seconds_left(), left);

        app.handle_action(Action::Pause);
        assert!(!app.paused);
        frame(&mut app, 0.2);
        assert!(app.game.match_seconds_left() < left);
    }

    #[test]
    fn test_keys_dropped_while_paused() {
        let mut app = app(&["--no-menu"]);
        app.handle_action(Action::Pause);
        app.handle_action(Action::Restart);
        assert!(!app.input.is_key_down(Action::Restart));
    }

    #[test]
    fn test_pause_ignored_before_match() {
        let mut app = app(&[]);
        assert_eq!(app.game.state(), GameState::Init);
        app.handle_action(Action::Pause);
        assert!(!app.paused);
    }

    #[test]
    fn test_quit_action() {
        let mut app = app(&[]);
        assert_eq!(app.handle_action(Action::Quit), Flow::Quit);
    }

    #[test]
    fn test_no_menu_plays_intro() {
        assert!(app(&["--no-menu"]).effects.intro_pending());
        assert!(!app(&[]).effects.intro_pending());
    }
}

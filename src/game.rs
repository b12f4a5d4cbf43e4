//! Match state machine: adjacency scan, explosions, falling, swaps, spawning and timers.
//!
//! One `Game::update` runs per frame. While a match is in progress each tick
//! runs, in order: adjacency scan, explosion resolution, player pick (which may
//! start a swap), falling, animation tick, spawning, background feedback and
//! timers. Animations are plain `DataTarget` records ticked once per frame.

use crate::engine::{Background, Diamond, Engine, Visual};
use crate::input::{Action, InputState, MouseButton};
use std::ops::Range;

/// Top-level lifecycle. The busy states between `MatchBegun` and `MatchEnd`
/// only describe what the last tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameState {
    #[default]
    Invalid,
    Init,
    MatchBegun,
    GridExploding,
    GridFalling,
    GridSpawning,
    PlayerMoving,
    PlayerWaiting,
    MatchEnd,
}

impl GameState {
    pub fn is_match_in_progress(self) -> bool {
        matches!(
            self,
            Self::MatchBegun
                | Self::GridExploding
                | Self::GridFalling
                | Self::GridSpawning
                | Self::PlayerMoving
                | Self::PlayerWaiting
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Init => "ready",
            Self::MatchBegun => "go!",
            Self::GridExploding => "exploding",
            Self::GridFalling => "falling",
            Self::GridSpawning => "spawning",
            Self::PlayerMoving => "swapping",
            Self::PlayerWaiting => "your move",
            Self::MatchEnd => "match over",
        }
    }
}

/// Per-cell simulation tag. `Empty` exactly when the cell has no diamond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiamondState {
    Empty,
    Ready,
    Spawning,
    Swapping,
    /// Reserved for drag-to-swap input.
    #[allow(dead_code)]
    Dragged,
    Explode,
    Selected,
    /// Reserved for drag-to-swap input.
    #[allow(dead_code)]
    Falling,
    Updating,
}

impl DiamondState {
    /// Cells that can take part in a run.
    #[inline]
    pub fn is_matchable(self) -> bool {
        matches!(self, Self::Ready | Self::Explode)
    }

    pub fn background(self) -> Background {
        match self {
            Self::Empty => Background::Empty,
            Self::Ready => Background::Allowed,
            Self::Selected | Self::Dragged => Background::Full,
            _ => Background::Forbidden,
        }
    }
}

/// In-flight transition of the diamond in `destination` from `start` to its rest visual.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataTarget {
    pub start: Visual,
    pub destination: usize,
    pub total: f32,
    pub life: f32,
    pub diamond: Diamond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapPolicy {
    #[default]
    Always,
    /// Only swaps that complete a run.
    MustMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    TimeUp,
    BoardFull,
    Restarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub score: u32,
    pub reason: EndReason,
}

/// Tunables for one match.
#[derive(Debug, Clone, PartialEq)]
pub struct Rules {
    pub threshold: usize,
    /// Number of diamond kinds in play, from the front of `Diamond::ALL`.
    pub colors: usize,
    pub match_seconds: f32,
    pub round_seconds: f32,
    pub swap_seconds: f32,
    /// Fall time per cell travelled.
    pub fall_seconds: f32,
    /// Rows filled at init; `None` fills the bottom half so spawns have headroom.
    pub initial_rows: Option<usize>,
    pub swap_policy: SwapPolicy,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            threshold: 3,
            colors: 6,
            match_seconds: 90.0,
            round_seconds: 1.0,
            swap_seconds: 0.25,
            fall_seconds: 0.08,
            initial_rows: None,
            swap_policy: SwapPolicy::Always,
        }
    }
}

impl From<&crate::GameConfig> for Rules {
    fn from(config: &crate::GameConfig) -> Self {
        Self {
            threshold: config.threshold.max(2),
            colors: config.colors.clamp(2, Diamond::COUNT),
            match_seconds: config.match_seconds,
            round_seconds: config.round_seconds.max(0.05),
            swap_seconds: config.swap_seconds.max(0.01),
            fall_seconds: config.fall_seconds.max(0.01),
            initial_rows: config.initial_rows,
            swap_policy: if config.strict_swaps {
                SwapPolicy::MustMatch
            } else {
                SwapPolicy::Always
            },
        }
    }
}

/// LCG, seeded per game for reproducible boards.
#[derive(Debug, Clone)]
struct Rng(u32);

impl Rng {
    fn next_rand(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12345);
        self.0 >> 16
    }

    fn below(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.next_rand() as usize % n
    }
}

/// Non-overlapping runs of length ≥ `threshold`, scanning left to right.
/// `None` marks cells that cannot take part in a run.
pub fn find_runs(line: &[Option<Diamond>], threshold: usize) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    while start < line.len() {
        let len = match line[start] {
            Some(kind) => line[start..]
                .iter()
                .take_while(|cell| **cell == Some(kind))
                .count(),
            None => 0,
        };
        if len >= threshold.max(1) {
            runs.push(start..start + len);
        }
        start += len.max(1);
    }
    runs
}

/// True if `kind` at `index` would complete a run with the `need` cells to its
/// left or below. `board` holds the cells dealt so far, row-major from the bottom.
fn completes_run(board: &[Diamond], width: usize, index: usize, kind: Diamond, need: usize) -> bool {
    if need == 0 {
        return true;
    }
    let (col, row) = (index % width, index / width);
    let left = col >= need && (1..=need).all(|step| board[index - step] == kind);
    let below = row >= need && (1..=need).all(|step| board[index - step * width] == kind);
    left || below
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spawn {
    NotDue,
    Spawned,
    Lost,
}

#[derive(Debug)]
pub struct Game {
    rules: Rules,
    state: GameState,
    cells: Vec<DiamondState>,
    targets: Vec<DataTarget>,
    round_left: f32,
    match_left: f32,
    score: u32,
    picked: Option<usize>,
    rng: Rng,
    exploded: Vec<usize>,
    outcome: Option<MatchOutcome>,
}

impl Game {
    pub fn new(rules: Rules, seed: u32) -> Self {
        Self {
            round_left: rules.round_seconds,
            match_left: rules.match_seconds,
            rules,
            state: GameState::Invalid,
            cells: Vec::new(),
            targets: Vec::new(),
            score: 0,
            picked: None,
            rng: Rng(seed),
            exploded: Vec::new(),
            outcome: None,
        }
    }

    #[inline]
    pub fn state(&self) -> GameState {
        self.state
    }

    #[inline]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[allow(dead_code)]
    pub fn cell_state(&self, index: usize) -> DiamondState {
        self.cells[index]
    }

    #[allow(dead_code)]
    pub fn picked(&self) -> Option<usize> {
        self.picked
    }

    #[allow(dead_code)]
    pub fn targets(&self) -> &[DataTarget] {
        &self.targets
    }

    pub fn match_seconds_left(&self) -> f32 {
        self.match_left.max(0.0)
    }

    pub fn round_seconds_left(&self) -> f32 {
        self.round_left.max(0.0)
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Cells cleared during the last tick.
    pub fn exploded(&self) -> &[usize] {
        &self.exploded
    }

    /// The result of the last finished match, handed out once.
    pub fn take_outcome(&mut self) -> Option<MatchOutcome> {
        self.outcome.take()
    }

    /// Tears the grid down and deals a fresh board. Any animation in flight is dropped.
    pub fn init(&mut self, engine: &mut Engine) {
        engine.clear_grid();
        self.targets.clear();
        self.exploded.clear();
        self.cells = vec![DiamondState::Empty; engine.grid_size()];
        self.picked = None;
        self.score = 0;
        self.round_left = self.rules.round_seconds;
        self.match_left = self.rules.match_seconds;

        let rows = self
            .rules
            .initial_rows
            .unwrap_or(engine.grid_height() / 2)
            .min(engine.grid_height());
        let board = self.deal(engine.grid_width(), rows);
        for (index, kind) in board.into_iter().enumerate() {
            engine.add_diamond(index, kind);
            self.cells[index] = DiamondState::Ready;
        }
        self.update_backgrounds(engine);
        self.state = GameState::Init;
        tracing::debug!(rows, diamonds = engine.diamond_count(), "grid initialised");
    }

    /// Kinds for the bottom `rows` rows with no run anywhere. Each cell tries the
    /// colours from a random offset; a cell with no legal colour backs off to the
    /// previous cell. If the search runs out of budget the board is dealt as a
    /// checkerboard, which has no runs for two or more colours.
    fn deal(&mut self, width: usize, rows: usize) -> Vec<Diamond> {
        let colors = self.rules.colors.clamp(1, Diamond::COUNT);
        let need = self.rules.threshold.saturating_sub(1);
        let total = width * rows;
        let mut board: Vec<Diamond> = Vec::with_capacity(total);
        // (random offset, colours tried) per dealt or in-progress cell
        let mut tries: Vec<(usize, usize)> = Vec::with_capacity(total);
        let mut budget = total * colors * 8;

        while board.len() < total {
            let index = board.len();
            if tries.len() == index {
                tries.push((self.rng.below(colors), 0));
            }
            let (offset, tried) = &mut tries[index];
            let mut placed = false;
            while *tried < colors {
                let kind = Diamond::ALL[(*offset + *tried) % colors];
                *tried += 1;
                if !completes_run(&board, width, index, kind, need) {
                    board.push(kind);
                    placed = true;
                    break;
                }
            }
            if placed {
                continue;
            }
            tries.pop();
            if budget == 0 || board.pop().is_none() {
                tracing::debug!(colors, need, "deal fell back to a checkerboard");
                return (0..total)
                    .map(|i| Diamond::ALL[(i % width + i / width) % colors])
                    .collect();
            }
            budget -= 1;
        }
        board
    }

    fn random_diamond(&mut self) -> Diamond {
        let colors = self.rules.colors.clamp(1, Diamond::COUNT);
        Diamond::ALL[self.rng.below(colors)]
    }

    pub fn begin_match(&mut self) {
        self.state = GameState::MatchBegun;
        tracing::info!(
            seconds = self.rules.match_seconds,
            threshold = self.rules.threshold,
            "match begun"
        );
    }

    fn end_match(&mut self, reason: EndReason) {
        self.state = GameState::MatchEnd;
        self.picked = None;
        self.outcome = Some(MatchOutcome {
            score: self.score,
            reason,
        });
        tracing::info!(score = self.score, ?reason, "match ended");
    }

    /// One frame of the simulation.
    pub fn update(&mut self, engine: &mut Engine, input: &InputState) {
        match self.state {
            GameState::Invalid | GameState::MatchEnd => self.init(engine),
            GameState::Init => {
                if input.is_key_down(Action::Start) {
                    self.begin_match();
                }
            }
            _ => {
                if input.is_key_down(Action::Restart) {
                    self.end_match(EndReason::Restarted);
                    return;
                }
                self.step(engine, input, input.last_frame_seconds());
            }
        }
    }

    fn step(&mut self, engine: &mut Engine, input: &InputState, dt: f32) {
        self.exploded.clear();
        self.scan_adjacencies(engine);
        let exploded = self.resolve_explosions(engine);
        let swapped = self.handle_pick(engine, input);
        let fell = self.fall(engine);
        self.tick_animations(engine, dt);
        let spawn = self.spawn_if_due(engine);
        if spawn == Spawn::Lost {
            self.end_match(EndReason::BoardFull);
            return;
        }
        self.update_backgrounds(engine);
        if self.tick_timers(dt) {
            self.end_match(EndReason::TimeUp);
            return;
        }

        self.state = if exploded > 0 {
            GameState::GridExploding
        } else if fell {
            GameState::GridFalling
        } else if spawn == Spawn::Spawned {
            GameState::GridSpawning
        } else if swapped || self.cells.contains(&DiamondState::Swapping) {
            GameState::PlayerMoving
        } else {
            GameState::PlayerWaiting
        };
    }

    fn line(&self, engine: &Engine, indices: impl Iterator<Item = usize>) -> Vec<Option<Diamond>> {
        indices
            .map(|i| {
                if self.cells[i].is_matchable() {
                    engine.diamond_at(i)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Marks every run of at least `threshold` as `Explode`. Rows first, then columns;
    /// cells already marked stay eligible so crossing runs both count.
    pub fn scan_adjacencies(&mut self, engine: &Engine) {
        let (w, h) = (engine.grid_width(), engine.grid_height());
        for row in 0..h {
            let indices: Vec<usize> = (0..w).map(|col| engine.grid_index(col, row)).collect();
            self.mark_runs(engine, &indices);
        }
        for col in 0..w {
            let indices: Vec<usize> = (0..h).map(|row| engine.grid_index(col, row)).collect();
            self.mark_runs(engine, &indices);
        }
    }

    fn mark_runs(&mut self, engine: &Engine, indices: &[usize]) {
        let line = self.line(engine, indices.iter().copied());
        for run in find_runs(&line, self.rules.threshold) {
            for &i in &indices[run] {
                self.cells[i] = DiamondState::Explode;
            }
        }
    }

    /// Clears every `Explode` cell; `n` explosions score `n²`. Returns `n`.
    pub fn resolve_explosions(&mut self, engine: &mut Engine) -> usize {
        for (index, state) in self.cells.iter_mut().enumerate() {
            if *state == DiamondState::Explode {
                engine.remove_diamond(index);
                *state = DiamondState::Empty;
                self.exploded.push(index);
            }
        }
        let n = self.exploded.len();
        if n > 0 {
            let gained = u32::try_from(n * n).unwrap_or(u32::MAX);
            self.score = self.score.saturating_add(gained);
            tracing::debug!(n, gained, score = self.score, "explosion");
        }
        n
    }

    fn handle_pick(&mut self, engine: &mut Engine, input: &InputState) -> bool {
        if !input.mouse_pressed(MouseButton::Primary) {
            return false;
        }
        let clicked = engine.cell_index_at(input.mouse_position());
        match clicked {
            Some(index) if self.cells[index] == DiamondState::Ready => {
                if let Some(prev) = self.picked {
                    if self.try_swap(engine, prev, index) {
                        self.picked = None;
                        return true;
                    }
                    self.deselect(prev);
                }
                self.cells[index] = DiamondState::Selected;
                self.picked = Some(index);
            }
            _ => {
                if let Some(prev) = self.picked.take() {
                    self.deselect(prev);
                }
            }
        }
        false
    }

    fn deselect(&mut self, index: usize) {
        if self.cells[index] == DiamondState::Selected {
            self.cells[index] = DiamondState::Ready;
        }
        if self.picked == Some(index) {
            self.picked = None;
        }
    }

    pub fn are_adjacent(engine: &Engine, a: usize, b: usize) -> bool {
        engine.column(a).abs_diff(engine.column(b)) + engine.row(a).abs_diff(engine.row(b)) == 1
    }

    fn swap_permitted(&self, engine: &Engine, a: usize, b: usize) -> bool {
        match self.rules.swap_policy {
            SwapPolicy::Always => true,
            SwapPolicy::MustMatch => self.swap_makes_run(engine, a, b),
        }
    }

    /// Would exchanging `a` and `b` complete a run through either cell?
    fn swap_makes_run(&self, engine: &Engine, a: usize, b: usize) -> bool {
        let kind_at = |i: usize| {
            let source = if i == a {
                b
            } else if i == b {
                a
            } else {
                i
            };
            let eligible = source == a || source == b || self.cells[source].is_matchable();
            if eligible {
                engine.diamond_at(source)
            } else {
                None
            }
        };
        let (w, h) = (engine.grid_width(), engine.grid_height());
        [a, b].into_iter().any(|cell| {
            let row: Vec<usize> = (0..w).map(|c| engine.grid_index(c, engine.row(cell))).collect();
            let col: Vec<usize> = (0..h).map(|r| engine.grid_index(engine.column(cell), r)).collect();
            [row, col].into_iter().any(|indices| {
                let line: Vec<_> = indices.iter().map(|&i| kind_at(i)).collect();
                find_runs(&line, self.rules.threshold)
                    .into_iter()
                    .any(|run| indices[run].contains(&cell))
            })
        })
    }

    /// Starts a swap between two resting, adjacent cells. Returns false (and changes
    /// nothing) if the cells are busy, not adjacent, or the policy forbids it.
    pub fn try_swap(&mut self, engine: &mut Engine, a: usize, b: usize) -> bool {
        let resting = |s: DiamondState| matches!(s, DiamondState::Ready | DiamondState::Selected);
        if a == b
            || !resting(self.cells[a])
            || !resting(self.cells[b])
            || !Self::are_adjacent(engine, a, b)
            || !self.swap_permitted(engine, a, b)
        {
            return false;
        }
        self.begin_swap(engine, a, b)
    }

    /// Each cell takes the other's kind and starts where the other was drawn.
    fn begin_swap(&mut self, engine: &mut Engine, a: usize, b: usize) -> bool {
        let (Some(kind_a), Some(kind_b)) = (engine.diamond_at(a), engine.diamond_at(b)) else {
            return false;
        };
        let visual_a = engine.diamond_visual(a);
        let visual_b = engine.diamond_visual(b);
        engine.change_diamond_template(a, kind_b);
        engine.update_diamond_visual(a, visual_b);
        engine.change_diamond_template(b, kind_a);
        engine.update_diamond_visual(b, visual_a);

        let total = self.rules.swap_seconds;
        for (destination, start, diamond) in [(a, visual_b, kind_b), (b, visual_a, kind_a)] {
            self.targets.push(DataTarget {
                start,
                destination,
                total,
                life: total,
                diamond,
            });
            self.cells[destination] = DiamondState::Swapping;
        }
        if self.picked.is_some_and(|p| p == a || p == b) {
            self.picked = None;
        }
        tracing::debug!(a, b, "swap");
        true
    }

    /// Drops every resting diamond into the lowest cell of the empty run beneath it.
    /// Returns true if anything started falling.
    pub fn fall(&mut self, engine: &mut Engine) -> bool {
        let mut any = false;
        for col in 0..engine.grid_width() {
            for row in 1..engine.grid_height() {
                let source = engine.grid_index(col, row);
                if !matches!(self.cells[source], DiamondState::Ready | DiamondState::Spawning) {
                    continue;
                }
                let mut destination = None;
                for below in (0..row).rev() {
                    let i = engine.grid_index(col, below);
                    if self.cells[i] != DiamondState::Empty {
                        break;
                    }
                    destination = Some(i);
                }
                let (Some(destination), Some(kind)) = (destination, engine.diamond_at(source))
                else {
                    continue;
                };

                let start = engine.diamond_visual(source);
                let distance = row - engine.row(destination);
                let total = self.rules.fall_seconds * distance as f32;
                engine.add_diamond(destination, kind);
                engine.update_diamond_visual(destination, start);
                self.cells[destination] = DiamondState::Updating;
                engine.remove_diamond(source);
                self.cells[source] = DiamondState::Empty;
                self.targets.push(DataTarget {
                    start,
                    destination,
                    total,
                    life: total,
                    diamond: kind,
                });
                any = true;
            }
        }
        any
    }

    /// Advances every animation by `dt`; finished ones snap to rest and free their cell.
    pub fn tick_animations(&mut self, engine: &mut Engine, dt: f32) {
        let mut i = 0;
        while i < self.targets.len() {
            let target = &mut self.targets[i];
            target.life -= dt;
            let destination = target.destination;
            let rest = engine.rest_visual(destination);
            if target.life <= 0.0 {
                debug_assert_eq!(engine.diamond_at(destination), Some(target.diamond));
                engine.update_diamond_visual(destination, rest);
                self.cells[destination] = DiamondState::Ready;
                self.targets.swap_remove(i);
                continue;
            }
            let t = 1.0 - target.life / target.total;
            engine.update_diamond_visual(destination, target.start.lerp(&rest, t));
            i += 1;
        }
    }

    fn spawn_if_due(&mut self, engine: &mut Engine) -> Spawn {
        if self.round_left > 0.0 {
            return Spawn::NotDue;
        }
        self.round_left = self.rules.round_seconds;
        let col = self.rng.below(engine.grid_width());
        self.spawn_in_column(engine, col)
    }

    fn spawn_in_column(&mut self, engine: &mut Engine, col: usize) -> Spawn {
        let top_row = engine.grid_height() - 1;
        let top = engine.grid_index(col, top_row);
        if self.cells[top] != DiamondState::Empty {
            return Spawn::Lost;
        }
        let kind = self.random_diamond();
        engine.add_diamond(top, kind);
        let below_empty =
            top_row > 0 && self.cells[engine.grid_index(col, top_row - 1)] == DiamondState::Empty;
        self.cells[top] = if below_empty {
            DiamondState::Spawning
        } else {
            DiamondState::Ready
        };
        Spawn::Spawned
    }

    pub fn update_backgrounds(&self, engine: &mut Engine) {
        for (index, state) in self.cells.iter().enumerate() {
            engine.change_background_template(index, state.background());
        }
    }

    /// Returns true when the match clock ran out.
    fn tick_timers(&mut self, dt: f32) -> bool {
        self.round_left -= dt;
        self.match_left -= dt;
        self.match_left <= 0.0
    }
}

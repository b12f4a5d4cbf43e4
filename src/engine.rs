//! Grid engine: owns the cell and diamond sprite batches and exposes the grid
//! to the game as indices. Row 0 is the bottom row; world Y grows upward.

use crate::batch::{
    BatchError, InstanceHandle, MAX_INSTANCES, MAX_TEMPLATES, RenderTarget, SpriteBatch,
    TemplateRef,
};
use crate::texture::{Texture, UvRect};
use crate::theme::Theme;
use glam::{Mat4, Vec2, Vec4};
use thiserror::Error;

/// Edge length of one grid cell in world units.
pub const CELL_SIZE: f32 = 64.0;
/// Diamond edge as a fraction of the cell.
const DIAMOND_SCALE: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Diamond {
    Blue,
    Green,
    Purple,
    Red,
    Yellow,
    Cyan,
    Black,
    White,
}

impl Diamond {
    pub const COUNT: usize = 8;
    pub const ALL: [Self; Self::COUNT] = [
        Self::Blue,
        Self::Green,
        Self::Purple,
        Self::Red,
        Self::Yellow,
        Self::Cyan,
        Self::Black,
        Self::White,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Cell background variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Background {
    Empty,
    Full,
    Allowed,
    Forbidden,
}

impl Background {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [Self::Empty, Self::Full, Self::Allowed, Self::Forbidden];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// What a sprite looks like: bottom-left position, size, tint and rotation (radians).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Visual {
    pub position: Vec2,
    pub size: Vec2,
    pub color: Vec4,
    pub rotation: f32,
}

impl Visual {
    pub fn lerp(&self, to: &Self, t: f32) -> Self {
        Self {
            position: self.position.lerp(to.position, t),
            size: self.size.lerp(to.size, t),
            color: self.color.lerp(to.color, t),
            rotation: self.rotation + (to.rotation - self.rotation) * t,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("grid must be at least 1x1 (got {width}x{height})")]
    EmptyGrid { width: usize, height: usize },
    #[error("grid {width}x{height} needs {cells} sprites per batch, batch holds {capacity}")]
    GridTooLarge {
        width: usize,
        height: usize,
        cells: usize,
        capacity: usize,
    },
    #[error("sprite batch: {0}")]
    Batch(#[from] BatchError),
}

#[derive(Debug)]
pub struct Engine {
    width: usize,
    height: usize,
    backgrounds: SpriteBatch,
    diamonds: SpriteBatch,
    background_templates: [TemplateRef; Background::COUNT],
    diamond_templates: [TemplateRef; Diamond::COUNT],
    cells: Vec<InstanceHandle>,
    grid: Vec<Option<(InstanceHandle, Diamond)>>,
}

impl Engine {
    pub fn new(theme: &Theme, width: usize, height: usize) -> Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::EmptyGrid { width, height });
        }
        let cells = width * height;
        if cells > MAX_INSTANCES {
            return Err(EngineError::GridTooLarge {
                width,
                height,
                cells,
                capacity: MAX_INSTANCES,
            });
        }

        let world = Vec2::new(width as f32, height as f32) * CELL_SIZE;
        let projection = Mat4::orthographic_rh_gl(0.0, world.x, 0.0, world.y, -1.0, 1.0);

        let cell_colors = Background::ALL.map(|b| theme.cell_rgba(b));
        let diamond_colors = Diamond::ALL.map(|d| theme.diamond_rgba(d));
        let mut backgrounds = SpriteBatch::new(
            projection,
            Texture::cell_atlas(&cell_colors),
            MAX_TEMPLATES,
            MAX_INSTANCES,
        )?;
        let mut diamonds = SpriteBatch::new(
            projection,
            Texture::diamond_atlas(&diamond_colors),
            MAX_TEMPLATES,
            MAX_INSTANCES,
        )?;

        let background_templates = Background::ALL
            .map(|b| backgrounds.create_template(UvRect::strip_frame(b.index(), Background::COUNT)));
        let diamond_templates = Diamond::ALL
            .map(|d| diamonds.create_template(UvRect::strip_frame(d.index(), Diamond::COUNT)));

        let mut engine = Self {
            width,
            height,
            backgrounds,
            diamonds,
            background_templates,
            diamond_templates,
            cells: Vec::with_capacity(cells),
            grid: vec![None; cells],
        };
        for index in 0..cells {
            let handle = engine
                .backgrounds
                .add_instance(engine.background_templates[Background::Empty.index()]);
            let position = engine.cell_position(index);
            engine.backgrounds.update_instance(
                &handle,
                position,
                Vec2::splat(CELL_SIZE),
                Vec4::ONE,
                0.0,
            );
            engine.cells.push(handle);
        }
        tracing::debug!(width, height, "engine ready");
        Ok(engine)
    }

    #[inline]
    pub fn grid_width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn grid_height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn grid_size(&self) -> usize {
        self.width * self.height
    }

    /// World extent covered by the grid.
    pub fn world_size(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32) * CELL_SIZE
    }

    #[inline]
    pub fn grid_index(&self, col: usize, row: usize) -> usize {
        debug_assert!(col < self.width && row < self.height, "cell ({col}, {row}) out of grid");
        row * self.width + col
    }

    #[inline]
    pub fn row(&self, index: usize) -> usize {
        index / self.width
    }

    #[inline]
    pub fn column(&self, index: usize) -> usize {
        index % self.width
    }

    #[inline]
    pub fn is_valid_index(&self, index: usize) -> bool {
        index < self.grid_size()
    }

    #[inline]
    fn check(&self, index: usize) {
        debug_assert!(self.is_valid_index(index), "grid index {index} out of range");
    }

    /// Bottom-left corner of the cell in world units.
    pub fn cell_position(&self, index: usize) -> Vec2 {
        self.check(index);
        Vec2::new(self.column(index) as f32, self.row(index) as f32) * CELL_SIZE
    }

    /// Cell under a world-space point, if any.
    pub fn cell_index_at(&self, point: Vec2) -> Option<usize> {
        let world = self.world_size();
        if point.x < 0.0 || point.y < 0.0 || point.x >= world.x || point.y >= world.y {
            return None;
        }
        let col = ((point.x / CELL_SIZE) as usize).min(self.width - 1);
        let row = ((point.y / CELL_SIZE) as usize).min(self.height - 1);
        Some(self.grid_index(col, row))
    }

    /// Resting look of a diamond in this cell.
    pub fn rest_visual(&self, index: usize) -> Visual {
        let size = CELL_SIZE * DIAMOND_SCALE;
        Visual {
            position: self.cell_position(index) + Vec2::splat((CELL_SIZE - size) * 0.5),
            size: Vec2::splat(size),
            color: Vec4::ONE,
            rotation: 0.0,
        }
    }

    #[allow(dead_code)]
    pub fn is_cell_occupied(&self, index: usize) -> bool {
        self.check(index);
        self.grid[index].is_some()
    }

    pub fn diamond_at(&self, index: usize) -> Option<Diamond> {
        self.check(index);
        self.grid[index].as_ref().map(|(_, d)| *d)
    }

    /// Places a diamond at rest in the cell, replacing any previous one.
    pub fn add_diamond(&mut self, index: usize, diamond: Diamond) {
        self.check(index);
        if self.grid[index].is_some() {
            tracing::warn!(index, "add_diamond over an occupied cell");
            self.remove_diamond(index);
        }
        let handle = self
            .diamonds
            .add_instance(self.diamond_templates[diamond.index()]);
        if !handle.is_valid() {
            return;
        }
        let rest = self.rest_visual(index);
        self.diamonds
            .update_instance(&handle, rest.position, rest.size, rest.color, rest.rotation);
        self.grid[index] = Some((handle, diamond));
    }

    pub fn remove_diamond(&mut self, index: usize) {
        self.check(index);
        if let Some((handle, _)) = self.grid[index].take() {
            self.diamonds.remove_instance(&handle);
        }
    }

    pub fn change_diamond_template(&mut self, index: usize, diamond: Diamond) {
        self.check(index);
        if let Some((handle, kind)) = &mut self.grid[index] {
            if self
                .diamonds
                .swap_instance_template(handle, self.diamond_templates[diamond.index()])
            {
                *kind = diamond;
            }
        }
    }

    /// Unchanged backgrounds are skipped so the buffer stays clean between frames.
    pub fn change_background_template(&mut self, index: usize, background: Background) {
        self.check(index);
        let template = self.background_templates[background.index()];
        let handle = &self.cells[index];
        if handle.template() != template {
            self.backgrounds.swap_instance_template(handle, template);
        }
    }

    #[allow(dead_code)]
    pub fn background_at(&self, index: usize) -> Option<Background> {
        self.check(index);
        let template = self.cells[index].template();
        Background::ALL
            .into_iter()
            .find(|b| self.background_templates[b.index()] == template)
    }

    /// Current look of the cell's diamond; the rest visual for an empty cell.
    pub fn diamond_visual(&self, index: usize) -> Visual {
        self.check(index);
        let Some((handle, _)) = &self.grid[index] else {
            return self.rest_visual(index);
        };
        match (
            self.diamonds.instance_position(handle),
            self.diamonds.instance_size(handle),
            self.diamonds.instance_color(handle),
            self.diamonds.instance_rotation(handle),
        ) {
            (Some(position), Some(size), Some(color), Some(rotation)) => Visual {
                position,
                size,
                color,
                rotation,
            },
            _ => self.rest_visual(index),
        }
    }

    pub fn update_diamond_visual(&mut self, index: usize, visual: Visual) -> bool {
        self.check(index);
        match &self.grid[index] {
            Some((handle, _)) => self.diamonds.update_instance(
                handle,
                visual.position,
                visual.size,
                visual.color,
                visual.rotation,
            ),
            None => false,
        }
    }

    /// Removes every diamond. Backgrounds stay.
    pub fn clear_grid(&mut self) {
        self.diamonds.clear_instances();
        self.grid.iter_mut().for_each(|cell| *cell = None);
    }

    pub fn diamond_count(&self) -> usize {
        self.diamonds.instance_count()
    }

    /// Uploads dirty batches, then draws backgrounds under diamonds.
    pub fn flush_and_draw(&mut self, target: &mut impl RenderTarget) {
        self.backgrounds.flush_buffers();
        self.diamonds.flush_buffers();
        self.backgrounds.draw(target);
        self.diamonds.draw(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(&Theme::default(), 8, 8).unwrap()
    }

    fn close(a: Visual, b: Visual) -> bool {
        (a.position - b.position).abs().max_element() < 1e-3
            && (a.size - b.size).abs().max_element() < 1e-3
            && (a.color - b.color).abs().max_element() < 1e-6
            && (a.rotation - b.rotation).abs() < 1e-4
    }

    #[test]
    fn test_rejects_bad_grids() {
        assert!(matches!(
            Engine::new(&Theme::default(), 0, 8),
            Err(EngineError::EmptyGrid { .. })
        ));
        assert!(matches!(
            Engine::new(&Theme::default(), 32, 32),
            Err(EngineError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn test_index_math() {
        let e = engine();
        let i = e.grid_index(3, 5);
        assert_eq!(i, 43);
        assert_eq!(e.column(i), 3);
        assert_eq!(e.row(i), 5);
        assert!(e.is_valid_index(63));
        assert!(!e.is_valid_index(64));
    }

    #[test]
    fn test_cell_index_at_row_zero_is_bottom() {
        let e = engine();
        assert_eq!(e.cell_index_at(Vec2::new(1.0, 1.0)), Some(0));
        assert_eq!(e.cell_index_at(Vec2::new(CELL_SIZE * 2.5, CELL_SIZE * 7.5)), Some(58));
        assert_eq!(e.cell_index_at(Vec2::new(-1.0, 5.0)), None);
        assert_eq!(e.cell_index_at(e.world_size()), None);
    }

    #[test]
    fn test_add_remove_diamond() {
        let mut e = engine();
        e.add_diamond(10, Diamond::Red);
        e.add_diamond(11, Diamond::Blue);
        assert!(e.is_cell_occupied(10));
        assert_eq!(e.diamond_at(11), Some(Diamond::Blue));
        assert!(close(e.diamond_visual(10), e.rest_visual(10)));

        e.remove_diamond(10);
        assert!(!e.is_cell_occupied(10));
        assert_eq!(e.diamond_count(), 1);
        // 11 moved into slot 0 and still resolves
        assert!(close(e.diamond_visual(11), e.rest_visual(11)));
    }

    #[test]
    fn test_change_template_and_visual() {
        let mut e = engine();
        e.add_diamond(0, Diamond::Green);
        e.change_diamond_template(0, Diamond::Yellow);
        assert_eq!(e.diamond_at(0), Some(Diamond::Yellow));

        let moved = Visual {
            position: Vec2::new(100.0, 50.0),
            size: Vec2::splat(20.0),
            color: Vec4::new(1.0, 1.0, 1.0, 0.5),
            rotation: 0.25,
        };
        assert!(e.update_diamond_visual(0, moved));
        assert!(close(e.diamond_visual(0), moved));
        assert!(!e.update_diamond_visual(1, moved));
    }

    #[test]
    fn test_background_template() {
        let mut e = engine();
        assert_eq!(e.background_at(5), Some(Background::Empty));
        e.change_background_template(5, Background::Forbidden);
        assert_eq!(e.background_at(5), Some(Background::Forbidden));
    }

    #[test]
    fn test_clear_grid() {
        let mut e = engine();
        for i in 0..8 {
            e.add_diamond(i, Diamond::ALL[i]);
        }
        e.clear_grid();
        assert_eq!(e.diamond_count(), 0);
        assert!((0..64).all(|i| !e.is_cell_occupied(i)));
    }

    #[test]
    fn test_visual_lerp_midpoint() {
        let a = Visual {
            position: Vec2::ZERO,
            size: Vec2::splat(10.0),
            color: Vec4::ZERO,
            rotation: 0.0,
        };
        let b = Visual {
            position: Vec2::new(10.0, 20.0),
            size: Vec2::splat(30.0),
            color: Vec4::ONE,
            rotation: 1.0,
        };
        let m = a.lerp(&b, 0.5);
        assert_eq!(m.position, Vec2::new(5.0, 10.0));
        assert_eq!(m.size, Vec2::splat(20.0));
        assert_eq!(m.rotation, 0.5);
    }
}

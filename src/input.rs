//! Input facade: key bindings, mouse state and the terminal → world mapping.

use crossterm::event::{
    KeyCode, KeyEvent, KeyModifiers, MouseButton as TermButton, MouseEvent, MouseEventKind,
};
use glam::Vec2;
use ratatui::layout::Rect;

/// Frames longer than this are clamped so a stall does not skip animations.
pub const MAX_FRAME_SECONDS: f32 = 0.3;

/// Action from a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Restart,
    Pause,
    Quit,
    None,
}

/// Map key event to game action.
pub fn key_to_action(key: KeyEvent) -> Action {
    let KeyEvent { code, modifiers, .. } = key;
    if modifiers == KeyModifiers::CONTROL && code == KeyCode::Char('c') {
        return Action::Quit;
    }
    let no_mod = modifiers.is_empty() || modifiers == KeyModifiers::SHIFT;
    if !no_mod {
        return Action::None;
    }
    match code {
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        KeyCode::Char('p') | KeyCode::Char('P') => Action::Pause,
        KeyCode::Char('r') | KeyCode::Char('R') => Action::Restart,
        KeyCode::Enter | KeyCode::Char(' ') => Action::Start,
        _ => Action::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Primary,
    Secondary,
}

impl MouseButton {
    fn index(self) -> usize {
        self as usize
    }
}

/// Where the board sits on screen; converts terminal cells to world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub area: Rect,
    pub world: Vec2,
}

impl Viewport {
    pub fn new(area: Rect, world: Vec2) -> Self {
        Self { area, world }
    }

    /// Centre of the terminal cell in world units. Screen rows grow down and
    /// world Y grows up, so this is the one place Y is flipped.
    pub fn to_world(&self, column: u16, row: u16) -> Option<Vec2> {
        let a = self.area;
        if a.width == 0 || a.height == 0 {
            return None;
        }
        if column < a.x || row < a.y || column >= a.x + a.width || row >= a.y + a.height {
            return None;
        }
        let fx = (f32::from(column - a.x) + 0.5) / f32::from(a.width);
        let fy = (f32::from(row - a.y) + 0.5) / f32::from(a.height);
        Some(Vec2::new(fx * self.world.x, (1.0 - fy) * self.world.y))
    }
}

/// Input as the simulation sees it for one frame.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    mouse: Vec2,
    buttons_down: [bool; 2],
    buttons_pressed: [bool; 2],
    keys: Vec<Action>,
    frame_seconds: f32,
}

impl InputState {
    #[inline]
    #[allow(dead_code)]
    pub fn mouse_x(&self) -> f32 {
        self.mouse.x
    }

    #[inline]
    #[allow(dead_code)]
    pub fn mouse_y(&self) -> f32 {
        self.mouse.y
    }

    #[inline]
    pub fn mouse_position(&self) -> Vec2 {
        self.mouse
    }

    #[allow(dead_code)]
    pub fn is_mouse_button_down(&self, button: MouseButton) -> bool {
        self.buttons_down[button.index()]
    }

    /// True if the button went down during this frame, even if it is already up again.
    pub fn mouse_pressed(&self, button: MouseButton) -> bool {
        self.buttons_pressed[button.index()]
    }

    pub fn is_key_down(&self, action: Action) -> bool {
        self.keys.contains(&action)
    }

    #[inline]
    pub fn last_frame_seconds(&self) -> f32 {
        self.frame_seconds
    }

    pub fn set_frame_seconds(&mut self, seconds: f32) {
        self.frame_seconds = seconds.clamp(0.0, MAX_FRAME_SECONDS);
    }

    pub fn press_key(&mut self, action: Action) {
        if action != Action::None && !self.keys.contains(&action) {
            self.keys.push(action);
        }
    }

    pub fn move_mouse(&mut self, position: Vec2) {
        self.mouse = position;
    }

    pub fn press_mouse(&mut self, button: MouseButton, position: Vec2) {
        self.mouse = position;
        self.buttons_down[button.index()] = true;
        self.buttons_pressed[button.index()] = true;
    }

    pub fn release_mouse(&mut self, button: MouseButton) {
        self.buttons_down[button.index()] = false;
    }

    /// Applies a terminal mouse event. Events off the board keep the last world position
    /// for motion but move the cursor off-grid for presses.
    pub fn apply_mouse(&mut self, event: MouseEvent, viewport: &Viewport) {
        let world = viewport.to_world(event.column, event.row);
        let button = |b: TermButton| match b {
            TermButton::Left => Some(MouseButton::Primary),
            TermButton::Right => Some(MouseButton::Secondary),
            TermButton::Middle => None,
        };
        match event.kind {
            MouseEventKind::Down(b) => {
                if let Some(b) = button(b) {
                    self.press_mouse(b, world.unwrap_or(Vec2::splat(-1.0)));
                }
            }
            MouseEventKind::Up(b) => {
                if let Some(b) = button(b) {
                    self.release_mouse(b);
                }
            }
            MouseEventKind::Moved | MouseEventKind::Drag(_) => {
                if let Some(w) = world {
                    self.move_mouse(w);
                }
            }
            _ => {}
        }
    }

    /// Clears per-frame edges (key presses, button press latches).
    pub fn end_frame(&mut self) {
        self.keys.clear();
        self.buttons_pressed = [false; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        let key = |c| KeyEvent::new(c, KeyModifiers::NONE);
        assert_eq!(key_to_action(key(KeyCode::Enter)), Action::Start);
        assert_eq!(key_to_action(key(KeyCode::Char('r'))), Action::Restart);
        assert_eq!(key_to_action(key(KeyCode::Esc)), Action::Quit);
        assert_eq!(
            key_to_action(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Action::Quit
        );
        assert_eq!(
            key_to_action(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::ALT)),
            Action::None
        );
    }

    #[test]
    fn test_viewport_flips_y() {
        let vp = Viewport::new(Rect::new(10, 5, 16, 8), Vec2::new(512.0, 512.0));
        // top-left terminal cell maps near the world's top-left
        let top_left = vp.to_world(10, 5).unwrap();
        assert_eq!(top_left, Vec2::new(16.0, 480.0));
        // bottom-left maps near world origin
        let bottom_left = vp.to_world(10, 12).unwrap();
        assert_eq!(bottom_left, Vec2::new(16.0, 32.0));
        assert_eq!(vp.to_world(9, 5), None);
        assert_eq!(vp.to_world(26, 5), None);
    }

    #[test]
    fn test_press_latch_survives_release() {
        let mut input = InputState::default();
        input.press_mouse(MouseButton::Primary, Vec2::new(3.0, 4.0));
        input.release_mouse(MouseButton::Primary);
        assert!(!input.is_mouse_button_down(MouseButton::Primary));
        assert!(input.mouse_pressed(MouseButton::Primary));
        assert_eq!(input.mouse_x(), 3.0);
        input.end_frame();
        assert!(!input.mouse_pressed(MouseButton::Primary));
    }

    #[test]
    fn test_frame_seconds_clamped() {
        let mut input = InputState::default();
        input.set_frame_seconds(5.0);
        assert_eq!(input.last_frame_seconds(), MAX_FRAME_SECONDS);
        input.set_frame_seconds(-1.0);
        assert_eq!(input.last_frame_seconds(), 0.0);
    }

    #[test]
    fn test_keys_cleared_each_frame() {
        let mut input = InputState::default();
        input.press_key(Action::Start);
        input.press_key(Action::None);
        assert!(input.is_key_down(Action::Start));
        assert!(!input.is_key_down(Action::None));
        input.end_frame();
        assert!(!input.is_key_down(Action::Start));
    }
}

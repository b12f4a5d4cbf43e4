//! Software draw target: rasterizes instanced quads into an RGBA framebuffer,
//! presented as half-block terminal cells (two pixels per cell, stacked).

use crate::batch::{DrawCall, RenderTarget};
use crate::theme::rgba_to_color;
use glam::{Mat4, Vec3, Vec4};
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Style;

const UNIT_QUAD: [Vec3; 4] = [
    Vec3::new(0.0, 0.0, 0.0),
    Vec3::new(1.0, 0.0, 0.0),
    Vec3::new(1.0, 1.0, 0.0),
    Vec3::new(0.0, 1.0, 0.0),
];

#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: usize,
    height: usize,
    clear_color: Vec4,
    pixels: Vec<Vec4>,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize, clear_color: Vec4) -> Self {
        Self {
            width,
            height,
            clear_color,
            pixels: vec![clear_color; width * height],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Resizes (if needed) and fills with the clear colour.
    pub fn reset(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(width * height, self.clear_color);
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> Vec4 {
        self.pixels[y * self.width + x]
    }

    fn blend(&mut self, x: usize, y: usize, src: Vec4) {
        let a = src.w.clamp(0.0, 1.0);
        let dst = &mut self.pixels[y * self.width + x];
        *dst = (src.truncate() * a + dst.truncate() * (1.0 - a)).extend(1.0);
    }

    /// NDC → pixel coordinates, pixel row 0 at the top.
    fn viewport(&self) -> Mat4 {
        let (w, h) = (self.width as f32, self.height as f32);
        Mat4::from_translation(Vec3::new(w * 0.5, h * 0.5, 0.0))
            * Mat4::from_scale(Vec3::new(w * 0.5, -h * 0.5, 1.0))
    }

    /// Writes the framebuffer into `area` using `▀` (top pixel = fg, bottom pixel = bg).
    pub fn present(&self, buf: &mut Buffer, area: Rect) {
        let cols = (area.width as usize).min(self.width);
        let rows = (area.height as usize).min(self.height.div_ceil(2));
        for cy in 0..rows {
            for cx in 0..cols {
                let top = self.pixel(cx, cy * 2);
                let bottom = if cy * 2 + 1 < self.height {
                    self.pixel(cx, cy * 2 + 1)
                } else {
                    self.clear_color
                };
                buf[(area.x + cx as u16, area.y + cy as u16)]
                    .set_symbol("▀")
                    .set_style(Style::default().fg(rgba_to_color(top)).bg(rgba_to_color(bottom)));
            }
        }
    }
}

impl RenderTarget for Framebuffer {
    fn draw_instanced(&mut self, call: DrawCall<'_>) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let to_pixels = self.viewport() * call.projection;
        for instance in call.instances {
            let Some(template) = call.templates.get(instance.template) else {
                continue;
            };
            let full = to_pixels * instance.transform;
            if full.determinant().abs() < 1e-9 {
                continue;
            }
            let corners = UNIT_QUAD.map(|c| full.transform_point3(c));
            let min = corners.iter().fold(Vec3::splat(f32::MAX), |a, c| a.min(*c));
            let max = corners.iter().fold(Vec3::splat(f32::MIN), |a, c| a.max(*c));
            let x0 = min.x.floor().max(0.0) as usize;
            let y0 = min.y.floor().max(0.0) as usize;
            let x1 = (max.x.ceil().max(0.0) as usize).min(self.width);
            let y1 = (max.y.ceil().max(0.0) as usize).min(self.height);
            let inverse = full.inverse();
            let [bl, br, tr, tl] = template.corners;
            for py in y0..y1 {
                for px in x0..x1 {
                    let local =
                        inverse.transform_point3(Vec3::new(px as f32 + 0.5, py as f32 + 0.5, 0.0));
                    if !(0.0..1.0).contains(&local.x) || !(0.0..1.0).contains(&local.y) {
                        continue;
                    }
                    let uv = bl.lerp(br, local.x).lerp(tl.lerp(tr, local.x), local.y);
                    let texel = call.texture.sample(uv) * instance.color;
                    if texel.w > 0.0 {
                        self.blend(px, py, texel);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SpriteBatch;
    use crate::texture::{Texture, UvRect};
    use glam::Vec2;

    const BG: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

    fn two_tone() -> Texture {
        // left half red, right half transparent
        Texture::from_fn(2, 1, |x, _| {
            if x == 0 {
                Vec4::new(1.0, 0.0, 0.0, 1.0)
            } else {
                Vec4::ZERO
            }
        })
    }

    #[test]
    fn test_quad_fills_only_its_area() {
        let projection = Mat4::orthographic_rh_gl(0.0, 10.0, 0.0, 10.0, -1.0, 1.0);
        let mut batch = SpriteBatch::new(projection, two_tone(), 1, 1).unwrap();
        let t = batch.create_template(UvRect::strip_frame(0, 2));
        let h = batch.add_instance(t);
        batch.update_instance(&h, Vec2::new(0.0, 0.0), Vec2::new(4.0, 4.0), Vec4::ONE, 0.0);
        batch.flush_buffers();

        let mut fb = Framebuffer::new(10, 10, BG);
        batch.draw(&mut fb);
        // world y grows up, so the quad sits in the bottom-left pixels
        assert_eq!(fb.pixel(1, 8), Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(fb.pixel(3, 6), Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(fb.pixel(5, 8), BG);
        assert_eq!(fb.pixel(1, 1), BG);
    }

    #[test]
    fn test_transparent_texels_skipped() {
        let projection = Mat4::orthographic_rh_gl(0.0, 4.0, 0.0, 4.0, -1.0, 1.0);
        let mut batch = SpriteBatch::new(projection, two_tone(), 1, 1).unwrap();
        let t = batch.create_template(UvRect::strip_frame(1, 2));
        let h = batch.add_instance(t);
        batch.update_instance(&h, Vec2::ZERO, Vec2::splat(4.0), Vec4::ONE, 0.0);
        batch.flush_buffers();
        let mut fb = Framebuffer::new(4, 4, BG);
        batch.draw(&mut fb);
        assert!((0..4).all(|y| (0..4).all(|x| fb.pixel(x, y) == BG)));
    }

    #[test]
    fn test_half_alpha_blends() {
        let projection = Mat4::orthographic_rh_gl(0.0, 2.0, 0.0, 2.0, -1.0, 1.0);
        let mut batch = SpriteBatch::new(projection, two_tone(), 1, 1).unwrap();
        let t = batch.create_template(UvRect::strip_frame(0, 2));
        let h = batch.add_instance(t);
        batch.update_instance(&h, Vec2::ZERO, Vec2::splat(2.0), Vec4::new(1.0, 1.0, 1.0, 0.5), 0.0);
        batch.flush_buffers();
        let mut fb = Framebuffer::new(2, 2, BG);
        batch.draw(&mut fb);
        assert!((fb.pixel(0, 0).x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_present_half_blocks() {
        let mut fb = Framebuffer::new(1, 2, BG);
        fb.blend(0, 0, Vec4::new(1.0, 1.0, 1.0, 1.0));
        let area = Rect::new(0, 0, 1, 1);
        let mut buf = Buffer::empty(area);
        fb.present(&mut buf, area);
        let cell = &buf[(0, 0)];
        assert_eq!(cell.symbol(), "▀");
        assert_eq!(cell.fg, ratatui::style::Color::Rgb(255, 255, 255));
        assert_eq!(cell.bg, ratatui::style::Color::Rgb(0, 0, 0));
    }
}

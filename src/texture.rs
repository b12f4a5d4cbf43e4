//! RGBA textures and atlas UV rectangles. Atlases are generated at startup from the theme.

use glam::{Vec2, Vec4};

/// Frame edge length in texels for generated atlases.
pub const ATLAS_FRAME: usize = 16;

/// Rectangle in texture space: `u` grows right, `v` grows down (0 = top row).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl UvRect {
    #[allow(dead_code)]
    pub const FULL: Self = Self {
        left: 0.0,
        top: 0.0,
        right: 1.0,
        bottom: 1.0,
    };

    /// Corners in quad order: bottom-left, bottom-right, top-right, top-left.
    pub fn corners(&self) -> [Vec2; 4] {
        [
            Vec2::new(self.left, self.bottom),
            Vec2::new(self.right, self.bottom),
            Vec2::new(self.right, self.top),
            Vec2::new(self.left, self.top),
        ]
    }

    /// Frame `index` of a horizontal strip of `frames` equally sized frames.
    pub fn strip_frame(index: usize, frames: usize) -> Self {
        let step = 1.0 / frames.max(1) as f32;
        Self {
            left: index as f32 * step,
            top: 0.0,
            right: (index + 1) as f32 * step,
            bottom: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    width: usize,
    height: usize,
    texels: Vec<Vec4>,
}

impl Texture {
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> Vec4) -> Self {
        let texels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self {
            width,
            height,
            texels,
        }
    }

    #[inline]
    #[allow(dead_code)]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    #[allow(dead_code)]
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.texels.is_empty()
    }

    #[inline]
    pub fn texel(&self, x: usize, y: usize) -> Vec4 {
        self.texels[y * self.width + x]
    }

    /// Nearest-texel lookup, clamped to the edges.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        if self.is_empty() {
            return Vec4::ZERO;
        }
        let x = ((uv.x * self.width as f32) as isize).clamp(0, self.width as isize - 1);
        let y = ((uv.y * self.height as f32) as isize).clamp(0, self.height as isize - 1);
        self.texel(x as usize, y as usize)
    }

    /// One faceted diamond per colour, laid out as a horizontal strip.
    pub fn diamond_atlas(colors: &[Vec4]) -> Self {
        let s = ATLAS_FRAME;
        Self::from_fn(s * colors.len(), s, |x, y| {
            let base = colors[x / s];
            let cx = ((x % s) as f32 + 0.5) / s as f32 * 2.0 - 1.0;
            let cy = (y as f32 + 0.5) / s as f32 * 2.0 - 1.0;
            if cx.abs() + cy.abs() > 0.92 {
                return Vec4::ZERO;
            }
            // Upper facets catch the light, lower ones fall into shade
            let mut shade = if cy < 0.0 { 1.15 } else { 0.75 };
            if cx < 0.0 {
                shade *= 0.9;
            }
            let glint = ((cx + 0.35).powi(2) + (cy + 0.4).powi(2)).sqrt() < 0.18;
            if glint {
                return Vec4::ONE;
            }
            (base.truncate() * shade).min(glam::Vec3::ONE).extend(1.0)
        })
    }

    /// One bordered square per colour, laid out as a horizontal strip.
    pub fn cell_atlas(colors: &[Vec4]) -> Self {
        let s = ATLAS_FRAME;
        Self::from_fn(s * colors.len(), s, |x, y| {
            let base = colors[x / s];
            let lx = x % s;
            let edge = lx == 0 || y == 0 || lx == s - 1 || y == s - 1;
            if edge {
                (base.truncate() * 0.6).extend(1.0)
            } else {
                base
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_frame_bounds() {
        let uv = UvRect::strip_frame(2, 4);
        assert_eq!(uv.left, 0.5);
        assert_eq!(uv.right, 0.75);
        assert_eq!(uv.top, 0.0);
        assert_eq!(uv.bottom, 1.0);
    }

    #[test]
    fn test_diamond_atlas_transparent_corners() {
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        let tex = Texture::diamond_atlas(&[red, red]);
        assert_eq!(tex.width(), ATLAS_FRAME * 2);
        assert_eq!(tex.texel(0, 0).w, 0.0);
        let centre = tex.texel(ATLAS_FRAME / 2, ATLAS_FRAME / 2 + 2);
        assert_eq!(centre.w, 1.0);
        assert!(centre.x > 0.0);
    }

    #[test]
    fn test_sample_clamps() {
        let tex = Texture::from_fn(2, 1, |x, _| Vec4::splat(x as f32));
        assert_eq!(tex.sample(Vec2::new(-1.0, 0.5)), Vec4::splat(0.0));
        assert_eq!(tex.sample(Vec2::new(5.0, 0.5)), Vec4::splat(1.0));
    }
}

//! Sprite batch: fixed-capacity pools of UV templates and transformable instances.
//!
//! Mutations are staged on the CPU side and only copied into the device-side
//! buffers by [`SpriteBatch::flush_buffers`] when a dirty flag is set. A draw
//! always reads the device-side copy, so unflushed changes are not visible.
//!
//! Instances are addressed through [`InstanceHandle`]s. A handle is shared:
//! clones observe the same ids. Removal compacts the pool with swap-with-last
//! and rewrites the slot id of the instance that moved, so slot ids are never
//! stable labels.

use crate::texture::{Texture, UvRect};
use glam::{Mat4, Vec2, Vec4};
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

/// Sentinel id carried by invalid templates and removed instances.
pub const INDEX_NONE: usize = usize::MAX;
pub const MAX_TEMPLATES: usize = 16;
pub const MAX_INSTANCES: usize = 256;
/// Largest instance buffer a batch may ask the device for.
pub const DEVICE_INSTANCE_LIMIT: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch capacity must be non-zero (templates: {templates}, instances: {instances})")]
    ZeroCapacity { templates: usize, instances: usize },
    #[error("{requested} instances exceed the device limit of {limit}")]
    DeviceLimit { requested: usize, limit: usize },
    #[error("batch texture has no texels")]
    EmptyTexture,
}

/// Reference to a template owned by a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateRef {
    id: usize,
}

impl TemplateRef {
    pub const INVALID: Self = Self { id: INDEX_NONE };

    #[inline]
    #[allow(dead_code)]
    pub fn id(self) -> usize {
        self.id
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.id != INDEX_NONE
    }
}

/// Immutable UV quad. `corners` follow [`UvRect::corners`] order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Template {
    pub corners: [Vec2; 4],
    /// Position in the template array; kept for diagnostics.
    #[allow(dead_code)]
    pub id: usize,
}

#[derive(Debug)]
struct HandleIds {
    template: Cell<usize>,
    slot: Cell<usize>,
}

/// Shared reference to a live instance.
#[derive(Debug, Clone)]
pub struct InstanceHandle(Rc<HandleIds>);

impl InstanceHandle {
    pub fn invalid() -> Self {
        Self(Rc::new(HandleIds {
            template: Cell::new(INDEX_NONE),
            slot: Cell::new(INDEX_NONE),
        }))
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0.template.get() != INDEX_NONE && self.0.slot.get() != INDEX_NONE
    }

    #[inline]
    pub fn template(&self) -> TemplateRef {
        TemplateRef {
            id: self.0.template.get(),
        }
    }

    /// Current data slot. Changes whenever another instance is removed; do not cache.
    #[inline]
    pub fn slot(&self) -> usize {
        self.0.slot.get()
    }

    /// True if both handles refer to the same instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn invalidate(&self) {
        self.0.template.set(INDEX_NONE);
        self.0.slot.set(INDEX_NONE);
    }
}

impl Default for InstanceHandle {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Per-instance data slot: composite transform and RGBA tint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceData {
    pub transform: Mat4,
    pub color: Vec4,
}

impl Default for InstanceData {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            color: Vec4::ONE,
        }
    }
}

/// Device-side record read by the instanced draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuInstance {
    pub transform: Mat4,
    pub color: Vec4,
    pub template: usize,
}

/// Everything one instanced draw call reads.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub projection: Mat4,
    pub texture: &'a Texture,
    pub templates: &'a [Template],
    pub instances: &'a [GpuInstance],
}

/// Consumer of instanced draws (the rasterizer, or a recorder in tests).
pub trait RenderTarget {
    fn draw_instanced(&mut self, call: DrawCall<'_>);
}

#[derive(Debug, Default)]
struct DeviceBuffers {
    templates: Vec<Template>,
    instances: Vec<GpuInstance>,
    uploads: usize,
}

#[derive(Debug)]
pub struct SpriteBatch {
    projection: Mat4,
    texture: Texture,
    max_templates: usize,
    max_instances: usize,
    templates: Vec<Template>,
    data: Vec<InstanceData>,
    handles: Vec<InstanceHandle>,
    templates_dirty: bool,
    instances_dirty: bool,
    device: DeviceBuffers,
}

/// `T(position) · T(size/2) · R(rotation) · T(-size/2) · S(size)` for a unit quad.
pub fn compose_transform(position: Vec2, size: Vec2, rotation: f32) -> Mat4 {
    let half = (size * 0.5).extend(0.0);
    Mat4::from_translation(position.extend(0.0))
        * Mat4::from_translation(half)
        * Mat4::from_rotation_z(rotation)
        * Mat4::from_translation(-half)
        * Mat4::from_scale(size.extend(1.0))
}

/// Inverse of [`compose_transform`]: `(position, size, rotation)`.
pub fn decompose_transform(m: &Mat4) -> (Vec2, Vec2, f32) {
    let x_axis = Vec2::new(m.x_axis.x, m.x_axis.y);
    let y_axis = Vec2::new(m.y_axis.x, m.y_axis.y);
    let size = Vec2::new(x_axis.length(), y_axis.length());
    let rotation = x_axis.y.atan2(x_axis.x);
    let half = size * 0.5;
    let translation = Vec2::new(m.w_axis.x, m.w_axis.y);
    let position = translation - half + Vec2::from_angle(rotation).rotate(half);
    (position, size, rotation)
}

impl SpriteBatch {
    pub fn new(
        projection: Mat4,
        texture: Texture,
        max_templates: usize,
        max_instances: usize,
    ) -> Result<Self, BatchError> {
        if max_templates == 0 || max_instances == 0 {
            return Err(BatchError::ZeroCapacity {
                templates: max_templates,
                instances: max_instances,
            });
        }
        if max_instances > DEVICE_INSTANCE_LIMIT {
            return Err(BatchError::DeviceLimit {
                requested: max_instances,
                limit: DEVICE_INSTANCE_LIMIT,
            });
        }
        if texture.is_empty() {
            return Err(BatchError::EmptyTexture);
        }
        Ok(Self {
            projection,
            texture,
            max_templates,
            max_instances,
            templates: Vec::with_capacity(max_templates),
            data: Vec::with_capacity(max_instances),
            handles: Vec::with_capacity(max_instances),
            templates_dirty: false,
            instances_dirty: false,
            device: DeviceBuffers::default(),
        })
    }

    pub fn create_template(&mut self, uv: UvRect) -> TemplateRef {
        if self.templates.len() >= self.max_templates {
            tracing::warn!(max = self.max_templates, "template capacity exhausted");
            return TemplateRef::INVALID;
        }
        let id = self.templates.len();
        self.templates.push(Template {
            corners: uv.corners(),
            id,
        });
        self.templates_dirty = true;
        TemplateRef { id }
    }

    fn has_template(&self, template: TemplateRef) -> bool {
        template.is_valid() && template.id < self.templates.len()
    }

    /// Slot of a handle that belongs to this batch and is still live.
    fn slot_of(&self, handle: &InstanceHandle) -> Option<usize> {
        if !handle.is_valid() {
            return None;
        }
        let slot = handle.slot();
        self.handles
            .get(slot)
            .filter(|owner| owner.same_instance(handle))
            .map(|_| slot)
    }

    pub fn add_instance(&mut self, template: TemplateRef) -> InstanceHandle {
        if !self.has_template(template) {
            return InstanceHandle::invalid();
        }
        if self.data.len() >= self.max_instances {
            tracing::warn!(max = self.max_instances, "instance capacity exhausted");
            return InstanceHandle::invalid();
        }
        let handle = InstanceHandle(Rc::new(HandleIds {
            template: Cell::new(template.id),
            slot: Cell::new(self.data.len()),
        }));
        self.data.push(InstanceData::default());
        self.handles.push(handle.clone());
        self.instances_dirty = true;
        handle
    }

    /// Removes the instance and invalidates every clone of `handle`.
    pub fn remove_instance(&mut self, handle: &InstanceHandle) -> bool {
        let Some(slot) = self.slot_of(handle) else {
            return false;
        };
        self.data.swap_remove(slot);
        self.handles.swap_remove(slot);
        if let Some(moved) = self.handles.get(slot) {
            moved.0.slot.set(slot);
        }
        handle.invalidate();
        self.instances_dirty = true;
        true
    }

    pub fn update_instance(
        &mut self,
        handle: &InstanceHandle,
        position: Vec2,
        size: Vec2,
        color: Vec4,
        rotation: f32,
    ) -> bool {
        let Some(slot) = self.slot_of(handle) else {
            return false;
        };
        self.data[slot] = InstanceData {
            transform: compose_transform(position, size, rotation),
            color,
        };
        self.instances_dirty = true;
        true
    }

    pub fn swap_instance_template(&mut self, handle: &InstanceHandle, template: TemplateRef) -> bool {
        if !self.has_template(template) || self.slot_of(handle).is_none() {
            return false;
        }
        handle.0.template.set(template.id);
        self.instances_dirty = true;
        true
    }

    pub fn instance_data(&self, handle: &InstanceHandle) -> Option<InstanceData> {
        self.slot_of(handle).map(|slot| self.data[slot])
    }

    pub fn instance_position(&self, handle: &InstanceHandle) -> Option<Vec2> {
        self.instance_data(handle)
            .map(|d| decompose_transform(&d.transform).0)
    }

    pub fn instance_size(&self, handle: &InstanceHandle) -> Option<Vec2> {
        self.instance_data(handle)
            .map(|d| decompose_transform(&d.transform).1)
    }

    pub fn instance_rotation(&self, handle: &InstanceHandle) -> Option<f32> {
        self.instance_data(handle)
            .map(|d| decompose_transform(&d.transform).2)
    }

    pub fn instance_color(&self, handle: &InstanceHandle) -> Option<Vec4> {
        self.instance_data(handle).map(|d| d.color)
    }

    /// Removes every instance; all outstanding handles become invalid.
    pub fn clear_instances(&mut self) {
        for handle in self.handles.drain(..) {
            handle.invalidate();
        }
        self.data.clear();
        self.instances_dirty = true;
    }

    /// Re-uploads whole buffers whose dirty flag is set. Returns true if anything was uploaded.
    pub fn flush_buffers(&mut self) -> bool {
        let mut uploaded = false;
        if self.templates_dirty {
            self.device.templates.clone_from(&self.templates);
            self.templates_dirty = false;
            uploaded = true;
        }
        if self.instances_dirty {
            self.device.instances.clear();
            self.device
                .instances
                .extend(self.data.iter().zip(&self.handles).map(|(d, h)| GpuInstance {
                    transform: d.transform,
                    color: d.color,
                    template: h.template().id,
                }));
            self.instances_dirty = false;
            uploaded = true;
        }
        if uploaded {
            self.device.uploads += 1;
        }
        uploaded
    }

    /// One instanced draw over the device-side instances.
    pub fn draw(&self, target: &mut impl RenderTarget) {
        if self.device.instances.is_empty() {
            return;
        }
        target.draw_instanced(DrawCall {
            projection: self.projection,
            texture: &self.texture,
            templates: &self.device.templates,
            instances: &self.device.instances,
        });
    }

    #[inline]
    #[allow(dead_code)]
    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        self.data.len()
    }

    #[allow(dead_code)]
    pub fn is_dirty(&self) -> bool {
        self.templates_dirty || self.instances_dirty
    }

    /// Number of flushes that uploaded anything.
    #[allow(dead_code)]
    pub fn uploads(&self) -> usize {
        self.device.uploads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(max_templates: usize, max_instances: usize) -> SpriteBatch {
        let texture = Texture::from_fn(4, 4, |_, _| Vec4::ONE);
        SpriteBatch::new(Mat4::IDENTITY, texture, max_templates, max_instances).unwrap()
    }

    fn place(batch: &mut SpriteBatch, h: &InstanceHandle, x: f32) {
        assert!(batch.update_instance(h, Vec2::new(x, x * 2.0), Vec2::splat(10.0), Vec4::ONE, 0.0));
    }

    #[derive(Default)]
    struct Recorder {
        calls: usize,
        instances: usize,
    }

    impl RenderTarget for Recorder {
        fn draw_instanced(&mut self, call: DrawCall<'_>) {
            self.calls += 1;
            self.instances = call.instances.len();
        }
    }

    #[test]
    fn test_new_rejects_bad_capacity() {
        let texture = Texture::from_fn(1, 1, |_, _| Vec4::ONE);
        assert!(matches!(
            SpriteBatch::new(Mat4::IDENTITY, texture.clone(), 0, 4),
            Err(BatchError::ZeroCapacity { .. })
        ));
        assert!(matches!(
            SpriteBatch::new(Mat4::IDENTITY, texture, 4, DEVICE_INSTANCE_LIMIT + 1),
            Err(BatchError::DeviceLimit { .. })
        ));
        let empty = Texture::from_fn(0, 0, |_, _| Vec4::ONE);
        assert_eq!(
            SpriteBatch::new(Mat4::IDENTITY, empty, 4, 4).unwrap_err(),
            BatchError::EmptyTexture
        );
    }

    #[test]
    fn test_template_capacity() {
        let mut b = batch(2, 4);
        assert!(b.create_template(UvRect::FULL).is_valid());
        assert!(b.create_template(UvRect::FULL).is_valid());
        assert!(!b.create_template(UvRect::FULL).is_valid());
        assert_eq!(b.template_count(), 2);
    }

    #[test]
    fn test_instance_capacity() {
        let mut b = batch(1, 3);
        let t = b.create_template(UvRect::FULL);
        for _ in 0..3 {
            assert!(b.add_instance(t).is_valid());
        }
        assert!(!b.add_instance(t).is_valid());
        assert_eq!(b.instance_count(), 3);
    }

    #[test]
    fn test_add_instance_unknown_template() {
        let mut b = batch(2, 4);
        assert!(!b.add_instance(TemplateRef::INVALID).is_valid());
        assert!(!b.add_instance(TemplateRef { id: 1 }).is_valid());
    }

    #[test]
    fn test_removed_handle_is_invalid() {
        let mut b = batch(1, 4);
        let t = b.create_template(UvRect::FULL);
        let h = b.add_instance(t);
        let alias = h.clone();
        assert!(b.remove_instance(&h));
        assert!(!h.is_valid());
        assert!(!alias.is_valid());
        assert!(!b.update_instance(&alias, Vec2::ZERO, Vec2::ONE, Vec4::ONE, 0.0));
        assert!(!b.remove_instance(&h));
        assert_eq!(b.instance_count(), 0);
    }

    #[test]
    fn test_compaction_keeps_other_handles() {
        let mut b = batch(1, 8);
        let t = b.create_template(UvRect::FULL);
        let handles: Vec<_> = (0..5).map(|_| b.add_instance(t)).collect();
        for (i, h) in handles.iter().enumerate() {
            place(&mut b, h, i as f32 * 10.0);
        }
        let before: Vec<_> = handles.iter().map(|h| b.instance_data(h)).collect();

        assert!(b.remove_instance(&handles[1]));
        assert_eq!(b.instance_count(), 4);
        // last instance moved into the freed slot
        assert_eq!(handles[4].slot(), 1);
        for (i, h) in handles.iter().enumerate() {
            if i == 1 {
                continue;
            }
            assert!(h.is_valid());
            assert!(h.slot() < b.instance_count());
            assert_eq!(b.instance_data(h), before[i]);
        }
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut a = batch(1, 4);
        let mut b = batch(1, 4);
        let ta = a.create_template(UvRect::FULL);
        let tb = b.create_template(UvRect::FULL);
        let ha = a.add_instance(ta);
        let _hb = b.add_instance(tb);
        // same slot id, different batch
        assert!(!b.update_instance(&ha, Vec2::ZERO, Vec2::ONE, Vec4::ONE, 0.0));
        assert!(!b.remove_instance(&ha));
        assert!(ha.is_valid());
    }

    #[test]
    fn test_transform_round_trip() {
        let cases = [
            (Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), 0.0),
            (Vec2::new(120.5, -40.25), Vec2::new(64.0, 32.0), 0.7),
            (Vec2::new(-3.0, 999.0), Vec2::new(0.5, 8.0), -2.9),
            (Vec2::new(400.0, 300.0), Vec2::new(51.2, 51.2), std::f32::consts::FRAC_PI_2),
            (Vec2::new(17.0, 23.0), Vec2::new(3.0, 140.0), 3.1),
        ];
        let mut b = batch(1, 1);
        let t = b.create_template(UvRect::FULL);
        let h = b.add_instance(t);
        for (position, size, rotation) in cases {
            let color = Vec4::new(0.1, 0.2, 0.3, 0.4);
            assert!(b.update_instance(&h, position, size, color, rotation));
            let p = b.instance_position(&h).unwrap();
            let s = b.instance_size(&h).unwrap();
            let r = b.instance_rotation(&h).unwrap();
            let tolerance = 1e-4 * position.abs().max_element().max(1.0);
            assert!((p - position).abs().max_element() < tolerance, "{p} vs {position}");
            assert!((s - size).abs().max_element() < 1e-4 * size.max_element().max(1.0));
            assert!((r - rotation).abs() < 1e-4, "{r} vs {rotation}");
            assert_eq!(b.instance_color(&h), Some(color));
        }
    }

    #[test]
    fn test_swap_template_keeps_data() {
        let mut b = batch(2, 2);
        let t0 = b.create_template(UvRect::FULL);
        let t1 = b.create_template(UvRect::strip_frame(1, 2));
        let h = b.add_instance(t0);
        place(&mut b, &h, 5.0);
        let data = b.instance_data(&h);
        assert!(b.swap_instance_template(&h, t1));
        assert_eq!(h.template(), t1);
        assert_eq!(b.instance_data(&h), data);
        assert!(!b.swap_instance_template(&h, TemplateRef::INVALID));
        assert_eq!(h.template(), t1);
    }

    #[test]
    fn test_flush_only_when_dirty() {
        let mut b = batch(1, 2);
        let t = b.create_template(UvRect::FULL);
        assert!(b.is_dirty());
        assert!(b.flush_buffers());
        assert!(!b.flush_buffers());
        assert_eq!(b.uploads(), 1);

        let h = b.add_instance(t);
        let mut rec = Recorder::default();
        b.draw(&mut rec);
        // not flushed yet: device side has no instances
        assert_eq!(rec.calls, 0);

        assert!(b.flush_buffers());
        b.draw(&mut rec);
        assert_eq!(rec.calls, 1);
        assert_eq!(rec.instances, 1);

        place(&mut b, &h, 1.0);
        assert!(b.is_dirty());
        assert!(b.flush_buffers());
        assert_eq!(b.uploads(), 3);
    }

    #[test]
    fn test_clear_instances_invalidates_all() {
        let mut b = batch(1, 4);
        let t = b.create_template(UvRect::FULL);
        let handles: Vec<_> = (0..3).map(|_| b.add_instance(t)).collect();
        b.clear_instances();
        assert_eq!(b.instance_count(), 0);
        assert!(handles.iter().all(|h| !h.is_valid()));
        assert!(b.add_instance(t).is_valid());
    }
}

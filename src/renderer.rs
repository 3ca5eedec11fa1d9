//! The external renderer collaborator and the session that owns it for
//! one scene.
//!
//! The host 3D environment (scene graph, materials, the render call) is
//! reached only through the `Renderer` trait. A `RenderSession` borrows
//! the renderer for the lifetime of one scene and deletes every object
//! it instantiated when dropped, so a rejected scene never leaks objects
//! into the next attempt.

use std::path::Path;

use tracing::{debug, warn};

use crate::directions::CameraAxes;
use crate::error::{GenError, GenResult, RendererError};
use crate::types::{
    DirectionSet, JitterConfig, PixelCoords, PlacedObject, PropertyCatalog, RenderSettings, Rgba,
    Vec3,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u64);

/// Camera and lights that receive per-index jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigElement {
    Camera,
    KeyLight,
    FillLight,
    BackLight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Full-quality image written as the scene's output.
    Final,
    /// Flat colors, no lighting or antialiasing, scenery hidden.
    Shadeless,
}

/// RGBA pixels in row-major order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Rgba>,
}

pub trait Renderer {
    /// Reload the base scene (ground, lights, camera), discarding edits.
    fn open_base_scene(&mut self) -> Result<(), RendererError>;

    fn set_render_params(&mut self, settings: &RenderSettings) -> Result<(), RendererError>;

    fn camera_axes(&self) -> Result<CameraAxes, RendererError>;

    fn translate_rig(&mut self, element: RigElement, offset: Vec3) -> Result<(), RendererError>;

    fn instantiate_object(
        &mut self,
        shape_asset: &str,
        radius: f64,
        position: (f64, f64),
        rotation_deg: f64,
    ) -> Result<ObjectHandle, RendererError>;

    fn attach_material(
        &mut self,
        handle: ObjectHandle,
        material_asset: &str,
        rgba: Rgba,
    ) -> Result<(), RendererError>;

    /// World location of an instantiated object.
    fn object_location(&self, handle: ObjectHandle) -> Result<Vec3, RendererError>;

    fn project_to_screen(&self, handle: ObjectHandle) -> Result<PixelCoords, RendererError>;

    fn delete(&mut self, handle: ObjectHandle) -> Result<(), RendererError>;

    /// Swap in flat per-object colors and hide lights and ground.
    fn enter_shadeless(&mut self, overrides: &[(ObjectHandle, [f32; 3])])
        -> Result<(), RendererError>;

    /// Undo `enter_shadeless`: original materials, layers and settings.
    fn exit_shadeless(&mut self) -> Result<(), RendererError>;

    fn render(&mut self, output_path: &Path, mode: RenderMode)
        -> Result<PixelBuffer, RendererError>;

    fn save_session(&mut self, path: &Path) -> Result<(), RendererError>;
}

/// Exclusive use of a renderer for one scene.
pub struct RenderSession<'r, R: Renderer + ?Sized> {
    renderer: &'r mut R,
    live: Vec<ObjectHandle>,
    max_render_attempts: u32,
}

impl<'r, R: Renderer + ?Sized> RenderSession<'r, R> {
    /// Open the base scene and apply render settings.
    pub fn open(
        renderer: &'r mut R,
        settings: &RenderSettings,
        max_render_attempts: u32,
    ) -> GenResult<Self> {
        renderer.open_base_scene()?;
        renderer.set_render_params(settings)?;
        Ok(RenderSession {
            renderer,
            live: Vec::new(),
            max_render_attempts: max_render_attempts.max(1),
        })
    }

    pub fn apply_jitter(&mut self, jitter: &JitterConfig) -> GenResult<()> {
        for (element, offset) in [
            (RigElement::Camera, jitter.camera),
            (RigElement::KeyLight, jitter.key_light),
            (RigElement::FillLight, jitter.fill_light),
            (RigElement::BackLight, jitter.back_light),
        ] {
            self.renderer.translate_rig(element, offset)?;
        }
        Ok(())
    }

    pub fn directions(&self) -> GenResult<DirectionSet> {
        let axes = self.renderer.camera_axes()?;
        Ok(DirectionSet::from_camera(&axes)?)
    }

    pub fn handles(&self) -> &[ObjectHandle] {
        &self.live
    }

    /// Instantiate every object and return copies carrying the location
    /// reported by the renderer and fresh pixel coordinates. Inputs are
    /// left untouched.
    pub fn realize(
        &mut self,
        objects: &[PlacedObject],
        catalog: &PropertyCatalog,
    ) -> GenResult<Vec<PlacedObject>> {
        let mut realized = Vec::with_capacity(objects.len());
        for obj in objects {
            let radius = catalog.effective_radius(obj)?;
            let handle = self.renderer.instantiate_object(
                catalog.shape_asset(&obj.shape)?,
                radius,
                obj.planar(),
                obj.rotation,
            )?;
            self.live.push(handle);
            self.renderer.attach_material(
                handle,
                catalog.material_asset(&obj.material)?,
                catalog.rgba(&obj.color)?,
            )?;
            let position = self.renderer.object_location(handle)?;
            let pixel_coords = self.renderer.project_to_screen(handle)?;
            realized.push(PlacedObject {
                position,
                ..obj.with_pixel_coords(pixel_coords)
            });
        }
        Ok(realized)
    }

    /// Delete every object this session instantiated.
    pub fn clear_objects(&mut self) -> GenResult<()> {
        let mut first_err = None;
        for handle in self.live.drain(..) {
            if let Err(e) = self.renderer.delete(handle) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Render, retrying transient failures up to the session's bound.
    pub fn render(&mut self, output_path: &Path, mode: RenderMode) -> GenResult<PixelBuffer> {
        let mut last = String::new();
        for attempt in 1..=self.max_render_attempts {
            match self.renderer.render(output_path, mode) {
                Ok(buffer) => return Ok(buffer),
                Err(RendererError::Transient(msg)) => {
                    warn!(attempt, error = %msg, "transient render failure");
                    last = msg;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(GenError::RendererExhausted {
            attempts: self.max_render_attempts,
            last,
        })
    }

    pub fn save(&mut self, path: &Path) -> GenResult<()> {
        Ok(self.renderer.save_session(path)?)
    }

    pub(crate) fn renderer_mut(&mut self) -> &mut R {
        &mut *self.renderer
    }
}

impl<R: Renderer + ?Sized> Drop for RenderSession<'_, R> {
    fn drop(&mut self) {
        if self.live.is_empty() {
            return;
        }
        debug!(objects = self.live.len(), "tearing down render session");
        if let Err(e) = self.clear_objects() {
            warn!(error = %e, "failed to delete session objects");
        }
    }
}

// -----------------------------------------------------------------
// Test double
// -----------------------------------------------------------------

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;

    #[derive(Debug, Clone)]
    pub(crate) struct FakeObject {
        pub shape_asset: String,
        pub radius: f64,
        pub position: (f64, f64),
        pub material_asset: Option<String>,
    }

    /// Scripted renderer. Shadeless renders emit `pixels_per_object`
    /// pixels per flat color plus `background_pixels` of black; final
    /// renders touch the output file. Translating the camera moves it
    /// without turning it.
    #[derive(Debug)]
    pub(crate) struct FakeRenderer {
        pub eye: Vec3,
        pub camera_offset: Vec3,
        pub rig_moves: Vec<(RigElement, Vec3)>,
        pub objects: BTreeMap<u64, FakeObject>,
        pub next_handle: u64,
        pub created: u64,
        pub opened: u32,
        pub pixels_per_object: usize,
        pub background_pixels: usize,
        /// Shadeless renders (counted from the start) that hide the
        /// first object entirely.
        pub occlude_first_renders: u32,
        /// Individual shadeless renders (1-based) that hide the most
        /// recently added object.
        pub occlude_last_on: Vec<u32>,
        pub shadeless_renders: u32,
        pub in_shadeless: bool,
        pub transient_failures: u32,
        /// Upcoming `instantiate_object` calls that fail transiently.
        pub transient_instantiate: u32,
        pub fatal_render: bool,
        pub final_renders: Vec<PathBuf>,
        pub saved: Vec<PathBuf>,
        pub settings: Option<RenderSettings>,
    }

    impl Default for FakeRenderer {
        fn default() -> Self {
            FakeRenderer {
                eye: [7.36, -6.93, 4.96],
                camera_offset: [0.0; 3],
                rig_moves: Vec::new(),
                objects: BTreeMap::new(),
                next_handle: 1,
                created: 0,
                opened: 0,
                pixels_per_object: 500,
                background_pixels: 10_000,
                occlude_first_renders: 0,
                occlude_last_on: Vec::new(),
                shadeless_renders: 0,
                in_shadeless: false,
                transient_failures: 0,
                transient_instantiate: 0,
                fatal_render: false,
                final_renders: Vec::new(),
                saved: Vec::new(),
                settings: None,
            }
        }
    }

    impl Renderer for FakeRenderer {
        fn open_base_scene(&mut self) -> Result<(), RendererError> {
            self.opened += 1;
            self.camera_offset = [0.0; 3];
            Ok(())
        }

        fn set_render_params(&mut self, settings: &RenderSettings) -> Result<(), RendererError> {
            self.settings = Some(settings.clone());
            Ok(())
        }

        fn camera_axes(&self) -> Result<CameraAxes, RendererError> {
            CameraAxes::looking_at(self.eye, [0.0; 3])
                .map_err(|e| RendererError::Fatal(e.to_string()))
        }

        fn translate_rig(&mut self, element: RigElement, offset: Vec3) -> Result<(), RendererError> {
            if element == RigElement::Camera {
                for k in 0..3 {
                    self.camera_offset[k] += offset[k];
                }
            }
            self.rig_moves.push((element, offset));
            Ok(())
        }

        fn instantiate_object(
            &mut self,
            shape_asset: &str,
            radius: f64,
            position: (f64, f64),
            _rotation_deg: f64,
        ) -> Result<ObjectHandle, RendererError> {
            if self.transient_instantiate > 0 {
                self.transient_instantiate -= 1;
                return Err(RendererError::Transient("scene graph busy".into()));
            }
            let id = self.next_handle;
            self.next_handle += 1;
            self.created += 1;
            self.objects.insert(
                id,
                FakeObject {
                    shape_asset: shape_asset.into(),
                    radius,
                    position,
                    material_asset: None,
                },
            );
            Ok(ObjectHandle(id))
        }

        fn attach_material(
            &mut self,
            handle: ObjectHandle,
            material_asset: &str,
            _rgba: Rgba,
        ) -> Result<(), RendererError> {
            let obj = self
                .objects
                .get_mut(&handle.0)
                .ok_or_else(|| RendererError::Fatal(format!("no object {}", handle.0)))?;
            obj.material_asset = Some(material_asset.into());
            Ok(())
        }

        fn object_location(&self, handle: ObjectHandle) -> Result<Vec3, RendererError> {
            let obj = self
                .objects
                .get(&handle.0)
                .ok_or_else(|| RendererError::Fatal(format!("no object {}", handle.0)))?;
            Ok([obj.position.0, obj.position.1, obj.radius])
        }

        fn project_to_screen(&self, handle: ObjectHandle) -> Result<PixelCoords, RendererError> {
            let obj = self
                .objects
                .get(&handle.0)
                .ok_or_else(|| RendererError::Fatal(format!("no object {}", handle.0)))?;
            let (x, y) = obj.position;
            Ok(((160.0 + 40.0 * x) as i32, (120.0 - 30.0 * y) as i32, 10.0 - y))
        }

        fn delete(&mut self, handle: ObjectHandle) -> Result<(), RendererError> {
            self.objects
                .remove(&handle.0)
                .map(|_| ())
                .ok_or_else(|| RendererError::Fatal(format!("no object {}", handle.0)))
        }

        fn enter_shadeless(
            &mut self,
            _overrides: &[(ObjectHandle, [f32; 3])],
        ) -> Result<(), RendererError> {
            self.in_shadeless = true;
            Ok(())
        }

        fn exit_shadeless(&mut self) -> Result<(), RendererError> {
            self.in_shadeless = false;
            Ok(())
        }

        fn render(
            &mut self,
            output_path: &Path,
            mode: RenderMode,
        ) -> Result<PixelBuffer, RendererError> {
            if self.fatal_render {
                return Err(RendererError::Fatal("device lost".into()));
            }
            if self.transient_failures > 0 {
                self.transient_failures -= 1;
                return Err(RendererError::Transient("busy".into()));
            }
            let background = [0.0, 0.0, 0.0, 1.0];
            let mut pixels = vec![background; self.background_pixels];
            match mode {
                RenderMode::Shadeless => {
                    self.shadeless_renders += 1;
                    let n = self.objects.len();
                    let render = self.shadeless_renders;
                    let hide_last = self.occlude_last_on.contains(&render);
                    for (i, _) in self.objects.keys().enumerate() {
                        let hidden = (i == 0 && render <= self.occlude_first_renders)
                            || (i + 1 == n && hide_last);
                        if hidden {
                            continue;
                        }
                        let shade = (i + 1) as f32 / (n + 1) as f32;
                        pixels.extend(std::iter::repeat([shade, 1.0 - shade, 0.5, 1.0]).take(self.pixels_per_object));
                    }
                }
                RenderMode::Final => {
                    if let Some(parent) = output_path.parent() {
                        if parent.is_dir() {
                            std::fs::write(output_path, b"png")
                                .map_err(|e| RendererError::Fatal(e.to_string()))?;
                        }
                    }
                    self.final_renders.push(output_path.to_path_buf());
                }
            }
            Ok(PixelBuffer {
                width: pixels.len() as u32,
                height: 1,
                pixels,
            })
        }

        fn save_session(&mut self, path: &Path) -> Result<(), RendererError> {
            self.saved.push(path.to_path_buf());
            Ok(())
        }
    }
}

//! Paired scene generation.
//!
//! For every image index a base scene is placed and rendered, then each
//! requested variant is derived from the base objects and rendered in
//! its own session under the same jitter. The base and its variants are
//! accepted together or not at all; a rejected attempt deletes its
//! files and the same index is tried again with fresh randomness.

use tracing::{info, warn};

use crate::error::{GenError, GenResult};
use crate::layout::SceneLayoutPlanner;
use crate::mutation::SemanticChangeMutator;
use crate::output::{write_dataset, write_scene, OutputLayout, PendingArtifacts};
use crate::prng::Pcg32;
use crate::relationships::compute_relationships;
use crate::renderer::{RenderMode, RenderSession, Renderer};
use crate::types::{
    ChangeType, DirectionSet, GenerationParams, GenerationSummary, JitterConfig,
    JitterMagnitudes, PlacedObject, SceneRecord, Vec3,
};
use crate::visibility::check_visibility;

fn jitter_offset(rng: &mut Pcg32, magnitude: f64) -> Vec3 {
    if magnitude > 0.0 {
        [rng.jitter(magnitude), rng.jitter(magnitude), rng.jitter(magnitude)]
    } else {
        [0.0; 3]
    }
}

/// Rig offsets for a base scene. A zero magnitude leaves its element in
/// place and draws nothing from `rng`.
pub fn sample_jitter(rng: &mut Pcg32, magnitudes: &JitterMagnitudes) -> JitterConfig {
    let camera = jitter_offset(rng, magnitudes.camera);
    let key_light = jitter_offset(rng, magnitudes.key_light);
    let back_light = jitter_offset(rng, magnitudes.back_light);
    let fill_light = jitter_offset(rng, magnitudes.fill_light);
    JitterConfig {
        camera,
        key_light,
        fill_light,
        back_light,
    }
}

/// Rig offsets for a variant: the base lights replayed as they were,
/// the camera perturbed once more on top of its base offset.
pub fn variant_jitter(base: &JitterConfig, rng: &mut Pcg32, camera_magnitude: f64) -> JitterConfig {
    let extra = jitter_offset(rng, camera_magnitude);
    JitterConfig {
        camera: [
            base.camera[0] + extra[0],
            base.camera[1] + extra[1],
            base.camera[2] + extra[2],
        ],
        ..*base
    }
}

/// Per-run state shared by every index.
struct PairedGenerator<'p> {
    params: &'p GenerationParams,
    planner: SceneLayoutPlanner<'p>,
    mutator: SemanticChangeMutator<'p>,
    /// Base category first, then one per variant.
    layouts: Vec<OutputLayout<'p>>,
}

impl<'p> PairedGenerator<'p> {
    fn new(params: &'p GenerationParams) -> GenResult<Self> {
        let combos = params.shape_color_combos.as_ref();
        let layouts: Vec<OutputLayout<'p>> = std::iter::once(&params.output)
            .chain(params.variants.iter().map(|v| &v.output))
            .map(|category| {
                OutputLayout::new(&params.filename_prefix, category, params.save_blendfiles)
            })
            .collect();
        for layout in &layouts {
            layout.prepare()?;
        }
        Ok(PairedGenerator {
            params,
            planner: SceneLayoutPlanner::new(&params.properties, combos, params.constraints),
            mutator: SemanticChangeMutator::new(&params.properties, combos, params.constraints),
            layouts,
        })
    }

    /// Retry `index` until a triple is accepted or the attempt budget
    /// is spent.
    fn generate_index<R: Renderer + ?Sized>(
        &self,
        renderer: &mut R,
        rng: &mut Pcg32,
        index: u32,
        summary: &mut GenerationSummary,
    ) -> GenResult<Vec<SceneRecord>> {
        let attempts = self.params.max_index_attempts;
        for attempt in 1..=attempts {
            match self.attempt(renderer, rng, index) {
                Ok(records) => return Ok(records),
                Err(e) if e.is_recoverable() => {
                    summary.rejected_attempts += 1;
                    warn!(index, attempt, error = %e, "scene triple rejected");
                }
                Err(e) => return Err(e),
            }
        }
        Err(GenError::IndexExhausted { index, attempts })
    }

    fn attempt<R: Renderer + ?Sized>(
        &self,
        renderer: &mut R,
        rng: &mut Pcg32,
        index: u32,
    ) -> GenResult<Vec<SceneRecord>> {
        let p = self.params;
        let num_objects = rng.next_int(p.min_objects, p.max_objects);
        let jitter = sample_jitter(rng, &p.jitter);
        let mut pending = PendingArtifacts::new();

        let base = {
            let mut session = RenderSession::open(&mut *renderer, &p.render, p.max_render_attempts)?;
            session.apply_jitter(&jitter)?;
            let directions = session.directions()?;
            let objects = self.planner.place(
                &mut session,
                rng,
                num_objects,
                &directions,
                p.min_pixels_per_object,
            )?;
            self.finish_scene(&mut session, 0, index, objects, directions, &mut pending)?
        };

        let mut records = Vec::with_capacity(1 + p.variants.len());
        let mut rejection = None;
        for (slot, variant) in p.variants.iter().enumerate() {
            let outcome = self.render_variant(
                &mut *renderer,
                rng,
                index,
                slot + 1,
                &base.objects,
                &jitter,
                variant.change,
                &mut pending,
            );
            match outcome {
                Ok(record) => records.push(record),
                Err(e) if e.is_recoverable() => {
                    warn!(index, change = %variant.change, error = %e, "variant failed");
                    rejection.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(e) = rejection {
            return Err(e);
        }
        records.insert(0, base);

        for (record, layout) in records.iter().zip(&self.layouts) {
            let path = layout.paths(index).scene;
            pending.track(&path);
            write_scene(&path, record)?;
        }
        pending.commit();
        Ok(records)
    }

    #[allow(clippy::too_many_arguments)]
    fn render_variant<R: Renderer + ?Sized>(
        &self,
        renderer: &mut R,
        rng: &mut Pcg32,
        index: u32,
        slot: usize,
        base_objects: &[PlacedObject],
        base_jitter: &JitterConfig,
        change: ChangeType,
        pending: &mut PendingArtifacts,
    ) -> GenResult<SceneRecord> {
        let p = self.params;
        let mut session = RenderSession::open(renderer, &p.render, p.max_render_attempts)?;
        session.apply_jitter(&variant_jitter(base_jitter, rng, p.jitter.camera))?;
        let directions = session.directions()?;
        let edited = self.mutator.mutate(base_objects, &directions, change, rng)?;
        let objects = session.realize(&edited, &p.properties)?;
        check_visibility(&mut session, rng, p.min_pixels_per_object)?.into_result()?;
        self.finish_scene(&mut session, slot, index, objects, directions, pending)
    }

    /// Render the final image (and blend file) of a realized scene and
    /// build its record.
    fn finish_scene<R: Renderer + ?Sized>(
        &self,
        session: &mut RenderSession<'_, R>,
        slot: usize,
        index: u32,
        objects: Vec<PlacedObject>,
        directions: DirectionSet,
        pending: &mut PendingArtifacts,
    ) -> GenResult<SceneRecord> {
        let paths = self.layouts[slot].paths(index);
        let relationships =
            compute_relationships(&objects, &directions, self.params.relation_epsilon);

        pending.track(&paths.image);
        session.render(&paths.image, RenderMode::Final)?;
        if let Some(blend) = &paths.blend {
            pending.track(blend);
            session.save(blend)?;
        }

        Ok(SceneRecord {
            split: self.params.split.clone(),
            image_index: index,
            image_filename: paths.image_filename,
            objects,
            directions,
            relationships,
        })
    }
}

/// Generate `num_images` accepted scene triples starting at `start_idx`
/// and write the per-category aggregate files. Catalog and shape/color
/// files named in `params` are read first.
pub fn generate<R: Renderer + ?Sized>(
    params: &GenerationParams,
    renderer: &mut R,
) -> GenResult<GenerationSummary> {
    let resolved = params.resolve_files()?;
    let params = &resolved;
    params.validate()?;
    let generator = PairedGenerator::new(params)?;
    let mut rng = Pcg32::new(params.seed, params.stream);
    let mut datasets: Vec<Vec<SceneRecord>> = vec![Vec::new(); generator.layouts.len()];
    let mut summary = GenerationSummary::default();

    for offset in 0..params.num_images {
        let index = params.start_idx + offset;
        let records = generator.generate_index(renderer, &mut rng, index, &mut summary)?;
        info!(
            index,
            objects = records.first().map_or(0, |r| r.objects.len()),
            "accepted scene triple"
        );
        for (dataset, record) in datasets.iter_mut().zip(records) {
            dataset.push(record);
        }
        summary.accepted += 1;
        summary.indices.push(index);
    }

    for (layout, scenes) in generator.layouts.iter().zip(datasets) {
        write_dataset(&layout.category.scene_file, params.info(), scenes)?;
    }
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected_attempts,
        "generation finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::collision::{find_violation, footprints};
    use crate::error::RendererError;
    use crate::output::read_dataset;
    use crate::renderer::fake::FakeRenderer;
    use crate::types::{CategoryOutput, VariantSpec};

    const PROPERTIES: &str = r#"{
        "shapes": {"cube": "SmoothCube_v2", "cylinder": "SmoothCylinder", "sphere": "Sphere"},
        "colors": {"gray": [87, 87, 87], "red": [173, 35, 35], "blue": [42, 75, 215]},
        "materials": {"rubber": "Rubber", "metal": "MyMetal"},
        "sizes": {"large": 0.7, "small": 0.35}
    }"#;

    fn make_params(root: &Path, num_images: u32) -> GenerationParams {
        let json = format!(r#"{{"properties": {PROPERTIES}, "date": "10/16/2026"}}"#);
        let mut params: GenerationParams = serde_json::from_str(&json).unwrap();
        params.seed = 7;
        params.num_images = num_images;
        params.min_objects = 3;
        params.max_objects = 5;
        params.output = CategoryOutput::under(root, "default", "");
        params.variants = vec![
            VariantSpec {
                change: ChangeType::Same,
                output: CategoryOutput::under(root, "nonsemantic", "nsc"),
            },
            VariantSpec {
                change: ChangeType::Drop,
                output: CategoryOutput::under(root, "semantic", "sc"),
            },
        ];
        params
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn zero_magnitude_jitter_is_still() {
        let mut rng = Pcg32::new(1, 0);
        let mags = JitterMagnitudes {
            camera: 0.0,
            key_light: 0.0,
            fill_light: 0.0,
            back_light: 0.0,
        };
        assert_eq!(sample_jitter(&mut rng, &mags), JitterConfig::default());
        // Nothing was drawn.
        assert_eq!(rng.next_u32(), Pcg32::new(1, 0).next_u32());
    }

    #[test]
    fn variant_jitter_replays_lights() {
        let mut rng = Pcg32::new(3, 0);
        let base = sample_jitter(&mut rng, &JitterMagnitudes::default());
        for v in base.camera {
            assert!(v.abs() < 0.5);
        }
        for v in base.key_light {
            assert!(v.abs() < 1.0);
        }
        let variant = variant_jitter(&base, &mut rng, 0.5);
        assert_eq!(variant.key_light, base.key_light);
        assert_eq!(variant.fill_light, base.fill_light);
        assert_eq!(variant.back_light, base.back_light);
        assert_ne!(variant.camera, base.camera);
        for k in 0..3 {
            assert!((variant.camera[k] - base.camera[k]).abs() < 0.5);
        }
        assert_eq!(variant_jitter(&base, &mut rng, 0.0), base);
    }

    #[test]
    fn generates_paired_scenes() {
        let dir = tempfile::tempdir().unwrap();
        let params = make_params(dir.path(), 2);
        let mut renderer = FakeRenderer::default();
        let summary = generate(&params, &mut renderer).unwrap();
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.indices, vec![0, 1]);
        assert!(renderer.objects.is_empty());

        let root = dir.path();
        assert!(root.join("images/CLEVR_default_000001.png").is_file());
        assert!(root.join("scenes/CLEVR_default_000001.json").is_file());
        assert!(root.join("nsc_images/CLEVR_nonsemantic_000000.png").is_file());
        assert!(root.join("sc_scenes/CLEVR_semantic_000001.json").is_file());
        assert!(!root.join("blendfiles").exists());

        let base = read_dataset(&root.join("CLEVR_scenes.json")).unwrap();
        let same = read_dataset(&root.join("CLEVR_nsc_scenes.json")).unwrap();
        let dropped = read_dataset(&root.join("CLEVR_sc_scenes.json")).unwrap();
        assert_eq!(base.info.date, "10/16/2026");
        assert_eq!(base.scenes.len(), 2);
        for ((b, s), d) in base.scenes.iter().zip(&same.scenes).zip(&dropped.scenes) {
            assert!((3..=5).contains(&b.objects.len()));
            assert_eq!(b.split, "default");
            assert_eq!(s.image_index, b.image_index);
            assert_eq!(
                s.image_filename,
                format!("CLEVR_nonsemantic_{:06}.png", b.image_index)
            );
            for (bo, so) in b.objects.iter().zip(&s.objects) {
                assert_eq!(bo.shape, so.shape);
                assert_eq!(bo.color, so.color);
                assert_eq!(bo.material, so.material);
                assert_eq!(bo.size, so.size);
                assert_eq!(bo.rotation, so.rotation);
                assert_eq!(bo.position, so.position);
            }
            assert_eq!(s.objects.len(), b.objects.len());
            assert_eq!(d.objects.len(), b.objects.len() - 1);
            assert!(d.relationships.left.iter().flatten().all(|j| *j < d.objects.len()));
        }
    }

    #[test]
    fn runs_are_reproducible() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        generate(&make_params(a.path(), 2), &mut FakeRenderer::default()).unwrap();
        generate(&make_params(b.path(), 2), &mut FakeRenderer::default()).unwrap();
        for file in ["CLEVR_scenes.json", "CLEVR_nsc_scenes.json", "CLEVR_sc_scenes.json"] {
            let da = read_dataset(&a.path().join(file)).unwrap();
            let db = read_dataset(&b.path().join(file)).unwrap();
            assert_eq!(da, db);
        }
    }

    #[test]
    fn failed_variant_rejects_whole_triple() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = make_params(dir.path(), 1);
        params.max_index_attempts = 1;
        // Render 1 checks the base, render 2 the `same` variant.
        let mut renderer = FakeRenderer {
            occlude_last_on: vec![2],
            ..FakeRenderer::default()
        };
        let err = generate(&params, &mut renderer).unwrap_err();
        assert!(matches!(err, GenError::IndexExhausted { index: 0, attempts: 1 }));
        // The drop variant was still attempted.
        assert_eq!(renderer.shadeless_renders, 3);
        let root = dir.path();
        for sub in ["images", "scenes", "nsc_images", "nsc_scenes", "sc_images", "sc_scenes"] {
            assert_eq!(dir_entries(&root.join(sub)), 0, "{sub} not cleaned up");
        }
        assert!(renderer.objects.is_empty());
    }

    #[test]
    fn rejected_attempt_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let params = make_params(dir.path(), 1);
        let mut renderer = FakeRenderer {
            occlude_last_on: vec![3],
            ..FakeRenderer::default()
        };
        let summary = generate(&params, &mut renderer).unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected_attempts, 1);
        assert_eq!(renderer.shadeless_renders, 6);
        assert_eq!(dir_entries(&dir.path().join("sc_images")), 1);
    }

    #[test]
    fn variants_share_the_base_direction_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = make_params(dir.path(), 3);
        params.seed = 11;
        generate(&params, &mut FakeRenderer::default()).unwrap();
        let root = dir.path();
        let base = read_dataset(&root.join("CLEVR_scenes.json")).unwrap();
        let same = read_dataset(&root.join("CLEVR_nsc_scenes.json")).unwrap();
        for (b, s) in base.scenes.iter().zip(&same.scenes) {
            assert_eq!(s.directions, b.directions);
            let placed = footprints(&s.objects, &params.properties).unwrap();
            assert_eq!(
                find_violation(&placed, &s.directions, &params.constraints),
                None,
                "index {}",
                s.image_index
            );
        }
    }

    #[test]
    fn transient_object_error_rejects_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let params = make_params(dir.path(), 1);
        let mut renderer = FakeRenderer {
            transient_instantiate: 1,
            ..FakeRenderer::default()
        };
        let summary = generate(&params, &mut renderer).unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected_attempts, 1);
        assert!(renderer.objects.is_empty());
    }

    #[test]
    fn catalog_file_is_read_before_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let props = dir.path().join("properties.json");
        std::fs::write(&props, PROPERTIES).unwrap();
        let mut params = make_params(dir.path(), 1);
        params.properties = Default::default();
        params.properties_json = Some(props);
        let summary = generate(&params, &mut FakeRenderer::default()).unwrap();
        assert_eq!(summary.accepted, 1);

        params.properties_json = Some(dir.path().join("missing.json"));
        let mut renderer = FakeRenderer::default();
        assert!(matches!(generate(&params, &mut renderer), Err(GenError::Io { .. })));
        assert_eq!(renderer.opened, 0);
    }

    #[test]
    fn fatal_renderer_error_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let params = make_params(dir.path(), 3);
        let mut renderer = FakeRenderer {
            fatal_render: true,
            ..FakeRenderer::default()
        };
        let err = generate(&params, &mut renderer).unwrap_err();
        assert!(matches!(err, GenError::Renderer(RendererError::Fatal(_))));
        assert_eq!(renderer.opened, 1);
        assert!(!dir.path().join("CLEVR_scenes.json").exists());
    }

    #[test]
    fn unimplemented_variant_is_refused_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = make_params(dir.path(), 1);
        params.variants[1].change = ChangeType::Shape;
        let mut renderer = FakeRenderer::default();
        assert!(matches!(
            generate(&params, &mut renderer),
            Err(GenError::Config(_))
        ));
        assert_eq!(renderer.opened, 0);
    }

    #[test]
    fn blend_files_are_saved_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = make_params(dir.path(), 1);
        params.save_blendfiles = true;
        let mut renderer = FakeRenderer::default();
        generate(&params, &mut renderer).unwrap();
        assert_eq!(renderer.saved.len(), 3);
        assert!(renderer.saved[2].ends_with("sc_blendfiles/CLEVR_semantic_000000.blend"));
    }
}

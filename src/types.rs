//! Data types matching the scene JSON schema and the run parameters.
//!
//! Everything that crosses the JSON boundary derives Serialize +
//! Deserialize. Name → value tables use `BTreeMap` so that iteration
//! order, and therefore PRNG consumption, is stable across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GenError, GenResult};

pub type Vec3 = [f64; 3];

/// Screen projection of an object center: (column, row, depth).
pub type PixelCoords = (i32, i32, f64);

pub type Rgba = [f32; 4];

// -- Directions ----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Front,
    Behind,
    Above,
    Below,
}

impl Direction {
    /// The four ground-plane directions used for margins and relations.
    pub const HORIZONTAL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Front,
        Direction::Behind,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Front => "front",
            Direction::Behind => "behind",
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionSet {
    pub behind: Vec3,
    pub front: Vec3,
    pub left: Vec3,
    pub right: Vec3,
    pub above: Vec3,
    pub below: Vec3,
}

impl DirectionSet {
    pub fn get(&self, direction: Direction) -> Vec3 {
        match direction {
            Direction::Left => self.left,
            Direction::Right => self.right,
            Direction::Front => self.front,
            Direction::Behind => self.behind,
            Direction::Above => self.above,
            Direction::Below => self.below,
        }
    }
}

// -- Objects / scenes ----------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedObject {
    pub shape: String,
    pub size: String,
    pub material: String,
    #[serde(rename = "3d_coords")]
    pub position: Vec3,
    pub rotation: f64,
    pub pixel_coords: Option<PixelCoords>,
    pub color: String,
}

impl PlacedObject {
    /// Same object with freshly projected screen coordinates.
    pub fn with_pixel_coords(&self, pixel_coords: PixelCoords) -> Self {
        PlacedObject {
            pixel_coords: Some(pixel_coords),
            ..self.clone()
        }
    }

    pub fn planar(&self) -> (f64, f64) {
        (self.position[0], self.position[1])
    }
}

/// For each horizontal direction, `dir[i]` lists the objects lying in
/// that direction from object `i`, sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipGraph {
    pub left: Vec<Vec<usize>>,
    pub right: Vec<Vec<usize>>,
    pub front: Vec<Vec<usize>>,
    pub behind: Vec<Vec<usize>>,
}

impl RelationshipGraph {
    pub fn get(&self, direction: Direction) -> Option<&[Vec<usize>]> {
        match direction {
            Direction::Left => Some(&self.left),
            Direction::Right => Some(&self.right),
            Direction::Front => Some(&self.front),
            Direction::Behind => Some(&self.behind),
            Direction::Above | Direction::Below => None,
        }
    }

    pub(crate) fn get_mut(&mut self, direction: Direction) -> Option<&mut Vec<Vec<usize>>> {
        match direction {
            Direction::Left => Some(&mut self.left),
            Direction::Right => Some(&mut self.right),
            Direction::Front => Some(&mut self.front),
            Direction::Behind => Some(&mut self.behind),
            Direction::Above | Direction::Below => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub split: String,
    pub image_index: u32,
    pub image_filename: String,
    pub objects: Vec<PlacedObject>,
    pub directions: DirectionSet,
    pub relationships: RelationshipGraph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub date: String,
    pub version: String,
    pub split: String,
    pub license: String,
}

/// Aggregate file holding every accepted scene of one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub info: DatasetInfo,
    pub scenes: Vec<SceneRecord>,
}

// -- Edits ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Same,
    Drop,
    Add,
    Color,
    Material,
    Shape,
    Switch,
    Random,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Same => "same",
            ChangeType::Drop => "drop",
            ChangeType::Add => "add",
            ChangeType::Color => "color",
            ChangeType::Material => "material",
            ChangeType::Shape => "shape",
            ChangeType::Switch => "switch",
            ChangeType::Random => "random",
        }
    }

    pub fn is_implemented(self) -> bool {
        !matches!(
            self,
            ChangeType::Shape | ChangeType::Switch | ChangeType::Random
        )
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Jitter --------------------------------------------------------

/// Per-axis offsets applied to the camera and the three lights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JitterConfig {
    pub camera: Vec3,
    pub key_light: Vec3,
    pub fill_light: Vec3,
    pub back_light: Vec3,
}

// -- Catalog -------------------------------------------------------

fn default_square_shapes() -> Vec<String> {
    vec!["cube".into()]
}

/// Object properties loaded from `properties.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyCatalog {
    /// Color name → RGB in 0..=255.
    pub colors: BTreeMap<String, [u8; 3]>,
    /// Material name → material asset.
    pub materials: BTreeMap<String, String>,
    /// Shape name → shape asset.
    pub shapes: BTreeMap<String, String>,
    /// Size name → radius multiplier.
    pub sizes: BTreeMap<String, f64>,
    /// Shapes whose footprint is a square; their radius is scaled by
    /// 1/√2 so the edge rather than the corner sits at the radius.
    #[serde(default = "default_square_shapes")]
    pub square_shapes: Vec<String>,
}

impl Default for PropertyCatalog {
    fn default() -> Self {
        PropertyCatalog {
            colors: BTreeMap::new(),
            materials: BTreeMap::new(),
            shapes: BTreeMap::new(),
            sizes: BTreeMap::new(),
            square_shapes: default_square_shapes(),
        }
    }
}

/// Shape name → allowed color names.
pub type ShapeColorCombos = BTreeMap<String, Vec<String>>;

impl PropertyCatalog {
    pub fn load(path: &Path) -> GenResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| GenError::io(path, e))?;
        let catalog: PropertyCatalog = serde_json::from_str(&text)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> GenResult<()> {
        for (what, empty) in [
            ("colors", self.colors.is_empty()),
            ("materials", self.materials.is_empty()),
            ("shapes", self.shapes.is_empty()),
            ("sizes", self.sizes.is_empty()),
        ] {
            if empty {
                return Err(GenError::Catalog(format!("no {what} defined")));
            }
        }
        if let Some((name, r)) = self.sizes.iter().find(|(_, r)| **r <= 0.0) {
            return Err(GenError::Catalog(format!("size '{name}' has radius {r}")));
        }
        Ok(())
    }

    pub fn validate_combos(&self, combos: &ShapeColorCombos) -> GenResult<()> {
        if combos.is_empty() {
            return Err(GenError::Catalog("shape/color table is empty".into()));
        }
        for (shape, colors) in combos {
            if !self.shapes.contains_key(shape) {
                return Err(GenError::Catalog(format!("unknown shape '{shape}'")));
            }
            if colors.is_empty() {
                return Err(GenError::Catalog(format!("no colors allowed for '{shape}'")));
            }
            if let Some(c) = colors.iter().find(|c| !self.colors.contains_key(*c)) {
                return Err(GenError::Catalog(format!("unknown color '{c}' for '{shape}'")));
            }
        }
        Ok(())
    }

    pub fn color_names(&self) -> Vec<&str> {
        self.colors.keys().map(String::as_str).collect()
    }

    pub fn shape_names(&self) -> Vec<&str> {
        self.shapes.keys().map(String::as_str).collect()
    }

    pub fn material_names(&self) -> Vec<&str> {
        self.materials.keys().map(String::as_str).collect()
    }

    pub fn rgba(&self, color: &str) -> GenResult<Rgba> {
        let [r, g, b] = self
            .colors
            .get(color)
            .ok_or_else(|| GenError::Catalog(format!("unknown color '{color}'")))?;
        Ok([
            *r as f32 / 255.0,
            *g as f32 / 255.0,
            *b as f32 / 255.0,
            1.0,
        ])
    }

    pub fn size_radius(&self, size: &str) -> GenResult<f64> {
        self.sizes
            .get(size)
            .copied()
            .ok_or_else(|| GenError::Catalog(format!("unknown size '{size}'")))
    }

    pub fn shape_asset(&self, shape: &str) -> GenResult<&str> {
        self.shapes
            .get(shape)
            .map(String::as_str)
            .ok_or_else(|| GenError::Catalog(format!("unknown shape '{shape}'")))
    }

    pub fn material_asset(&self, material: &str) -> GenResult<&str> {
        self.materials
            .get(material)
            .map(String::as_str)
            .ok_or_else(|| GenError::Catalog(format!("unknown material '{material}'")))
    }

    /// Scale a size radius for the given shape's footprint.
    pub fn adjust_radius(&self, shape: &str, radius: f64) -> f64 {
        if self.square_shapes.iter().any(|s| s == shape) {
            radius / std::f64::consts::SQRT_2
        } else {
            radius
        }
    }

    /// Radius used for spacing checks of an already placed object.
    pub fn effective_radius(&self, object: &PlacedObject) -> GenResult<f64> {
        Ok(self.adjust_radius(&object.shape, self.size_radius(&object.size)?))
    }
}

pub fn load_shape_color_combos(path: &Path) -> GenResult<ShapeColorCombos> {
    let text = std::fs::read_to_string(path).map_err(|e| GenError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

// -- Run parameters ------------------------------------------------

fn default_seed() -> u64 {
    0
}
fn default_num_images() -> u32 {
    5
}
fn default_min_objects() -> u32 {
    3
}
fn default_max_objects() -> u32 {
    10
}
fn default_min_dist() -> f64 {
    0.25
}
fn default_margin() -> f64 {
    0.4
}
fn default_min_pixels() -> u32 {
    200
}
fn default_max_retries() -> u32 {
    50
}
fn default_max_scene_attempts() -> u32 {
    100
}
fn default_max_render_attempts() -> u32 {
    5
}
fn default_max_index_attempts() -> u32 {
    100
}
fn default_placement_extent() -> f64 {
    3.0
}
fn default_relation_epsilon() -> f64 {
    0.2
}
fn default_light_jitter() -> f64 {
    1.0
}
fn default_camera_jitter() -> f64 {
    0.5
}

/// Upper bound accepted for `max_objects`.
pub const MAX_OBJECTS_LIMIT: u32 = 1024;

/// Geometric constraints shared by the planner and the `add` edit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementConstraints {
    #[serde(default = "default_min_dist")]
    pub min_dist: f64,
    #[serde(default = "default_margin")]
    pub margin: f64,
    /// Candidate positions tried per object before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Positions are sampled in [-extent, extent]² on the ground plane.
    #[serde(default = "default_placement_extent")]
    pub placement_extent: f64,
    #[serde(default = "default_max_scene_attempts")]
    pub max_scene_attempts: u32,
}

impl Default for PlacementConstraints {
    fn default() -> Self {
        Self {
            min_dist: default_min_dist(),
            margin: default_margin(),
            max_retries: default_max_retries(),
            placement_extent: default_placement_extent(),
            max_scene_attempts: default_max_scene_attempts(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JitterMagnitudes {
    #[serde(default = "default_camera_jitter")]
    pub camera: f64,
    #[serde(default = "default_light_jitter")]
    pub key_light: f64,
    #[serde(default = "default_light_jitter")]
    pub fill_light: f64,
    #[serde(default = "default_light_jitter")]
    pub back_light: f64,
}

impl Default for JitterMagnitudes {
    fn default() -> Self {
        Self {
            camera: default_camera_jitter(),
            key_light: default_light_jitter(),
            fill_light: default_light_jitter(),
            back_light: default_light_jitter(),
        }
    }
}

fn default_width() -> u32 {
    320
}
fn default_height() -> u32 {
    240
}
fn default_tile_size() -> u32 {
    256
}
fn default_num_samples() -> u32 {
    512
}
fn default_bounces() -> u32 {
    8
}
fn default_engine() -> String {
    "CYCLES".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default)]
    pub use_gpu: bool,
    #[serde(default = "default_num_samples")]
    pub num_samples: u32,
    #[serde(default = "default_bounces")]
    pub min_bounces: u32,
    #[serde(default = "default_bounces")]
    pub max_bounces: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            width: default_width(),
            height: default_height(),
            tile_size: default_tile_size(),
            use_gpu: false,
            num_samples: default_num_samples(),
            min_bounces: default_bounces(),
            max_bounces: default_bounces(),
        }
    }
}

/// Output locations for one scene category (base or a variant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryOutput {
    /// Split name used in file names.
    pub split: String,
    pub image_dir: PathBuf,
    pub scene_dir: PathBuf,
    pub blend_dir: PathBuf,
    pub scene_file: PathBuf,
}

impl CategoryOutput {
    /// Directories and aggregate file of a category below `root`. An
    /// empty `stem` gives the base layout (`images/`, `CLEVR_scenes.json`),
    /// otherwise names are prefixed (`<stem>_images/`,
    /// `CLEVR_<stem>_scenes.json`).
    pub fn under(root: impl AsRef<Path>, split: &str, stem: &str) -> Self {
        let root = root.as_ref();
        let file_stem = if stem.is_empty() {
            "CLEVR_scenes.json".to_string()
        } else {
            format!("CLEVR_{stem}_scenes.json")
        };
        let dir = |kind: &str| {
            if stem.is_empty() {
                root.join(kind)
            } else {
                root.join(format!("{stem}_{kind}"))
            }
        };
        CategoryOutput {
            split: split.into(),
            image_dir: dir("images"),
            scene_dir: dir("scenes"),
            blend_dir: dir("blendfiles"),
            scene_file: root.join(file_stem),
        }
    }
}

fn default_base_output() -> CategoryOutput {
    CategoryOutput::under("../output_drop", "default", "")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub change: ChangeType,
    pub output: CategoryOutput,
}

fn default_variants() -> Vec<VariantSpec> {
    vec![
        VariantSpec {
            change: ChangeType::Same,
            output: CategoryOutput::under("../output_drop", "nonsemantic", "nsc"),
        },
        VariantSpec {
            change: ChangeType::Drop,
            output: CategoryOutput::under("../output_drop", "semantic", "sc"),
        },
    ]
}

fn default_prefix() -> String {
    "CLEVR".into()
}
fn default_split() -> String {
    "default".into()
}
fn default_version() -> String {
    "1.0".into()
}
fn default_license() -> String {
    "Creative Commons Attribution (CC-BY 4.0)".into()
}
fn default_date() -> String {
    chrono::Local::now().format("%m/%d/%Y").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Inline catalog; replaced by `properties_json` when that is set.
    #[serde(default)]
    pub properties: PropertyCatalog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties_json: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_color_combos: Option<ShapeColorCombos>,
    /// Shape → allowed colors file; replaces `shape_color_combos`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_color_combos_json: Option<PathBuf>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// PCG32 stream; give each process of a partitioned run its own.
    #[serde(default)]
    pub stream: u64,
    #[serde(default = "default_num_images")]
    pub num_images: u32,
    #[serde(default)]
    pub start_idx: u32,
    #[serde(default = "default_min_objects")]
    pub min_objects: u32,
    #[serde(default = "default_max_objects")]
    pub max_objects: u32,
    #[serde(default)]
    pub constraints: PlacementConstraints,
    #[serde(default = "default_min_pixels")]
    pub min_pixels_per_object: u32,
    #[serde(default = "default_relation_epsilon")]
    pub relation_epsilon: f64,
    #[serde(default = "default_max_render_attempts")]
    pub max_render_attempts: u32,
    #[serde(default = "default_max_index_attempts")]
    pub max_index_attempts: u32,
    #[serde(default)]
    pub jitter: JitterMagnitudes,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default = "default_prefix")]
    pub filename_prefix: String,
    /// Split recorded in every scene record and aggregate file.
    #[serde(default = "default_split")]
    pub split: String,
    #[serde(default = "default_base_output")]
    pub output: CategoryOutput,
    #[serde(default = "default_variants")]
    pub variants: Vec<VariantSpec>,
    #[serde(default)]
    pub save_blendfiles: bool,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_license")]
    pub license: String,
    #[serde(default = "default_date")]
    pub date: String,
}

impl GenerationParams {
    /// Copy of the params with the catalog and shape/color table read
    /// from their files, when paths are given.
    pub fn resolve_files(&self) -> GenResult<Self> {
        let mut params = self.clone();
        if let Some(path) = &self.properties_json {
            params.properties = PropertyCatalog::load(path)?;
        }
        if let Some(path) = &self.shape_color_combos_json {
            params.shape_color_combos = Some(load_shape_color_combos(path)?);
        }
        Ok(params)
    }

    pub fn validate(&self) -> GenResult<()> {
        self.properties.validate()?;
        if let Some(combos) = &self.shape_color_combos {
            self.properties.validate_combos(combos)?;
        }
        if self.min_objects > self.max_objects {
            return Err(GenError::Config(format!(
                "min_objects {} exceeds max_objects {}",
                self.min_objects, self.max_objects
            )));
        }
        if self.max_objects > MAX_OBJECTS_LIMIT {
            return Err(GenError::Config(format!(
                "max_objects {} exceeds {MAX_OBJECTS_LIMIT}",
                self.max_objects
            )));
        }
        if self.start_idx.checked_add(self.num_images).is_none() {
            return Err(GenError::Config(format!(
                "start_idx {} + num_images {} overflows the image index",
                self.start_idx, self.num_images
            )));
        }
        let c = &self.constraints;
        if c.min_dist < 0.0 || c.margin < 0.0 {
            return Err(GenError::Config("min_dist and margin must be >= 0".into()));
        }
        if c.placement_extent <= 0.0 {
            return Err(GenError::Config("placement_extent must be > 0".into()));
        }
        for (name, v) in [
            ("max_scene_attempts", c.max_scene_attempts),
            ("max_render_attempts", self.max_render_attempts),
            ("max_index_attempts", self.max_index_attempts),
        ] {
            if v == 0 {
                return Err(GenError::Config(format!("{name} must be >= 1")));
            }
        }
        if let Some(v) = self.variants.iter().find(|v| !v.change.is_implemented()) {
            return Err(GenError::Config(format!(
                "variant change '{}' is not implemented",
                v.change
            )));
        }
        Ok(())
    }

    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            date: self.date.clone(),
            version: self.version.clone(),
            split: self.split.clone(),
            license: self.license.clone(),
        }
    }
}

/// Outcome of a generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub accepted: u32,
    pub rejected_attempts: u32,
    pub indices: Vec<u32>,
}

// -- Tests ---------------------------------------------------------

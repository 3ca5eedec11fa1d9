//! Semantic edits applied to a validated base scene.
//!
//! Every edit reads the base objects and builds a new object list; the
//! base is never modified. Indices of surviving objects keep their
//! relative order.

use tracing::debug;

use crate::collision::footprints;
use crate::error::{GenResult, MutationError};
use crate::layout::{
    find_position, sample_material, sample_rotation, sample_shape_and_color, sample_size,
};
use crate::prng::Pcg32;
use crate::types::{
    ChangeType, DirectionSet, PlacedObject, PlacementConstraints, PropertyCatalog,
    ShapeColorCombos,
};

/// Base objects without the one at `index`.
pub fn drop_object(base: &[PlacedObject], index: usize) -> Vec<PlacedObject> {
    base.iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, o)| o.clone())
        .collect()
}

/// Base objects with the one at `index` passed through `edit`.
fn replace_object(
    base: &[PlacedObject],
    index: usize,
    edit: impl FnOnce(&PlacedObject) -> PlacedObject,
) -> Vec<PlacedObject> {
    let mut objects = base.to_vec();
    objects[index] = edit(&base[index]);
    objects
}

/// Uniform pick from `options` excluding `current`.
fn pick_other(
    rng: &mut Pcg32,
    options: &[&str],
    current: &str,
    attribute: &'static str,
) -> Result<String, MutationError> {
    let others: Vec<&str> = options.iter().copied().filter(|o| *o != current).collect();
    rng.choose(&others)
        .map(|o| o.to_string())
        .ok_or_else(|| MutationError::NoAlternative {
            attribute,
            current: current.to_string(),
        })
}

pub struct SemanticChangeMutator<'a> {
    pub catalog: &'a PropertyCatalog,
    pub combos: Option<&'a ShapeColorCombos>,
    pub constraints: PlacementConstraints,
}

impl<'a> SemanticChangeMutator<'a> {
    pub fn new(
        catalog: &'a PropertyCatalog,
        combos: Option<&'a ShapeColorCombos>,
        constraints: PlacementConstraints,
    ) -> Self {
        SemanticChangeMutator {
            catalog,
            combos,
            constraints,
        }
    }

    /// Apply one edit to `base` and return the variant's objects.
    pub fn mutate(
        &self,
        base: &[PlacedObject],
        directions: &DirectionSet,
        change: ChangeType,
        rng: &mut Pcg32,
    ) -> GenResult<Vec<PlacedObject>> {
        let objects = match change {
            ChangeType::Same => base.to_vec(),
            ChangeType::Drop => {
                let index = self.pick_index(base, change, rng)?;
                debug!(index, "dropping object");
                drop_object(base, index)
            }
            ChangeType::Add => self.add_object(base, directions, rng)?,
            ChangeType::Color => {
                let index = self.pick_index(base, change, rng)?;
                let target = &base[index];
                let palette = self.palette_for(&target.shape);
                let color = pick_other(rng, &palette, &target.color, "color")?;
                debug!(index, from = %target.color, to = %color, "recoloring object");
                replace_object(base, index, |o| PlacedObject {
                    color,
                    ..o.clone()
                })
            }
            ChangeType::Material => {
                let index = self.pick_index(base, change, rng)?;
                let target = &base[index];
                let material = pick_other(
                    rng,
                    &self.catalog.material_names(),
                    &target.material,
                    "material",
                )?;
                debug!(index, from = %target.material, to = %material, "changing material");
                replace_object(base, index, |o| PlacedObject {
                    material,
                    ..o.clone()
                })
            }
            ChangeType::Shape | ChangeType::Switch | ChangeType::Random => {
                return Err(MutationError::Unsupported(change).into())
            }
        };
        Ok(objects)
    }

    fn pick_index(
        &self,
        base: &[PlacedObject],
        change: ChangeType,
        rng: &mut Pcg32,
    ) -> Result<usize, MutationError> {
        rng.next_index(base.len())
            .ok_or(MutationError::EmptyScene(change))
    }

    /// Colors an object of `shape` may take.
    fn palette_for(&self, shape: &str) -> Vec<&str> {
        match self.combos.and_then(|c| c.get(shape)) {
            Some(allowed) => allowed.iter().map(String::as_str).collect(),
            None => self.catalog.color_names(),
        }
    }

    /// Sample a new object and search a position that keeps every
    /// spacing and margin constraint against the base objects.
    fn add_object(
        &self,
        base: &[PlacedObject],
        directions: &DirectionSet,
        rng: &mut Pcg32,
    ) -> GenResult<Vec<PlacedObject>> {
        let others = footprints(base, self.catalog)?;
        let (size, size_radius) = sample_size(rng, self.catalog)?;
        let (x, y) = find_position(rng, size_radius, &others, directions, &self.constraints)
            .ok_or(MutationError::Infeasible {
                attempts: self.constraints.max_retries,
            })?;
        let (shape, color) = sample_shape_and_color(rng, self.catalog, self.combos)?;
        let radius = self.catalog.adjust_radius(&shape, size_radius);
        let rotation = sample_rotation(rng);
        let material = sample_material(rng, self.catalog)?;
        debug!(%shape, %color, x, y, "adding object");

        let mut objects = base.to_vec();
        objects.push(PlacedObject {
            shape,
            size: size.to_string(),
            material,
            position: [x, y, radius],
            rotation,
            pixel_coords: None,
            color,
        });
        Ok(objects)
    }
}

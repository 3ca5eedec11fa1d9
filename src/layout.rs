//! Randomized object placement for a base scene.
//!
//! Objects are placed one at a time. Each gets up to `max_retries`
//! candidate positions; if one runs out, the whole scene is thrown
//! away and placement starts again from the first object. A placed
//! scene must also pass the shadeless visibility check. Both kinds of
//! restart draw from the same `max_scene_attempts` budget.

use tracing::{debug, trace};

use crate::collision::{check_candidate, Footprint};
use crate::error::{GenError, GenResult};
use crate::prng::Pcg32;
use crate::renderer::{RenderSession, Renderer};
use crate::types::{
    DirectionSet, PlacedObject, PlacementConstraints, PropertyCatalog, ShapeColorCombos,
};
use crate::visibility::check_visibility;

fn empty(what: &str) -> GenError {
    GenError::Catalog(format!("no {what} to choose from"))
}

/// Choose a size name and its radius multiplier.
pub(crate) fn sample_size<'c>(
    rng: &mut Pcg32,
    catalog: &'c PropertyCatalog,
) -> GenResult<(&'c str, f64)> {
    let sizes: Vec<(&String, &f64)> = catalog.sizes.iter().collect();
    let (name, r) = *rng.choose(&sizes).ok_or_else(|| empty("sizes"))?;
    Ok((name.as_str(), *r))
}

/// Choose a shape and a color, honoring the shape/color table if any.
pub(crate) fn sample_shape_and_color(
    rng: &mut Pcg32,
    catalog: &PropertyCatalog,
    combos: Option<&ShapeColorCombos>,
) -> GenResult<(String, String)> {
    match combos {
        None => {
            let shape = *rng.choose(&catalog.shape_names()).ok_or_else(|| empty("shapes"))?;
            let color = *rng.choose(&catalog.color_names()).ok_or_else(|| empty("colors"))?;
            Ok((shape.to_string(), color.to_string()))
        }
        Some(table) => {
            let entries: Vec<(&String, &Vec<String>)> = table.iter().collect();
            let (shape, colors) = *rng.choose(&entries).ok_or_else(|| empty("shapes"))?;
            let color = rng.choose(colors.as_slice()).ok_or_else(|| empty("colors"))?;
            Ok((shape.to_string(), color.clone()))
        }
    }
}

pub(crate) fn sample_material(rng: &mut Pcg32, catalog: &PropertyCatalog) -> GenResult<String> {
    let material = rng
        .choose(&catalog.material_names())
        .copied()
        .ok_or_else(|| empty("materials"))?;
    Ok(material.to_string())
}

pub(crate) fn sample_rotation(rng: &mut Pcg32) -> f64 {
    360.0 * rng.next_float()
}

/// Search for a position whose disc of `radius` satisfies the spacing
/// and margin constraints against `others`. `None` after
/// `max_retries` candidates.
pub(crate) fn find_position(
    rng: &mut Pcg32,
    radius: f64,
    others: &[Footprint],
    directions: &DirectionSet,
    constraints: &PlacementConstraints,
) -> Option<(f64, f64)> {
    let extent = constraints.placement_extent;
    for attempt in 0..constraints.max_retries {
        let x = rng.uniform(-extent, extent);
        let y = rng.uniform(-extent, extent);
        let candidate = Footprint { x, y, radius };
        match check_candidate(&candidate, others, directions, constraints) {
            Ok(()) => return Some((x, y)),
            Err(rejection) => trace!(attempt, %rejection, "candidate rejected"),
        }
    }
    None
}

/// Places objects for base scenes.
pub struct SceneLayoutPlanner<'a> {
    pub catalog: &'a PropertyCatalog,
    pub combos: Option<&'a ShapeColorCombos>,
    pub constraints: PlacementConstraints,
}

impl<'a> SceneLayoutPlanner<'a> {
    pub fn new(
        catalog: &'a PropertyCatalog,
        combos: Option<&'a ShapeColorCombos>,
        constraints: PlacementConstraints,
    ) -> Self {
        SceneLayoutPlanner {
            catalog,
            combos,
            constraints,
        }
    }

    /// One scene attempt. `Ok(None)` when some object ran out of
    /// candidate positions.
    pub fn sample_scene(
        &self,
        rng: &mut Pcg32,
        num_objects: u32,
        directions: &DirectionSet,
    ) -> GenResult<Option<Vec<PlacedObject>>> {
        let mut placed: Vec<Footprint> = Vec::with_capacity(num_objects as usize);
        let mut objects = Vec::with_capacity(num_objects as usize);
        for i in 0..num_objects {
            let (size, size_radius) = sample_size(rng, self.catalog)?;
            let Some((x, y)) =
                find_position(rng, size_radius, &placed, directions, &self.constraints)
            else {
                debug!(object = i, retries = self.constraints.max_retries, "object placement failed");
                return Ok(None);
            };
            let (shape, color) = sample_shape_and_color(rng, self.catalog, self.combos)?;
            let radius = self.catalog.adjust_radius(&shape, size_radius);
            let rotation = sample_rotation(rng);
            let material = sample_material(rng, self.catalog)?;

            placed.push(Footprint { x, y, radius });
            objects.push(PlacedObject {
                shape,
                size: size.to_string(),
                material,
                position: [x, y, radius],
                rotation,
                pixel_coords: None,
                color,
            });
        }
        Ok(Some(objects))
    }

    /// Geometry-only planning with bounded scene restarts.
    pub fn plan(
        &self,
        rng: &mut Pcg32,
        num_objects: u32,
        directions: &DirectionSet,
    ) -> GenResult<Vec<PlacedObject>> {
        for _ in 0..self.constraints.max_scene_attempts {
            if let Some(objects) = self.sample_scene(rng, num_objects, directions)? {
                return Ok(objects);
            }
        }
        Err(GenError::PlacementExhausted {
            attempts: self.constraints.max_scene_attempts,
        })
    }

    /// Place, instantiate and visibility-check a full scene.
    ///
    /// On success the session holds the scene's objects and the
    /// returned objects carry pixel coordinates.
    pub fn place<R: Renderer + ?Sized>(
        &self,
        session: &mut RenderSession<'_, R>,
        rng: &mut Pcg32,
        num_objects: u32,
        directions: &DirectionSet,
        min_pixels: u32,
    ) -> GenResult<Vec<PlacedObject>> {
        for attempt in 1..=self.constraints.max_scene_attempts {
            let Some(objects) = self.sample_scene(rng, num_objects, directions)? else {
                continue;
            };
            let realized = session.realize(&objects, self.catalog)?;
            let report = check_visibility(session, rng, min_pixels)?;
            if report.passes() {
                debug!(attempt, objects = realized.len(), "base layout placed");
                return Ok(realized);
            }
            debug!(attempt, failing = report.failing(), "objects occluded, replacing scene");
            session.clear_objects()?;
        }
        Err(GenError::PlacementExhausted {
            attempts: self.constraints.max_scene_attempts,
        })
    }
}

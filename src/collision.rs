//! Spacing and margin checks between objects on the ground plane.
//!
//! Objects are treated as discs. A candidate is valid when its disc
//! keeps `min_dist` clearance to every other disc and, along each
//! horizontal direction, its signed offset from every other center is
//! either <= 0 or >= `margin`.

use thiserror::Error;

use crate::error::GenResult;
use crate::types::{Direction, DirectionSet, PlacedObject, PlacementConstraints, PropertyCatalog};

/// Disc footprint of an object on the ground plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

/// Why a candidate position was refused. Retryable by resampling.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Rejection {
    #[error("clearance {gap:.3} to object {other} is below the minimum distance")]
    TooClose { other: usize, gap: f64 },

    #[error("{direction} offset {offset:.3} to object {other} is inside the margin zone")]
    AmbiguousMargin {
        other: usize,
        direction: Direction,
        offset: f64,
    },
}

/// Clearance between two discs (negative when they overlap).
pub fn clearance(a: &Footprint, b: &Footprint) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt() - a.radius - b.radius
}

/// Offset of `a` relative to `b` along a ground-plane direction.
pub fn signed_margin(a: &Footprint, b: &Footprint, direction: [f64; 3]) -> f64 {
    (a.x - b.x) * direction[0] + (a.y - b.y) * direction[1]
}

/// Check a candidate footprint against every already placed footprint.
pub fn check_candidate(
    candidate: &Footprint,
    others: &[Footprint],
    directions: &DirectionSet,
    constraints: &PlacementConstraints,
) -> Result<(), Rejection> {
    for (i, other) in others.iter().enumerate() {
        let gap = clearance(candidate, other);
        if gap < constraints.min_dist {
            return Err(Rejection::TooClose { other: i, gap });
        }
        for direction in Direction::HORIZONTAL {
            let offset = signed_margin(candidate, other, directions.get(direction));
            if 0.0 < offset && offset < constraints.margin {
                return Err(Rejection::AmbiguousMargin {
                    other: i,
                    direction,
                    offset,
                });
            }
        }
    }
    Ok(())
}

pub fn footprint(object: &PlacedObject, catalog: &PropertyCatalog) -> GenResult<Footprint> {
    let (x, y) = object.planar();
    Ok(Footprint {
        x,
        y,
        radius: catalog.effective_radius(object)?,
    })
}

pub fn footprints(objects: &[PlacedObject], catalog: &PropertyCatalog) -> GenResult<Vec<Footprint>> {
    objects.iter().map(|o| footprint(o, catalog)).collect()
}

/// First pair `(i, j)` with `i < j` that breaks a constraint.
pub fn find_violation(
    placed: &[Footprint],
    directions: &DirectionSet,
    constraints: &PlacementConstraints,
) -> Option<(usize, usize, Rejection)> {
    for j in 1..placed.len() {
        if let Err(rejection) = check_candidate(&placed[j], &placed[..j], directions, constraints) {
            let i = match rejection {
                Rejection::TooClose { other, .. } | Rejection::AmbiguousMargin { other, .. } => other,
            };
            return Some((i, j, rejection));
        }
    }
    None
}

//! Semantic directions derived from the camera orientation.
//!
//! "behind" is the camera's viewing direction and "left" its negative
//! x axis, both flattened onto the ground plane; "above" is the ground
//! normal on the camera's up side.

use crate::error::DirectionError;
use crate::types::{DirectionSet, Vec3};

const GROUND_NORMAL: Vec3 = [0.0, 0.0, 1.0];
const DEGENERATE_EPS: f64 = 1e-9;

pub(crate) fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(v: Vec3, s: f64) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

fn neg(v: Vec3) -> Vec3 {
    scale(v, -1.0)
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalized(v: Vec3) -> Option<Vec3> {
    let len = dot(v, v).sqrt();
    if len < DEGENERATE_EPS {
        None
    } else {
        Some(scale(v, 1.0 / len))
    }
}

/// Component of `v` along `n`.
fn project(v: Vec3, n: Vec3) -> Vec3 {
    scale(n, dot(v, n) / dot(n, n))
}

/// World-space camera axes: the images of the camera's local -Z
/// (`behind`), -X (`left`) and +Y (`up`) vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraAxes {
    pub behind: Vec3,
    pub left: Vec3,
    pub up: Vec3,
}

impl CameraAxes {
    /// Axes of a camera at `eye` aimed at `target` with world +Z up.
    pub fn looking_at(eye: Vec3, target: Vec3) -> Result<Self, DirectionError> {
        let forward =
            normalized(sub(target, eye)).ok_or(DirectionError::Degenerate { axis: "view" })?;
        let right = normalized(cross(forward, GROUND_NORMAL))
            .ok_or(DirectionError::Degenerate { axis: "view" })?;
        Ok(CameraAxes {
            behind: forward,
            left: neg(right),
            up: cross(right, forward),
        })
    }
}

impl DirectionSet {
    /// Project camera axes onto the ground plane.
    pub fn from_camera(axes: &CameraAxes) -> Result<Self, DirectionError> {
        let behind = normalized(sub(axes.behind, project(axes.behind, GROUND_NORMAL)))
            .ok_or(DirectionError::Degenerate { axis: "behind" })?;
        let left = normalized(sub(axes.left, project(axes.left, GROUND_NORMAL)))
            .ok_or(DirectionError::Degenerate { axis: "left" })?;
        let above = normalized(project(axes.up, GROUND_NORMAL))
            .ok_or(DirectionError::Degenerate { axis: "up" })?;
        Ok(DirectionSet {
            behind,
            front: neg(behind),
            left,
            right: neg(left),
            above,
            below: neg(above),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (0..3).all(|k| (a[k] - b[k]).abs() < 1e-9)
    }

    #[test]
    fn axis_aligned_camera() {
        // Camera at -Y looking toward +Y, tilted down.
        let axes = CameraAxes::looking_at([0.0, -10.0, 5.0], [0.0, 0.0, 0.0]).unwrap();
        let dirs = DirectionSet::from_camera(&axes).unwrap();
        assert!(approx(dirs.behind, [0.0, 1.0, 0.0]));
        assert!(approx(dirs.front, [0.0, -1.0, 0.0]));
        assert!(approx(dirs.left, [-1.0, 0.0, 0.0]));
        assert!(approx(dirs.right, [1.0, 0.0, 0.0]));
        assert!(approx(dirs.above, [0.0, 0.0, 1.0]));
        assert!(approx(dirs.below, [0.0, 0.0, -1.0]));
    }

    #[test]
    fn oblique_camera_is_orthonormal_and_flat() {
        let axes = CameraAxes::looking_at([7.36, -6.93, 4.96], [0.0, 0.0, 0.0]).unwrap();
        let dirs = DirectionSet::from_camera(&axes).unwrap();
        for d in Direction::HORIZONTAL {
            let v = dirs.get(d);
            assert_eq!(v[2], 0.0, "{d} must lie in the ground plane");
            assert!((dot(v, v) - 1.0).abs() < 1e-9);
        }
        assert!(dot(dirs.behind, dirs.left).abs() < 1e-9);
        assert!(dot(dirs.behind, dirs.above).abs() < 1e-9);
        assert!(approx(dirs.front, neg(dirs.behind)));
        assert!(approx(dirs.right, neg(dirs.left)));
    }

    #[test]
    fn straight_down_camera_is_degenerate() {
        let axes = CameraAxes {
            behind: [0.0, 0.0, -1.0],
            left: [-1.0, 0.0, 0.0],
            up: [0.0, 1.0, 0.0],
        };
        assert_eq!(
            DirectionSet::from_camera(&axes),
            Err(DirectionError::Degenerate { axis: "behind" })
        );
    }
}

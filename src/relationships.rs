//! Pairwise spatial relationships along the horizontal directions.

use crate::directions::{dot, sub};
use crate::types::{Direction, DirectionSet, PlacedObject, RelationshipGraph};

/// Object `j` is listed in `graph[dir][i]` when it lies more than
/// `epsilon` beyond object `i` along `dir`.
pub fn compute_relationships(
    objects: &[PlacedObject],
    directions: &DirectionSet,
    epsilon: f64,
) -> RelationshipGraph {
    let mut graph = RelationshipGraph::default();
    for direction in Direction::HORIZONTAL {
        let axis = directions.get(direction);
        let related: Vec<Vec<usize>> = objects
            .iter()
            .enumerate()
            .map(|(i, a)| {
                objects
                    .iter()
                    .enumerate()
                    .filter(|(j, b)| *j != i && dot(sub(b.position, a.position), axis) > epsilon)
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();
        if let Some(slot) = graph.get_mut(direction) {
            *slot = related;
        }
    }
    graph
}

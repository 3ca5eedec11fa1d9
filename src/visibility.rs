//! Per-object visibility check through a shadeless render.
//!
//! Every object gets a distinct flat color, lights and ground are hidden,
//! and the resulting image is tallied by exact RGBA value. A scene passes
//! when the image holds exactly one color per object plus the background
//! and every color covers at least `min_pixels` pixels.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use tracing::debug;

use crate::error::{GenError, GenResult};
use crate::prng::Pcg32;
use crate::renderer::{PixelBuffer, RenderMode, RenderSession, Renderer};
use crate::types::Rgba;

/// Pixels per rayon work item when tallying colors.
const TALLY_CHUNK: usize = 4096;

pub type ColorKey = [u32; 4];

fn color_key(px: &Rgba) -> ColorKey {
    [
        px[0].to_bits(),
        px[1].to_bits(),
        px[2].to_bits(),
        px[3].to_bits(),
    ]
}

/// Count pixels per distinct RGBA value.
pub fn count_colors(buffer: &PixelBuffer) -> HashMap<ColorKey, u32> {
    buffer
        .pixels
        .par_chunks(TALLY_CHUNK)
        .fold(HashMap::new, |mut acc, chunk| {
            for px in chunk {
                *acc.entry(color_key(px)).or_insert(0u32) += 1;
            }
            acc
        })
        .reduce(HashMap::new, |mut a, b| {
            for (k, v) in b {
                *a.entry(k).or_insert(0) += v;
            }
            a
        })
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityReport {
    pub objects: usize,
    pub distinct_colors: usize,
    /// Pixel counts per distinct color, largest first.
    pub counts: Vec<u32>,
    pub min_pixels: u32,
}

impl VisibilityReport {
    pub fn from_counts(counts: &HashMap<ColorKey, u32>, objects: usize, min_pixels: u32) -> Self {
        let mut sorted: Vec<u32> = counts.values().copied().collect();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        VisibilityReport {
            objects,
            distinct_colors: sorted.len(),
            counts: sorted,
            min_pixels,
        }
    }

    /// Colors below threshold plus colors missing from the image.
    pub fn failing(&self) -> usize {
        let thin = self.counts.iter().filter(|c| **c < self.min_pixels).count();
        thin + (self.objects + 1).saturating_sub(self.distinct_colors)
    }

    pub fn passes(&self) -> bool {
        self.distinct_colors == self.objects + 1
            && self.counts.iter().all(|c| *c >= self.min_pixels)
    }

    pub fn into_result(self) -> GenResult<()> {
        if self.passes() {
            return Ok(());
        }
        Err(GenError::VisibilityFailed {
            objects: self.objects,
            colors: self.distinct_colors,
            failing: self.failing(),
            min_pixels: self.min_pixels,
        })
    }
}

/// `n` distinct random flat colors.
pub fn sample_flat_colors(rng: &mut Pcg32, n: usize) -> Vec<[f32; 3]> {
    let mut seen = HashSet::with_capacity(n);
    let mut colors = Vec::with_capacity(n);
    while colors.len() < n {
        let rgb = [
            rng.next_float() as f32,
            rng.next_float() as f32,
            rng.next_float() as f32,
        ];
        if seen.insert(rgb.map(f32::to_bits)) {
            colors.push(rgb);
        }
    }
    colors
}

/// Run the shadeless pass over every object of the session.
///
/// The renderer's shadeless state is always exited again, whether the
/// render succeeded, failed, or was retried.
pub fn check_visibility<R: Renderer + ?Sized>(
    session: &mut RenderSession<'_, R>,
    rng: &mut Pcg32,
    min_pixels: u32,
) -> GenResult<VisibilityReport> {
    let handles = session.handles().to_vec();
    let colors = sample_flat_colors(rng, handles.len());
    let overrides: Vec<_> = handles.into_iter().zip(colors).collect();

    let scratch = tempfile::Builder::new()
        .prefix("shadeless")
        .suffix(".png")
        .tempfile()
        .map_err(|e| GenError::io(std::env::temp_dir(), e))?;

    let rendered = session
        .renderer_mut()
        .enter_shadeless(&overrides)
        .map_err(GenError::from)
        .and_then(|()| session.render(scratch.path(), RenderMode::Shadeless));
    let restored = session.renderer_mut().exit_shadeless();
    let buffer = rendered?;
    restored?;

    let report = VisibilityReport::from_counts(&count_colors(&buffer), overrides.len(), min_pixels);
    debug!(
        objects = report.objects,
        colors = report.distinct_colors,
        passes = report.passes(),
        "shadeless visibility pass"
    );
    Ok(report)
}

/// True when every object in the session is visible enough.
pub fn verify<R: Renderer + ?Sized>(
    session: &mut RenderSession<'_, R>,
    rng: &mut Pcg32,
    min_pixels: u32,
) -> GenResult<bool> {
    Ok(check_visibility(session, rng, min_pixels)?.passes())
}

//! Post-processing of generated change captions: collecting the
//! per-worker question files, merging per-task caption maps, and
//! splitting image indices into train/val/test.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GenError, GenResult};
use crate::prng::Pcg32;

/// Image file name → caption texts.
pub type CaptionMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionQuestion {
    pub split: String,
    pub image_filename: String,
    pub question: String,
}

/// One question file written by a caption worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionFile {
    pub questions: Vec<CaptionQuestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<u32>,
    pub val: Vec<u32>,
    pub test: Vec<u32>,
}

/// Group caption texts by image. All questions must share one split.
pub fn collect_captions(files: &[CaptionFile]) -> GenResult<CaptionMap> {
    let mut split: Option<&str> = None;
    let mut captions = CaptionMap::new();
    for question in files.iter().flat_map(|f| &f.questions) {
        match split {
            Some(s) if s != question.split => {
                return Err(GenError::Captions(format!(
                    "captions from multiple splits: '{s}' and '{}'",
                    question.split
                )))
            }
            Some(_) => {}
            None => split = Some(question.split.as_str()),
        }
        captions
            .entry(question.image_filename.clone())
            .or_default()
            .push(question.question.clone());
    }
    Ok(captions)
}

/// Union of caption maps; an image present in two maps is an error.
pub fn merge_captions(maps: impl IntoIterator<Item = CaptionMap>) -> GenResult<CaptionMap> {
    let mut merged = CaptionMap::new();
    for map in maps {
        for (image, texts) in map {
            if merged.contains_key(&image) {
                return Err(GenError::Captions(format!("overlapping key '{image}'")));
            }
            merged.insert(image, texts);
        }
    }
    Ok(merged)
}

/// Numeric index of an image name such as `CLEVR_default_000123.png`.
pub fn image_index(filename: &str) -> GenResult<u32> {
    let stem = filename.split('.').next().unwrap_or(filename);
    let digits = stem.rsplit('_').next().unwrap_or(stem);
    digits
        .parse()
        .map_err(|_| GenError::Captions(format!("no image index in '{filename}'")))
}

fn shuffle<T>(rng: &mut Pcg32, items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = rng.next_int(0, i as u32) as usize;
        items.swap(i, j);
    }
}

/// Shuffle the image indices with a seeded generator and cut them 90% /
/// 5% / remainder.
pub fn split_indices(captions: &CaptionMap, seed: u64) -> GenResult<SplitIndices> {
    let mut indices = captions
        .keys()
        .map(|name| image_index(name))
        .collect::<GenResult<Vec<u32>>>()?;
    let total = indices.len();
    let train_len = total * 9 / 10;
    let val_len = total / 20;

    shuffle(&mut Pcg32::new(seed, 0), &mut indices);
    let test = indices.split_off(train_len + val_len);
    let val = indices.split_off(train_len);
    info!(
        train = indices.len(),
        val = val.len(),
        test = test.len(),
        "split image indices"
    );
    Ok(SplitIndices {
        train: indices,
        val,
        test,
    })
}

fn json_files(dir: &Path) -> GenResult<Vec<PathBuf>> {
    let mut files = std::fs::read_dir(dir)
        .map_err(|e| GenError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()).map_err(|e| GenError::io(dir, e)))
        .collect::<GenResult<Vec<PathBuf>>>()?;
    files.retain(|p| p.extension().is_some_and(|ext| ext == "json"));
    files.sort();
    Ok(files)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> GenResult<T> {
    let text = std::fs::read_to_string(path).map_err(|e| GenError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// `collect_captions` over every `.json` question file in `dir`.
pub fn collect_captions_dir(dir: &Path) -> GenResult<CaptionMap> {
    let files = json_files(dir)?
        .iter()
        .map(|p| read_json::<CaptionFile>(p))
        .collect::<GenResult<Vec<_>>>()?;
    let captions = collect_captions(&files)?;
    info!(files = files.len(), images = captions.len(), "collected captions");
    Ok(captions)
}

/// `merge_captions` over every `.json` caption map in `dir`.
pub fn merge_captions_dir(dir: &Path) -> GenResult<CaptionMap> {
    let maps = json_files(dir)?
        .iter()
        .map(|p| read_json::<CaptionMap>(p))
        .collect::<GenResult<Vec<_>>>()?;
    merge_captions(maps)
}

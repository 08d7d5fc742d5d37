use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::{
    error::ComposerResult,
    model::{CompositeJob, SourceMode},
};

/// Case-folded composite key -> source file path. Sorted, so resolution and
/// per-key processing order is reproducible run-to-run.
pub type KeyMap = BTreeMap<String, PathBuf>;

/// Per-layer key maps for one run, resolved against the parent's key set.
#[derive(Debug)]
pub struct ResolvedLayers {
    /// The Parent layer's authoritative exact map.
    pub parent: KeyMap,
    /// One map per layer, in layer order (the parent's own entry is a copy
    /// of `parent`).
    pub mains: Vec<KeyMap>,
    /// One entry per layer: the alpha-override candidate map for layers with
    /// `use_alpha`, `None` otherwise. Child-mode maps are fuzzy and are
    /// resolved per key at pipeline time.
    pub alphas: Vec<Option<KeyMap>>,
}

fn is_image_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png")
    )
}

fn folded_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// Recursively scans `folder` for images whose stem ends with `suffix`
/// (case-folded) and keys them by the stem with the suffix trimmed.
///
/// An empty suffix yields an empty map by contract: an absent constant never
/// matches anything. Key collisions resolve last-write-wins in walk order.
pub fn build_exact_map(folder: &Path, suffix: &str) -> KeyMap {
    let suffix = suffix.to_lowercase();
    let mut map = KeyMap::new();
    if suffix.is_empty() {
        return map;
    }
    for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !is_image_file(entry.path()) {
            continue;
        }
        let Some(stem) = folded_stem(entry.path()) else {
            continue;
        };
        if let Some(key) = stem.strip_suffix(&suffix) {
            map.insert(key.to_string(), entry.into_path());
        }
    }
    map
}

/// Same scan as [`build_exact_map`], but every image contributes a key: the
/// suffix-trimmed stem when the suffix matches, the full stem otherwise.
/// This is the candidate pool for child-layer fuzzy matching.
pub fn build_fuzzy_map(folder: &Path, suffix: &str) -> KeyMap {
    let suffix = suffix.to_lowercase();
    let mut map = KeyMap::new();
    for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !is_image_file(entry.path()) {
            continue;
        }
        let Some(stem) = folded_stem(entry.path()) else {
            continue;
        };
        let key = match stem.strip_suffix(&suffix) {
            Some(trimmed) if !suffix.is_empty() => trimmed.to_string(),
            _ => stem,
        };
        map.insert(key, entry.into_path());
    }
    map
}

/// The entry whose key is the longest substring of `parent_key`, or `None`
/// when no key qualifies.
///
/// Tie-break: among equal-length candidates the lexicographically smallest
/// key wins (sorted iteration plus a strictly-greater length comparison).
pub fn find_best_match<'a>(parent_key: &str, fuzzy: &'a KeyMap) -> Option<&'a Path> {
    let mut best: Option<&Path> = None;
    let mut best_len = 0usize;
    for (key, path) in fuzzy {
        if key.len() > best_len && parent_key.contains(key.as_str()) {
            best = Some(path);
            best_len = key.len();
        }
    }
    best
}

/// Builds all per-layer key maps for a job. Assumes the job already passed
/// `validate()` (exactly one Parent layer).
#[tracing::instrument(skip(job), fields(layers = job.layers.len()))]
pub fn resolve_layers(job: &CompositeJob, source_root: &Path) -> ComposerResult<ResolvedLayers> {
    let parent_spec = job.parent_layer()?;
    let parent = build_exact_map(source_root, &parent_spec.main_constant);
    tracing::debug!(keys = parent.len(), "parent map built");

    let mut mains = Vec::with_capacity(job.layers.len());
    for layer in &job.layers {
        let map = match layer.main_mode {
            SourceMode::Parent => parent.clone(),
            SourceMode::Exact => build_exact_map(source_root, &layer.main_constant),
            SourceMode::Child => {
                let fuzzy = build_fuzzy_map(source_root, &layer.main_constant);
                let mut map = KeyMap::new();
                for pkey in parent.keys() {
                    if let Some(path) = find_best_match(pkey, &fuzzy) {
                        map.insert(pkey.clone(), path.to_path_buf());
                    }
                }
                map
            }
        };
        mains.push(map);
    }

    let mut alphas = Vec::with_capacity(job.layers.len());
    for layer in &job.layers {
        if !layer.use_alpha {
            alphas.push(None);
            continue;
        }
        let map = match layer.alpha_mode {
            SourceMode::Parent | SourceMode::Exact => {
                build_exact_map(source_root, &layer.alpha_constant)
            }
            SourceMode::Child => build_fuzzy_map(source_root, &layer.alpha_constant),
        };
        alphas.push(Some(map));
    }

    Ok(ResolvedLayers {
        parent,
        mains,
        alphas,
    })
}

/// Keys present in the parent map and in every layer's resolved map; only
/// these proceed to composition. Returned sorted.
pub fn common_keys(resolved: &ResolvedLayers) -> Vec<String> {
    resolved
        .parent
        .keys()
        .filter(|k| resolved.mains.iter().all(|m| m.contains_key(*k)))
        .cloned()
        .collect()
}

//! Per-layer pipeline: turns one (layer, key) pair into a fully transformed
//! RGBA canvas at the job's target size.
//!
//! Step order is fixed: load, resize, transforms, main opacity, alpha
//! override, gamma.

use std::path::Path;

use anyhow::Context as _;
use image::RgbaImage;

use crate::{
    error::ComposerResult,
    handle::JobHandle,
    model::{CompositeJob, LayerSpec, SourceMode},
    ops_cpu,
    resolver::{self, KeyMap},
    transform::applicable_transforms,
};

pub fn prepare_layer(
    job: &CompositeJob,
    layer: &LayerSpec,
    key: &str,
    main_path: &Path,
    alpha_map: Option<&KeyMap>,
    handle: &JobHandle,
) -> ComposerResult<RgbaImage> {
    handle.log(format!("  Layer '{}' main image: {}", layer.name, main_path.display()));

    let decoded = image::open(main_path)
        .with_context(|| format!("open layer image '{}'", main_path.display()))?;
    let mut img = decoded.to_rgba8();

    if img.dimensions() != (job.target_width, job.target_height) {
        img = ops_cpu::resize_to(img, job.target_width, job.target_height);
        handle.log(format!(
            "    Resized to {}x{}.",
            job.target_width, job.target_height
        ));
    }

    let actions = applicable_transforms(&layer.transformations, &layer.name);
    for action in &actions {
        img = ops_cpu::apply_transform(&img, *action);
    }
    if !actions.is_empty() {
        handle.log(format!("    Applied {} transformation(s).", actions.len()));
    }

    ops_cpu::apply_opacity(&mut img, layer.main_opacity);

    if layer.use_alpha {
        apply_alpha_override(job, layer, key, alpha_map, &mut img, handle)?;
    }

    ops_cpu::adjust_gamma(&mut img, layer.gamma);
    if layer.gamma != 1.0 {
        handle.log(format!("    Applied gamma correction: {}.", layer.gamma));
    }

    Ok(img)
}

/// Resolves and applies the layer's alpha-override mask. A key with no
/// resolvable override keeps the main image's own alpha; that is expected,
/// not an error.
fn apply_alpha_override(
    job: &CompositeJob,
    layer: &LayerSpec,
    key: &str,
    alpha_map: Option<&KeyMap>,
    img: &mut RgbaImage,
    handle: &JobHandle,
) -> ComposerResult<()> {
    let Some(map) = alpha_map else {
        return Ok(());
    };
    let override_path = match layer.alpha_mode {
        SourceMode::Child => resolver::find_best_match(key, map),
        SourceMode::Parent | SourceMode::Exact => map.get(key).map(|p| p.as_path()),
    };
    let Some(path) = override_path else {
        handle.log("    No alpha override image found; using main alpha.".to_string());
        return Ok(());
    };

    handle.log(format!("    Alpha override image: {}", path.display()));
    let mask = image::open(path)
        .with_context(|| format!("open alpha override '{}'", path.display()))?
        .to_luma8();
    let mask = ops_cpu::resize_mask_to(mask, job.target_width, job.target_height);
    ops_cpu::replace_alpha(img, &mask, layer.alpha_opacity);
    Ok(())
}

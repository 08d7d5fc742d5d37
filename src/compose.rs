//! Composite orchestrator: drives a whole [`CompositeJob`] to completion,
//! one output file per common key, with per-key fault isolation and a
//! cooperative stop check at each key boundary.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{self, CompressionType, PngEncoder},
    },
    DynamicImage, RgbaImage,
};

use crate::{
    blend_cpu,
    error::{ComposerError, ComposerResult},
    handle::JobHandle,
    model::{CompositeJob, OutputFormat},
    pipeline,
    resolver::{self, ResolvedLayers},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every common key was attempted.
    Completed,
    /// The Parent layer matched no files at all; nothing written.
    NoParentImages,
    /// Layers resolved but share no keys; nothing written.
    NoCommonKeys,
    /// Stop was requested; the in-flight key finished, the rest were skipped.
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Size of the common-key set.
    pub keys_total: usize,
    pub written: usize,
    pub failed: usize,
}

/// Runs a whole job. Emits log events through `handle` and exactly one
/// terminal event (`Finished` on any clean outcome, `Failed` on job-level
/// errors) before returning.
pub fn run(
    job: &CompositeJob,
    source_root: &Path,
    export_root: &Path,
    handle: &JobHandle,
) -> ComposerResult<RunSummary> {
    match run_inner(job, source_root, export_root, handle) {
        Ok(summary) => {
            handle.finished(summary.clone());
            Ok(summary)
        }
        Err(err) => {
            handle.failed(err.to_string());
            Err(err)
        }
    }
}

#[tracing::instrument(skip_all, fields(layers = job.layers.len(), source = %source_root.display()))]
fn run_inner(
    job: &CompositeJob,
    source_root: &Path,
    export_root: &Path,
    handle: &JobHandle,
) -> ComposerResult<RunSummary> {
    job.validate()?;

    std::fs::create_dir_all(export_root)
        .with_context(|| format!("create export directory '{}'", export_root.display()))?;

    handle.log("Building layer maps...");
    let resolved = resolver::resolve_layers(job, source_root)?;

    let parent_spec = job.parent_layer()?;
    if resolved.parent.is_empty() {
        handle.log(format!(
            "No images found for parent layer '{}'.",
            parent_spec.name
        ));
        return Ok(RunSummary {
            outcome: RunOutcome::NoParentImages,
            keys_total: 0,
            written: 0,
            failed: 0,
        });
    }
    handle.log(format!(
        "Found {} parent image(s) from layer '{}'.",
        resolved.parent.len(),
        parent_spec.name
    ));
    handle.log(format!(
        "Parent keys: {}",
        resolved
            .parent
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let keys = resolver::common_keys(&resolved);
    handle.log(format!(
        "Processing composite for {} key(s) (intersection across all layers).",
        keys.len()
    ));
    if keys.is_empty() {
        handle.log("No composite entries found where all layers are available.");
        return Ok(RunSummary {
            outcome: RunOutcome::NoCommonKeys,
            keys_total: 0,
            written: 0,
            failed: 0,
        });
    }

    let mut written = 0usize;
    let mut failed = 0usize;
    let mut outcome = RunOutcome::Completed;

    for key in &keys {
        if handle.stop_requested() {
            handle.log("Processing stopped by user.");
            outcome = RunOutcome::Stopped;
            break;
        }
        handle.log(format!("Processing composite for key: '{key}'"));
        match process_key(job, &resolved, key, source_root, export_root, handle) {
            Ok(path) => {
                written += 1;
                handle.log(format!("Composite for key '{key}' saved to: {}", path.display()));
            }
            Err(err) => {
                failed += 1;
                tracing::warn!(%key, %err, "composite failed");
                handle.log(format!("Error processing key '{key}': {err}"));
            }
        }
    }

    handle.log(format!(
        "Done: {written} written, {failed} failed, output in '{}'.",
        export_root.display()
    ));
    Ok(RunSummary {
        outcome,
        keys_total: keys.len(),
        written,
        failed,
    })
}

/// One key end-to-end: fold every layer through the pipeline and the blend
/// engine, then encode. Any error here is isolated to this key.
fn process_key(
    job: &CompositeJob,
    resolved: &ResolvedLayers,
    key: &str,
    source_root: &Path,
    export_root: &Path,
    handle: &JobHandle,
) -> ComposerResult<PathBuf> {
    let mut composite: Option<RgbaImage> = None;

    for (idx, layer) in job.layers.iter().enumerate() {
        let main_path = resolved.mains[idx].get(key).ok_or_else(|| {
            ComposerError::resolve(format!(
                "missing main image for layer '{}' (key: {key})",
                layer.name
            ))
        })?;
        let img = pipeline::prepare_layer(
            job,
            layer,
            key,
            main_path,
            resolved.alphas[idx].as_ref(),
            handle,
        )?;
        composite = Some(match composite {
            None => img,
            Some(base) => blend_cpu::blend(&base, &img, layer.blend_mode)?,
        });
    }

    let composite = composite
        .ok_or_else(|| ComposerError::resolve(format!("no layers produced output for '{key}'")))?;

    let out_path = output_path(job, resolved, key, source_root, export_root)?;
    save_composite(job, &composite, &out_path)?;
    Ok(out_path)
}

fn output_path(
    job: &CompositeJob,
    resolved: &ResolvedLayers,
    key: &str,
    source_root: &Path,
    export_root: &Path,
) -> ComposerResult<PathBuf> {
    let mut stem = key.to_string();
    if let Some(suffix) = &job.suffix {
        stem.push_str(suffix);
    }
    let file_name = format!("{stem}.{}", job.output_format.extension());

    let dir = if job.preserve_structure {
        let parent_src = resolved.parent.get(key).ok_or_else(|| {
            ComposerError::resolve(format!("key '{key}' missing from parent map"))
        })?;
        let rel_dir = parent_src
            .parent()
            .and_then(|p| p.strip_prefix(source_root).ok())
            .unwrap_or_else(|| Path::new(""));
        let dir = export_root.join(rel_dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create output directory '{}'", dir.display()))?;
        dir
    } else {
        export_root.to_path_buf()
    };

    Ok(dir.join(file_name))
}

fn save_composite(job: &CompositeJob, composite: &RgbaImage, path: &Path) -> ComposerResult<()> {
    let file = File::create(path)
        .with_context(|| format!("create output file '{}'", path.display()))?;
    let w = BufWriter::new(file);

    match job.output_format {
        OutputFormat::Jpg => {
            // JPEG carries no alpha; drop it.
            let rgb = DynamicImage::ImageRgba8(composite.clone()).to_rgb8();
            let encoder = JpegEncoder::new_with_quality(w, job.quality);
            rgb.write_with_encoder(encoder)
                .map_err(|e| ComposerError::encode(format!("jpeg encode '{}': {e}", path.display())))?;
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                w,
                png_compression(job.quality),
                png::FilterType::Adaptive,
            );
            composite
                .write_with_encoder(encoder)
                .map_err(|e| ComposerError::encode(format!("png encode '{}': {e}", path.display())))?;
        }
    }
    Ok(())
}

/// Quality maps to a zlib-style level `clamp((100-quality)/10, 0, 9)`; the
/// `image` crate exposes tiers instead, so levels 0-3 map to Fast, 4-6 to
/// Default and 7-9 to Best.
fn png_compression(quality: u8) -> CompressionType {
    let level = ((100u32.saturating_sub(u32::from(quality))) / 10).min(9);
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

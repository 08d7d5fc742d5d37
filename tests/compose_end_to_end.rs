use std::path::{Path, PathBuf};

use lamina::{
    BlendMode, ComposerError, CompositeJob, JobEvent, JobHandle, LayerSpec, OutputFormat,
    RunOutcome, SourceMode,
};

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "lamina_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn write_solid(path: &Path, px: [u8; 4]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    image::RgbaImage::from_pixel(8, 8, image::Rgba(px))
        .save(path)
        .unwrap();
}

fn layer(name: &str, constant: &str, mode: SourceMode, blend: BlendMode) -> LayerSpec {
    LayerSpec {
        name: name.to_string(),
        main_constant: constant.to_string(),
        main_mode: mode,
        main_opacity: 1.0,
        use_alpha: false,
        alpha_constant: String::new(),
        alpha_mode: SourceMode::Child,
        alpha_opacity: 1.0,
        blend_mode: blend,
        gamma: 1.0,
        transformations: vec![],
    }
}

fn job(layers: Vec<LayerSpec>, format: OutputFormat) -> CompositeJob {
    CompositeJob {
        layers,
        target_width: 8,
        target_height: 8,
        output_format: format,
        quality: 80,
        suffix: Some("_composited".to_string()),
        preserve_structure: false,
    }
}

#[test]
fn normal_opaque_red_over_blue_is_red() {
    let src = temp_dir("e2e_red_over_blue_src");
    let out = temp_dir("e2e_red_over_blue_out");
    write_solid(&src.join("a_base.png"), [0, 0, 255, 255]);
    write_solid(&src.join("a_top.png"), [255, 0, 0, 255]);

    let job = job(
        vec![
            layer("base", "_base", SourceMode::Parent, BlendMode::Normal),
            layer("top", "_top", SourceMode::Child, BlendMode::Normal),
        ],
        OutputFormat::Png,
    );
    let (handle, _rx) = JobHandle::channel();
    let summary = lamina::run(&job, &src, &out, &handle).unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.written, 1);
    assert_eq!(summary.failed, 0);

    let result = image::open(out.join("a_composited.png")).unwrap().to_rgba8();
    assert_eq!(result.get_pixel(4, 4).0, [255, 0, 0, 255]);

    std::fs::remove_dir_all(&src).ok();
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn child_layer_gap_restricts_common_keys_without_errors() {
    let src = temp_dir("e2e_child_gap_src");
    let out = temp_dir("e2e_child_gap_out");
    // Parent yields keys {a, b}; the child only matches "a".
    write_solid(&src.join("a_base.png"), [10, 20, 30, 255]);
    write_solid(&src.join("b_base.png"), [10, 20, 30, 255]);
    write_solid(&src.join("a_top.png"), [200, 0, 0, 255]);

    let job = job(
        vec![
            layer("base", "_base", SourceMode::Parent, BlendMode::Normal),
            layer("top", "_top", SourceMode::Child, BlendMode::Normal),
        ],
        OutputFormat::Png,
    );
    let (handle, rx) = JobHandle::channel();
    let summary = lamina::run(&job, &src, &out, &handle).unwrap();
    drop(handle);

    assert_eq!(summary.keys_total, 1);
    assert_eq!(summary.written, 1);
    assert_eq!(summary.failed, 0);
    assert!(out.join("a_composited.png").exists());
    assert!(!out.join("b_composited.png").exists());
    // "b" never enters the loop, so no error line mentions it.
    for ev in rx.try_iter() {
        if let JobEvent::Log(line) = ev {
            assert!(!line.contains("Error processing key 'b'"), "unexpected: {line}");
        }
    }

    std::fs::remove_dir_all(&src).ok();
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn two_parent_layers_are_rejected_before_any_io() {
    let src = temp_dir("e2e_two_parents_src");
    let out = temp_dir("e2e_two_parents_out");
    write_solid(&src.join("a_base.png"), [0, 0, 0, 255]);

    let job = job(
        vec![
            layer("one", "_base", SourceMode::Parent, BlendMode::Normal),
            layer("two", "_base", SourceMode::Parent, BlendMode::Normal),
        ],
        OutputFormat::Png,
    );
    let (handle, rx) = JobHandle::channel();
    let err = lamina::run(&job, &src, &out, &handle).unwrap_err();
    drop(handle);

    assert!(matches!(err, ComposerError::Config(_)));
    // Rejected pre-flight: the export directory was never created.
    assert!(!out.exists());
    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert!(matches!(events.as_slice(), [JobEvent::Failed(_)]));

    std::fs::remove_dir_all(&src).ok();
}

#[test]
fn empty_intersection_ends_cleanly_with_no_files() {
    let src = temp_dir("e2e_empty_intersection_src");
    let out = temp_dir("e2e_empty_intersection_out");
    write_solid(&src.join("a_base.png"), [0, 0, 0, 255]);
    // Child layer has nothing that matches key "a".
    write_solid(&src.join("zzz_top.png"), [0, 0, 0, 255]);

    let job = job(
        vec![
            layer("base", "_base", SourceMode::Parent, BlendMode::Normal),
            layer("top", "_top", SourceMode::Child, BlendMode::Normal),
        ],
        OutputFormat::Png,
    );
    let (handle, _rx) = JobHandle::channel();
    let summary = lamina::run(&job, &src, &out, &handle).unwrap();

    assert_eq!(summary.outcome, RunOutcome::NoCommonKeys);
    assert_eq!(summary.written, 0);
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);

    std::fs::remove_dir_all(&src).ok();
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn stop_requested_before_first_key_writes_nothing() {
    let src = temp_dir("e2e_stop_src");
    let out = temp_dir("e2e_stop_out");
    write_solid(&src.join("a_base.png"), [0, 0, 0, 255]);

    let job = job(
        vec![layer("base", "_base", SourceMode::Parent, BlendMode::Normal)],
        OutputFormat::Png,
    );
    let (handle, _rx) = JobHandle::channel();
    handle.request_stop();
    let summary = lamina::run(&job, &src, &out, &handle).unwrap();

    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.written, 0);

    std::fs::remove_dir_all(&src).ok();
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn preserve_structure_mirrors_parent_subdirectory() {
    let src = temp_dir("e2e_structure_src");
    let out = temp_dir("e2e_structure_out");
    write_solid(&src.join("block-7").join("a_base.png"), [5, 5, 5, 255]);

    let mut job = job(
        vec![layer("base", "_base", SourceMode::Parent, BlendMode::Normal)],
        OutputFormat::Png,
    );
    job.preserve_structure = true;
    let (handle, _rx) = JobHandle::channel();
    let summary = lamina::run(&job, &src, &out, &handle).unwrap();

    assert_eq!(summary.written, 1);
    assert!(out.join("block-7").join("a_composited.png").exists());

    std::fs::remove_dir_all(&src).ok();
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn alpha_override_replaces_layer_alpha() {
    let src = temp_dir("e2e_alpha_src");
    let out = temp_dir("e2e_alpha_out");
    write_solid(&src.join("a_base.png"), [100, 100, 100, 255]);
    std::fs::create_dir_all(&src).unwrap();
    image::GrayImage::from_pixel(8, 8, image::Luma([128]))
        .save(src.join("a_mask.png"))
        .unwrap();

    let mut base = layer("base", "_base", SourceMode::Parent, BlendMode::Normal);
    base.use_alpha = true;
    base.alpha_mode = SourceMode::Exact;
    base.alpha_constant = "_mask".to_string();

    let job = job(vec![base], OutputFormat::Png);
    let (handle, _rx) = JobHandle::channel();
    lamina::run(&job, &src, &out, &handle).unwrap();

    let result = image::open(out.join("a_composited.png")).unwrap().to_rgba8();
    assert_eq!(result.get_pixel(2, 2).0[3], 128);

    std::fs::remove_dir_all(&src).ok();
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn jpg_output_drops_alpha_and_uses_extension() {
    let src = temp_dir("e2e_jpg_src");
    let out = temp_dir("e2e_jpg_out");
    write_solid(&src.join("a_base.png"), [255, 0, 0, 128]);

    let job = job(
        vec![layer("base", "_base", SourceMode::Parent, BlendMode::Normal)],
        OutputFormat::Jpg,
    );
    let (handle, _rx) = JobHandle::channel();
    lamina::run(&job, &src, &out, &handle).unwrap();

    let path = out.join("a_composited.jpg");
    assert!(path.exists());
    let decoded = image::open(&path).unwrap();
    assert_eq!(decoded.color(), image::ColorType::Rgb8);

    std::fs::remove_dir_all(&src).ok();
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn unreadable_layer_file_skips_only_that_key() {
    let src = temp_dir("e2e_bad_file_src");
    let out = temp_dir("e2e_bad_file_out");
    write_solid(&src.join("a_base.png"), [1, 2, 3, 255]);
    // "b" resolves but its bytes are not a decodable image.
    std::fs::write(src.join("b_base.png"), b"not a png").unwrap();

    let job = job(
        vec![layer("base", "_base", SourceMode::Parent, BlendMode::Normal)],
        OutputFormat::Png,
    );
    let (handle, rx) = JobHandle::channel();
    let summary = lamina::run(&job, &src, &out, &handle).unwrap();
    drop(handle);

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.written, 1);
    assert_eq!(summary.failed, 1);
    assert!(out.join("a_composited.png").exists());
    assert!(!out.join("b_composited.png").exists());
    let saw_error = rx.try_iter().any(|ev| {
        matches!(&ev, JobEvent::Log(line) if line.contains("Error processing key 'b'"))
    });
    assert!(saw_error);

    std::fs::remove_dir_all(&src).ok();
    std::fs::remove_dir_all(&out).ok();
}

use burn::backend::NdArray;
use image::{Rgb, RgbImage};
use psp_burn::checkpoint::{load_model, resolve_checkpoint, save_checkpoint};
use psp_burn::config::{load_checkpoint_options, CheckpointOptions, InferenceConfig, RunOptions};
use psp_burn::model::PspConfig;
use psp_burn::InferenceError;
use std::fs;
use std::path::Path;

type TestBackend = NdArray<f32>;

fn tiny_model() -> PspConfig {
    PspConfig::new()
        .with_output_size(8)
        .with_latent_width(8)
        .with_encoder_dim(4)
        .with_synthesis_dim(4)
}

fn write_inputs(dir: &Path) {
    fs::create_dir_all(dir.join("nested")).unwrap();
    let names = ["a.png", "b.jpg", "c.png", "nested/d.png", "nested/e.jpeg"];
    for (i, name) in names.iter().enumerate() {
        RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 7) as u8, (y * 9) as u8, i as u8 * 40]))
            .save(dir.join(name))
            .unwrap();
    }
    fs::write(dir.join("notes.txt"), "not an image").unwrap();
}

fn sorted_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn prepare(root: &Path) -> RunOptions {
    write_inputs(&root.join("data"));
    let options = CheckpointOptions::new("ffhq_encode".to_string(), tiny_model());
    let model = tiny_model().init::<TestBackend>(&Default::default());
    save_checkpoint(&root.join("ckpt"), &options, model).unwrap();

    let mut run = RunOptions::new(root.join("data"), root.join("exp"));
    run.checkpoint_path = root.join("ckpt");
    run.test_batch_size = 2;
    run.test_workers = 2;
    run
}

fn run_from_checkpoint(run: RunOptions) -> (InferenceConfig, psp_burn::RunSummary) {
    let device = Default::default();
    let checkpoint = resolve_checkpoint(&run.checkpoint_path).unwrap();
    let options = load_checkpoint_options(&checkpoint.options_path).unwrap();
    let config = InferenceConfig::resolve(run, options).unwrap();
    let model = load_model::<TestBackend>(&checkpoint, &config.model, &device).unwrap();
    let summary = psp_burn::run::<TestBackend, _>(&config, model, &device).unwrap();
    (config, summary)
}

#[test]
fn five_images_in_batches_of_two() {
    let dir = tempfile::tempdir().unwrap();
    let run = prepare(dir.path());
    let (config, summary) = run_from_checkpoint(run);

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.samples, 4);
    assert_eq!(summary.dropped, 1);
    assert_eq!(
        sorted_names(&config.results_dir()),
        vec!["a.png", "b.jpg", "c.png", "d.png"]
    );
    assert_eq!(sorted_names(&config.coupled_dir()), vec!["a.png"]);

    let result = image::open(config.results_dir().join("a.png")).unwrap();
    assert_eq!((result.width(), result.height()), (8, 8));
    let strip = image::open(config.coupled_dir().join("a.png")).unwrap();
    assert_eq!((strip.width(), strip.height()), (16, 8));

    let stats = fs::read_to_string(dir.path().join("exp/stats.txt")).unwrap();
    assert!(stats.starts_with("Runtime "));
    assert!(stats.contains("+-"));
}

#[test]
fn style_mixing_with_resized_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let mut run = prepare(dir.path());
    run.latent_mask = Some("2,3".to_string());
    run.mix_alpha = Some(0.5);
    run.resize_outputs = true;
    run.couple_outputs = true;
    run.n_images = Some(2);
    run.seed = Some(42);
    let (config, summary) = run_from_checkpoint(run);

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.coupled, 2);
    let result = image::open(config.results_dir().join("b.jpg")).unwrap();
    assert_eq!((result.width(), result.height()), (256, 256));
    let strip = image::open(config.coupled_dir().join("b.jpg")).unwrap();
    assert_eq!((strip.width(), strip.height()), (512, 256));
}

#[test]
fn out_of_range_mask_fails_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut run = prepare(dir.path());
    run.latent_mask = Some("4".to_string());
    let checkpoint = resolve_checkpoint(&run.checkpoint_path).unwrap();
    let options = load_checkpoint_options(&checkpoint.options_path).unwrap();

    assert!(InferenceConfig::resolve(run, options).is_err());
    assert!(!dir.path().join("exp").exists());
}

#[test]
fn single_channel_dataset_on_rgb_model_fails_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut run = prepare(dir.path());
    run.dataset_type = Some("celebs_sketch_to_face".to_string());
    let checkpoint = resolve_checkpoint(&run.checkpoint_path).unwrap();
    let options = load_checkpoint_options(&checkpoint.options_path).unwrap();

    assert!(matches!(
        InferenceConfig::resolve(run, options),
        Err(InferenceError::Config { option: "dataset_type", .. })
    ));
    assert!(!dir.path().join("exp").exists());
}

#[test]
fn architecture_mismatch_fails_before_loading_weights() {
    let dir = tempfile::tempdir().unwrap();
    for (output_size, learn_in_w, option) in [(Some(16), None, "output_size"), (None, Some(true), "learn_in_w")] {
        let mut run = prepare(dir.path());
        run.output_size = output_size;
        run.learn_in_w = learn_in_w;
        let checkpoint = resolve_checkpoint(&run.checkpoint_path).unwrap();
        let options = load_checkpoint_options(&checkpoint.options_path).unwrap();
        match InferenceConfig::resolve(run, options) {
            Err(InferenceError::Config { option: got, .. }) => assert_eq!(got, option),
            other => panic!("expected a config error for {option}, got {other:?}"),
        }
    }
    assert!(!dir.path().join("exp").exists());
}

//! Background replacement CLI
//!
//! Segments every input once, writes the uncorrected composite, and when a
//! stroke directory is given replays the drawn snapshots for each image and
//! writes the corrected composite next to it.

use super::config::CliConfigBuilder;
use crate::{
    gateway::SegmentationGateway,
    services::ImageIOService,
    session::RefinementSession,
    tracing_config::init_cli_tracing,
    types::ImageId,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "tiff", "tif"];

/// Replace image backgrounds with a solid color, with optional stroke corrections
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bg-refine")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required = true)]
    pub input: Vec<String>,

    /// Output directory [default: next to each input]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Background color as hex (e.g. "#00FF00") [default: #FFFFFF]
    #[arg(short, long, value_name = "HEX")]
    pub background: Option<String>,

    /// Maximum output width, 0 keeps the original size [default: 0]
    #[arg(long, value_name = "N")]
    pub max_width: Option<u32>,

    /// Maximum width of the surface strokes are drawn on [default: 1024]
    #[arg(long, value_name = "N")]
    pub surface_max_width: Option<u32>,

    /// Directory of stroke snapshots named `<stem>.png` or `<stem>_*.png`,
    /// applied in sorted order
    #[arg(long, value_name = "DIR")]
    pub strokes: Option<PathBuf>,

    /// Write each image's drawing surface and its JSON description here
    #[arg(long, value_name = "DIR")]
    pub export_surface: Option<PathBuf>,

    /// Brush mode announced to the drawing surface
    #[arg(long, value_enum)]
    pub brush_mode: Option<CliBrushMode>,

    /// Brush width in surface pixels (5-120)
    #[arg(long, value_name = "N")]
    pub brush_width: Option<u32>,

    /// How drawn ink is classified into keep/remove
    #[arg(long, value_enum)]
    pub classifier: Option<CliClassifier>,

    /// Smooth strokes while scaling them to the original resolution
    #[arg(long)]
    pub smooth_strokes: bool,

    /// Segmentation model [default: u2net]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Segmentation program [default: rembg]
    #[arg(long, value_name = "PROGRAM")]
    pub segment_cmd: Option<String>,

    /// Argument template for the segmentation program; `{input}`, `{output}`
    /// and `{model}` are substituted [default: i -m {model} {input} {output}]
    #[arg(long = "segment-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub segment_args: Vec<String>,

    /// Segmentation timeout in seconds [default: 300]
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// JSON configuration file; command-line options override it
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON (requires the tracing-json feature)
    #[arg(long)]
    pub json_logs: bool,

    /// Process directory recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Pattern for directory inputs (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBrushMode {
    Keep,
    Remove,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliClassifier {
    BackgroundDiff,
    AbsoluteColor,
}

/// What happened to one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileOutcome {
    pub(crate) output: PathBuf,
    pub(crate) refined_output: Option<PathBuf>,
    pub(crate) snapshots_applied: usize,
}

/// Totals over a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) processed: usize,
    pub(crate) failed: usize,
    pub(crate) refined: usize,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.json_logs).context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let gateway = CliConfigBuilder::build_gateway(&cli, &config);

    info!(
        program = gateway.program(),
        model = %config.model_id,
        background = %config.background_color,
        "Starting background replacement"
    );

    let mut session = RefinementSession::new(config, gateway)?;
    let summary = run(&cli, &mut session).await?;

    if summary.failed > 0 {
        anyhow::bail!(
            "{} of {} input(s) failed",
            summary.failed,
            summary.processed + summary.failed
        );
    }
    Ok(())
}

/// Process every input, continuing past failures
pub(crate) async fn run<G: SegmentationGateway>(
    cli: &Cli,
    session: &mut RefinementSession<G>,
) -> Result<RunSummary> {
    let files = collect_inputs(cli)?;
    let mut summary = RunSummary::default();
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(summary);
    }
    info!("Found {} image file(s) to process", files.len());

    if let Some(dir) = &cli.output {
        if dir.is_file() {
            anyhow::bail!(
                "Output path exists and is a file, not a directory: {}",
                dir.display()
            );
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }

    let progress = (files.len() > 1).then(|| {
        let pb = ProgressBar::new(files.len() as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    });

    let batch_start = Instant::now();
    for path in &files {
        if let Some(pb) = &progress {
            pb.set_message(format!("Processing {}", path.display()));
        }

        match process_file(cli, session, path).await {
            Ok(outcome) => {
                summary.processed += 1;
                if outcome.refined_output.is_some() {
                    summary.refined += 1;
                }
                debug!(
                    input = %path.display(),
                    output = %outcome.output.display(),
                    snapshots = outcome.snapshots_applied,
                    "Processed"
                );
            },
            Err(e) => {
                summary.failed += 1;
                error!("Failed to process {}: {:#}", path.display(), e);
            },
        }

        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_with_message(format!(
            "Completed! Processed: {}, Failed: {}",
            summary.processed, summary.failed
        ));
    }

    let stats = session.cache().stats();
    info!(
        processed = summary.processed,
        refined = summary.refined,
        failed = summary.failed,
        segmentations = stats.misses,
        cache_hits = stats.hits,
        elapsed_s = batch_start.elapsed().as_secs_f64(),
        "Batch summary"
    );
    Ok(summary)
}

async fn process_file<G: SegmentationGateway>(
    cli: &Cli,
    session: &mut RefinementSession<G>,
    path: &Path,
) -> Result<FileOutcome> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Input has no usable file name: {}", path.display()))?;
    let id = ImageId::new(file_name);

    let bytes = ImageIOService::load_bytes(path)?;
    let source = session.load_image(id.clone(), bytes)?;
    let alpha = session.automatic_mask(&source).await?;

    let output_dir = output_dir_for(cli, path);
    let output = output_dir.join(ImageIOService::output_file_name(&id, false));
    ImageIOService::save_bytes(&session.render(&source, &alpha)?, &output)?;
    info!("Wrote {}", output.display());

    let background = session.surface_background(&source);
    if let Some(dir) = &cli.export_surface {
        ImageIOService::save_png(&background, dir.join(ImageIOService::surface_image_name(&id)))?;
        let spec = session.surface_spec(&source).to_json()?;
        ImageIOService::save_bytes(
            spec.as_bytes(),
            dir.join(ImageIOService::surface_spec_name(&id)),
        )?;
    }

    let mut snapshots_applied = 0;
    let mut refined_output = None;
    if let Some(dir) = &cli.strokes {
        let snapshots = find_stroke_snapshots(dir, id.stem())?;
        if snapshots.is_empty() {
            debug!(image = %id, "No stroke snapshots");
        }
        for snapshot_path in &snapshots {
            let snapshot = ImageIOService::load_snapshot(snapshot_path, &background)
                .with_context(|| format!("Stroke snapshot {}", snapshot_path.display()))?;
            if session.apply_snapshot(&id, &snapshot)? {
                snapshots_applied += 1;
            }
        }

        if !snapshots.is_empty() {
            let refined = output_dir.join(ImageIOService::output_file_name(&id, true));
            ImageIOService::save_bytes(&session.render_refined(&source, &alpha)?, &refined)?;
            info!("Wrote {}", refined.display());
            refined_output = Some(refined);
        }
    }

    Ok(FileOutcome {
        output,
        refined_output,
        snapshots_applied,
    })
}

fn output_dir_for(cli: &Cli, input: &Path) -> PathBuf {
    match &cli.output {
        Some(dir) => dir.clone(),
        None => input
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
    }
}

/// Expand files and directories into a sorted list of image files
fn collect_inputs(cli: &Cli) -> Result<Vec<PathBuf>> {
    let mut all_files = Vec::new();

    for input in &cli.input {
        let path = PathBuf::from(input);

        if path.is_file() {
            if is_image_file(&path, &IMAGE_EXTENSIONS) {
                all_files.push(path);
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            all_files.extend(find_image_files(&path, cli.recursive, cli.pattern.as_deref())?);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }

    all_files.sort();
    all_files.dedup();
    Ok(all_files)
}

/// Find image files in a directory
fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if recursive {
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let path = entry.path();
                if is_image_file(path, &IMAGE_EXTENSIONS) && matches_pattern(path, pattern) {
                    files.push(path.to_path_buf());
                }
            }
        }
    } else {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let path = entry.path();
                if is_image_file(&path, &IMAGE_EXTENSIONS) && matches_pattern(&path, pattern) {
                    files.push(path);
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Snapshots in `dir` named `<stem>.<image ext>` or `<stem>_*.<image ext>`,
/// sorted by name
fn find_stroke_snapshots(dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let numbered = format!("{}_*", glob::Pattern::escape(stem));
    let files = find_image_files(dir, false, None)
        .with_context(|| format!("Failed to read stroke directory {}", dir.display()))?;
    Ok(files
        .into_iter()
        .filter(|path| {
            path.file_stem().and_then(|s| s.to_str()) == Some(stem)
                || matches_pattern(path, Some(&numbered))
        })
        .collect())
}

/// Check if file is an image based on extension
fn is_image_file(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext.to_lowercase().as_str()))
}

/// Check if file matches the given pattern
fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|filename| {
                glob::Pattern::new(pat)
                    .map(|p| p.matches(filename))
                    .unwrap_or(false)
            }),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockGateway;
    use crate::config::RefineConfig;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::fs;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["bg-refine"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    fn write_image(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([100, 100, 100]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_cli_parsing() {
        let cli = parse(&[
            "a.jpg",
            "--background",
            "#00ff00",
            "--max-width",
            "800",
            "--brush-mode",
            "remove",
            "--classifier",
            "absolute-color",
            "--segment-arg",
            "--model={model}",
            "-vv",
        ]);
        assert_eq!(cli.input, vec!["a.jpg"]);
        assert_eq!(cli.background.as_deref(), Some("#00ff00"));
        assert_eq!(cli.max_width, Some(800));
        assert_eq!(cli.brush_mode, Some(CliBrushMode::Remove));
        assert_eq!(cli.classifier, Some(CliClassifier::AbsoluteColor));
        assert_eq!(cli.segment_args, vec!["--model={model}"]);
        assert_eq!(cli.verbose, 2);

        assert!(Cli::try_parse_from(["bg-refine"]).is_err());
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a.JPG"), &IMAGE_EXTENSIONS));
        assert!(is_image_file(Path::new("a.tif"), &IMAGE_EXTENSIONS));
        assert!(!is_image_file(Path::new("a.txt"), &IMAGE_EXTENSIONS));
        assert!(!is_image_file(Path::new("noext"), &IMAGE_EXTENSIONS));
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern(Path::new("any_file.jpg"), None));
        assert!(matches_pattern(Path::new("test.jpg"), Some("*.jpg")));
        assert!(matches_pattern(Path::new("img_001.jpg"), Some("img_*.jpg")));
        assert!(!matches_pattern(Path::new("test.png"), Some("*.jpg")));
        assert!(!matches_pattern(Path::new(""), Some("*.jpg")));
    }

    #[test]
    fn test_find_image_files_recursive() {
        let temp_dir = tempdir().unwrap();
        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();
        fs::write(temp_dir.path().join("root.jpg"), b"test").unwrap();
        fs::write(sub_dir.join("sub.png"), b"test").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"test").unwrap();

        let files = find_image_files(temp_dir.path(), false, None).unwrap();
        assert_eq!(files.len(), 1);
        let files = find_image_files(temp_dir.path(), true, None).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_find_stroke_snapshots_sorted_by_name() {
        let temp_dir = tempdir().unwrap();
        for name in [
            "cat_02.png",
            "cat_01.png",
            "cat.png",
            "dog_01.png",
            "cat.txt",
            "cat[1].png",
            "catalog.png",
            "catalog_01.png",
        ] {
            fs::write(temp_dir.path().join(name), b"x").unwrap();
        }
        let names = |found: Vec<PathBuf>| -> Vec<String> {
            found
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };

        let found = find_stroke_snapshots(temp_dir.path(), "cat").unwrap();
        assert_eq!(names(found), vec!["cat.png", "cat_01.png", "cat_02.png"]);

        let found = find_stroke_snapshots(temp_dir.path(), "catalog").unwrap();
        assert_eq!(names(found), vec!["catalog.png", "catalog_01.png"]);

        let found = find_stroke_snapshots(temp_dir.path(), "cat[1]").unwrap();
        assert_eq!(names(found), vec!["cat[1].png"]);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let cli = parse(&["/definitely/not/here.png"]);
        assert!(collect_inputs(&cli).is_err());
    }

    #[tokio::test]
    async fn test_run_writes_outputs_and_replays_strokes() {
        let temp_dir = tempdir().unwrap();
        let inputs = temp_dir.path().join("in");
        let strokes = temp_dir.path().join("strokes");
        let out = temp_dir.path().join("out");
        let surfaces = temp_dir.path().join("surfaces");
        fs::create_dir_all(&inputs).unwrap();
        fs::create_dir_all(&strokes).unwrap();
        write_image(&inputs.join("cat.png"), 8, 4);
        write_image(&inputs.join("dog.png"), 6, 6);
        fs::write(inputs.join("broken.png"), b"not a png").unwrap();

        let mut ink = RgbaImage::new(8, 4);
        ink.put_pixel(2, 1, Rgba([0, 255, 0, 255]));
        ink.save(strokes.join("cat_01.png")).unwrap();

        let cli = parse(&[
            inputs.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--strokes",
            strokes.to_str().unwrap(),
            "--export-surface",
            surfaces.to_str().unwrap(),
            "--background",
            "#0000FF",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        let gateway = MockGateway::background();
        let mut session = RefinementSession::new(config, gateway.clone()).unwrap();

        let summary = run(&cli, &mut session).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.refined, 1);
        assert_eq!(gateway.calls(), 2);

        let plain = image::open(out.join("bg_cat.png")).unwrap().to_rgb8();
        assert!(plain.pixels().all(|p| *p == Rgb([0, 0, 255])));
        let refined = image::open(out.join("bg_refined_cat.png")).unwrap().to_rgb8();
        assert_eq!(*refined.get_pixel(2, 1), Rgb([100, 100, 100]));
        assert_eq!(*refined.get_pixel(0, 0), Rgb([0, 0, 255]));
        assert!(out.join("bg_dog.png").exists());
        assert!(!out.join("bg_refined_dog.png").exists());

        assert!(surfaces.join("surface_cat.png").exists());
        let spec = fs::read_to_string(surfaces.join("surface_cat.json")).unwrap();
        assert!(spec.contains("\"width\": 8"));
    }

    #[tokio::test]
    async fn test_run_keeps_strokes_of_prefixed_names_apart() {
        let temp_dir = tempdir().unwrap();
        let inputs = temp_dir.path().join("in");
        let strokes = temp_dir.path().join("strokes");
        let out = temp_dir.path().join("out");
        fs::create_dir_all(&inputs).unwrap();
        fs::create_dir_all(&strokes).unwrap();
        write_image(&inputs.join("cat.png"), 8, 4);
        write_image(&inputs.join("catalog.png"), 8, 4);

        let mut ink = RgbaImage::new(8, 4);
        ink.put_pixel(2, 1, Rgba([0, 255, 0, 255]));
        ink.save(strokes.join("cat_01.png")).unwrap();
        let mut ink = RgbaImage::new(8, 4);
        ink.put_pixel(5, 2, Rgba([0, 255, 0, 255]));
        ink.save(strokes.join("catalog_01.png")).unwrap();

        let cli = parse(&[
            inputs.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--strokes",
            strokes.to_str().unwrap(),
            "--background",
            "#0000FF",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        let mut session = RefinementSession::new(config, MockGateway::background()).unwrap();

        let summary = run(&cli, &mut session).await.unwrap();
        assert_eq!(summary.refined, 2);

        let cat = image::open(out.join("bg_refined_cat.png")).unwrap().to_rgb8();
        assert_eq!(*cat.get_pixel(2, 1), Rgb([100, 100, 100]));
        assert_eq!(*cat.get_pixel(5, 2), Rgb([0, 0, 255]));

        let catalog = image::open(out.join("bg_refined_catalog.png")).unwrap().to_rgb8();
        assert_eq!(*catalog.get_pixel(5, 2), Rgb([100, 100, 100]));
        assert_eq!(*catalog.get_pixel(2, 1), Rgb([0, 0, 255]));
    }

    #[tokio::test]
    async fn test_run_with_no_images() {
        let temp_dir = tempdir().unwrap();
        let cli = parse(&[temp_dir.path().to_str().unwrap()]);
        let mut session =
            RefinementSession::new(RefineConfig::default(), MockGateway::default()).unwrap();
        let summary = run(&cli, &mut session).await.unwrap();
        assert_eq!(summary, RunSummary::default());
    }
}

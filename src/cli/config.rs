//! Configuration conversion utilities for CLI arguments

use crate::backends::CommandGateway;
use crate::cli::main_impl::{Cli, CliBrushMode, CliClassifier};
use crate::{
    classifier::ClassificationStrategy,
    config::{BrushMode, RefineConfig},
    resolution::MaskResampling,
    types::BackgroundColor,
};
use anyhow::{Context, Result};

/// Convert CLI arguments to a validated `RefineConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Start from `--config` (or defaults) and apply every explicit option
    pub(crate) fn from_cli(cli: &Cli) -> Result<RefineConfig> {
        let mut config = match &cli.config {
            Some(path) => RefineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => RefineConfig::default(),
        };

        if let Some(background) = &cli.background {
            config.background_color = background
                .parse::<BackgroundColor>()
                .context("Invalid --background")?;
        }
        if let Some(width) = cli.max_width {
            config.max_output_width = width;
        }
        if let Some(width) = cli.surface_max_width {
            config.surface_max_width = width;
        }
        if let Some(mode) = cli.brush_mode {
            config.brush.mode = match mode {
                CliBrushMode::Keep => BrushMode::Keep,
                CliBrushMode::Remove => BrushMode::Remove,
            };
        }
        if let Some(width) = cli.brush_width {
            config.brush.width = width;
        }
        if let Some(classifier) = cli.classifier {
            config.classification = match classifier {
                CliClassifier::BackgroundDiff => ClassificationStrategy::BackgroundDiff,
                CliClassifier::AbsoluteColor => ClassificationStrategy::AbsoluteColor,
            };
        }
        if cli.smooth_strokes {
            config.stroke_resampling = MaskResampling::Smoothed;
        }
        if let Some(model) = &cli.model {
            config.model_id = model.clone();
        }
        if let Some(timeout) = cli.timeout {
            config.segmentation_timeout_secs = timeout;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Gateway running the configured segmentation program
    pub(crate) fn build_gateway(cli: &Cli, config: &RefineConfig) -> CommandGateway {
        let mut gateway = CommandGateway::rembg(config.model_id.clone());
        if cli.segment_cmd.is_some() || !cli.segment_args.is_empty() {
            let program = cli
                .segment_cmd
                .clone()
                .unwrap_or_else(|| gateway.program().to_string());
            let args = if cli.segment_args.is_empty() {
                gateway.args().to_vec()
            } else {
                cli.segment_args.clone()
            };
            gateway = CommandGateway::new(program, args, config.model_id.clone());
        }
        gateway.with_timeout(config.timeout())
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(pattern) = &cli.pattern {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid --pattern '{}'", pattern))?;
        }

        if let Some(program) = &cli.segment_cmd {
            if program.trim().is_empty() {
                anyhow::bail!("--segment-cmd must not be empty");
            }
        }

        if !cli.segment_args.is_empty()
            && !cli.segment_args.iter().any(|arg| arg.contains("{input}"))
        {
            anyhow::bail!("--segment-arg template must reference {{input}}");
        }

        if let Some(dir) = &cli.strokes {
            if !dir.is_dir() {
                anyhow::bail!("--strokes is not a directory: {}", dir.display());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SegmentationGateway;
    use clap::Parser;
    use std::path::PathBuf;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["bg-refine"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_cli_config_conversion() {
        let cli = parse(&[
            "in.jpg",
            "--background",
            "102030",
            "--max-width",
            "1920",
            "--surface-max-width",
            "512",
            "--brush-mode",
            "remove",
            "--brush-width",
            "60",
            "--classifier",
            "absolute-color",
            "--smooth-strokes",
            "--model",
            "isnet-general-use",
            "--timeout",
            "30",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.background_color, BackgroundColor::new(0x10, 0x20, 0x30));
        assert_eq!(config.max_output_width, 1920);
        assert_eq!(config.surface_max_width, 512);
        assert_eq!(config.brush.mode, BrushMode::Remove);
        assert_eq!(config.brush.width, 60);
        assert_eq!(config.classification, ClassificationStrategy::AbsoluteColor);
        assert_eq!(config.stroke_resampling, MaskResampling::Smoothed);
        assert_eq!(config.model_id, "isnet-general-use");
        assert_eq!(config.segmentation_timeout_secs, 30);
    }

    #[test]
    fn test_defaults_without_options() {
        let config = CliConfigBuilder::from_cli(&parse(&["in.jpg"])).unwrap();
        assert_eq!(config, RefineConfig::default());
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refine.json");
        std::fs::write(&path, r##"{"background_color": "#000000", "max_output_width": 300}"##)
            .unwrap();

        let cli = parse(&["in.jpg", "--config", path.to_str().unwrap(), "--max-width", "600"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.background_color, BackgroundColor::new(0, 0, 0));
        assert_eq!(config.max_output_width, 600);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(CliConfigBuilder::from_cli(&parse(&["in.jpg", "--background", "nope"])).is_err());
        assert!(CliConfigBuilder::from_cli(&parse(&["in.jpg", "--brush-width", "500"])).is_err());
        assert!(CliConfigBuilder::from_cli(&parse(&["in.jpg", "--timeout", "0"])).is_err());
        assert!(CliConfigBuilder::from_cli(&parse(&["in.jpg", "--max-width", "9000"])).is_err());
    }

    #[test]
    fn test_build_gateway() {
        let cli = parse(&["in.jpg", "--model", "silueta", "--timeout", "12"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        let gateway = CliConfigBuilder::build_gateway(&cli, &config);
        assert_eq!(gateway.program(), "rembg");
        assert_eq!(gateway.model_id(), "silueta");
        assert_eq!(gateway.timeout(), Duration::from_secs(12));

        let cli = parse(&[
            "in.jpg",
            "--segment-cmd",
            "my-segmenter",
            "--segment-arg",
            "{input}",
            "--segment-arg",
            "{output}",
        ]);
        let gateway = CliConfigBuilder::build_gateway(&cli, &config);
        assert_eq!(gateway.program(), "my-segmenter");
        let args =
            gateway.render_args(&PathBuf::from("/tmp/a.png"), &PathBuf::from("/tmp/m.png"));
        assert_eq!(args, vec!["/tmp/a.png", "/tmp/m.png"]);
    }

    #[test]
    fn test_cli_validation() {
        assert!(CliConfigBuilder::validate_cli(&parse(&["in.jpg"])).is_ok());
        assert!(CliConfigBuilder::validate_cli(&parse(&["in.jpg", "--pattern", "[*"])).is_err());
        assert!(CliConfigBuilder::validate_cli(&parse(&["in.jpg", "--segment-arg", "{output}"]))
            .is_err());
        assert!(
            CliConfigBuilder::validate_cli(&parse(&["in.jpg", "--strokes", "/no/such/dir"]))
                .is_err()
        );
    }
}

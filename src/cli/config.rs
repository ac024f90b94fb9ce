//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::{
    config::{PipelineConfig, PipelineConfigBuilder},
    models::ModelSpec,
    types::BackgroundSpec,
};
use anyhow::{Context, Result};
use std::time::Duration;

/// Convert CLI arguments to a [`PipelineConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Load `--config` (or defaults) and overlay every flag that was given
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let base = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        let mut builder = PipelineConfigBuilder::from_config(base);

        if let Some(method) = cli.method {
            builder = builder.mode(method.into());
        }
        if let Some(model) = &cli.model {
            builder = builder.model_spec(ModelSpec::parse(model));
        }
        if let Some(backend) = cli.backend {
            builder = builder.backend(backend.into());
        }
        if let Some(secs) = cli.model_timeout {
            builder = builder.model_timeout_ms(Some(Self::timeout_ms(secs)?));
        }
        if let Some(max_edge) = cli.max_edge {
            builder = builder.large_image_threshold(max_edge);
        }
        if let Some(threshold) = cli.color_threshold {
            builder = builder.color_threshold(threshold);
        }
        if let Some(ramp) = cli.color_ramp {
            builder = builder.color_ramp_width(ramp);
        }
        if cli.edge_midpoints {
            builder = builder.sample_edge_midpoints(true);
        }
        if let Some(px) = cli.soft_edge {
            builder = builder.soft_edge_px(px);
        }
        if let Some(quality) = cli.jpeg_quality {
            builder = builder.jpeg_quality(quality);
        }
        if cli.verbose > 0 {
            builder = builder.debug(true);
        }

        builder.build().context("Invalid configuration")
    }

    /// Parse every `--background` value, failing on the first invalid one
    pub(crate) fn backgrounds(cli: &Cli) -> Result<Vec<BackgroundSpec>> {
        Ok(BackgroundSpec::parse_all(&cli.backgrounds)?)
    }

    fn timeout_ms(secs: f64) -> Result<u64> {
        let timeout = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .with_context(|| format!("Model timeout must be a positive number of seconds, got {secs}"))?;
        Ok(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendType, ExtractionMode};
    use crate::extraction::MethodKind;
    use clap::Parser;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("imgly-bgswap").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_config_conversion() {
        let cli = parse(&[
            "in.jpg",
            "--method",
            "contour",
            "--backend",
            "tract",
            "--model-timeout",
            "2.5",
            "--max-edge",
            "1500",
            "--color-threshold",
            "40",
            "--edge-midpoints",
            "--soft-edge",
            "4",
            "--jpeg-quality",
            "80",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.mode, ExtractionMode::Forced(MethodKind::Contour));
        assert_eq!(config.model.backend, BackendType::Tract);
        assert_eq!(config.model.timeout_ms, Some(2500));
        assert_eq!(config.size_guard.large_image_threshold, 1500);
        assert!((config.corner_color.threshold - 40.0).abs() < f32::EPSILON);
        assert!(config.corner_color.sample_edge_midpoints);
        assert!((config.contour.soft_edge_px - 4.0).abs() < f32::EPSILON);
        assert_eq!(config.jpeg_quality, 80);
        assert!(!config.debug);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mode": "corner-color", "jpeg_quality": 70}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let from_file = CliConfigBuilder::from_cli(&parse(&["in.jpg", "--config", &path])).unwrap();
        assert_eq!(from_file.mode, ExtractionMode::Forced(MethodKind::CornerColor));
        assert_eq!(from_file.jpeg_quality, 70);

        let overridden = CliConfigBuilder::from_cli(&parse(&[
            "in.jpg",
            "--config",
            &path,
            "--jpeg-quality",
            "90",
        ]))
        .unwrap();
        assert_eq!(overridden.mode, ExtractionMode::Forced(MethodKind::CornerColor));
        assert_eq!(overridden.jpeg_quality, 90);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(CliConfigBuilder::from_cli(&parse(&["in.jpg", "--jpeg-quality", "0"])).is_err());
        assert!(CliConfigBuilder::from_cli(&parse(&["in.jpg", "--model-timeout", "0"])).is_err());
        assert!(CliConfigBuilder::from_cli(&parse(&["in.jpg", "--model-timeout=-1"])).is_err());
    }

    #[test]
    fn test_backgrounds() {
        let specs = CliConfigBuilder::backgrounds(&parse(&["in.jpg", "-b", "gray", "-b", "FF00AA"]))
            .unwrap();
        assert_eq!(specs.len(), 2);
        assert!(!specs[0].is_transparent());

        assert!(CliConfigBuilder::backgrounds(&parse(&["in.jpg", "-b", "red"])).is_err());
    }

    #[test]
    fn test_verbose_enables_debug() {
        let config = CliConfigBuilder::from_cli(&parse(&["in.jpg", "-v"])).unwrap();
        assert!(config.debug);
    }
}

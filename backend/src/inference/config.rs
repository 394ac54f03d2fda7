use serde::{Deserialize, Serialize};
use shared::NormalizationMode;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub version: f32,
    pub image: ImageConfig,
    pub augmentations: AugmentationConfig,
    pub calibration: CalibrationSettings,
    pub router: RouterConfig,
    pub models: ModelsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub target_size: u32,
    pub crop_threshold: u8,
    pub normalization: NormalizationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    pub rotation_degrees: f32,
    pub brightness_factor: f32,
    pub contrast_factor: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub binary: CalibrationConfig,
    pub multiclass: CalibrationConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub temperature_scaling: bool,
    pub temperature: f32,
    pub sum_tolerance: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub healthy_threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub binary_path: PathBuf,
    pub multiclass_path: PathBuf,
    pub tensor_layout: TensorLayout,
    pub binary_emits_distribution: bool,
    pub multiclass_emits_distribution: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: 1.0,
            image: ImageConfig::default(),
            augmentations: AugmentationConfig::default(),
            calibration: CalibrationSettings::default(),
            router: RouterConfig::default(),
            models: ModelsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            target_size: 224,
            crop_threshold: 50,
            normalization: NormalizationMode::MinusOneToOne,
        }
    }
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 15.0,
            brightness_factor: 1.1,
            contrast_factor: 1.1,
        }
    }
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            binary: CalibrationConfig {
                temperature_scaling: false,
                temperature: 2.0,
                sum_tolerance: 1e-3,
            },
            multiclass: CalibrationConfig::default(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            temperature_scaling: false,
            temperature: 1.0,
            sum_tolerance: 1e-3,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            healthy_threshold: 0.5,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("models/binary.pt"),
            multiclass_path: PathBuf::from("models/multiclass.pt"),
            tensor_layout: TensorLayout::Nhwc,
            binary_emits_distribution: true,
            multiclass_emits_distribution: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5002,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl PipelineConfig {
    /// Loads the YAML config, applies environment overrides and validates the result.
    ///
    /// `PIPELINE_CONFIG` names the file explicitly and must exist. Otherwise the
    /// workspace `config/pipeline.yaml` is used when present, else the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("PIPELINE_CONFIG") {
            Ok(path) => Self::from_path(path)?,
            Err(_) => match Self::default_path() {
                Some(path) => Self::from_path(path)?,
                None => {
                    log::warn!("No pipeline config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn default_path() -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            candidates.push(PathBuf::from(format!(
                "{}/../config/pipeline.yaml",
                manifest_dir
            )));
        }
        candidates.push(PathBuf::from("config/pipeline.yaml"));
        candidates.into_iter().find(|p| p.is_file())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loading pipeline config from {}", path.display());
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(config_str: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(config_str)?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_override("PORT", &port)?;
        }
        if let Some(path) = lookup("BINARY_MODEL_PATH") {
            self.models.binary_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("MULTICLASS_MODEL_PATH") {
            self.models.multiclass_path = PathBuf::from(path);
        }
        if let Some(threshold) = lookup("HEALTHY_THRESHOLD") {
            self.router.healthy_threshold = parse_override("HEALTHY_THRESHOLD", &threshold)?;
        }
        if let Some(mode) = lookup("NORMALIZATION_MODE") {
            self.image.normalization = NormalizationMode::from_str(&mode).map_err(|_| {
                ConfigError::InvalidOverride {
                    key: "NORMALIZATION_MODE",
                    value: mode.clone(),
                }
            })?;
        }
        if let Some(enabled) = lookup("TEMPERATURE_SCALING") {
            self.calibration.binary.temperature_scaling =
                parse_override("TEMPERATURE_SCALING", &enabled)?;
        }
        if let Some(temperature) = lookup("TEMPERATURE") {
            self.calibration.binary.temperature = parse_override("TEMPERATURE", &temperature)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.target_size == 0 {
            return Err(ConfigError::Invalid("image.target_size must be positive".into()));
        }
        let threshold = self.router.healthy_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "router.healthy_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        for (name, calibration) in [
            ("binary", &self.calibration.binary),
            ("multiclass", &self.calibration.multiclass),
        ] {
            if !calibration.temperature.is_finite() || calibration.temperature <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "calibration.{}.temperature must be positive, got {}",
                    name, calibration.temperature
                )));
            }
            if !(calibration.sum_tolerance > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "calibration.{}.sum_tolerance must be positive",
                    name
                )));
            }
        }
        let aug = &self.augmentations;
        if !(aug.brightness_factor > 0.0) || !(aug.contrast_factor > 0.0) {
            return Err(ConfigError::Invalid(
                "augmentation enhancement factors must be positive".into(),
            ));
        }
        if !aug.rotation_degrees.is_finite() {
            return Err(ConfigError::Invalid(
                "augmentations.rotation_degrees must be finite".into(),
            ));
        }
        Ok(())
    }
}

fn parse_override<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            key,
            value: value.to_string(),
        })
}

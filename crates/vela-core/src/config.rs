// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "vela.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePref {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "vela".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModePref,
    pub validation: bool,
    pub validation_layers: Vec<String>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            present_mode: PresentModePref::Mailbox,
            validation: cfg!(debug_assertions),
            validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_owned()],
        }
    }
}

/// Precompiled SPIR-V binaries for the scene pipeline.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PipelineCfg {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub pipeline: Option<PipelineCfg>,
}

impl EngineConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    /// Relative shader paths are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("config {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        let mut cfg = Self::from_toml_str(&text, path)?;
        if let Some(dir) = path.parent() {
            cfg.resolve_relative_to(dir);
        }
        info!("config loaded from {}", path.display());
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_owned(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.render.clear_color.iter().any(|c| !c.is_finite()) {
            return Err(ConfigError::Invalid(
                "render.clear_color must be finite".to_owned(),
            ));
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, dir: &Path) {
        if let Some(p) = &mut self.pipeline {
            for shader in [&mut p.vertex_shader, &mut p.fragment_shader] {
                if shader.is_relative() {
                    *shader = dir.join(&*shader);
                }
            }
        }
    }
}

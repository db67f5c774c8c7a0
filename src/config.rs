//! YAML pipeline configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::annotations::EventTableOptions;
use crate::error::{SeegError, Result};
use crate::DEFAULT_BIPOLAR_SEPARATOR;

/// Prefix the acquisition system puts in front of every channel label.
pub const DEFAULT_CHANNEL_PREFIX: &str = "EEG ";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PipelineConfig {
    pub recording: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<PathBuf>,
    #[serde(default = "default_events_delimiter")]
    pub events_delimiter: String,
    #[serde(default = "default_channel_prefix")]
    pub strip_channel_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
    pub bipolar: BipolarConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    pub l_freq: Option<f64>,
    pub h_freq: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BipolarConfig {
    #[serde(default = "default_separator")]
    pub separator: String,
    pub regions: Vec<RegionConfig>,
}

/// A named group of electrode shaft prefixes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegionConfig {
    pub name: String,
    pub prefixes: Vec<String>,
}

impl RegionConfig {
    pub fn new(name: &str, prefixes: &[&str]) -> Self {
        RegionConfig {
            name: name.to_string(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }
}

fn default_events_delimiter() -> String {
    ",".to_string()
}

fn default_channel_prefix() -> String {
    DEFAULT_CHANNEL_PREFIX.to_string()
}

fn default_separator() -> String {
    DEFAULT_BIPOLAR_SEPARATOR.to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            recording: PathBuf::from("recording.edf"),
            events: Some(PathBuf::from("events.csv")),
            events_delimiter: default_events_delimiter(),
            strip_channel_prefix: default_channel_prefix(),
            filter: Some(FilterConfig {
                l_freq: Some(1.0),
                h_freq: Some(80.0),
            }),
            bipolar: BipolarConfig {
                separator: default_separator(),
                regions: vec![
                    RegionConfig::new("broca", &["BIA"]),
                    RegionConfig::new(
                        "wernicke",
                        &[
                            "WCP", "TBP", "TBA", "H", "TIA", "TP", "TOB", "HP", "TIP", "WC", "PT", "A", "AL",
                            "TOI", "TOS", "TIAA", "HA", "TOM", "TIM", "TBO", "TBM", "T2O",
                        ],
                    ),
                ],
            },
            output_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Checks the settings that can be checked without touching any file.
    pub fn validate(&self) -> Result<()> {
        if self.bipolar.regions.is_empty() {
            return Err(SeegError::Config("at least one bipolar region is required".to_string()));
        }
        if self.bipolar.separator.is_empty() {
            return Err(SeegError::Config("bipolar separator must not be empty".to_string()));
        }

        for region in &self.bipolar.regions {
            if region.name.trim().is_empty() {
                return Err(SeegError::Config("region name must not be empty".to_string()));
            }
            if region.prefixes.is_empty() {
                return Err(SeegError::Config(format!("region '{}' has no prefixes", region.name)));
            }
            if region.prefixes.iter().any(|p| p.is_empty()) {
                return Err(SeegError::Config(format!("region '{}' has an empty prefix", region.name)));
            }
        }

        let mut names: Vec<&str> = self.bipolar.regions.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(SeegError::Config(format!("region '{}' is defined twice", pair[0])));
        }

        if let Some(filter) = &self.filter {
            match (filter.l_freq, filter.h_freq) {
                (None, None) => {
                    return Err(SeegError::Config("filter needs l_freq, h_freq or both".to_string()));
                }
                (Some(l), Some(h)) if l >= h => {
                    return Err(SeegError::Config(format!("filter l_freq {} must be below h_freq {}", l, h)));
                }
                _ => {}
            }
            for edge in [filter.l_freq, filter.h_freq].into_iter().flatten() {
                if !edge.is_finite() || edge <= 0.0 {
                    return Err(SeegError::Config(format!("filter edge {} must be positive", edge)));
                }
            }
        }

        if self.events_table_options().is_err() {
            return Err(SeegError::Config(format!(
                "events_delimiter '{}' must be a single ASCII character",
                self.events_delimiter
            )));
        }

        Ok(())
    }

    /// Reader options for the configured event table.
    pub fn events_table_options(&self) -> Result<EventTableOptions> {
        let delimiter = match self.events_delimiter.as_bytes() {
            [b] if b.is_ascii() => *b,
            _ => {
                return Err(SeegError::Config(format!(
                    "invalid events_delimiter '{}'",
                    self.events_delimiter
                )))
            }
        };
        Ok(EventTableOptions {
            delimiter,
            ..EventTableOptions::default()
        })
    }

    /// Output path for a region, when an output directory is configured.
    pub fn region_output(&self, region: &str) -> Option<PathBuf> {
        self.output_dir.as_ref().map(|dir| dir.join(format!("{}.edf", region)))
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path)
        .map_err(|e| SeegError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

    let config: PipelineConfig = serde_yaml::from_str(&config_str)
        .map_err(|e| SeegError::Config(format!("Failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &PipelineConfig, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| SeegError::Config(format!("Failed to serialize config: {}", e)))?;

    fs::write(path, yaml)
        .map_err(|e| SeegError::Config(format!("Failed to write config file: {}", e)))
}

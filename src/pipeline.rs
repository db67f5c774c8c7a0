//! End-to-end preprocessing run driven by a [`PipelineConfig`].

use std::fmt;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::annotations::{attach_events, read_event_table};
use crate::bipolar::create_bipolar_by_prefix;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::reader::read_edf;
use crate::recording::{Recording, RecordingSummary};
use crate::writer::write_recording;

/// Outcome of one region's bipolar derivation.
#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub name: String,
    pub channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Summary of the loaded recording after renaming and annotation.
    pub summary: RecordingSummary,
    pub annotations_attached: usize,
    pub regions: Vec<RegionReport>,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary)?;
        writeln!(f, "Annotations attached: {}", self.annotations_attached)?;
        for region in &self.regions {
            write!(f, "\nRegion {} ({} bipolar channels)", region.name, region.channels.len())?;
            if let Some(output) = &region.output {
                write!(f, " -> {}", output.display())?;
            }
            write!(f, "\n  {}", region.channels.join(", "))?;
        }
        Ok(())
    }
}

/// Loads, annotates, filters and derives bipolar montages.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline { config })
    }

    /// Loads the recording, strips the channel prefix and attaches events.
    pub fn load(&self) -> Result<(Recording, usize)> {
        let mut recording = read_edf(&self.config.recording)?;

        if !self.config.strip_channel_prefix.is_empty() {
            recording.strip_channel_prefix(&self.config.strip_channel_prefix)?;
        }

        let attached = match &self.config.events {
            Some(path) => {
                let rows = read_event_table(path, &self.config.events_table_options()?)?;
                attach_events(&mut recording, &rows)?
            }
            None => {
                log::info!("No event table configured, keeping {} file annotations", recording.annotations().len());
                0
            }
        };

        Ok((recording, attached))
    }

    /// Runs every stage and writes per-region outputs when configured.
    ///
    /// The first region that yields no bipolar channel aborts the run.
    pub fn run(&self) -> Result<PipelineReport> {
        let (recording, annotations_attached) = self.load()?;
        let summary = recording.summary();

        // 滤波后的副本，原始数据保持不变
        let source = match &self.config.filter {
            Some(band) => recording.filter(band.l_freq, band.h_freq)?,
            None => recording,
        };

        if let Some(dir) = &self.config.output_dir {
            fs::create_dir_all(dir)?;
        }

        let mut regions = Vec::with_capacity(self.config.bipolar.regions.len());
        for region in &self.config.bipolar.regions {
            let derived = create_bipolar_by_prefix(&source, &region.prefixes, &self.config.bipolar.separator)
                .map_err(|e| {
                    log::error!("Region '{}' failed: {}", region.name, e);
                    e
                })?;

            let output = self.config.region_output(&region.name);
            if let Some(path) = &output {
                write_recording(&derived, path)?;
                log::info!("Wrote region '{}' to {}", region.name, path.display());
            }

            regions.push(RegionReport {
                name: region.name.clone(),
                channels: derived.channel_names().iter().map(|n| n.to_string()).collect(),
                output,
            });
        }

        Ok(PipelineReport {
            summary,
            annotations_attached,
            regions,
        })
    }
}

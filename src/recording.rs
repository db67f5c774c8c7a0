use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{SeegError, Result};
use crate::types::Annotation;

/// One monopolar (or derived) channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: String,
    pub unit: String,
    pub data: Vec<f64>,
}

impl Channel {
    pub fn new(name: &str, unit: &str, data: Vec<f64>) -> Self {
        Channel {
            name: name.to_string(),
            unit: unit.to_string(),
            data,
        }
    }
}

/// An in-memory multichannel recording.
///
/// All channels share one sampling rate and one absolute start timestamp,
/// and all have the same number of samples. Annotation onsets are relative
/// to [`Recording::meas_date`].
#[derive(Debug, Clone)]
pub struct Recording {
    channels: Vec<Channel>,
    sfreq: f64,
    meas_date: DateTime<Utc>,
    annotations: Vec<Annotation>,
    highpass: f64,
    lowpass: f64,
}

impl Recording {
    /// Creates a recording, checking the channel invariants.
    ///
    /// # Errors
    ///
    /// [`SeegError::InvalidRecording`] if the sampling rate is not positive,
    /// a channel name is empty or repeated, or channel lengths differ.
    pub fn new(channels: Vec<Channel>, sfreq: f64, meas_date: DateTime<Utc>) -> Result<Self> {
        if !sfreq.is_finite() || sfreq <= 0.0 {
            return Err(SeegError::InvalidRecording(format!("sampling rate must be positive, got {}", sfreq)));
        }

        let mut seen = HashSet::with_capacity(channels.len());
        for channel in &channels {
            if channel.name.is_empty() {
                return Err(SeegError::InvalidRecording("empty channel name".to_string()));
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(SeegError::InvalidRecording(format!("duplicate channel name '{}'", channel.name)));
            }
        }

        if let Some(first) = channels.first() {
            let n_times = first.data.len();
            if let Some(bad) = channels.iter().find(|c| c.data.len() != n_times) {
                return Err(SeegError::InvalidRecording(format!(
                    "channel '{}' has {} samples, expected {}",
                    bad.name,
                    bad.data.len(),
                    n_times
                )));
            }
        }

        Ok(Recording {
            channels,
            sfreq,
            meas_date,
            annotations: Vec::new(),
            highpass: 0.0,
            lowpass: sfreq / 2.0,
        })
    }

    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    pub fn meas_date(&self) -> DateTime<Utc> {
        self.meas_date
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples per channel.
    pub fn n_times(&self) -> usize {
        self.channels.first().map_or(0, |c| c.data.len())
    }

    pub fn duration_seconds(&self) -> f64 {
        self.n_times() as f64 / self.sfreq
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Samples of the named channel.
    pub fn data(&self, name: &str) -> Result<&[f64]> {
        self.channel(name)
            .map(|c| c.data.as_slice())
            .ok_or_else(|| SeegError::ChannelNotFound(name.to_string()))
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Replaces the annotation set.
    pub fn set_annotations(&mut self, annotations: Vec<Annotation>) {
        self.annotations = annotations;
    }

    pub fn highpass(&self) -> f64 {
        self.highpass
    }

    pub fn lowpass(&self) -> f64 {
        self.lowpass
    }

    /// Records the filter band the data has been through.
    pub fn set_filter_info(&mut self, highpass: f64, lowpass: f64) {
        self.highpass = highpass;
        self.lowpass = lowpass;
    }

    /// Renames every channel through `rename`.
    ///
    /// The recording is left untouched if the new names are empty or collide.
    pub fn rename_channels<F>(&mut self, rename: F) -> Result<()>
    where
        F: Fn(&str) -> String,
    {
        let renamed: Vec<String> = self.channels.iter().map(|c| rename(&c.name)).collect();

        let mut seen = HashSet::with_capacity(renamed.len());
        for name in &renamed {
            if name.is_empty() {
                return Err(SeegError::InvalidRecording("rename produced an empty channel name".to_string()));
            }
            if !seen.insert(name.as_str()) {
                return Err(SeegError::InvalidRecording(format!("rename produced duplicate channel '{}'", name)));
            }
        }

        for (channel, name) in self.channels.iter_mut().zip(renamed) {
            channel.name = name;
        }
        Ok(())
    }

    /// Removes `prefix` wherever it occurs in channel names (`"EEG TIP1"` →
    /// `"TIP1"`).
    pub fn strip_channel_prefix(&mut self, prefix: &str) -> Result<()> {
        if prefix.is_empty() {
            return Ok(());
        }
        self.rename_channels(|name| name.replace(prefix, ""))
    }

    /// Builds a new recording over the same time base, carrying the
    /// annotation set and filter metadata over unchanged.
    pub fn with_channels(&self, channels: Vec<Channel>) -> Result<Recording> {
        let mut derived = Recording::new(channels, self.sfreq, self.meas_date)?;
        if !derived.channels.is_empty() && derived.n_times() != self.n_times() {
            return Err(SeegError::InvalidRecording(format!(
                "derived channels have {} samples, source has {}",
                derived.n_times(),
                self.n_times()
            )));
        }
        derived.annotations = self.annotations.clone();
        derived.highpass = self.highpass;
        derived.lowpass = self.lowpass;
        Ok(derived)
    }

    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            meas_date: self.meas_date.to_rfc3339(),
            sfreq: self.sfreq,
            channel_names: self.channels.iter().map(|c| c.name.clone()).collect(),
            n_channels: self.channels.len(),
            n_times: self.n_times(),
            duration_seconds: self.duration_seconds(),
            highpass: self.highpass,
            lowpass: self.lowpass,
            n_annotations: self.annotations.len(),
        }
    }
}

/// Printable overview of a recording.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    pub meas_date: String,
    pub sfreq: f64,
    pub channel_names: Vec<String>,
    pub n_channels: usize,
    pub n_times: usize,
    pub duration_seconds: f64,
    pub highpass: f64,
    pub lowpass: f64,
    pub n_annotations: usize,
}

impl fmt::Display for RecordingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Measurement Date and Time: {}", self.meas_date)?;
        writeln!(f, "Sampling Frequency: {} Hz", self.sfreq)?;
        writeln!(f, "Channel Names: {}", self.channel_names.join(", "))?;
        writeln!(f, "Number of Channels: {}", self.n_channels)?;
        writeln!(f, "Duration: {:.3} s ({} samples)", self.duration_seconds, self.n_times)?;
        writeln!(f, "High-Pass Filter: {} Hz", self.highpass)?;
        writeln!(f, "Low-Pass Filter: {} Hz", self.lowpass)?;
        write!(f, "Annotations: {}", self.n_annotations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).unwrap()
    }

    #[test]
    fn test_new_rejects_unequal_lengths() {
        let channels = vec![
            Channel::new("TIP1", "uV", vec![0.0; 10]),
            Channel::new("TIP2", "uV", vec![0.0; 9]),
        ];
        assert!(matches!(
            Recording::new(channels, 256.0, start()),
            Err(SeegError::InvalidRecording(_))
        ));
    }

    #[test]
    fn test_new_rejects_duplicate_names_and_bad_rate() {
        let channels = vec![
            Channel::new("TIP1", "uV", vec![0.0; 4]),
            Channel::new("TIP1", "uV", vec![0.0; 4]),
        ];
        assert!(Recording::new(channels, 256.0, start()).is_err());
        assert!(Recording::new(Vec::new(), 0.0, start()).is_err());
    }

    #[test]
    fn test_default_filter_info() {
        let rec = Recording::new(vec![Channel::new("A1", "uV", vec![0.0; 4])], 512.0, start()).unwrap();
        assert_eq!(rec.highpass(), 0.0);
        assert_eq!(rec.lowpass(), 256.0);
        assert_eq!(rec.n_times(), 4);
    }

    #[test]
    fn test_strip_channel_prefix() {
        let mut rec = Recording::new(
            vec![
                Channel::new("EEG TIP1", "uV", vec![1.0]),
                Channel::new("EEG TIP2", "uV", vec![2.0]),
                Channel::new("ECG", "uV", vec![3.0]),
            ],
            256.0,
            start(),
        )
        .unwrap();
        rec.strip_channel_prefix("EEG ").unwrap();
        assert_eq!(rec.channel_names(), vec!["TIP1", "TIP2", "ECG"]);
        assert_eq!(rec.data("TIP2").unwrap(), &[2.0]);
    }

    #[test]
    fn test_rename_collision_leaves_recording_untouched() {
        let mut rec = Recording::new(
            vec![
                Channel::new("EEG A1", "uV", vec![1.0]),
                Channel::new("A1", "uV", vec![2.0]),
            ],
            256.0,
            start(),
        )
        .unwrap();
        assert!(rec.strip_channel_prefix("EEG ").is_err());
        assert_eq!(rec.channel_names(), vec!["EEG A1", "A1"]);
    }

    #[test]
    fn test_with_channels_carries_annotations() {
        let mut rec = Recording::new(vec![Channel::new("A1", "uV", vec![0.0; 8])], 256.0, start()).unwrap();
        rec.set_annotations(vec![Annotation::from_seconds(1.0, Some(0.5), "stim")]);
        rec.set_filter_info(1.0, 80.0);

        let derived = rec.with_channels(vec![Channel::new("B1", "uV", vec![1.0; 8])]).unwrap();
        assert_eq!(derived.annotations(), rec.annotations());
        assert_eq!(derived.meas_date(), rec.meas_date());
        assert_eq!((derived.highpass(), derived.lowpass()), (1.0, 80.0));

        assert!(rec.with_channels(vec![Channel::new("B1", "uV", vec![1.0; 7])]).is_err());
    }

    #[test]
    fn test_summary_display() {
        let rec = Recording::new(vec![Channel::new("A1", "uV", vec![0.0; 512])], 256.0, start()).unwrap();
        let text = rec.summary().to_string();
        assert!(text.contains("Sampling Frequency: 256 Hz"));
        assert!(text.contains("Number of Channels: 1"));
        assert!(text.contains("2017-04-23T12:53:28"));
    }
}

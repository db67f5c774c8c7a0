// Internal utilities for documentation tests
// This file contains helper functions to generate test files for doctests

use std::f64::consts::PI;
use std::path::Path;

use chrono::{TimeZone, Utc};

use crate::{EdfWriter, Result, SignalParam};

/// Channel labels of the fixture, as the acquisition system writes them.
pub const SEEG_TEST_LABELS: [&str; 6] = ["EEG TIP1", "EEG TIP2", "EEG TIP4", "EEG BIA1", "EEG BIA2", "EEG ECG"];

/// Sampling rate of the fixture.
pub const SEEG_TEST_SFREQ: i32 = 256;

/// Length of the fixture in seconds (one data record per second).
pub const SEEG_TEST_SECONDS: usize = 8;

/// Creates a small SEEG recording for documentation examples.
///
/// Six channels at 256 Hz for eight seconds, starting 2017-04-23 12:53:28
/// UTC, with one file annotation at 0.5 s. Each contact carries a 10 Hz sine
/// scaled by its position on the shaft plus a 50 Hz component.
pub fn create_seeg_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut writer = EdfWriter::create(&path)?;

    writer.set_patient_info("DOC001", "X", "X", "SEEG Doc")?;
    writer.set_recording_info("DOC", "X", "seegprep")?;
    if let Some(start) = Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).single() {
        writer.set_start_datetime(start)?;
    }

    for label in SEEG_TEST_LABELS {
        writer.add_signal(SignalParam {
            label: label.to_string(),
            samples_in_file: 0,
            physical_max: 500.0,
            physical_min: -500.0,
            digital_max: 32767,
            digital_min: -32768,
            samples_per_record: SEEG_TEST_SFREQ,
            physical_dimension: "uV".to_string(),
            prefilter: "HP:0.1Hz LP:100Hz".to_string(),
            transducer: "SEEG contact".to_string(),
        })?;
    }

    writer.add_annotation(0.5, None, "Recording start")?;

    let sfreq = SEEG_TEST_SFREQ as usize;
    for record in 0..SEEG_TEST_SECONDS {
        let block: Vec<Vec<f64>> = (0..SEEG_TEST_LABELS.len())
            .map(|channel| {
                (0..sfreq)
                    .map(|i| {
                        let t = (record * sfreq + i) as f64 / sfreq as f64;
                        let scale = 20.0 * (channel + 1) as f64;
                        scale * (2.0 * PI * 10.0 * t).sin() + 5.0 * (2.0 * PI * 50.0 * t).sin()
                    })
                    .collect()
            })
            .collect();
        writer.write_samples(&block)?;
    }

    writer.finalize()?;
    Ok(())
}

//! # seegprep
//!
//! Preprocessing for stereo-EEG (SEEG) recordings stored as EDF / EDF+.
//!
//! A run loads one recording, strips the acquisition prefix from the channel
//! names, attaches events imported from the clinical event log, band-pass
//! filters the data and derives bipolar montages for anatomical regions of
//! interest.
//!
//! ## Quick Start
//!
//! ### Loading a recording and attaching events
//!
//! ```rust
//! use chrono::Duration;
//! use seegprep::{attach_events, read_edf, EventRow, Result};
//!
//! fn main() -> Result<()> {
//!     # seegprep::doctest_utils::create_seeg_test_file("quickstart.edf")?;
//!     let mut recording = read_edf("quickstart.edf")?;
//!     recording.strip_channel_prefix("EEG ")?;
//!
//!     let start = recording.meas_date();
//!     let rows = vec![
//!         EventRow::new(start + Duration::seconds(1), start + Duration::seconds(2), "TIP1-TIP2 2mA"),
//!         EventRow::new(start + Duration::seconds(3), start + Duration::seconds(4), "-1"),
//!     ];
//!     let attached = attach_events(&mut recording, &rows)?;
//!
//!     assert_eq!(attached, 2);
//!     assert_eq!(recording.annotations()[1].description, "TIP1-TIP2 2mA");
//!     # std::fs::remove_file("quickstart.edf").ok();
//!     Ok(())
//! }
//! ```
//!
//! ### Filtering and bipolar derivation
//!
//! ```rust
//! use seegprep::{create_bipolar_by_prefix, read_edf, write_recording, Result};
//!
//! fn main() -> Result<()> {
//!     # seegprep::doctest_utils::create_seeg_test_file("montage.edf")?;
//!     let mut recording = read_edf("montage.edf")?;
//!     recording.strip_channel_prefix("EEG ")?;
//!
//!     let filtered = recording.filter(Some(1.0), Some(80.0))?;
//!     let bipolar = create_bipolar_by_prefix(&filtered, &["TIP", "BIA"], "-")?;
//!
//!     assert_eq!(
//!         bipolar.channel_names(),
//!         vec!["TIP1-TIP2", "TIP1-TIP4", "TIP2-TIP4", "BIA1-BIA2"]
//!     );
//!     write_recording(&bipolar, "montage_bipolar.edf")?;
//!     # std::fs::remove_file("montage.edf").ok();
//!     # std::fs::remove_file("montage_bipolar.edf").ok();
//!     Ok(())
//! }
//! ```
//!
//! ### Running from a configuration
//!
//! The whole flow can be described in YAML and executed with
//! [`pipeline::Pipeline`]; see [`config::PipelineConfig`] for the format.

pub mod error;
pub mod types;
pub mod utils;
pub mod reader;
pub mod writer;
pub mod recording;
pub mod annotations;
pub mod filter;
pub mod bipolar;
pub mod config;
pub mod pipeline;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

// Re-export main types for convenience
pub use error::{SeegError, Result};
pub use types::{EdfHeader, SignalParam, Annotation};
pub use reader::{read_edf, EdfReader};
pub use writer::{write_recording, EdfWriter};
pub use recording::{Channel, Recording, RecordingSummary};
pub use annotations::{align_events, attach_events, read_event_table, EventRow, EventTableOptions};
pub use filter::FirFilter;
pub use bipolar::{create_bipolar_by_prefix, BipolarPair};
pub use config::{load_config, save_config, PipelineConfig};
pub use pipeline::{Pipeline, PipelineReport};

// Important constants
pub const EDFLIB_TIME_DIMENSION: i64 = 10_000_000; // 100 nanoseconds unit
pub const EDFLIB_MAXSIGNALS: usize = 4096;
pub const EDFLIB_MAX_ANNOTATION_LEN: usize = 512;

/// Event label meaning "same as the previous event".
pub const MISSING_LABEL_SENTINEL: &str = "-1";
pub const DEFAULT_BIPOLAR_SEPARATOR: &str = "-";

/// Library version
///
/// ```rust
/// assert!(seegprep::version().contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

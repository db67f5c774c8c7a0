use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::EDFLIB_TIME_DIMENSION;

#[derive(Debug, Clone, PartialEq)]
pub enum FileType {
    Edf,
    EdfPlusContinuous,
}

#[derive(Debug, Clone)]
pub struct SignalParam {
    pub label: String,
    pub samples_in_file: i64,
    pub physical_max: f64,
    pub physical_min: f64,
    pub digital_max: i32,
    pub digital_min: i32,
    pub samples_per_record: i32,
    pub physical_dimension: String,
    pub prefilter: String,
    pub transducer: String,
}

impl SignalParam {
    /// Builds a 16-bit signal whose physical range covers `data`.
    ///
    /// A flat signal gets a symmetric range of ±1 around its value so that
    /// the physical min and max never coincide.
    pub fn covering(label: &str, unit: &str, data: &[f64], samples_per_record: i32) -> Self {
        let (mut min, mut max) = data
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if !min.is_finite() || !max.is_finite() {
            min = -1.0;
            max = 1.0;
        }
        if min == max {
            min -= 1.0;
            max += 1.0;
        }
        SignalParam {
            label: label.to_string(),
            samples_in_file: data.len() as i64,
            physical_max: max,
            physical_min: min,
            digital_max: 32767,
            digital_min: -32768,
            samples_per_record,
            physical_dimension: unit.to_string(),
            prefilter: String::new(),
            transducer: String::new(),
        }
    }

    /// 计算物理值转换参数
    pub fn bit_value(&self) -> f64 {
        (self.physical_max - self.physical_min) /
        (self.digital_max - self.digital_min) as f64
    }

    /// 计算偏移量
    pub fn offset(&self) -> f64 {
        self.physical_max / self.bit_value() - self.digital_max as f64
    }

    /// 将数字值转换为物理值
    pub fn to_physical(&self, digital_value: i32) -> f64 {
        self.bit_value() * (self.offset() + digital_value as f64)
    }

    /// 将物理值转换为数字值
    pub fn to_digital(&self, physical_value: f64) -> i32 {
        let digital = (physical_value / self.bit_value()) - self.offset();
        digital.round() as i32
    }
}

/// A timestamped event attached to a recording.
///
/// `onset` and `duration` are in 100 ns units (see
/// [`EDFLIB_TIME_DIMENSION`](crate::EDFLIB_TIME_DIMENSION)); integer units
/// make "same onset" an exact comparison. A duration may be negative when
/// an event log ends an event before it begins.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub onset: i64,             // 相对记录开始（100纳秒为单位）
    pub duration: Option<i64>,  // 持续时间（100纳秒为单位，None表示未知）
    pub description: String,    // UTF-8描述
}

impl Annotation {
    pub fn from_seconds(onset: f64, duration: Option<f64>, description: &str) -> Self {
        Annotation {
            onset: (onset * EDFLIB_TIME_DIMENSION as f64).round() as i64,
            duration: duration.map(|d| (d * EDFLIB_TIME_DIMENSION as f64).round() as i64),
            description: description.to_string(),
        }
    }

    pub fn onset_seconds(&self) -> f64 {
        self.onset as f64 / EDFLIB_TIME_DIMENSION as f64
    }

    /// `None` when the duration is unknown.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration.map(|d| d as f64 / EDFLIB_TIME_DIMENSION as f64)
    }
}

#[derive(Debug)]
pub struct EdfHeader {
    pub file_type: FileType,
    pub signals: Vec<SignalParam>,
    pub file_duration: i64,           // 文件持续时间（100纳秒为单位）
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub starttime_subsecond: i64,     // 亚秒开始时间
    pub datarecords_in_file: i64,
    pub datarecord_duration: i64,     // 数据记录持续时间（100纳秒为单位）
    pub annotations_in_file: i64,

    // EDF+ 特有字段
    pub patient_code: String,
    pub sex: String,
    pub birthdate: String,
    pub patient_name: String,
    pub patient_additional: String,
    pub admin_code: String,
    pub technician: String,
    pub equipment: String,
    pub recording_additional: String,
}

impl EdfHeader {
    /// Absolute start of the recording, including the EDF+ sub-second offset.
    pub fn start_datetime(&self) -> DateTime<Utc> {
        let naive = self.start_date.and_time(self.start_time);
        Utc.from_utc_datetime(&naive)
            + chrono::Duration::nanoseconds(self.starttime_subsecond * 100)
    }
}

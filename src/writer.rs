use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};

use crate::types::{Annotation, SignalParam};
use crate::error::{SeegError, Result};
use crate::recording::Recording;
use crate::utils::{format_edf_number, format_edf_time};
use crate::{EDFLIB_MAX_ANNOTATION_LEN, EDFLIB_TIME_DIMENSION};

const EDFLIB_ANNOTATION_BYTES: usize = 120;

/// Sequential EDF+C writer.
///
/// Signals, patient info and the start time are fixed when the first data
/// record is written. Each call to [`EdfWriter::write_samples`] writes one
/// data record; annotations are stored in the record whose time span holds
/// their onset, so they must be added before that record is written.
///
/// # Examples
///
/// ```rust
/// use seegprep::{EdfWriter, SignalParam};
///
/// let mut writer = EdfWriter::create("writer_doc.edf")?;
/// writer.add_signal(SignalParam {
///     label: "TIP1".to_string(),
///     samples_in_file: 0,
///     physical_max: 500.0,
///     physical_min: -500.0,
///     digital_max: 32767,
///     digital_min: -32768,
///     samples_per_record: 256,
///     physical_dimension: "uV".to_string(),
///     prefilter: "HP:0.1Hz LP:100Hz".to_string(),
///     transducer: "SEEG contact".to_string(),
/// })?;
/// writer.add_annotation(0.5, Some(0.1), "stim TIP1-TIP2")?;
///
/// for _ in 0..3 {
///     writer.write_samples(&[vec![0.0; 256]])?;
/// }
/// writer.finalize()?;
/// # std::fs::remove_file("writer_doc.edf").ok();
/// # Ok::<(), seegprep::SeegError>(())
/// ```
pub struct EdfWriter {
    file: BufWriter<File>,
    signals: Vec<SignalParam>,
    start_date: NaiveDate,
    start_time: NaiveTime,
    starttime_subsecond: i64,
    datarecord_duration: i64,
    records_written: usize,
    header_written: bool,
    // 注释通道每条记录的字节数，写头部时确定
    annotation_bytes: usize,
    // 最后一条记录收纳所有超出文件时长的注释
    expected_records: Option<usize>,

    // EDF+ 字段
    patient_code: String,
    sex: String,
    birthdate: String,
    patient_name: String,
    patient_additional: String,
    admin_code: String,
    technician: String,
    equipment: String,

    annotations: Vec<Annotation>,
    // 数据记录序号 -> 注释下标，写头部时建立
    record_annotations: BTreeMap<usize, Vec<usize>>,
}

impl EdfWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(&path)
            .map_err(|e| SeegError::FileNotFound(format!("{}: {}", path.as_ref().display(), e)))?;

        Ok(EdfWriter {
            file: BufWriter::new(file),
            signals: Vec::new(),
            start_date: NaiveDate::from_ymd_opt(1985, 1, 1).unwrap_or(NaiveDate::MIN),
            start_time: NaiveTime::MIN,
            starttime_subsecond: 0,
            datarecord_duration: EDFLIB_TIME_DIMENSION, // 1秒
            records_written: 0,
            header_written: false,
            annotation_bytes: EDFLIB_ANNOTATION_BYTES,
            expected_records: None,
            patient_code: "X".to_string(),
            sex: "X".to_string(),
            birthdate: "X".to_string(),
            patient_name: "X".to_string(),
            patient_additional: String::new(),
            admin_code: "X".to_string(),
            technician: "X".to_string(),
            equipment: "X".to_string(),
            annotations: Vec::new(),
            record_annotations: BTreeMap::new(),
        })
    }

    fn ensure_header_not_written(&self, what: &str) -> Result<()> {
        if self.header_written {
            return Err(SeegError::InvalidFormat(format!("Cannot modify {} after writing header", what)));
        }
        Ok(())
    }

    /// Adds an ordinary signal.
    ///
    /// The physical range is rounded outward so that it fits the 8-character
    /// header fields.
    pub fn add_signal(&mut self, mut signal: SignalParam) -> Result<()> {
        self.ensure_header_not_written("signals")?;

        if signal.physical_min == signal.physical_max {
            return Err(SeegError::PhysicalMinEqualsMax);
        }
        if signal.digital_min == signal.digital_max {
            return Err(SeegError::DigitalMinEqualsMax);
        }
        if signal.samples_per_record < 1 {
            return Err(SeegError::InvalidFormat(format!(
                "Signal '{}' needs at least one sample per record",
                signal.label
            )));
        }
        if signal.digital_min < i16::MIN as i32 || signal.digital_max > i16::MAX as i32 {
            return Err(SeegError::InvalidFormat(format!(
                "Signal '{}' digital range exceeds 16 bits",
                signal.label
            )));
        }
        if signal.label.len() > 16 {
            log::warn!("Signal label '{}' is longer than 16 characters and will be truncated", signal.label);
        }
        if self.signals.len() + 1 >= crate::EDFLIB_MAXSIGNALS {
            return Err(SeegError::InvalidSignalCount(self.signals.len() as i32 + 1));
        }

        // 头部读回的值必须与写入时使用的换算一致
        signal.physical_min = format_edf_number(signal.physical_min, 8, false)?
            .parse()
            .map_err(|_| SeegError::InvalidFormat("physical minimum".to_string()))?;
        signal.physical_max = format_edf_number(signal.physical_max, 8, true)?
            .parse()
            .map_err(|_| SeegError::InvalidFormat("physical maximum".to_string()))?;
        if signal.physical_min == signal.physical_max {
            return Err(SeegError::PhysicalMinEqualsMax);
        }

        self.signals.push(signal);
        Ok(())
    }

    pub fn set_patient_info(&mut self, code: &str, sex: &str, birthdate: &str, name: &str) -> Result<()> {
        self.ensure_header_not_written("patient info")?;

        self.patient_code = code.to_string();
        self.sex = sex.to_string();
        self.birthdate = birthdate.to_string();
        self.patient_name = name.to_string();
        Ok(())
    }

    pub fn set_recording_info(&mut self, admin_code: &str, technician: &str, equipment: &str) -> Result<()> {
        self.ensure_header_not_written("recording info")?;

        self.admin_code = admin_code.to_string();
        self.technician = technician.to_string();
        self.equipment = equipment.to_string();
        Ok(())
    }

    /// Sets the absolute start; the sub-second part goes into the first
    /// time-keeping TAL.
    pub fn set_start_datetime(&mut self, start: DateTime<Utc>) -> Result<()> {
        self.ensure_header_not_written("start time")?;

        let year = start.year();
        if !(1985..=2084).contains(&year) {
            return Err(SeegError::InvalidFormat(format!("Start year {} outside 1985-2084", year)));
        }
        self.start_date = start.date_naive();
        self.start_time = NaiveTime::from_hms_opt(start.hour(), start.minute(), start.second())
            .unwrap_or(NaiveTime::MIN);
        self.starttime_subsecond = (start.nanosecond() % 1_000_000_000) as i64 / 100;
        Ok(())
    }

    pub fn set_datarecord_duration(&mut self, duration_seconds: f64) -> Result<()> {
        self.ensure_header_not_written("data record duration")?;

        if duration_seconds <= 0.0 || duration_seconds > 3600.0 {
            return Err(SeegError::InvalidFormat("Data record duration must be between 0 and 3600 seconds".to_string()));
        }
        self.datarecord_duration = (duration_seconds * EDFLIB_TIME_DIMENSION as f64).round() as i64;
        Ok(())
    }

    /// Adds an annotation. `onset_seconds` is relative to the start time.
    pub fn add_annotation(&mut self, onset_seconds: f64, duration_seconds: Option<f64>, description: &str) -> Result<()> {
        if onset_seconds < 0.0 {
            return Err(SeegError::InvalidFormat("Annotation onset cannot be negative".to_string()));
        }
        if matches!(duration_seconds, Some(d) if d < 0.0) {
            return Err(SeegError::InvalidFormat("Annotation duration cannot be negative".to_string()));
        }
        self.push_annotation(Annotation::from_seconds(onset_seconds, duration_seconds, description))
    }

    fn push_annotation(&mut self, annotation: Annotation) -> Result<()> {
        if annotation.description.trim().is_empty() {
            return Err(SeegError::InvalidFormat("Annotation description cannot be empty".to_string()));
        }
        if annotation.onset < 0 {
            return Err(SeegError::InvalidFormat("Annotation onset cannot be negative".to_string()));
        }
        if self.header_written && self.record_index_of(&annotation) < self.records_written {
            log::warn!(
                "Annotation '{}' at {} s falls in an already written record and is dropped",
                annotation.description,
                annotation.onset_seconds()
            );
            return Ok(());
        }

        let mut annotation = annotation;
        annotation.description = truncate_description(&annotation.description);
        self.annotations.push(annotation);
        if self.header_written {
            self.bucket_annotation(self.annotations.len() - 1);
        }
        Ok(())
    }

    fn bucket_annotation(&mut self, index: usize) {
        let record = self.record_index_of(&self.annotations[index]);
        self.record_annotations.entry(record).or_default().push(index);
    }

    fn annotations_in_record(&self, record_index: usize) -> impl Iterator<Item = &Annotation> + '_ {
        self.record_annotations
            .get(&record_index)
            .into_iter()
            .flatten()
            .map(move |&i| &self.annotations[i])
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    fn record_index_of(&self, annotation: &Annotation) -> usize {
        let index = (annotation.onset / self.datarecord_duration).max(0) as usize;
        match self.expected_records {
            Some(n) if n > 0 => index.min(n - 1),
            _ => index,
        }
    }

    /// Writes one data record: one `Vec` per signal, each holding exactly
    /// `samples_per_record` physical values.
    pub fn write_samples(&mut self, samples: &[Vec<f64>]) -> Result<()> {
        if samples.len() != self.signals.len() {
            return Err(SeegError::InvalidFormat("Sample count must match signal count".to_string()));
        }

        for (i, signal_samples) in samples.iter().enumerate() {
            let expected_samples = self.signals[i].samples_per_record as usize;
            if signal_samples.len() != expected_samples {
                return Err(SeegError::InvalidFormat(format!(
                    "Signal {} expected {} samples per record, got {}",
                    i, expected_samples, signal_samples.len()
                )));
            }
        }

        if !self.header_written {
            self.write_header()?;
        }

        let mut record = Vec::with_capacity(self.record_size());
        for (signal, signal_samples) in self.signals.iter().zip(samples) {
            for &physical_value in signal_samples {
                let digital_value = signal
                    .to_digital(physical_value)
                    .max(signal.digital_min)
                    .min(signal.digital_max);
                record.extend_from_slice(&(digital_value as i16).to_le_bytes());
            }
        }
        record.extend_from_slice(&self.annotation_tal(self.records_written));

        self.file.write_all(&record)?;
        self.records_written += 1;
        Ok(())
    }

    fn record_size(&self) -> usize {
        self.signals.iter().map(|s| s.samples_per_record as usize * 2).sum::<usize>() + self.annotation_bytes
    }

    /// Flushes the file and patches the data record count in the header.
    pub fn finalize(mut self) -> Result<()> {
        if !self.header_written {
            self.write_header()?;
        }

        let late: usize = self
            .record_annotations
            .range(self.records_written..)
            .map(|(_, indices)| indices.len())
            .sum();
        if late > 0 {
            log::warn!("{} annotations start after the last data record and were not written", late);
        }

        self.file.flush()?;
        let mut file = self
            .file
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        file.seek(SeekFrom::Start(236))?;
        file.write_all(format!("{:<8}", self.records_written).as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// TAL bytes needed by the annotations of one data record.
    fn tal_len(&self, record_index: usize) -> usize {
        let timekeeping = timekeeping_tal(self.record_onset(record_index)).len();
        self.annotations_in_record(record_index)
            .map(|a| annotation_tal(a, self.starttime_subsecond).len())
            .sum::<usize>()
            + timekeeping
    }

    fn record_onset(&self, record_index: usize) -> i64 {
        record_index as i64 * self.datarecord_duration + self.starttime_subsecond
    }

    fn annotation_tal(&self, record_index: usize) -> Vec<u8> {
        let mut tal_data = timekeeping_tal(self.record_onset(record_index));

        for annotation in self.annotations_in_record(record_index) {
            let tal = annotation_tal(annotation, self.starttime_subsecond);
            if tal_data.len() + tal.len() > self.annotation_bytes {
                log::warn!(
                    "No room for annotation '{}' in data record {}, dropped",
                    annotation.description,
                    record_index
                );
                continue;
            }
            tal_data.extend_from_slice(&tal);
        }

        // 用零填充到固定长度
        tal_data.resize(self.annotation_bytes, 0x00);
        tal_data
    }

    fn write_header(&mut self) -> Result<()> {
        if self.signals.is_empty() {
            return Err(SeegError::InvalidSignalCount(0));
        }

        self.record_annotations.clear();
        for index in 0..self.annotations.len() {
            self.bucket_annotation(index);
        }

        // 注释通道大小取已知注释所需的最大值
        let needed = self
            .record_annotations
            .keys()
            .map(|&r| self.tal_len(r))
            .max()
            .unwrap_or(0);
        self.annotation_bytes = needed.max(EDFLIB_ANNOTATION_BYTES);
        self.annotation_bytes += self.annotation_bytes % 2;

        let annotation_signal = SignalParam {
            label: "EDF Annotations".to_string(),
            samples_in_file: 0,
            physical_max: 1.0,
            physical_min: -1.0,
            digital_max: 32767,
            digital_min: -32768,
            samples_per_record: (self.annotation_bytes / 2) as i32,
            physical_dimension: String::new(),
            prefilter: String::new(),
            transducer: String::new(),
        };

        let total_signals = self.signals.len() + 1;
        let header_size = (total_signals + 1) * 256;

        let mut main_header = vec![b' '; 256];
        main_header[0..8].copy_from_slice(b"0       ");

        let patient_field = format!(
            "{} {} {} {} {}",
            edf_word(&self.patient_code),
            edf_word(&self.sex),
            edf_word(&self.birthdate),
            edf_word(&self.patient_name),
            to_ascii(&self.patient_additional),
        );
        put_field(&mut main_header[8..88], patient_field.trim_end());

        let recording_field = format!(
            "Startdate {:02}-{}-{:04} {} {} {}",
            self.start_date.day(),
            month_abbrev(self.start_date.month()),
            self.start_date.year(),
            edf_word(&self.admin_code),
            edf_word(&self.technician),
            edf_word(&self.equipment),
        );
        put_field(&mut main_header[88..168], &recording_field);

        let date_str = format!("{:02}.{:02}.{:02}",
            self.start_date.day(), self.start_date.month(), self.start_date.year() % 100);
        main_header[168..176].copy_from_slice(date_str.as_bytes());

        let time_str = format!("{:02}.{:02}.{:02}",
            self.start_time.hour(), self.start_time.minute(), self.start_time.second());
        main_header[176..184].copy_from_slice(time_str.as_bytes());

        put_field(&mut main_header[184..192], &header_size.to_string());
        put_field(&mut main_header[192..236], "EDF+C");
        // 记录数在finalize时回填
        put_field(&mut main_header[236..244], "-1");
        put_field(&mut main_header[244..252], &format_edf_time(self.datarecord_duration));
        put_field(&mut main_header[252..256], &total_signals.to_string());

        self.file.write_all(&main_header)?;

        let mut all_signals = self.signals.clone();
        all_signals.push(annotation_signal);
        self.write_signal_headers(&all_signals)?;

        self.header_written = true;
        Ok(())
    }

    fn write_signal_headers(&mut self, all_signals: &[SignalParam]) -> Result<()> {
        // 按照EDF字段顺序写入，每个字段所有信号一起写
        let mut block = Vec::with_capacity(all_signals.len() * 256);

        let mut text_field = |width: usize, value: &dyn Fn(&SignalParam) -> String| {
            for signal in all_signals {
                let mut field = vec![b' '; width];
                put_field(&mut field, &value(signal));
                block.extend_from_slice(&field);
            }
        };

        text_field(16, &|s: &SignalParam| s.label.clone());
        text_field(80, &|s: &SignalParam| s.transducer.clone());
        text_field(8, &|s: &SignalParam| s.physical_dimension.clone());
        text_field(8, &|s: &SignalParam| format_edf_number(s.physical_min, 8, false).unwrap_or_else(|_| "-1".to_string()));
        text_field(8, &|s: &SignalParam| format_edf_number(s.physical_max, 8, true).unwrap_or_else(|_| "1".to_string()));
        text_field(8, &|s: &SignalParam| s.digital_min.to_string());
        text_field(8, &|s: &SignalParam| s.digital_max.to_string());
        text_field(80, &|s: &SignalParam| s.prefilter.clone());
        text_field(8, &|s: &SignalParam| s.samples_per_record.to_string());
        text_field(32, &|_: &SignalParam| String::new());

        self.file.write_all(&block)?;
        Ok(())
    }
}

/// Writes a whole [`Recording`] as EDF+C, annotations included.
///
/// Data records last one second when the sampling rate is a whole number
/// of Hz; otherwise the shortest duration (up to 10 s) that holds a whole
/// number of samples is used. A trailing partial record is zero-padded.
///
/// # Examples
///
/// ```rust
/// use seegprep::{read_edf, write_recording};
///
/// # seegprep::doctest_utils::create_seeg_test_file("write_recording_doc.edf")?;
/// let recording = read_edf("write_recording_doc.edf")?;
/// write_recording(&recording, "write_recording_copy.edf")?;
///
/// let copy = read_edf("write_recording_copy.edf")?;
/// assert_eq!(copy.channel_names(), recording.channel_names());
/// # std::fs::remove_file("write_recording_doc.edf").ok();
/// # std::fs::remove_file("write_recording_copy.edf").ok();
/// # Ok::<(), seegprep::SeegError>(())
/// ```
pub fn write_recording<P: AsRef<Path>>(recording: &Recording, path: P) -> Result<()> {
    let (duration_seconds, samples_per_record) = record_layout(recording.sfreq())?;
    let n_times = recording.n_times();
    let n_records = n_times.div_ceil(samples_per_record).max(1);

    let mut writer = EdfWriter::create(&path)?;
    writer.set_start_datetime(recording.meas_date())?;
    writer.set_datarecord_duration(duration_seconds)?;
    writer.expected_records = Some(n_records);

    let prefilter = format!("HP:{}Hz LP:{}Hz", recording.highpass(), recording.lowpass());
    for channel in recording.channels() {
        let mut signal = SignalParam::covering(&channel.name, &channel.unit, &channel.data, samples_per_record as i32);
        signal.prefilter = prefilter.clone();
        writer.add_signal(signal)?;
    }
    for annotation in recording.annotations() {
        writer.push_annotation(annotation.clone())?;
    }

    for record in 0..n_records {
        let start = record * samples_per_record;
        let block: Vec<Vec<f64>> = recording
            .channels()
            .iter()
            .map(|channel| {
                let end = (start + samples_per_record).min(n_times);
                let mut samples = channel.data.get(start..end).unwrap_or(&[]).to_vec();
                samples.resize(samples_per_record, 0.0);
                samples
            })
            .collect();
        writer.write_samples(&block)?;
    }

    writer.finalize()?;
    log::info!(
        "Wrote {} channels, {} records, {} annotations to {}",
        recording.n_channels(),
        n_records,
        recording.annotations().len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Picks (record duration in seconds, samples per record) for `sfreq`.
fn record_layout(sfreq: f64) -> Result<(f64, usize)> {
    for seconds in 1..=10usize {
        let samples = sfreq * seconds as f64;
        if (samples - samples.round()).abs() < 1e-6 && samples.round() >= 1.0 {
            return Ok((seconds as f64, samples.round() as usize));
        }
    }
    Err(SeegError::InvalidFormat(format!(
        "Sampling rate {} Hz cannot be stored with whole samples per record",
        sfreq
    )))
}

fn timekeeping_tal(record_onset: i64) -> Vec<u8> {
    // 时间戳注释，格式: "+<onset>\x14\x14\x00"
    let mut tal = format!("+{}", format_edf_time(record_onset)).into_bytes();
    tal.extend_from_slice(&[0x14, 0x14, 0x00]);
    tal
}

fn annotation_tal(annotation: &Annotation, subsecond: i64) -> Vec<u8> {
    // 格式: "+<onset>[\x15<duration>]\x14<description>\x14\x00"
    let mut tal = format!("+{}", format_edf_time(annotation.onset + subsecond)).into_bytes();
    if let Some(duration) = annotation.duration.filter(|d| *d >= 0) {
        tal.push(0x15);
        tal.extend_from_slice(format_edf_time(duration).as_bytes());
    }
    tal.push(0x14);
    tal.extend_from_slice(annotation.description.as_bytes());
    tal.extend_from_slice(&[0x14, 0x00]);
    tal
}

fn truncate_description(description: &str) -> String {
    // TAL分隔符不能出现在描述中
    let description: String = description
        .chars()
        .map(|c| if matches!(c, '\u{0}' | '\u{14}' | '\u{15}') { ' ' } else { c })
        .collect();
    if description.len() <= EDFLIB_MAX_ANNOTATION_LEN {
        return description;
    }
    let mut end = EDFLIB_MAX_ANNOTATION_LEN;
    while !description.is_char_boundary(end) {
        end -= 1;
    }
    description[..end].to_string()
}

fn put_field(field: &mut [u8], value: &str) {
    let value = to_ascii(value);
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

/// EDF+ subfields may not contain spaces.
fn edf_word(s: &str) -> String {
    let word = to_ascii(s.trim()).replace(' ', "_");
    if word.is_empty() { "X".to_string() } else { word }
}

fn month_abbrev(month: u32) -> &'static str {
    const MONTHS: [&str; 12] = [
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ];
    MONTHS[(month.clamp(1, 12) - 1) as usize]
}

// 工具函数：将字符串转换为 7-bit ASCII，非 ASCII 替换为 '_'
fn to_ascii(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect()
}

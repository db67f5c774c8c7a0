use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use chrono::{NaiveDate, NaiveTime};

use crate::types::{EdfHeader, FileType, SignalParam, Annotation};
use crate::error::{SeegError, Result};
use crate::recording::{Channel, Recording};
use crate::utils::{atoi_nonlocalized, atof_nonlocalized, is_integer_number, parse_edf_time, parse_prefilter};
use crate::EDFLIB_TIME_DIMENSION;

/// Reader for EDF and EDF+ (continuous) files.
///
/// Opening a file parses the header and every EDF+ annotation channel;
/// sample data is read on demand.
///
/// # Examples
///
/// ```rust
/// use seegprep::EdfReader;
///
/// # seegprep::doctest_utils::create_seeg_test_file("reader_doc.edf")?;
/// let mut reader = EdfReader::open("reader_doc.edf")?;
///
/// let header = reader.header();
/// println!("Signals: {}", header.signals.len());
/// println!("Duration: {:.1} s", header.file_duration as f64 / 10_000_000.0);
///
/// let samples = reader.read_physical_samples(0, 256)?;
/// assert_eq!(samples.len(), 256);
/// # std::fs::remove_file("reader_doc.edf").ok();
/// # Ok::<(), seegprep::SeegError>(())
/// ```
pub struct EdfReader {
    file: BufReader<File>,
    header: EdfHeader,
    signal_info: Vec<SignalInfo>,
    // 用户可见信号索引 -> signal_info 索引
    signal_map: Vec<usize>,
    sample_positions: Vec<i64>,
    header_size: usize,
    record_size: usize,
    annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
struct SignalInfo {
    buffer_offset: usize,
    samples_per_record: i32,
    is_annotation: bool,
}

impl EdfReader {
    /// Opens an EDF/EDF+C file and parses its header and annotations.
    ///
    /// # Errors
    ///
    /// * [`SeegError::FileNotFound`] if the file cannot be opened
    /// * [`SeegError::UnsupportedFileType`] for BDF and other non-EDF files
    /// * [`SeegError::DiscontinuousFile`] for EDF+D files
    /// * [`SeegError::InvalidHeader`] / [`SeegError::FormatError`] for
    ///   malformed headers
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .map_err(|e| SeegError::FileNotFound(format!("{}: {}", path.as_ref().display(), e)))?;

        let mut reader = BufReader::new(file);

        let (mut header, signal_info, header_size, record_size) = Self::parse_header(&mut reader)?;

        let signal_map: Vec<usize> = signal_info
            .iter()
            .enumerate()
            .filter(|(_, info)| !info.is_annotation)
            .map(|(i, _)| i)
            .collect();

        let sample_positions = vec![0i64; header.signals.len()];
        let mut annotations_in_file = Vec::new();

        if header.file_type == FileType::EdfPlusContinuous {
            let (annotations, subsecond) = read_annotations(
                &mut reader,
                &signal_info,
                header_size,
                record_size,
                header.datarecords_in_file,
            )?;
            header.starttime_subsecond = subsecond;
            header.annotations_in_file = annotations.len() as i64;
            annotations_in_file = annotations;
        }

        let edf = EdfReader {
            file: reader,
            header,
            signal_info,
            signal_map,
            sample_positions,
            header_size,
            record_size,
            annotations: annotations_in_file,
        };

        log::debug!(
            "Opened {}: {} signals, {} records, {} annotations",
            path.as_ref().display(),
            edf.header.signals.len(),
            edf.header.datarecords_in_file,
            edf.annotations.len()
        );

        Ok(edf)
    }

    pub fn header(&self) -> &EdfHeader {
        &self.header
    }

    /// Annotations from the EDF+ annotation channels, with onsets relative
    /// to the recording start (sub-second offset included).
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Sampling rate of an ordinary signal in Hz.
    pub fn sample_rate(&self, signal: usize) -> Result<f64> {
        let param = self
            .header
            .signals
            .get(signal)
            .ok_or(SeegError::InvalidSignalIndex(signal))?;
        Ok(param.samples_per_record as f64 * EDFLIB_TIME_DIMENSION as f64
            / self.header.datarecord_duration as f64)
    }

    /// Reads up to `count` physical samples from the current position.
    pub fn read_physical_samples(&mut self, signal: usize, count: usize) -> Result<Vec<f64>> {
        let digital_samples = self.read_digital_samples(signal, count)?;

        let signal_param = &self.header.signals[signal];
        let physical_samples = digital_samples
            .into_iter()
            .map(|d| signal_param.to_physical(d))
            .collect();

        Ok(physical_samples)
    }

    /// Reads up to `count` raw digital samples from the current position.
    ///
    /// Fewer samples are returned near the end of the file.
    pub fn read_digital_samples(&mut self, signal: usize, count: usize) -> Result<Vec<i32>> {
        if signal >= self.header.signals.len() {
            return Err(SeegError::InvalidSignalIndex(signal));
        }

        if count == 0 {
            return Ok(Vec::new());
        }

        let info = self.signal_info[self.signal_map[signal]].clone();
        let (digital_min, digital_max, samples_per_record) = {
            let param = &self.header.signals[signal];
            (param.digital_min, param.digital_max, param.samples_per_record as i64)
        };

        // 计算可读取的最大样本数
        let samples_in_file = samples_per_record * self.header.datarecords_in_file;
        let available_samples = (samples_in_file - self.sample_positions[signal]).max(0) as usize;
        let actual_count = count.min(available_samples);

        let mut samples = Vec::with_capacity(actual_count);
        let mut buf = Vec::new();

        while samples.len() < actual_count {
            let current_pos = self.sample_positions[signal];
            let record_index = current_pos / samples_per_record;
            let sample_in_record = current_pos % samples_per_record;

            let file_offset = self.header_size as u64
                + record_index as u64 * self.record_size as u64
                + info.buffer_offset as u64
                + sample_in_record as u64 * 2; // EDF每个样本2字节

            self.file.seek(SeekFrom::Start(file_offset))?;

            // 一次读取当前记录中剩余的样本
            let remaining_in_record = (samples_per_record - sample_in_record) as usize;
            let to_read = (actual_count - samples.len()).min(remaining_in_record);
            buf.resize(to_read * 2, 0);
            self.file.read_exact(&mut buf)?;

            samples.extend(buf.chunks_exact(2).map(|pair| {
                let digital_value = i16::from_le_bytes([pair[0], pair[1]]) as i32;
                digital_value.max(digital_min).min(digital_max)
            }));

            self.sample_positions[signal] = current_pos + to_read as i64;
        }

        Ok(samples)
    }

    /// Moves the read position of `signal`, clamped to the file bounds.
    pub fn seek(&mut self, signal: usize, position: i64) -> Result<i64> {
        if signal >= self.header.signals.len() {
            return Err(SeegError::InvalidSignalIndex(signal));
        }

        let signal_param = &self.header.signals[signal];
        let max_position = signal_param.samples_per_record as i64 * self.header.datarecords_in_file;

        let new_position = position.max(0).min(max_position);
        self.sample_positions[signal] = new_position;

        Ok(new_position)
    }

    pub fn tell(&self, signal: usize) -> Result<i64> {
        if signal >= self.header.signals.len() {
            return Err(SeegError::InvalidSignalIndex(signal));
        }

        Ok(self.sample_positions[signal])
    }

    pub fn rewind(&mut self, signal: usize) -> Result<()> {
        self.seek(signal, 0)?;
        Ok(())
    }

    /// Loads every ordinary signal into a [`Recording`].
    ///
    /// Channel names are the signal labels, the start timestamp is the
    /// header start plus the EDF+ sub-second offset, and the file's
    /// annotations are attached. The recording's high-pass is the highest
    /// `HP:` found in the prefilter fields and its low-pass the lowest `LP:`.
    ///
    /// # Errors
    ///
    /// [`SeegError::MismatchedSampleRate`] if the signals do not all share
    /// one `samples_per_record`.
    pub fn read_recording(&mut self) -> Result<Recording> {
        let rates: Vec<i32> = self.header.signals.iter().map(|s| s.samples_per_record).collect();
        if let Some(&first) = rates.first() {
            if rates.iter().any(|&r| r != first) {
                let detail = self
                    .header
                    .signals
                    .iter()
                    .map(|s| format!("{}={}", s.label, s.samples_per_record))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(SeegError::MismatchedSampleRate(detail));
            }
        }
        let sfreq = match rates.first() {
            Some(_) => self.sample_rate(0)?,
            None => return Err(SeegError::InvalidRecording("file has no data signals".to_string())),
        };

        let mut channels = Vec::with_capacity(self.header.signals.len());
        for i in 0..self.header.signals.len() {
            self.rewind(i)?;
            let count = self.header.signals[i].samples_in_file.max(0) as usize;
            let data = self.read_physical_samples(i, count)?;
            let param = &self.header.signals[i];
            channels.push(Channel::new(&param.label, &param.physical_dimension, data));
        }

        let mut recording = Recording::new(channels, sfreq, self.header.start_datetime())?;
        recording.set_annotations(self.annotations.clone());

        let mut highpass: Option<f64> = None;
        let mut lowpass: Option<f64> = None;
        for signal in &self.header.signals {
            let (hp, lp) = parse_prefilter(&signal.prefilter);
            if let Some(hp) = hp {
                highpass = Some(highpass.map_or(hp, |h| h.max(hp)));
            }
            if let Some(lp) = lp {
                lowpass = Some(lowpass.map_or(lp, |l| l.min(lp)));
            }
        }
        recording.set_filter_info(highpass.unwrap_or(0.0), lowpass.unwrap_or(sfreq / 2.0));

        log::info!(
            "Loaded recording: {} channels at {} Hz, {} samples, {} annotations",
            recording.n_channels(),
            sfreq,
            recording.n_times(),
            recording.annotations().len()
        );

        Ok(recording)
    }

    fn parse_header(reader: &mut BufReader<File>) -> Result<(EdfHeader, Vec<SignalInfo>, usize, usize)> {
        // 读取主头部（256字节）
        reader.seek(SeekFrom::Start(0))?;
        let mut main_header = vec![0u8; 256];
        reader.read_exact(&mut main_header)?;

        // 验证EDF标识（BDF以0xFF开头）
        let version = String::from_utf8_lossy(&main_header[0..8]);
        if main_header[0] != b'0' || !version.trim().eq("0") {
            return Err(SeegError::UnsupportedFileType(format!("Not an EDF file: {}", version.trim())));
        }

        let signals_str = String::from_utf8_lossy(&main_header[252..256]);
        if !is_integer_number(&signals_str) {
            return Err(SeegError::InvalidHeader);
        }
        let total_signal_count = atoi_nonlocalized(&signals_str);
        if total_signal_count < 1 || total_signal_count > crate::EDFLIB_MAXSIGNALS as i32 {
            return Err(SeegError::InvalidSignalCount(total_signal_count));
        }

        let header_size_str = String::from_utf8_lossy(&main_header[184..192]);
        let expected_header_size = (total_signal_count + 1) * 256;
        let actual_header_size = atoi_nonlocalized(&header_size_str);
        if actual_header_size != expected_header_size {
            return Err(SeegError::InvalidHeader);
        }

        let reserved = String::from_utf8_lossy(&main_header[192..236]);
        let file_type = if reserved.starts_with("EDF+C") {
            FileType::EdfPlusContinuous
        } else if reserved.starts_with("EDF+D") {
            return Err(SeegError::DiscontinuousFile);
        } else {
            FileType::Edf
        };

        let patient_field = String::from_utf8_lossy(&main_header[8..88]).trim().to_string();
        let recording_field = String::from_utf8_lossy(&main_header[88..168]).trim().to_string();

        let date_str = String::from_utf8_lossy(&main_header[168..176]);
        let time_str = String::from_utf8_lossy(&main_header[176..184]);

        let (start_date, start_time) = Self::parse_datetime(&date_str, &time_str)?;

        let datarecords_str = String::from_utf8_lossy(&main_header[236..244]);
        let datarecords = atoi_nonlocalized(&datarecords_str) as i64;
        if datarecords < 0 {
            return Err(SeegError::InvalidFormat(format!("Invalid number of data records: {}", datarecords)));
        }

        let duration_str = String::from_utf8_lossy(&main_header[244..252]);
        let datarecord_duration = parse_edf_time(&duration_str)?;
        if datarecord_duration <= 0 {
            return Err(SeegError::InvalidFormat(format!("Invalid data record duration: {}", duration_str.trim())));
        }

        let signal_header_size = total_signal_count as usize * 256;
        let mut signal_header = vec![0u8; signal_header_size];
        reader.read_exact(&mut signal_header)?;

        let (signals, signal_info, total_record_size) = Self::parse_signals(
            &signal_header,
            total_signal_count as usize,
            datarecords,
            file_type == FileType::EdfPlusContinuous,
        )?;

        // 普通EDF的患者/记录字段是自由文本
        let (patient_code, sex, birthdate, patient_name, patient_additional) = match file_type {
            FileType::EdfPlusContinuous => Self::parse_edfplus_patient(&patient_field),
            FileType::Edf => (String::new(), String::new(), String::new(), patient_field.clone(), String::new()),
        };

        let (admin_code, technician, equipment, recording_additional) = match file_type {
            FileType::EdfPlusContinuous => Self::parse_edfplus_recording(&recording_field),
            FileType::Edf => (String::new(), String::new(), String::new(), recording_field.clone()),
        };

        let header = EdfHeader {
            file_type,
            signals,
            file_duration: datarecord_duration * datarecords,
            start_date,
            start_time,
            starttime_subsecond: 0,
            datarecords_in_file: datarecords,
            datarecord_duration,
            annotations_in_file: 0,
            patient_code,
            sex,
            birthdate,
            patient_name,
            patient_additional,
            admin_code,
            technician,
            equipment,
            recording_additional,
        };

        Ok((header, signal_info, expected_header_size as usize, total_record_size))
    }

    fn parse_datetime(date_str: &str, time_str: &str) -> Result<(NaiveDate, NaiveTime)> {
        // 日期 "dd.mm.yy"
        let date_parts: Vec<&str> = date_str.split('.').collect();
        if date_parts.len() != 3 {
            return Err(SeegError::FormatError);
        }

        let day = atoi_nonlocalized(date_parts[0]);
        let month = atoi_nonlocalized(date_parts[1]);
        let year = {
            let yy = atoi_nonlocalized(date_parts[2]);
            if yy > 84 { 1900 + yy } else { 2000 + yy }
        };

        let start_date = NaiveDate::from_ymd_opt(year, month as u32, day as u32)
            .ok_or(SeegError::FormatError)?;

        // 时间 "hh.mm.ss"
        let time_parts: Vec<&str> = time_str.split('.').collect();
        if time_parts.len() != 3 {
            return Err(SeegError::FormatError);
        }

        let hour = atoi_nonlocalized(time_parts[0]);
        let minute = atoi_nonlocalized(time_parts[1]);
        let second = atoi_nonlocalized(time_parts[2]);

        let start_time = NaiveTime::from_hms_opt(hour as u32, minute as u32, second as u32)
            .ok_or(SeegError::FormatError)?;

        Ok((start_date, start_time))
    }

    fn parse_signals(
        signal_header: &[u8],
        total_signal_count: usize,
        datarecords: i64,
        is_edfplus: bool,
    ) -> Result<(Vec<SignalParam>, Vec<SignalInfo>, usize)> {
        let mut signals = Vec::new();
        let mut signal_info = Vec::new();
        let mut buffer_offset = 0;

        let field = |start: usize, width: usize, i: usize| -> String {
            let begin = total_signal_count * start + i * width;
            String::from_utf8_lossy(&signal_header[begin..begin + width]).trim().to_string()
        };

        for i in 0..total_signal_count {
            let label = field(0, 16, i);
            let is_annotation = is_edfplus && label == "EDF Annotations";

            let transducer = field(16, 80, i);
            let physical_dimension = field(96, 8, i);
            let physical_min = atof_nonlocalized(&field(104, 8, i));
            let physical_max = atof_nonlocalized(&field(112, 8, i));
            let digital_min = atoi_nonlocalized(&field(120, 8, i));
            let digital_max = atoi_nonlocalized(&field(128, 8, i));
            let prefilter = field(136, 80, i);
            let samples_per_record = atoi_nonlocalized(&field(216, 8, i));

            if samples_per_record < 1 {
                return Err(SeegError::InvalidFormat(format!(
                    "Signal '{}' has {} samples per record",
                    label, samples_per_record
                )));
            }

            signal_info.push(SignalInfo {
                buffer_offset,
                samples_per_record,
                is_annotation,
            });

            // 只有非注释信号才添加到用户可见的信号列表中
            if !is_annotation {
                if physical_min == physical_max {
                    return Err(SeegError::PhysicalMinEqualsMax);
                }
                if digital_min == digital_max {
                    return Err(SeegError::DigitalMinEqualsMax);
                }

                signals.push(SignalParam {
                    label,
                    samples_in_file: samples_per_record as i64 * datarecords,
                    physical_max,
                    physical_min,
                    digital_max,
                    digital_min,
                    samples_per_record,
                    physical_dimension,
                    prefilter,
                    transducer,
                });
            }

            // 每个样本2字节
            buffer_offset += samples_per_record as usize * 2;
        }

        Ok((signals, signal_info, buffer_offset))
    }

    fn parse_edfplus_patient(patient_field: &str) -> (String, String, String, String, String) {
        // EDF+ 患者字段格式: "patientcode sex birthdate patientname additional_info"
        let parts: Vec<&str> = patient_field.split_whitespace().collect();

        let patient_code = parts.first().unwrap_or(&"").to_string();
        let sex = parts.get(1).unwrap_or(&"").to_string();
        let birthdate = parts.get(2).unwrap_or(&"").to_string();
        let patient_name = parts.get(3).unwrap_or(&"").replace('_', " ");
        let patient_additional = parts.get(4..).map(|s| s.join(" ")).unwrap_or_default();

        (patient_code, sex, birthdate, patient_name, patient_additional)
    }

    fn parse_edfplus_recording(recording_field: &str) -> (String, String, String, String) {
        // EDF+ 记录字段格式: "Startdate dd-MMM-yyyy admincode technician equipment additional_info"
        let parts: Vec<&str> = recording_field.split_whitespace().collect();

        let admin_code = parts.get(2).unwrap_or(&"").to_string();
        let technician = parts.get(3).unwrap_or(&"").to_string();
        let equipment = parts.get(4).unwrap_or(&"").to_string();
        let recording_additional = parts.get(5..).map(|s| s.join(" ")).unwrap_or_default();

        (admin_code, technician, equipment, recording_additional)
    }
}

/// Reads every TAL of every annotation channel.
///
/// Returns the annotations (onsets relative to the true recording start)
/// and the sub-second start offset taken from the first time-keeping TAL.
fn read_annotations(
    file: &mut BufReader<File>,
    signal_info: &[SignalInfo],
    header_size: usize,
    record_size: usize,
    datarecords: i64,
) -> Result<(Vec<Annotation>, i64)> {
    let annotation_channels: Vec<&SignalInfo> = signal_info
        .iter()
        .filter(|info| info.is_annotation)
        .collect();

    let mut annotations = Vec::new();
    let mut subsecond = 0i64;
    let mut buf = Vec::new();

    for record in 0..datarecords {
        for (channel_idx, info) in annotation_channels.iter().enumerate() {
            let offset = header_size as u64
                + record as u64 * record_size as u64
                + info.buffer_offset as u64;
            file.seek(SeekFrom::Start(offset))?;
            buf.resize(info.samples_per_record as usize * 2, 0);
            file.read_exact(&mut buf)?;

            let tals = match parse_tal_block(&buf) {
                Ok(tals) => tals,
                Err(e) => {
                    log::warn!("Skipping annotation block in record {}: {}", record, e);
                    continue;
                }
            };

            for (tal_idx, tal) in tals.into_iter().enumerate() {
                // 第一个注释通道的第一个TAL是时间戳
                if channel_idx == 0 && tal_idx == 0 {
                    if record == 0 {
                        subsecond = tal.onset.rem_euclid(EDFLIB_TIME_DIMENSION);
                    }
                    if tal.descriptions.is_empty() {
                        continue;
                    }
                }
                for description in tal.descriptions {
                    annotations.push(Annotation {
                        onset: tal.onset,
                        duration: tal.duration,
                        description,
                    });
                }
            }
        }
    }

    // TAL时间相对于头部的整秒开始时间
    for annotation in &mut annotations {
        annotation.onset -= subsecond;
    }

    Ok((annotations, subsecond))
}

/// One Time-stamped Annotations List.
#[derive(Debug)]
struct Tal {
    onset: i64,
    duration: Option<i64>,
    descriptions: Vec<String>,
}

/// Splits an annotation channel block into TALs.
///
/// Format per TAL: `+onset[\x15duration]\x14text\x14[text\x14...]\x00`.
/// Trailing zero padding is ignored.
fn parse_tal_block(block: &[u8]) -> Result<Vec<Tal>> {
    let mut tals = Vec::new();

    for chunk in block.split(|&b| b == 0x00) {
        if chunk.is_empty() {
            continue;
        }

        let mut parts = chunk.split(|&b| b == 0x14);
        let timing = parts.next().unwrap_or(&[]);

        let mut timing_parts = timing.split(|&b| b == 0x15);
        let onset_text = String::from_utf8_lossy(timing_parts.next().unwrap_or(&[])).to_string();
        if !onset_text.starts_with('+') && !onset_text.starts_with('-') {
            return Err(SeegError::InvalidFormat(format!("Invalid TAL onset '{}'", onset_text)));
        }
        let onset = parse_edf_time(&onset_text)?;
        let duration = match timing_parts.next() {
            Some(d) if !d.is_empty() => Some(parse_edf_time(&String::from_utf8_lossy(d))?),
            _ => None,
        };

        let descriptions = parts
            .map(|p| String::from_utf8_lossy(p).to_string())
            .filter(|s| !s.is_empty())
            .collect();

        tals.push(Tal {
            onset,
            duration,
            descriptions,
        });
    }

    Ok(tals)
}

/// Opens `path` and loads it as a [`Recording`].
pub fn read_edf<P: AsRef<Path>>(path: P) -> Result<Recording> {
    EdfReader::open(path)?.read_recording()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tal_block() {
        let block = b"+0.25\x14\x14\x00+1.5\x152\x14Stim A\x14\x00+3\x14B\x14C\x14\x00\x00\x00";
        let tals = parse_tal_block(block).unwrap();
        assert_eq!(tals.len(), 3);

        assert_eq!(tals[0].onset, 2_500_000);
        assert!(tals[0].descriptions.is_empty());

        assert_eq!(tals[1].onset, 15_000_000);
        assert_eq!(tals[1].duration, Some(20_000_000));
        assert_eq!(tals[1].descriptions, vec!["Stim A".to_string()]);

        assert_eq!(tals[2].duration, None);
        assert_eq!(tals[2].descriptions, vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_parse_tal_block_rejects_garbage() {
        assert!(parse_tal_block(b"garbage\x14\x00").is_err());
    }

    #[test]
    fn test_parse_datetime() {
        let (date, time) = EdfReader::parse_datetime("23.04.17", "12.53.28").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2017, 4, 23).unwrap());
        assert_eq!(time, NaiveTime::from_hms_opt(12, 53, 28).unwrap());

        let (date, _) = EdfReader::parse_datetime("01.01.85", "00.00.00").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1985, 1, 1).unwrap());

        assert!(EdfReader::parse_datetime("23-04-17", "12.53.28").is_err());
        assert!(EdfReader::parse_datetime("32.01.17", "12.53.28").is_err());
    }
}

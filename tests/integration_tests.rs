use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use seegprep::config::{BipolarConfig, FilterConfig, RegionConfig};
use seegprep::{
    create_bipolar_by_prefix, load_config, read_edf, save_config, write_recording, Annotation, Channel, EdfReader,
    EdfWriter, Pipeline, PipelineConfig, Recording, SeegError, SignalParam,
};
use tempfile::tempdir;

// 创建测试信号的辅助函数
fn create_test_signal(label: &str, samples_per_record: i32) -> SignalParam {
    SignalParam {
        label: label.to_string(),
        samples_in_file: 0,
        physical_max: 200.0,
        physical_min: -200.0,
        digital_max: 32767,
        digital_min: -32768,
        samples_per_record,
        physical_dimension: "uV".to_string(),
        prefilter: "HP:0.1Hz LP:70Hz".to_string(),
        transducer: "SEEG contact".to_string(),
    }
}

fn sine(freq: f64, amplitude: f64, sfreq: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| amplitude * (2.0 * PI * freq * i as f64 / sfreq).sin()).collect()
}

// 4秒、256Hz的SEEG记录，含"EEG "前缀
fn write_seeg_file(path: &Path) {
    let labels = ["EEG TIP1", "EEG TIP2", "EEG TIP4", "EEG BIA1", "EEG BIA2", "EEG H1"];
    let mut writer = EdfWriter::create(path).unwrap();
    writer.set_patient_info("P001", "F", "X", "Test Patient").unwrap();
    writer
        .set_start_datetime(Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).unwrap())
        .unwrap();
    for label in labels {
        writer.add_signal(create_test_signal(label, 256)).unwrap();
    }

    for second in 0..4 {
        let block: Vec<Vec<f64>> = (0..labels.len())
            .map(|c| {
                (0..256)
                    .map(|i| {
                        let t = (second * 256 + i) as f64 / 256.0;
                        10.0 * (c + 1) as f64 * (2.0 * PI * 10.0 * t).sin()
                    })
                    .collect()
            })
            .collect();
        writer.write_samples(&block).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_basic_write_read_cycle() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("basic.edf");

    {
        let mut writer = EdfWriter::create(&path).unwrap();
        writer.set_patient_info("P001", "M", "01-JAN-1990", "Test Patient").unwrap();
        writer.add_signal(create_test_signal("TIP1", 256)).unwrap();

        for second in 0..5 {
            let samples: Vec<f64> = (0..256)
                .map(|i| {
                    let t = (second * 256 + i) as f64 / 256.0;
                    50.0 * (2.0 * PI * 10.0 * t).sin()
                })
                .collect();
            writer.write_samples(&[samples]).unwrap();
        }
        writer.finalize().unwrap();
    }

    let mut reader = EdfReader::open(&path).unwrap();
    let header = reader.header();
    assert_eq!(header.signals.len(), 1);
    assert_eq!(header.signals[0].label, "TIP1");
    assert_eq!(header.datarecords_in_file, 5);
    assert_eq!(header.file_duration, 5 * 10_000_000);
    assert!(header.patient_name.contains("Test"));
    assert_eq!(reader.sample_rate(0).unwrap(), 256.0);

    let samples = reader.read_physical_samples(0, 256).unwrap();
    assert_eq!(samples.len(), 256);
    let expected = sine(10.0, 50.0, 256.0, 256);
    for (read, written) in samples.iter().zip(&expected) {
        assert!((read - written).abs() < 0.01);
    }

    // 越界读取只返回剩余样本
    reader.seek(0, 1200).unwrap();
    assert_eq!(reader.read_physical_samples(0, 500).unwrap().len(), 80);
    assert_eq!(reader.tell(0).unwrap(), 1280);

    assert!(matches!(reader.read_physical_samples(3, 1), Err(SeegError::InvalidSignalIndex(3))));
}

#[test]
fn test_recording_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("round_trip.edf");

    let start = Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).unwrap() + Duration::milliseconds(250);
    let mut recording = Recording::new(
        vec![
            Channel::new("TIP1-TIP2", "uV", sine(7.0, 80.0, 512.0, 1024)),
            Channel::new("TIP1-TIP4", "uV", sine(13.0, 30.0, 512.0, 1024)),
        ],
        512.0,
        start,
    )
    .unwrap();
    recording.set_annotations(vec![
        Annotation::from_seconds(0.0, Some(0.5), "TIP1-TIP2 1mA"),
        Annotation::from_seconds(1.25, None, "TIP1-TIP2 2mA"),
    ]);
    recording.set_filter_info(1.0, 80.0);

    write_recording(&recording, &path).unwrap();
    let loaded = read_edf(&path).unwrap();

    assert_eq!(loaded.channel_names(), recording.channel_names());
    assert_eq!(loaded.sfreq(), 512.0);
    assert_eq!(loaded.meas_date(), start);
    assert_eq!(loaded.n_times(), 1024);
    assert_eq!(loaded.annotations(), recording.annotations());
    assert_eq!((loaded.highpass(), loaded.lowpass()), (1.0, 80.0));

    for (read, written) in loaded.channels().iter().zip(recording.channels()) {
        let max_error = read
            .data
            .iter()
            .zip(&written.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(max_error < 0.01, "{}: {}", read.name, max_error);
    }
}

#[test]
fn test_annotations_spread_over_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("annotations.edf");

    let mut writer = EdfWriter::create(&path).unwrap();
    writer.add_signal(create_test_signal("H1", 100)).unwrap();
    writer.add_annotation(0.1, None, "first").unwrap();
    writer.add_annotation(2.5, Some(1.0), "second").unwrap();
    writer.add_annotation(2.5, None, "same onset, other text").unwrap();
    assert_eq!(writer.annotation_count(), 3);
    for _ in 0..4 {
        writer.write_samples(&[vec![0.0; 100]]).unwrap();
    }
    writer.finalize().unwrap();

    let reader = EdfReader::open(&path).unwrap();
    let annotations = reader.annotations();
    assert_eq!(annotations.len(), 3);
    assert_eq!(annotations[0].description, "first");
    assert_eq!(annotations[1].onset, 25_000_000);
    assert_eq!(annotations[1].duration_seconds(), Some(1.0));
    assert_eq!(annotations[2].duration_seconds(), None);
}

#[test]
fn test_mismatched_sample_rates_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mixed.edf");

    let mut writer = EdfWriter::create(&path).unwrap();
    writer.add_signal(create_test_signal("TIP1", 256)).unwrap();
    writer.add_signal(create_test_signal("TIP2", 128)).unwrap();
    writer.write_samples(&[vec![0.0; 256], vec![0.0; 128]]).unwrap();
    writer.finalize().unwrap();

    let mut reader = EdfReader::open(&path).unwrap();
    assert_eq!(reader.sample_rate(1).unwrap(), 128.0);
    assert!(matches!(reader.read_recording(), Err(SeegError::MismatchedSampleRate(_))));
}

#[test]
fn test_open_missing_and_invalid_files() {
    let dir = tempdir().unwrap();

    let missing = dir.path().join("missing.edf");
    assert!(matches!(EdfReader::open(&missing), Err(SeegError::FileNotFound(_))));

    let garbage = dir.path().join("garbage.edf");
    fs::write(&garbage, vec![b'x'; 300]).unwrap();
    assert!(EdfReader::open(&garbage).is_err());
}

#[test]
fn test_filter_then_bipolar_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seeg.edf");
    write_seeg_file(&path);

    let mut recording = read_edf(&path).unwrap();
    recording.strip_channel_prefix("EEG ").unwrap();
    assert_eq!(recording.channel_names(), vec!["TIP1", "TIP2", "TIP4", "BIA1", "BIA2", "H1"]);

    let filtered = recording.filter(Some(1.0), Some(80.0)).unwrap();
    let bipolar = create_bipolar_by_prefix(&filtered, &["TIP", "H"], "-").unwrap();

    assert_eq!(bipolar.channel_names(), vec!["TIP1-TIP2", "TIP1-TIP4", "TIP2-TIP4"]);
    assert_eq!(bipolar.n_times(), recording.n_times());
    assert_eq!((bipolar.highpass(), bipolar.lowpass()), (1.0, 80.0));

    // 原始记录不受影响
    assert_eq!(recording.n_channels(), 6);
    assert_eq!(recording.highpass(), 0.1);
}

#[test]
fn test_pipeline_run_with_config_file() {
    let dir = tempdir().unwrap();
    let edf_path = dir.path().join("patient.edf");
    write_seeg_file(&edf_path);

    let events_path = dir.path().join("events.csv");
    fs::write(
        &events_path,
        "Begin,End,Text\n\
         23/04/2017 12:53:20,23/04/2017 12:53:21,before start\n\
         23/04/2017 12:53:29,23/04/2017 12:53:29.5,TIP1-TIP2 1mA\n\
         23/04/2017 12:53:30,23/04/2017 12:53:30.5,-1\n\
         23/04/2017 12:53:30,23/04/2017 12:53:31,duplicate\n\
         23/04/2017 12:53:31,23/04/2017 12:53:31.5,BIA1-BIA2 2mA\n",
    )
    .unwrap();

    let config = PipelineConfig {
        recording: edf_path.clone(),
        events: Some(events_path),
        events_delimiter: ",".to_string(),
        strip_channel_prefix: "EEG ".to_string(),
        filter: Some(FilterConfig {
            l_freq: Some(1.0),
            h_freq: Some(80.0),
        }),
        bipolar: BipolarConfig {
            separator: "-".to_string(),
            regions: vec![
                RegionConfig::new("broca", &["BIA"]),
                RegionConfig::new("wernicke", &["TIP", "H", "TBA"]),
            ],
        },
        output_dir: Some(dir.path().join("out")),
    };

    let config_path = dir.path().join("pipeline.yaml");
    save_config(&config, &config_path).unwrap();
    let loaded = load_config(&config_path).unwrap();
    assert_eq!(loaded, config);

    let report = Pipeline::new(loaded).unwrap().run().unwrap();
    assert_eq!(report.annotations_attached, 3);
    assert_eq!(report.summary.n_channels, 6);
    assert_eq!(report.regions.len(), 2);
    assert_eq!(report.regions[0].channels, vec!["BIA1-BIA2"]);
    assert_eq!(report.regions[1].channels, vec!["TIP1-TIP2", "TIP1-TIP4", "TIP2-TIP4"]);

    let broca_path = dir.path().join("out").join("broca.edf");
    assert_eq!(report.regions[0].output.as_deref(), Some(broca_path.as_path()));

    let broca = read_edf(&broca_path).unwrap();
    assert_eq!(broca.channel_names(), vec!["BIA1-BIA2"]);
    let labels: Vec<&str> = broca.annotations().iter().map(|a| a.description.as_str()).collect();
    assert_eq!(labels, vec!["TIP1-TIP2 1mA", "TIP1-TIP2 1mA", "BIA1-BIA2 2mA"]);
    assert_eq!(broca.annotations()[0].onset, 10_000_000);
    assert_eq!(broca.annotations()[0].duration, Some(5_000_000));

    let text = report.to_string();
    assert!(text.contains("Region wernicke (3 bipolar channels)"));
}

#[test]
fn test_pipeline_region_without_pairs_aborts() {
    let dir = tempdir().unwrap();
    let edf_path = dir.path().join("patient.edf");
    write_seeg_file(&edf_path);

    let config = PipelineConfig {
        recording: edf_path,
        events: None,
        filter: None,
        bipolar: BipolarConfig {
            separator: "-".to_string(),
            regions: vec![
                RegionConfig::new("broca", &["BIA"]),
                RegionConfig::new("parietal", &["PT", "H"]),
            ],
        },
        output_dir: None,
        ..PipelineConfig::default()
    };

    let result = Pipeline::new(config).unwrap().run();
    match result {
        Err(e @ SeegError::NoBipolarChannels(_)) => {
            assert!(e.is_data_error());
            assert!(e.to_string().contains("PT, H"));
        }
        other => panic!("expected NoBipolarChannels, got {:?}", other.map(|r| r.regions.len())),
    }
}

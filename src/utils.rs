use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::error::{SeegError, Result};

/// 检查字符串是否为有效的整数
pub fn is_integer_number(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }

    let digits = s.strip_prefix('+').or_else(|| s.strip_prefix('-')).unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// 解析EDF时间字符串为100纳秒单位
pub fn parse_edf_time(s: &str) -> Result<i64> {
    let s = s.trim();

    if s.is_empty() {
        return Err(SeegError::InvalidFormat("Empty time string".to_string()));
    }

    // 处理符号
    let (negative, s) = if let Some(rest) = s.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest)
    } else {
        (false, s)
    };

    let mut value = 0i64;

    if let Some(dot_pos) = s.find('.') {
        let integer_part = &s[..dot_pos];
        let decimal_part = &s[dot_pos + 1..];

        if !integer_part.is_empty() {
            value += integer_part.parse::<i64>()
                .map_err(|_| SeegError::InvalidFormat(format!("Invalid integer part in '{}'", s)))?
                * crate::EDFLIB_TIME_DIMENSION;
        }

        // 小数部分最多7位精度
        if !decimal_part.is_empty() {
            let decimal_str = if decimal_part.len() > 7 {
                &decimal_part[..7]
            } else {
                decimal_part
            };

            let decimal_value = decimal_str.parse::<i64>()
                .map_err(|_| SeegError::InvalidFormat(format!("Invalid decimal part in '{}'", s)))?;

            let scale = 10i64.pow(7 - decimal_str.len() as u32);
            value += decimal_value * scale;
        }
    } else {
        value = s.parse::<i64>()
            .map_err(|_| SeegError::InvalidFormat(format!("Invalid integer '{}'", s)))?
            * crate::EDFLIB_TIME_DIMENSION;
    }

    if negative {
        value = -value;
    }

    Ok(value)
}

/// Formats a 100 ns time value as seconds without trailing zeros ("1.5", "3").
pub fn format_edf_time(value: i64) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let value = value.unsigned_abs();
    let dimension = crate::EDFLIB_TIME_DIMENSION as u64;
    let whole = value / dimension;
    let fraction = value % dimension;
    if fraction == 0 {
        format!("{}{}", sign, whole)
    } else {
        let fraction = format!("{:07}", fraction);
        format!("{}{}.{}", sign, whole, fraction.trim_end_matches('0'))
    }
}

/// Formats `value` into at most `width` characters for an EDF header field.
///
/// Precision is reduced until the text fits; the value is rounded away from
/// the data (up when `round_up`, down otherwise) so that a physical range
/// written this way still covers the samples it was computed from.
pub fn format_edf_number(value: f64, width: usize, round_up: bool) -> Result<String> {
    if !value.is_finite() {
        return Err(SeegError::InvalidFormat(format!("Cannot encode {} in an EDF header", value)));
    }
    for decimals in (0..width).rev() {
        let scale = 10f64.powi(decimals as i32);
        let scaled = value * scale;
        // 已经可表示的值保持不变，避免浮点误差导致重复取整
        let rounded = if (scaled - scaled.round()).abs() < 1e-6 {
            scaled.round() / scale
        } else if round_up {
            scaled.ceil() / scale
        } else {
            scaled.floor() / scale
        };
        let text = format!("{:.*}", decimals, rounded);
        let text = if text.contains('.') {
            text.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            text
        };
        let text = if text == "-0" { "0".to_string() } else { text };
        if text.len() <= width {
            return Ok(text);
        }
    }
    Err(SeegError::InvalidFormat(format!("{} does not fit in {} characters", value, width)))
}

/// 非本地化的整数解析（避免受系统locale影响）
pub fn atoi_nonlocalized(s: &str) -> i32 {
    let s = s.trim();
    if s.is_empty() {
        return 0;
    }

    s.parse().unwrap_or(0)
}

/// 非本地化的浮点数解析
pub fn atof_nonlocalized(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }

    s.parse().unwrap_or(0.0)
}

fn prefilter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(HP|LP)\s*:\s*(DC|[0-9]*\.?[0-9]+)\s*(k|m)?(?:Hz)?")
            .expect("prefilter pattern is valid")
    })
}

/// Extracts the (high-pass, low-pass) cutoffs in Hz from an EDF prefilter
/// field such as `"HP:0.1Hz LP:70Hz N:50Hz"`. `HP:DC` reads as 0 Hz.
pub fn parse_prefilter(prefilter: &str) -> (Option<f64>, Option<f64>) {
    let mut highpass = None;
    let mut lowpass = None;

    for caps in prefilter_pattern().captures_iter(prefilter) {
        let value = if caps[2].eq_ignore_ascii_case("DC") {
            0.0
        } else {
            match caps[2].parse::<f64>() {
                Ok(v) => v,
                Err(_) => continue,
            }
        };
        let value = match caps.get(3).map(|m| m.as_str()) {
            Some("k") | Some("K") => value * 1000.0,
            Some("m") | Some("M") => value / 1000.0,
            _ => value,
        };
        if caps[1].eq_ignore_ascii_case("HP") {
            highpass = Some(value);
        } else {
            lowpass = Some(value);
        }
    }

    (highpass, lowpass)
}

const DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S%.f",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d"];

/// Parses a day-first spreadsheet timestamp and localises it to UTC.
///
/// ISO (year-first) timestamps are accepted as well, the way spreadsheet
/// exports mix both.
pub fn parse_day_first_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let trimmed = s.trim();

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&naive));
            }
        }
    }

    Err(SeegError::InvalidTimestamp(trimmed.to_string()))
}

/// Signed difference `later - earlier` in 100 ns units.
///
/// Rounds to the nearest unit, halves away from zero, the same way
/// [`crate::Annotation::from_seconds`] rounds.
pub fn time_delta(earlier: &DateTime<Utc>, later: &DateTime<Utc>) -> i64 {
    let delta = *later - *earlier;
    match delta.num_nanoseconds() {
        Some(ns) => {
            let (units, rest) = (ns / 100, ns % 100);
            if rest >= 50 {
                units + 1
            } else if rest <= -50 {
                units - 1
            } else {
                units
            }
        }
        // 超出纳秒范围时退回到微秒精度
        None => delta.num_microseconds().map(|us| us * 10).unwrap_or(i64::MAX),
    }
}

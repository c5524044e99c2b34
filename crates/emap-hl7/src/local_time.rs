//! HL7时间戳解释
//!
//! 上游时间戳通常不带时区偏移，一律按医院所在时区的本地时间解释，
//! 与运行主机的时区无关。精度可以低至年月日，缺失部分取零。

use crate::error::{Hl7Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// 解释HL7时间戳（`YYYY[MM[DD[HH[MM[SS[.S+]]]]]][+/-ZZZZ]`）。
/// 空值返回 `Ok(None)`，无法解析返回 `DataType` 错误。
pub fn interpret_local_time(raw: &str, timezone: Tz) -> Result<Option<DateTime<Utc>>> {
    let value = raw.trim();
    if value.is_empty() || value == "\"\"" {
        return Ok(None);
    }

    let (clock, offset) = split_offset(value)?;
    let naive = parse_naive(clock).ok_or_else(|| bad_timestamp(value))?;

    let instant = match offset {
        Some(fixed) => fixed
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
        None => resolve_local(naive, timezone),
    };

    instant.map(Some).ok_or_else(|| bad_timestamp(value))
}

/// 解释只有日期的值（至少8位）
pub fn parse_date(raw: &str) -> Result<Option<NaiveDate>> {
    let value = raw.trim();
    if value.is_empty() || value == "\"\"" {
        return Ok(None);
    }
    if value.len() < 8 || !value.is_char_boundary(8) {
        return Err(bad_timestamp(value));
    }
    NaiveDate::parse_from_str(&value[..8], "%Y%m%d")
        .map(Some)
        .map_err(|_| bad_timestamp(value))
}

/// 8位纯日期
pub fn is_date_only(raw: &str) -> bool {
    let value = raw.trim();
    value.len() == 8 && value.chars().all(|c| c.is_ascii_digit())
}

fn bad_timestamp(value: &str) -> Hl7Error {
    Hl7Error::DataType(format!("Unparseable HL7 timestamp: {}", value))
}

fn split_offset(value: &str) -> Result<(&str, Option<FixedOffset>)> {
    // 日期部分不会出现 +/-，只在第4位之后查找
    let position = value
        .char_indices()
        .skip(4)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i);

    let Some(position) = position else {
        return Ok((value, None));
    };

    let (clock, zone) = value.split_at(position);
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let digits = &zone[1..];
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad_timestamp(value));
    }
    let hours: i32 = digits[..2].parse().map_err(|_| bad_timestamp(value))?;
    let minutes: i32 = digits[2..].parse().map_err(|_| bad_timestamp(value))?;
    let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(|| bad_timestamp(value))?;

    Ok((clock, Some(offset)))
}

fn parse_naive(clock: &str) -> Option<NaiveDateTime> {
    let (digits, fraction) = match clock.split_once('.') {
        Some((d, f)) => (d, Some(f)),
        None => (clock, None),
    };
    if !digits.chars().all(|c| c.is_ascii_digit()) || !matches!(digits.len(), 4 | 6 | 8 | 10 | 12 | 14) {
        return None;
    }

    let part = |from: usize, to: usize, default: u32| -> Option<u32> {
        if digits.len() >= to {
            digits[from..to].parse().ok()
        } else {
            Some(default)
        }
    };

    let year: i32 = digits[0..4].parse().ok()?;
    let month = part(4, 6, 1)?;
    let day = part(6, 8, 1)?;
    let hour = part(8, 10, 0)?;
    let minute = part(10, 12, 0)?;
    let second = part(12, 14, 0)?;

    let nanos = match fraction {
        Some(f) if !f.is_empty() && f.len() <= 9 && f.chars().all(|c| c.is_ascii_digit()) => {
            let scaled = format!("{:0<9}", f);
            scaled.parse::<u32>().ok()?
        }
        Some(_) => return None,
        None => 0,
    };

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_nano_opt(hour, minute, second, nanos)
}

/// 夏令时重叠取较早的时刻；落在跳变空档内的时间向后顺延一小时
fn resolve_local(naive: NaiveDateTime, timezone: Tz) -> Option<DateTime<Utc>> {
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| timezone.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

//! Date, DateTime, DateTime64, Time, and Time64 encodings.
//!
//! Naive datetimes on insert are interpreted as UTC unless the column
//! declares a zone; decoded datetimes follow the read context's timezone
//! policy. Time values are signed durations bounded at ±999:59:59[.frac].

use chrono::{DateTime, NaiveDate, Timelike};

use crate::binary::{ByteSink, ByteSource};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::formats::ReadFormat;
use crate::tz::Tz;
use crate::value::Value;

/// Upper bound for Time columns: 999:59:59 in seconds.
pub const MAX_TIME_SECONDS: i64 = 999 * 3600 + 59 * 60 + 59;

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch")
}

pub fn read_date(src: &mut ByteSource, num_rows: usize, ctx: &ReadContext) -> Result<Vec<Value>> {
    let days = src.read_u16s(num_rows)?;
    if ctx.read_format("Date") == ReadFormat::Int {
        return Ok(days.into_iter().map(|d| Value::Int64(i64::from(d))).collect());
    }
    Ok(days
        .into_iter()
        .map(|d| Value::Date(epoch_date() + chrono::Duration::days(i64::from(d))))
        .collect())
}

pub fn read_date32(src: &mut ByteSource, num_rows: usize, ctx: &ReadContext) -> Result<Vec<Value>> {
    let days = src.read_i32s(num_rows)?;
    if ctx.read_format("Date32") == ReadFormat::Int {
        return Ok(days.into_iter().map(|d| Value::Int64(i64::from(d))).collect());
    }
    Ok(days
        .into_iter()
        .map(|d| Value::Date(epoch_date() + chrono::Duration::days(i64::from(d))))
        .collect())
}

fn date_days(v: &Value, ctx: &WriteContext) -> Result<i64> {
    match v {
        Value::Null => Ok(0),
        Value::Date(d) => Ok((*d - epoch_date()).num_days()),
        Value::DateTime(dt) => Ok((dt.date() - epoch_date()).num_days()),
        Value::DateTimeTz(dt) => Ok((dt.date_naive() - epoch_date()).num_days()),
        other => other.to_i128().map(|v| v as i64).ok_or_else(|| {
            Error::Data(format!(
                "expected a date for column '{}', got {other:?}",
                ctx.column_name
            ))
        }),
    }
}

pub fn write_date(column: &[Value], sink: &mut ByteSink, ctx: &WriteContext) -> Result<()> {
    for v in column {
        let days = date_days(v, ctx)?;
        if !(0..=i64::from(u16::MAX)).contains(&days) {
            return Err(Error::Data(format!(
                "date out of range for column '{}' (Date)",
                ctx.column_name
            )));
        }
        sink.write_u16(days as u16);
    }
    Ok(())
}

pub fn write_date32(column: &[Value], sink: &mut ByteSink, ctx: &WriteContext) -> Result<()> {
    for v in column {
        let days = date_days(v, ctx)?;
        let days = i32::try_from(days).map_err(|_| {
            Error::Data(format!(
                "date out of range for column '{}' (Date32)",
                ctx.column_name
            ))
        })?;
        sink.write_i32(days);
    }
    Ok(())
}

pub fn read_datetime(
    column_tz: Option<Tz>,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let secs = src.read_u32s(num_rows)?;
    if ctx.read_format("DateTime") == ReadFormat::Int {
        return Ok(secs.into_iter().map(|s| Value::Int64(i64::from(s))).collect());
    }
    let active = ctx.active_tz(column_tz);
    Ok(secs
        .into_iter()
        .map(|s| match active {
            Some(tz) => Value::DateTimeTz(tz.datetime_from_epoch(i64::from(s))),
            None => Value::DateTime(
                DateTime::from_timestamp(i64::from(s), 0)
                    .expect("u32 seconds in range")
                    .naive_utc(),
            ),
        })
        .collect())
}

/// Epoch seconds for an insert value. Naive datetimes resolve in the
/// column zone when one is declared, otherwise as UTC.
fn epoch_seconds(v: &Value, column_tz: Option<Tz>, ctx: &WriteContext) -> Result<i64> {
    match v {
        Value::Null => Ok(0),
        Value::DateTime(dt) => Ok(match column_tz {
            Some(tz) => tz.epoch_from_naive(*dt),
            None => dt.and_utc().timestamp(),
        }),
        Value::DateTimeTz(dt) => Ok(dt.timestamp()),
        Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0).expect("midnight").and_utc().timestamp()),
        Value::String(s) => parse_datetime_text(s).map(|dt| match column_tz {
            Some(tz) => tz.epoch_from_naive(dt),
            None => dt.and_utc().timestamp(),
        }),
        other => other.to_i128().map(|v| v as i64).ok_or_else(|| {
            Error::Data(format!(
                "expected a datetime for column '{}', got {other:?}",
                ctx.column_name
            ))
        }),
    }
}

fn subsecond_nanos(v: &Value) -> u32 {
    match v {
        Value::DateTime(dt) => dt.nanosecond() % 1_000_000_000,
        Value::DateTimeTz(dt) => dt.nanosecond() % 1_000_000_000,
        Value::String(s) => parse_datetime_text(s)
            .map(|dt| dt.nanosecond() % 1_000_000_000)
            .unwrap_or(0),
        _ => 0,
    }
}

fn parse_datetime_text(s: &str) -> Result<chrono::NaiveDateTime> {
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d"] {
        if fmt == "%Y-%m-%d" {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                return Ok(d.and_hms_opt(0, 0, 0).expect("midnight"));
            }
        } else if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    Err(Error::Data(format!("cannot parse '{s}' as a datetime")))
}

pub fn write_datetime(
    column_tz: Option<Tz>,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    for v in column {
        let secs = epoch_seconds(v, column_tz, ctx)?;
        let secs = u32::try_from(secs).map_err(|_| {
            Error::Data(format!(
                "datetime out of range for column '{}' (DateTime)",
                ctx.column_name
            ))
        })?;
        sink.write_u32(secs);
    }
    Ok(())
}

pub fn read_datetime64(
    scale: u32,
    column_tz: Option<Tz>,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let ticks = src.read_i64s(num_rows)?;
    if ctx.read_format("DateTime64") == ReadFormat::Int {
        return Ok(ticks.into_iter().map(Value::Int64).collect());
    }
    let precision = 10i64.pow(scale);
    let active = ctx.active_tz(column_tz);
    Ok(ticks
        .into_iter()
        .map(|t| {
            let secs = t.div_euclid(precision);
            let frac = t.rem_euclid(precision);
            let nanos = (frac as u64 * 10u64.pow(9 - scale)) as u32;
            match active {
                Some(tz) => Value::DateTimeTz(tz.datetime_from_parts(secs, nanos)),
                None => Value::DateTime(
                    DateTime::from_timestamp(secs, nanos)
                        .map(|dt| dt.naive_utc())
                        .unwrap_or_else(|| DateTime::UNIX_EPOCH.naive_utc()),
                ),
            }
        })
        .collect())
}

pub fn write_datetime64(
    scale: u32,
    column_tz: Option<Tz>,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    let precision = i128::from(10i64.pow(scale));
    for v in column {
        if let Some(raw) = v.to_i128() {
            // Pre-scaled ticks.
            let ticks = i64::try_from(raw).map_err(|_| tick_overflow(ctx))?;
            sink.write_i64(ticks);
            continue;
        }
        let secs = i128::from(epoch_seconds(v, column_tz, ctx)?);
        let nanos = i128::from(subsecond_nanos(v));
        let ticks = secs * precision + (nanos * precision) / 1_000_000_000;
        sink.write_i64(i64::try_from(ticks).map_err(|_| tick_overflow(ctx))?);
    }
    Ok(())
}

fn tick_overflow(ctx: &WriteContext) -> Error {
    Error::Data(format!(
        "datetime out of range for column '{}' (DateTime64)",
        ctx.column_name
    ))
}

pub fn read_time(src: &mut ByteSource, num_rows: usize, ctx: &ReadContext) -> Result<Vec<Value>> {
    let ticks = src.read_i32s(num_rows)?;
    time_values(ticks.into_iter().map(i64::from), 0, ctx.read_format("Time"))
}

pub fn read_time64(
    scale: u32,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let ticks = src.read_i64s(num_rows)?;
    time_values(ticks.into_iter(), scale, ctx.read_format("Time64"))
}

fn time_values(
    ticks: impl Iterator<Item = i64>,
    scale: u32,
    fmt: ReadFormat,
) -> Result<Vec<Value>> {
    Ok(ticks
        .map(|t| match fmt {
            ReadFormat::Int => Value::Int64(t),
            ReadFormat::String => Value::String(crate::value::format_time_ticks(t, scale)),
            _ => Value::Time { ticks: t, scale },
        })
        .collect())
}

pub fn write_time(column: &[Value], sink: &mut ByteSink, ctx: &WriteContext) -> Result<()> {
    for v in column {
        let ticks = time_ticks(v, 0, ctx)?;
        sink.write_i32(ticks as i32);
    }
    Ok(())
}

pub fn write_time64(
    scale: u32,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    for v in column {
        sink.write_i64(time_ticks(v, scale, ctx)?);
    }
    Ok(())
}

fn time_ticks(v: &Value, scale: u32, ctx: &WriteContext) -> Result<i64> {
    let precision = 10i64.pow(scale);
    let max = MAX_TIME_SECONDS * precision + (precision - 1);
    let ticks = match v {
        Value::Null => 0,
        Value::Time { ticks, scale: s } => rescale_ticks(*ticks, *s, scale),
        Value::String(s) => parse_time_literal(s, scale)?,
        other => other.to_i128().map(|v| v as i64).ok_or_else(|| {
            Error::Data(format!(
                "expected a time for column '{}', got {other:?}",
                ctx.column_name
            ))
        })?,
    };
    if ticks < -max || ticks > max {
        return Err(Error::Data(format!(
            "time value out of range for column '{}'",
            ctx.column_name
        )));
    }
    Ok(ticks)
}

/// Converts between tick precisions, truncating toward zero when the
/// target is coarser.
fn rescale_ticks(ticks: i64, from: u32, to: u32) -> i64 {
    if from == to {
        ticks
    } else if from < to {
        ticks * 10i64.pow(to - from)
    } else {
        ticks / 10i64.pow(from - to)
    }
}

/// Parses `[-]H{1,3}:MM:SS[.frac]`. Extra fractional digits beyond the
/// column scale truncate.
pub fn parse_time_literal(text: &str, scale: u32) -> Result<i64> {
    let bad = || Error::Data(format!("invalid time literal '{text}'"));
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let mut parts = body.split(':');
    let hours: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let minutes: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let sec_part = parts.next().ok_or_else(bad)?;
    if parts.next().is_some() {
        return Err(bad());
    }
    let (seconds_text, frac_text) = match sec_part.split_once('.') {
        Some((s, f)) => (s, f),
        None => (sec_part, ""),
    };
    let seconds: i64 = seconds_text.parse().map_err(|_| bad())?;
    if hours > 999 || !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return Err(bad());
    }
    if !frac_text.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let precision = 10i64.pow(scale);
    let mut frac_digits = frac_text.to_owned();
    frac_digits.truncate(scale as usize);
    while frac_digits.len() < scale as usize {
        frac_digits.push('0');
    }
    let frac: i64 = if frac_digits.is_empty() {
        0
    } else {
        frac_digits.parse().map_err(|_| bad())?
    };
    let mut ticks = (hours * 3600 + minutes * 60 + seconds) * precision + frac;
    if negative {
        ticks = -ticks;
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn date_round_trip() {
        let column = vec![
            Value::Date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
            Value::Date(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()),
        ];
        let mut sink = ByteSink::new();
        write_date(&column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_date(&mut src, 2, &ReadContext::default()).unwrap(), column);
    }

    #[test]
    fn date32_covers_pre_epoch() {
        let column = vec![Value::Date(NaiveDate::from_ymd_opt(1925, 1, 1).unwrap())];
        let mut sink = ByteSink::new();
        write_date32(&column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_date32(&mut src, 1, &ReadContext::default()).unwrap(), column);
    }

    #[test]
    fn datetime_naive_round_trip() {
        let column = vec![Value::DateTime(naive("2024-05-01 10:30:00"))];
        let mut sink = ByteSink::new();
        write_datetime(None, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut ctx = ReadContext::default();
        ctx.apply_server_timezone = false;
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_datetime(None, &mut src, 1, &ctx).unwrap(), column);
    }

    #[test]
    fn datetime_column_zone_applies() {
        let tz = Tz::named("Europe/Berlin").unwrap();
        let column = vec![Value::DateTime(naive("2024-01-15 12:00:00"))];
        let mut sink = ByteSink::new();
        write_datetime(Some(tz), &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let decoded = read_datetime(Some(tz), &mut src, 1, &ReadContext::default()).unwrap();
        match &decoded[0] {
            Value::DateTimeTz(dt) => {
                assert_eq!(dt.naive_local(), naive("2024-01-15 12:00:00"));
            }
            other => panic!("expected aware datetime, got {other:?}"),
        }
    }

    #[test]
    fn datetime64_subsecond_round_trip() {
        let column = vec![
            Value::DateTime(naive("1970-01-01 00:00:00")),
            Value::DateTime(naive("2024-05-01 10:30:00.123456")),
        ];
        let mut sink = ByteSink::new();
        write_datetime64(6, None, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut ctx = ReadContext::default();
        ctx.apply_server_timezone = false;
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_datetime64(6, None, &mut src, 2, &ctx).unwrap(), column);
    }

    #[test]
    fn datetime64_far_future_microseconds() {
        let column = vec![Value::DateTime(naive("2299-12-31 23:59:59.999999"))];
        let mut sink = ByteSink::new();
        write_datetime64(6, None, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut ctx = ReadContext::default();
        ctx.apply_server_timezone = false;
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_datetime64(6, None, &mut src, 1, &ctx).unwrap(), column);
    }

    #[test]
    fn datetime64_int_format_returns_ticks() {
        let mut sink = ByteSink::new();
        write_datetime64(
            3,
            None,
            &[Value::Int64(1_500)],
            &mut sink,
            &WriteContext::new(),
        )
        .unwrap();
        let mut ctx = ReadContext::default();
        ctx.formats.set_class("DateTime64", ReadFormat::Int);
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(
            read_datetime64(3, None, &mut src, 1, &ctx).unwrap(),
            vec![Value::Int64(1_500)]
        );
    }

    #[test]
    fn time_extremes() {
        let max = MAX_TIME_SECONDS;
        let column = vec![
            Value::Time { ticks: max, scale: 0 },
            Value::Time { ticks: -max, scale: 0 },
        ];
        let mut sink = ByteSink::new();
        write_time(&column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_time(&mut src, 2, &ReadContext::default()).unwrap(), column);

        let mut sink = ByteSink::new();
        let err = write_time(
            &[Value::Time { ticks: max + 1, scale: 0 }],
            &mut sink,
            &WriteContext::new(),
        );
        assert!(matches!(err, Err(Error::Data(_))));
    }

    #[test]
    fn time_literal_parsing() {
        assert_eq!(parse_time_literal("001:02:03", 0).unwrap(), 3723);
        assert_eq!(parse_time_literal("-999:59:59", 0).unwrap(), -3_599_999);
        assert_eq!(parse_time_literal("000:00:01.5", 3).unwrap(), 1_500);
        // Fractions floor away at scale 0.
        assert_eq!(parse_time_literal("000:00:01.9", 0).unwrap(), 1);
        assert!(parse_time_literal("00:61:00", 0).is_err());
        assert!(parse_time_literal("1000:00:00", 0).is_err());
    }

    #[test]
    fn time64_string_format() {
        let mut sink = ByteSink::new();
        write_time64(
            3,
            &[Value::String("012:34:56.789".to_owned())],
            &mut sink,
            &WriteContext::new(),
        )
        .unwrap();
        let mut ctx = ReadContext::default();
        ctx.formats.set_class("Time64", ReadFormat::String);
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(
            read_time64(3, &mut src, 1, &ctx).unwrap(),
            vec![Value::String("012:34:56.789".to_owned())]
        );
    }
}

//! Text forms of PostgreSQL `interval` values.

use sqlx::postgres::types::PgInterval;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

enum Unit {
    Months(i32),
    Days(i32),
    Micros(i64),
}

fn unit(word: &str) -> Option<Unit> {
    let unit = match word.to_ascii_lowercase().as_str() {
        "year" | "years" | "yr" | "yrs" | "y" => Unit::Months(12),
        "month" | "months" | "mon" | "mons" => Unit::Months(1),
        "week" | "weeks" | "w" => Unit::Days(7),
        "day" | "days" | "d" => Unit::Days(1),
        "hour" | "hours" | "hr" | "hrs" | "h" => Unit::Micros(MICROS_PER_HOUR),
        "minute" | "minutes" | "min" | "mins" | "m" => Unit::Micros(MICROS_PER_MINUTE),
        "second" | "seconds" | "sec" | "secs" | "s" => Unit::Micros(MICROS_PER_SECOND),
        "millisecond" | "milliseconds" | "ms" => Unit::Micros(1_000),
        "microsecond" | "microseconds" | "us" => Unit::Micros(1),
        _ => return None,
    };
    Some(unit)
}

/// Parses the common PostgreSQL input forms: `"1 hour"`, `"2 days 30 mins"`,
/// `"1 year 2 mons 3 days 04:05:06"`, a bare `"HH:MM[:SS[.ffffff]]"`, or a
/// bare number of seconds.
///
/// Year, month, week and day counts must be whole numbers.
pub(crate) fn parse_interval(raw: &str) -> Option<PgInterval> {
    let mut interval = PgInterval::default();
    let mut words = raw.split_whitespace().peekable();
    words.peek()?;

    while let Some(word) = words.next() {
        if word.contains(':') {
            interval.microseconds = interval.microseconds.checked_add(parse_clock(word)?)?;
            continue;
        }

        let quantity: f64 = word.parse().ok().filter(|q: &f64| q.is_finite())?;
        let unit = match words.peek() {
            Some(next) => {
                let unit = unit(next)?;
                words.next();
                unit
            }
            None => Unit::Micros(MICROS_PER_SECOND),
        };

        match unit {
            Unit::Months(scale) => {
                let months = whole(quantity)?.checked_mul(scale)?;
                interval.months = interval.months.checked_add(months)?;
            }
            Unit::Days(scale) => {
                let days = whole(quantity)?.checked_mul(scale)?;
                interval.days = interval.days.checked_add(days)?;
            }
            Unit::Micros(scale) => {
                let micros = (quantity * scale as f64).round();
                if micros.abs() >= i64::MAX as f64 {
                    return None;
                }
                interval.microseconds = interval.microseconds.checked_add(micros as i64)?;
            }
        }
    }

    Some(interval)
}

fn whole(quantity: f64) -> Option<i32> {
    (quantity.fract() == 0.0 && quantity.abs() <= i32::MAX as f64).then_some(quantity as i32)
}

/// `[-]HH:MM[:SS[.ffffff]]` as microseconds.
fn parse_clock(raw: &str) -> Option<i64> {
    let (negative, clock) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let mut parts = clock.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: f64 = match parts.next() {
        Some(s) => s.parse().ok().filter(|s: &f64| s.is_finite() && *s >= 0.0)?,
        None => 0.0,
    };
    if parts.next().is_some() || hours < 0 || !(0..60).contains(&minutes) || seconds >= 60.0 {
        return None;
    }

    let micros = hours
        .checked_mul(MICROS_PER_HOUR)?
        .checked_add(minutes * MICROS_PER_MINUTE)?
        .checked_add((seconds * MICROS_PER_SECOND as f64).round() as i64)?;
    Some(if negative { -micros } else { micros })
}

/// Renders an interval the way PostgreSQL's default `IntervalStyle` does,
/// e.g. `1 year 2 mons 3 days 04:05:06`.
pub(crate) fn format_interval(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    push_count(&mut parts, interval.months / 12, "year");
    push_count(&mut parts, interval.months % 12, "mon");
    push_count(&mut parts, interval.days, "day");

    if interval.microseconds != 0 || parts.is_empty() {
        parts.push(format_clock(interval.microseconds));
    }
    parts.join(" ")
}

fn push_count(parts: &mut Vec<String>, count: i32, unit: &str) {
    if count != 0 {
        let plural = if count == 1 { "" } else { "s" };
        parts.push(format!("{count} {unit}{plural}"));
    }
}

fn format_clock(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let total = micros.unsigned_abs();
    let hours = total / MICROS_PER_HOUR as u64;
    let minutes = total % MICROS_PER_HOUR as u64 / MICROS_PER_MINUTE as u64;
    let seconds = total % MICROS_PER_MINUTE as u64 / MICROS_PER_SECOND as u64;
    let fraction = total % MICROS_PER_SECOND as u64;

    let mut out = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
    if fraction != 0 {
        let digits = format!("{fraction:06}");
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

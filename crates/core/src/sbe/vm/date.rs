//! Date builtins. Every operation resolves its time zone through the time zone database handle
//! passed as its first argument.

use anyhow::Result;
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, Weekday};

use crate::val::handles::TimeZone;
use crate::val::{TypeTags, Value};

const DATE_ADD_OVERFLOW: i32 = 5166406;

/// The calendar and clock units understood by `dateDiff` and `dateAdd`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
	Year,
	Quarter,
	Month,
	Week,
	Day,
	Hour,
	Minute,
	Second,
	Millisecond,
}

impl TimeUnit {
	pub fn parse(name: &str) -> Option<Self> {
		Some(match name {
			"year" => TimeUnit::Year,
			"quarter" => TimeUnit::Quarter,
			"month" => TimeUnit::Month,
			"week" => TimeUnit::Week,
			"day" => TimeUnit::Day,
			"hour" => TimeUnit::Hour,
			"minute" => TimeUnit::Minute,
			"second" => TimeUnit::Second,
			"millisecond" => TimeUnit::Millisecond,
			_ => return None,
		})
	}

	fn fixed_millis(self) -> Option<i64> {
		match self {
			TimeUnit::Hour => Some(3_600_000),
			TimeUnit::Minute => Some(60_000),
			TimeUnit::Second => Some(1_000),
			TimeUnit::Millisecond => Some(1),
			_ => None,
		}
	}
}

/// Parses a day of the week, by full or three letter name, in any case
pub fn parse_day_of_week(name: &str) -> Option<Weekday> {
	Some(match name.to_ascii_lowercase().as_str() {
		"monday" | "mon" => Weekday::Mon,
		"tuesday" | "tue" => Weekday::Tue,
		"wednesday" | "wed" => Weekday::Wed,
		"thursday" | "thu" => Weekday::Thu,
		"friday" | "fri" => Weekday::Fri,
		"saturday" | "sat" => Weekday::Sat,
		"sunday" | "sun" => Weekday::Sun,
		_ => return None,
	})
}

/// The instant represented by a date-like value, in milliseconds since the epoch.
///
/// Timestamps contribute their seconds component, and object ids their creation time.
pub fn date_millis(value: &Value) -> Option<i64> {
	match value.tag() {
		TypeTags::Date => match value {
			Value::Date(ms) => Some(*ms),
			_ => None,
		},
		TypeTags::Timestamp => match value {
			Value::Timestamp(ts) => Some((ts >> 32) as i64 * 1000),
			_ => None,
		},
		t if t.is_object_id() => {
			let bytes: [u8; 4] = value.object_id_bytes()?.get(..4)?.try_into().ok()?;
			Some(u32::from_be_bytes(bytes) as i64 * 1000)
		}
		_ => None,
	}
}

fn resolve(tzdb: &Value, tz: &Value) -> Option<TimeZone> {
	let Value::TimeZoneDB(db) = tzdb else {
		return None;
	};
	db.get_time_zone(tz.string_view()?)
}

pub fn is_timezone(tzdb: &Value, tz: &Value) -> Value {
	Value::Boolean(resolve(tzdb, tz).is_some())
}

/// Extracts `dayOfMonth`, `dayOfWeek` (Sunday is 1) or `dayOfYear` in the given time zone
pub fn date_part(part: &str, tzdb: &Value, date: &Value, tz: &Value) -> Value {
	let (Some(zone), Some(ms)) = (resolve(tzdb, tz), date_millis(date)) else {
		return Value::Nothing;
	};
	let Some(local) = zone.to_local(ms) else {
		return Value::Nothing;
	};
	Value::NumberInt32(match part {
		"dayOfMonth" => local.day() as i32,
		"dayOfWeek" => local.weekday().number_from_sunday() as i32,
		"dayOfYear" => local.ordinal() as i32,
		_ => return Value::Nothing,
	})
}

fn wall_millis(local: &NaiveDateTime) -> i64 {
	local.and_utc().timestamp_millis()
}

fn week_index(date: NaiveDate, start_of_week: Weekday) -> i64 {
	// Day one of the common era is a Monday
	let days = date.num_days_from_ce() as i64 - 1 - start_of_week.num_days_from_monday() as i64;
	days.div_euclid(7)
}

fn month_index(date: NaiveDate) -> i64 {
	date.year() as i64 * 12 + date.month0() as i64
}

/// Counts the unit boundaries crossed between two instants, observed in the given time zone
pub fn date_diff(
	tzdb: &Value,
	start: &Value,
	end: &Value,
	unit: &Value,
	tz: &Value,
	start_of_week: Option<&Value>,
) -> Value {
	let (Some(zone), Some(start), Some(end)) = (resolve(tzdb, tz), date_millis(start), date_millis(end))
	else {
		return Value::Nothing;
	};
	let Some(unit) = unit.string_view().and_then(TimeUnit::parse) else {
		return Value::Nothing;
	};
	let sow = match start_of_week {
		Some(v) => match v.string_view().and_then(parse_day_of_week) {
			Some(day) => day,
			None => return Value::Nothing,
		},
		None => Weekday::Sun,
	};
	let (Some(ls), Some(le)) = (zone.to_local(start), zone.to_local(end)) else {
		return Value::Nothing;
	};
	let diff = match unit {
		TimeUnit::Millisecond => end - start,
		TimeUnit::Second | TimeUnit::Minute | TimeUnit::Hour => {
			let size = unit.fixed_millis().unwrap_or(1);
			wall_millis(&le).div_euclid(size) - wall_millis(&ls).div_euclid(size)
		}
		TimeUnit::Day => le.date().num_days_from_ce() as i64 - ls.date().num_days_from_ce() as i64,
		TimeUnit::Week => week_index(le.date(), sow) - week_index(ls.date(), sow),
		TimeUnit::Month => month_index(le.date()) - month_index(ls.date()),
		TimeUnit::Quarter => month_index(le.date()).div_euclid(3) - month_index(ls.date()).div_euclid(3),
		TimeUnit::Year => le.year() as i64 - ls.year() as i64,
	};
	Value::NumberInt64(diff)
}

fn add_months(local: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
	let count = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
	if months >= 0 {
		local.checked_add_months(count)
	} else {
		local.checked_sub_months(count)
	}
}

/// Adds an integral amount of a unit to an instant.
///
/// Clock units move the instant itself. Calendar units move the wall clock time in the given
/// time zone, clamping the day to the end of a shorter month.
pub fn date_add(tzdb: &Value, start: &Value, unit: &Value, amount: &Value, tz: &Value) -> Result<Value> {
	let (Some(zone), Some(start)) = (resolve(tzdb, tz), date_millis(start)) else {
		return Ok(Value::Nothing);
	};
	let (Some(unit), Value::NumberInt64(amount)) = (unit.string_view().and_then(TimeUnit::parse), amount)
	else {
		return Ok(Value::Nothing);
	};
	let result = match unit.fixed_millis() {
		Some(size) => amount.checked_mul(size).and_then(|delta| start.checked_add(delta)),
		None => zone.to_local(start).and_then(|local| {
			let moved = match unit {
				TimeUnit::Day => local.checked_add_signed(chrono::Duration::try_days(*amount)?),
				TimeUnit::Week => {
					local.checked_add_signed(chrono::Duration::try_weeks(*amount)?)
				}
				TimeUnit::Month => add_months(local, *amount),
				TimeUnit::Quarter => add_months(local, amount.checked_mul(3)?),
				_ => add_months(local, amount.checked_mul(12)?),
			}?;
			zone.from_local(&moved)
		}),
	};
	match result {
		Some(ms) => Ok(Value::Date(ms)),
		None => Err(anyhow::Error::new(crate::err::Error::fail(DATE_ADD_OVERFLOW, "dateAdd overflowed"))),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use rstest::rstest;

	use super::*;
	use crate::val::TimeZoneDatabase;

	fn tzdb() -> Value {
		Value::TimeZoneDB(Arc::new(TimeZoneDatabase::new()))
	}

	fn date(s: &str) -> Value {
		Value::Date(chrono::DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis())
	}

	#[rstest]
	#[case::day_of_month("dayOfMonth", "2021-03-31T23:30:00Z", "UTC", 31)]
	#[case::day_of_month_shifted("dayOfMonth", "2021-03-31T23:30:00Z", "+01:00", 1)]
	#[case::day_of_week_sunday("dayOfWeek", "2021-04-04T12:00:00Z", "UTC", 1)]
	#[case::day_of_year("dayOfYear", "2020-12-31T12:00:00Z", "America/New_York", 366)]
	fn parts(#[case] part: &str, #[case] at: &str, #[case] tz: &str, #[case] expected: i32) {
		let v = date_part(part, &tzdb(), &date(at), &Value::new_string(tz));
		assert!(matches!(v, Value::NumberInt32(n) if n == expected), "{v}");
	}

	#[test]
	fn timestamps_and_object_ids_are_dates() {
		assert_eq!(date_millis(&Value::Timestamp(5 << 32 | 9)), Some(5000));
		let mut id = [0u8; 12];
		id[..4].copy_from_slice(&7u32.to_be_bytes());
		assert_eq!(date_millis(&Value::object_id(id)), Some(7000));
		assert_eq!(date_millis(&Value::NumberInt32(1)), None);
	}

	#[rstest]
	#[case::years("year", "2020-12-31T23:59:59Z", "2021-01-01T00:00:00Z", None, 1)]
	#[case::quarters("quarter", "2021-03-31T00:00:00Z", "2021-04-01T00:00:00Z", None, 1)]
	#[case::months_backwards("month", "2021-05-01T00:00:00Z", "2021-02-28T00:00:00Z", None, -3)]
	#[case::weeks_from_sunday("week", "2021-04-03T00:00:00Z", "2021-04-04T00:00:00Z", None, 1)]
	#[case::weeks_from_monday(
		"week",
		"2021-04-03T00:00:00Z",
		"2021-04-04T00:00:00Z",
		Some("monday"),
		0
	)]
	#[case::days("day", "2021-01-01T23:00:00Z", "2021-01-02T01:00:00Z", None, 1)]
	#[case::hours("hour", "2021-01-01T00:59:00Z", "2021-01-01T01:00:00Z", None, 1)]
	#[case::millis("millisecond", "2021-01-01T00:00:00Z", "2021-01-01T00:00:01Z", None, 1000)]
	fn differences(
		#[case] unit: &str,
		#[case] start: &str,
		#[case] end: &str,
		#[case] sow: Option<&str>,
		#[case] expected: i64,
	) {
		let sow = sow.map(Value::new_string);
		let v = date_diff(
			&tzdb(),
			&date(start),
			&date(end),
			&Value::new_string(unit),
			&Value::new_string("UTC"),
			sow.as_ref(),
		);
		assert!(matches!(v, Value::NumberInt64(n) if n == expected), "{v}");
	}

	#[rstest]
	#[case::clamps_month_end("month", 1, "2021-01-31T10:00:00Z", "2021-02-28T10:00:00Z")]
	#[case::quarters_back("quarter", -1, "2021-05-15T00:00:00Z", "2021-02-15T00:00:00Z")]
	#[case::hours("hour", 25, "2021-01-01T00:00:00Z", "2021-01-02T01:00:00Z")]
	#[case::weeks("week", 2, "2021-01-01T00:00:00Z", "2021-01-15T00:00:00Z")]
	fn additions(#[case] unit: &str, #[case] amount: i64, #[case] start: &str, #[case] end: &str) {
		let v = date_add(
			&tzdb(),
			&date(start),
			&Value::new_string(unit),
			&Value::NumberInt64(amount),
			&Value::new_string("UTC"),
		)
		.unwrap();
		assert_eq!(v.to_string(), date(end).to_string());
	}

	#[test]
	fn overflowing_additions_fail() {
		let err = date_add(
			&tzdb(),
			&Value::Date(0),
			&Value::new_string("millisecond"),
			&Value::NumberInt64(i64::MAX),
			&Value::new_string("UTC"),
		);
		assert!(err.is_ok());
		let err = date_add(
			&tzdb(),
			&Value::Date(i64::MAX),
			&Value::new_string("second"),
			&Value::NumberInt64(1),
			&Value::new_string("UTC"),
		)
		.unwrap_err();
		assert_eq!(crate::err::code_of(&err), Some(DATE_ADD_OVERFLOW));
	}
}

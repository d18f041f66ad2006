use chrono::{
    DateTime, Datelike, FixedOffset, LocalResult, NaiveDateTime, Offset, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{Result, SimError};

// ─── Location ────────────────────────────────────────────────────────────────

/// Geographic anchor of an installation, decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct Location {
    latitude: f64,
    longitude: f64,
}

impl Location {
    /// * `latitude`  – −90 … +90
    /// * `longitude` – −180 … +180
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(SimError::InvalidLocation(format!(
                "latitude {} outside [-90, 90]",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(SimError::InvalidLocation(format!(
                "longitude {} outside [-180, 180]",
                longitude
            )));
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

// ─── CivilInstant ────────────────────────────────────────────────────────────

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// A civil timestamp together with the UTC offset it was read in.
///
/// Timestamps without zone information are taken as UTC, never as the
/// machine's local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilInstant {
    inner: DateTime<FixedOffset>,
}

impl CivilInstant {
    /// Naive clock reading, interpreted as UTC.
    pub fn from_naive_utc(local: NaiveDateTime) -> Self {
        Self {
            inner: local.and_utc().fixed_offset(),
        }
    }

    /// Merge a naive clock reading with the offset that came with it and/or an
    /// offset supplied from outside (e.g. a plant's configured zone).
    ///
    /// Both present and different is contradictory and rejected.
    pub fn resolve(
        local: NaiveDateTime,
        embedded: Option<FixedOffset>,
        external: Option<FixedOffset>,
    ) -> Result<Self> {
        let offset = match (embedded, external) {
            (Some(a), Some(b)) if a != b => {
                return Err(SimError::InvalidTimeInput(format!(
                    "timestamp {} carries offset {} but {} was supplied",
                    local, a, b
                )));
            }
            (Some(a), _) | (None, Some(a)) => a,
            (None, None) => return Ok(Self::from_naive_utc(local)),
        };
        match offset.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(Self { inner: dt }),
            _ => Err(SimError::InvalidTimeInput(format!(
                "{} cannot be placed at offset {}",
                local, offset
            ))),
        }
    }

    /// Clock reading in an IANA zone. Local times skipped or repeated by a DST
    /// transition are ambiguous and rejected.
    pub fn in_zone(local: NaiveDateTime, tz: Tz) -> Result<Self> {
        match tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(Self {
                inner: dt.with_timezone(&dt.offset().fix()),
            }),
            LocalResult::Ambiguous(_, _) => Err(SimError::InvalidTimeInput(format!(
                "{} is ambiguous in {}",
                local, tz
            ))),
            LocalResult::None => Err(SimError::InvalidTimeInput(format!(
                "{} does not exist in {}",
                local, tz
            ))),
        }
    }

    /// The same absolute instant expressed in `tz`.
    pub fn at_utc_in_zone(utc: DateTime<Utc>, tz: Tz) -> Self {
        let zoned = utc.with_timezone(&tz);
        Self {
            inner: zoned.with_timezone(&zoned.offset().fix()),
        }
    }

    /// RFC 3339, or a naive `YYYY-MM-DDTHH:MM[:SS]` reading taken as UTC.
    pub fn parse(s: &str) -> Result<Self> {
        match Self::split(s)? {
            Ok(dt) => Ok(Self { inner: dt }),
            Err(local) => Ok(Self::from_naive_utc(local)),
        }
    }

    /// Like [`parse`](Self::parse), but a naive reading is a clock time in `tz`.
    pub fn parse_in_zone(s: &str, tz: Tz) -> Result<Self> {
        match Self::split(s)? {
            Ok(dt) => Ok(Self { inner: dt }),
            Err(local) => Self::in_zone(local, tz),
        }
    }

    // Ok: offset-carrying RFC 3339. Err: naive clock reading.
    fn split(s: &str) -> Result<std::result::Result<DateTime<FixedOffset>, NaiveDateTime>> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SimError::InvalidTimeInput("empty timestamp".to_string()));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Ok(dt));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .map(Err)
            .ok_or_else(|| SimError::InvalidTimeInput(format!("unparseable timestamp '{}'", s)))
    }

    /// Local civil clock reading.
    pub fn local(&self) -> NaiveDateTime {
        self.inner.naive_local()
    }

    pub fn as_fixed(&self) -> DateTime<FixedOffset> {
        self.inner
    }

    pub fn offset_hours(&self) -> f64 {
        self.inner.offset().local_minus_utc() as f64 / 3600.0
    }

    /// Day of the local civil year, January 1st = 1.
    pub fn day_of_year(&self) -> u32 {
        self.local().ordinal()
    }
}

impl From<DateTime<FixedOffset>> for CivilInstant {
    fn from(inner: DateTime<FixedOffset>) -> Self {
        Self { inner }
    }
}

impl From<DateTime<Utc>> for CivilInstant {
    fn from(utc: DateTime<Utc>) -> Self {
        Self {
            inner: utc.fixed_offset(),
        }
    }
}

impl Serialize for CivilInstant {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CivilInstant {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn naive(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[rstest]
    #[case(90.5, 0.0)]
    #[case(-91.0, 10.0)]
    #[case(45.0, 180.01)]
    #[case(45.0, -200.0)]
    #[case(f64::NAN, 0.0)]
    #[case(0.0, f64::INFINITY)]
    fn test_location_rejects_out_of_range(#[case] lat: f64, #[case] lon: f64) {
        assert!(matches!(Location::new(lat, lon), Err(SimError::InvalidLocation(_))));
    }

    #[rstest]
    #[case(90.0, 180.0)]
    #[case(-90.0, -180.0)]
    #[case(40.0, -74.0)]
    fn test_location_accepts_bounds(#[case] lat: f64, #[case] lon: f64) {
        let loc = Location::new(lat, lon).unwrap();
        assert_eq!(loc.latitude(), lat);
        assert_eq!(loc.longitude(), lon);
    }

    #[test]
    fn test_naive_defaults_to_utc() {
        let t = CivilInstant::resolve(naive(2023, 6, 21, 12, 0), None, None).unwrap();
        assert_eq!(t.offset_hours(), 0.0);
        assert_eq!(t.local(), naive(2023, 6, 21, 12, 0));
    }

    #[test]
    fn test_contradictory_offsets_rejected() {
        let edt = FixedOffset::west_opt(4 * 3600).unwrap();
        let cet = FixedOffset::east_opt(3600).unwrap();
        let r = CivilInstant::resolve(naive(2023, 6, 21, 12, 0), Some(edt), Some(cet));
        assert!(matches!(r, Err(SimError::InvalidTimeInput(_))));
    }

    #[test]
    fn test_agreeing_offsets_accepted() {
        let edt = FixedOffset::west_opt(4 * 3600).unwrap();
        let t = CivilInstant::resolve(naive(2023, 6, 21, 12, 0), Some(edt), Some(edt)).unwrap();
        assert_eq!(t.offset_hours(), -4.0);
        assert_eq!(t.as_fixed().with_timezone(&Utc).to_rfc3339(), "2023-06-21T16:00:00+00:00");
    }

    #[test]
    fn test_in_zone_uses_dst_offset() {
        let t = CivilInstant::in_zone(naive(2023, 6, 21, 12, 0), chrono_tz::America::New_York).unwrap();
        assert_eq!(t.offset_hours(), -4.0);
        let w = CivilInstant::in_zone(naive(2023, 1, 10, 12, 0), chrono_tz::America::New_York).unwrap();
        assert_eq!(w.offset_hours(), -5.0);
    }

    #[test]
    fn test_in_zone_rejects_dst_gap() {
        // 02:30 on the spring-forward night does not exist in New York
        let r = CivilInstant::in_zone(naive(2023, 3, 12, 2, 30), chrono_tz::America::New_York);
        assert!(matches!(r, Err(SimError::InvalidTimeInput(_))));
    }

    #[rstest]
    #[case("2023-06-21T12:00:00-04:00", -4.0)]
    #[case("2023-06-21T12:00:00Z", 0.0)]
    #[case("2023-06-21T12:00", 0.0)]
    #[case("2023-06-21T12:00:30", 0.0)]
    fn test_parse(#[case] raw: &str, #[case] offset: f64) {
        let t = CivilInstant::parse(raw).unwrap();
        assert_eq!(t.offset_hours(), offset);
        assert_eq!(t.day_of_year(), 172);
    }

    #[rstest]
    #[case("2023-06-21T12:00", -4.0, "2023-06-21T16:00:00+00:00")]
    #[case("2023-01-10T12:00:00", -5.0, "2023-01-10T17:00:00+00:00")]
    #[case("2023-06-21T12:00:00+02:00", 2.0, "2023-06-21T10:00:00+00:00")]
    fn test_parse_in_zone(#[case] raw: &str, #[case] offset: f64, #[case] utc: &str) {
        let t = CivilInstant::parse_in_zone(raw, chrono_tz::America::New_York).unwrap();
        assert_eq!(t.offset_hours(), offset);
        assert_eq!(t.as_fixed().with_timezone(&Utc).to_rfc3339(), utc);
    }

    #[test]
    fn test_parse_in_zone_rejects_dst_gap() {
        let r = CivilInstant::parse_in_zone("2023-03-12T02:30", chrono_tz::America::New_York);
        assert!(matches!(r, Err(SimError::InvalidTimeInput(_))));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("yesterday")]
    #[case("2023-13-40T00:00")]
    fn test_parse_rejects_garbage(#[case] raw: &str) {
        assert!(matches!(CivilInstant::parse(raw), Err(SimError::InvalidTimeInput(_))));
    }

    #[test]
    fn test_day_of_year_follows_local_date() {
        // 23:30 on Dec 31 at UTC-5 is already Jan 1 in UTC
        let t = CivilInstant::parse("2023-12-31T23:30:00-05:00").unwrap();
        assert_eq!(t.day_of_year(), 365);
        assert_eq!(CivilInstant::parse("2024-01-01T00:00:00Z").unwrap().day_of_year(), 1);
    }
}

//! Time zone abstraction over the bundled tzdata tables.
//!
//! The codec and the query context never touch `chrono_tz` directly; they
//! work through [`Tz`], which adds the UTC-equivalence classification used
//! by the `utc_tz_aware` read policy.

use chrono::{DateTime, NaiveDateTime, TimeZone};

use crate::error::{Error, Result};

/// Named zones that always resolve to UTC. When `utc_tz_aware` is off,
/// datetimes read from columns declared in any of these zones come back
/// naive instead of zone-aware.
const UTC_EQUIVALENT: &[&str] = &[
    "UTC",
    "Etc/UTC",
    "Etc/UCT",
    "Etc/Universal",
    "GMT",
    "GMT0",
    "Etc/GMT",
    "Etc/GMT0",
    "Etc/GMT-0",
    "Etc/GMT+0",
    "Universal",
    "Zulu",
    "Etc/Zulu",
    "Greenwich",
    "Etc/Greenwich",
];

/// A resolved IANA time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tz(chrono_tz::Tz);

/// The UTC zone, used as the fallback when the server reports an
/// unrecognized zone name.
pub const UTC: Tz = Tz(chrono_tz::Tz::UTC);

impl Tz {
    /// Resolves an IANA zone name (e.g. `Europe/Moscow`).
    pub fn named(name: &str) -> Result<Tz> {
        name.parse::<chrono_tz::Tz>()
            .map(Tz)
            .map_err(|_| Error::Data(format!("unrecognized time zone '{name}'")))
    }

    /// The canonical zone name.
    pub fn name(self) -> &'static str {
        self.0.name()
    }

    /// Whether this zone is one of the fixed UTC-equivalent names.
    pub fn is_utc_equivalent(self) -> bool {
        UTC_EQUIVALENT.contains(&self.0.name())
    }

    /// Converts whole epoch seconds into a zone-aware datetime.
    pub fn datetime_from_epoch(self, secs: i64) -> DateTime<chrono_tz::Tz> {
        // Epoch seconds always have exactly one mapping.
        self.0
            .timestamp_opt(secs, 0)
            .single()
            .unwrap_or_else(|| self.0.timestamp_opt(0, 0).single().expect("epoch"))
    }

    /// Converts epoch seconds plus nanoseconds into a zone-aware datetime.
    pub fn datetime_from_parts(self, secs: i64, nanos: u32) -> DateTime<chrono_tz::Tz> {
        self.0
            .timestamp_opt(secs, nanos)
            .single()
            .unwrap_or_else(|| self.datetime_from_epoch(secs))
    }

    /// Interprets a naive wall-clock datetime in this zone, returning
    /// epoch seconds. Ambiguous local times (DST folds) resolve to the
    /// earlier instant.
    pub fn epoch_from_naive(self, naive: NaiveDateTime) -> i64 {
        match self.0.from_local_datetime(&naive) {
            chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
                dt.timestamp()
            }
            chrono::LocalResult::None => {
                // Gap (spring-forward): shift through UTC interpretation.
                naive.and_utc().timestamp() - i64::from(self.offset_at_epoch(naive.and_utc().timestamp()))
            }
        }
    }

    /// UTC offset of this zone in seconds at the given epoch instant.
    pub fn offset_at_epoch(self, secs: i64) -> i32 {
        use chrono::Offset;
        self.datetime_from_epoch(secs).offset().fix().local_minus_utc()
    }

    pub(crate) fn inner(self) -> chrono_tz::Tz {
        self.0
    }
}

impl std::fmt::Display for Tz {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_resolves_iana_zones() {
        assert_eq!(Tz::named("Europe/Moscow").unwrap().name(), "Europe/Moscow");
        assert!(Tz::named("Mars/Olympus").is_err());
    }

    #[test]
    fn utc_equivalents() {
        for name in ["UTC", "Etc/UTC", "GMT", "Zulu", "Universal", "Greenwich"] {
            assert!(Tz::named(name).unwrap().is_utc_equivalent(), "{name}");
        }
        assert!(!Tz::named("Europe/Berlin").unwrap().is_utc_equivalent());
    }

    #[test]
    fn epoch_round_trip() {
        let tz = Tz::named("America/New_York").unwrap();
        let dt = tz.datetime_from_epoch(1_700_000_000);
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(tz.epoch_from_naive(dt.naive_local()), 1_700_000_000);
    }

    #[test]
    fn offset_reflects_dst() {
        let tz = Tz::named("America/New_York").unwrap();
        // January: EST (-5h); July: EDT (-4h).
        assert_eq!(tz.offset_at_epoch(1_704_067_200), -5 * 3600);
        assert_eq!(tz.offset_at_epoch(1_719_792_000), -4 * 3600);
    }
}

//! Utilities to deal with wall clock time.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A unix timestamp (full seconds elapsed since 1970-01-01 00:00 UTC).
///
/// This is the `clock` attached to every point sent to the trapper. It serializes as a plain
/// integer.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Creates a unix timestamp from the given system time.
    ///
    /// Times before the epoch saturate to zero.
    pub fn from_system(time: SystemTime) -> Self {
        let duration = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self(duration)
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of seconds since the UNIX epoch start.
    pub fn as_secs(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_secs())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_secs().fmt(f)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.as_secs())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Self::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_from_system_before_epoch() {
        let time = SystemTime::UNIX_EPOCH - Duration::from_secs(5);
        assert_eq!(UnixTimestamp::from_system(time).as_secs(), 0);
    }

    #[test]
    fn test_display() {
        let ts = UnixTimestamp::from_secs(1700000000);
        assert_eq!(ts.to_string(), "1700000000");
        assert_eq!(format!("{ts:?}"), "UnixTimestamp(1700000000)");
    }

    #[test]
    fn test_serde_as_integer() {
        let ts = UnixTimestamp::from_secs(1700000000);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "1700000000");
        assert_eq!(serde_json::from_str::<UnixTimestamp>(&json).unwrap(), ts);
    }
}

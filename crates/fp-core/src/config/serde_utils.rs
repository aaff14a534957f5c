//! Serde helpers for durations in configuration files
//!
//! TOML has no duration type, so settings store whole seconds or whole
//! milliseconds and the field name says which (`grace_period`,
//! `drain_timeout_ms`). Use with `#[serde(with = "...")]`:
//!
//! ```ignore
//! #[serde(rename = "drain_timeout_ms", with = "fp_core::config::serde_utils::duration_millis")]
//! drain_timeout: Duration,
//! ```

/// Duration stored as whole seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Duration stored as whole milliseconds
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        // Saturate instead of truncating the high bits
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

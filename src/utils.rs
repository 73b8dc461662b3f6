//! Small helpers shared by the definition surface.

use std::time::Duration;

/// Parse a duration string (e.g. `"30s"`, `"500ms"`, `"1.5m"`, `"1h"`).
///
/// A plain number is read as milliseconds. Returns `None` when the string
/// cannot be parsed, is negative or does not fit in a `Duration`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (number, scale, divisor) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1.0, 1000.0)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1.0, 1.0)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60.0, 1.0)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600.0, 1.0)
    } else {
        (s, 1.0, 1000.0)
    };

    let value = number.trim().parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(value * scale / divisor).ok()
}

/// Serde adapters accepting either a duration string or integer milliseconds.
pub(crate) mod duration {
    use serde::{de::Error, Deserialize, Deserializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Millis(u64),
        Text(String),
    }

    impl Repr {
        fn into_duration<E: Error>(self) -> Result<Duration, E> {
            match self {
                Repr::Millis(ms) => Ok(Duration::from_millis(ms)),
                Repr::Text(s) => super::parse_duration(&s)
                    .ok_or_else(|| E::custom(format!("invalid duration `{s}`"))),
            }
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Repr::deserialize(deserializer)?.into_duration()
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<Repr>::deserialize(deserializer)?
            .map(Repr::into_duration)
            .transpose()
    }
}

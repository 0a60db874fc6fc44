use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};
use thiserror::Error;

/// Dotted numeric version with one to four components, e.g. "1.5.0.0".
///
/// Mod versions in the manifest use up to four components, so semver types
/// don't fit. Comparison pads missing components with zeroes, meaning
/// "1.5" == "1.5.0.0".
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid version string: {0:?}")]
pub struct InvalidVersion(pub String);

impl Version {
    pub fn new(parts: &[u64]) -> Self {
        assert!(!parts.is_empty() && parts.len() <= 4);
        Self {
            parts: parts.to_vec(),
        }
    }

    /// Placeholder used when a mod directory is found on disk but no record
    /// of its version survives.
    pub fn zero() -> Self {
        Self { parts: vec![0, 0] }
    }

    pub fn major(&self) -> u64 {
        self.parts[0]
    }

    fn component(&self, idx: usize) -> u64 {
        self.parts.get(idx).copied().unwrap_or(0)
    }

    /// Components without the trailing zeroes, the canonical form that
    /// equality and hashing agree on.
    fn significant(&self) -> &[u64] {
        let len = self
            .parts
            .iter()
            .rposition(|part| *part != 0)
            .map_or(0, |idx| idx + 1);
        &self.parts[..len]
    }
}

// Equality must match the padded ordering, so "1.5" == "1.5.0.0".
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in 0..self.parts.len().max(other.parts.len()) {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.parts.iter().map(|part| part.to_string()).collect();
        write!(f, "{}", text.join("."))
    }
}

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<u64> = raw
            .trim()
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|_| InvalidVersion(raw.to_string()))?;

        if parts.is_empty() || parts.len() > 4 {
            return Err(InvalidVersion(raw.to_string()));
        }

        Ok(Self { parts })
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

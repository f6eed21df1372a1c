use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::DomainError;

/// A component name. Matches `[A-Za-z0-9._-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ComponentName(String);

impl ComponentName {
    pub fn new(s: impl Into<String>) -> Result<Self, DomainError> {
        let s = s.into();
        if s.is_empty()
            || !s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(DomainError::InvalidComponentName(s));
        }
        Ok(ComponentName(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The distinguished singleton component representing the agent itself.
    pub fn is_nucleus(&self) -> bool {
        self.0 == "aws.greengrass.Nucleus" || self.0 == "nucleus"
    }
}

impl std::fmt::Display for ComponentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ComponentName {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let s = String::deserialize(d)?;
        ComponentName::new(s).map_err(D::Error::custom)
    }
}

impl FromStr for ComponentName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentName::new(s)
    }
}

/// `(name, version)` — uniquely identifies a recipe and its artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentIdentifier {
    pub name: ComponentName,
    pub version: semver::Version,
}

impl ComponentIdentifier {
    pub fn new(name: ComponentName, version: semver::Version) -> Self {
        ComponentIdentifier { name, version }
    }
}

impl std::fmt::Display for ComponentIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// A SemVer constraint in NPM-style range syntax (`^1.2.0`, `>=2.0.0 <3.0.0`, …).
///
/// Wraps `semver::VersionReq`; `Eq`/`Hash` are derived from the normalized
/// source string since `VersionReq` itself has no `Eq` impl.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    source: String,
    req: semver::VersionReq,
}

impl VersionRange {
    pub fn parse(s: impl Into<String>) -> Result<Self, DomainError> {
        let source = s.into();
        let req = semver::VersionReq::parse(&source)
            .map_err(|e| DomainError::InvalidVersionRange(source.clone(), e.to_string()))?;
        Ok(VersionRange { source, req })
    }

    pub fn matches(&self, version: &semver::Version) -> bool {
        self.req.matches(version)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for VersionRange {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
impl Eq for VersionRange {}
impl std::hash::Hash for VersionRange {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl std::fmt::Display for VersionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = DomainError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        VersionRange::parse(s)
    }
}

impl From<VersionRange> for String {
    fn from(v: VersionRange) -> String {
        v.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_name_rejects_invalid_chars() {
        assert!(ComponentName::new("ok.Name-1_2").is_ok());
        assert!(ComponentName::new("bad name").is_err());
        assert!(ComponentName::new("").is_err());
    }

    #[test]
    fn version_range_matches_npm_style() {
        let range = VersionRange::parse("^1.2.0").unwrap();
        assert!(range.matches(&semver::Version::parse("1.2.5").unwrap()));
        assert!(!range.matches(&semver::Version::parse("2.0.0").unwrap()));
    }

    #[test]
    fn version_range_round_trips_through_serde() {
        let range = VersionRange::parse(">=2.0.0, <3.0.0").unwrap();
        let json = serde_json::to_string(&range).unwrap();
        let back: VersionRange = serde_json::from_str(&json).unwrap();
        assert_eq!(range, back);
    }

    #[test]
    fn component_identifier_display() {
        let id = ComponentIdentifier::new(
            ComponentName::new("SomeService").unwrap(),
            semver::Version::parse("1.0.0").unwrap(),
        );
        assert_eq!(id.to_string(), "SomeService-1.0.0");
    }

    proptest::proptest! {
        /// A version round-trips through `VersionRange`'s serde impl
        /// regardless of which operator produced the range string.
        #[test]
        fn version_range_serde_round_trips(
            major in 0u64..50,
            minor in 0u64..50,
            patch in 0u64..50,
        ) {
            let source = format!("^{major}.{minor}.{patch}");
            let range = VersionRange::parse(&source).unwrap();
            let json = serde_json::to_string(&range).unwrap();
            let back: VersionRange = serde_json::from_str(&json).unwrap();
            proptest::prop_assert_eq!(range, back);
        }

        /// `^major.minor.patch` matches exactly the versions with the same
        /// major and a (minor, patch) no earlier than the base — npm's caret
        /// rule, independent of which concrete numbers are generated.
        #[test]
        fn caret_range_matches_same_major_and_at_least_base(
            major in 1u64..20,
            minor in 0u64..20,
            patch in 0u64..20,
            dminor in 0i64..5,
            dpatch in 0i64..5,
            bump_major in proptest::prelude::any::<bool>(),
        ) {
            let range = VersionRange::parse(format!("^{major}.{minor}.{patch}")).unwrap();

            let at_or_above = semver::Version::new(
                major,
                (minor as i64 + dminor).max(0) as u64,
                if dminor == 0 { patch + dpatch as u64 } else { dpatch as u64 },
            );
            proptest::prop_assert!(range.matches(&at_or_above));

            if bump_major {
                let different_major = semver::Version::new(major + 1, 0, 0);
                proptest::prop_assert!(!range.matches(&different_major));
            }
            if minor > 0 || patch > 0 {
                let below_base = semver::Version::new(major, 0, 0);
                if below_base < semver::Version::new(major, minor, patch) {
                    proptest::prop_assert!(!range.matches(&below_base));
                }
            }
        }
    }
}

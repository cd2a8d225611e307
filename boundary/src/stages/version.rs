//! Dotted OS version numbers.

use std::fmt;

/// A dotted version such as `14.2.1`.
///
/// Ordering is plain lexicographic over the components, so a prefix sorts
/// first: `13` is below `13.0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OsVersion(Vec<u64>);

/// Splits on dots; any component that is not a plain integer becomes 0.
#[must_use]
pub fn parse_version(raw: &str) -> OsVersion {
    OsVersion(
        raw.trim()
            .split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect(),
    )
}

impl OsVersion {
    /// The parsed components.
    #[must_use]
    pub fn components(&self) -> &[u64] {
        &self.0
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_components() {
        assert_eq!(parse_version("10.9").components(), &[10, 9]);
        assert_eq!(parse_version(" 14.2.1\n").components(), &[14, 2, 1]);
    }

    #[test]
    fn test_non_numeric_component_is_zero() {
        assert_eq!(parse_version("10.x").components(), &[10, 0]);
        assert_eq!(parse_version("").components(), &[0]);
        assert_eq!(parse_version("5.15.0-91-generic").components(), &[5, 15, 0]);
    }

    #[test]
    fn test_numeric_not_lexical_ordering() {
        assert!(parse_version("10.9") < parse_version("10.10"));
        assert!(parse_version("11.0") > parse_version("10.15.7"));
        assert!(parse_version("14.2.1") > parse_version("14.2"));
    }

    #[test]
    fn test_shorter_prefix_sorts_first() {
        assert!(parse_version("13") < parse_version("13.0"));
        assert!(parse_version("13.0") < parse_version("13.0.1"));
        assert_eq!(parse_version("13.0"), parse_version(" 13.0\n"));
        assert_eq!(parse_version("13.0.0").to_string(), "13.0.0");
    }
}

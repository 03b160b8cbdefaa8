use std::fmt;
use std::str::FromStr;

/// Release of the downstream runtime a program is compiled for.
///
/// Newer targets support more op kinds and allow some parameters to stay in
/// higher precision when computing in fp16. Target versions are ordered, so
/// `TargetVersion::Ios17 >= TargetVersion::Ios16`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetVersion {
    #[default]
    Ios15,
    Ios16,
    Ios17,
    Ios18,
    Ios26,
}

impl TargetVersion {
    pub const ALL: [TargetVersion; 5] = [
        TargetVersion::Ios15,
        TargetVersion::Ios16,
        TargetVersion::Ios17,
        TargetVersion::Ios18,
        TargetVersion::Ios26,
    ];

    /// Return the spec version recorded in serialized programs.
    pub fn spec_version(self) -> u32 {
        match self {
            TargetVersion::Ios15 => 6,
            TargetVersion::Ios16 => 7,
            TargetVersion::Ios17 => 8,
            TargetVersion::Ios18 => 9,
            TargetVersion::Ios26 => 10,
        }
    }

    pub fn from_spec_version(version: u32) -> Option<TargetVersion> {
        Self::ALL.into_iter().find(|t| t.spec_version() == version)
    }

    pub fn name(self) -> &'static str {
        match self {
            TargetVersion::Ios15 => "iOS15",
            TargetVersion::Ios16 => "iOS16",
            TargetVersion::Ios17 => "iOS17",
            TargetVersion::Ios18 => "iOS18",
            TargetVersion::Ios26 => "iOS26",
        }
    }
}

impl fmt::Display for TargetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown target name.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownTarget(pub String);

impl fmt::Display for UnknownTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown target \"{}\"", self.0)
    }
}

impl std::error::Error for UnknownTarget {}

impl FromStr for TargetVersion {
    type Err = UnknownTarget;

    /// Parse a target name such as "iOS17". Matching is case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTarget(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::TargetVersion;

    #[test]
    fn test_spec_versions() {
        let versions: Vec<u32> = TargetVersion::ALL
            .iter()
            .map(|t| t.spec_version())
            .collect();
        assert_eq!(versions, [6, 7, 8, 9, 10]);

        for target in TargetVersion::ALL {
            assert_eq!(
                TargetVersion::from_spec_version(target.spec_version()),
                Some(target)
            );
        }
        assert_eq!(TargetVersion::from_spec_version(5), None);
    }

    #[test]
    fn test_parse_target() {
        assert_eq!("iOS17".parse(), Ok(TargetVersion::Ios17));
        assert_eq!("ios18".parse(), Ok(TargetVersion::Ios18));
        assert!("macOS13".parse::<TargetVersion>().is_err());
        assert!(TargetVersion::Ios16 < TargetVersion::Ios17);
    }
}

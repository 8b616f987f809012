//! Semantic versions as kept in `version.properties`

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors from parsing a version string
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version '{0}': expected MAJOR.MINOR.PATCH[-PRE][+BUILD]")]
    Invalid(String),
}

/// Part of a version to increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bump {
    Major,
    Minor,
    Patch,
}

/// A `MAJOR.MINOR.PATCH[-PRE][+BUILD]` version
///
/// Bumping a component leaves the pre-release and build metadata untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Vec<String>,
    pub build: Vec<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            ..Self::default()
        }
    }

    /// Increments one component in place
    pub fn bump(&mut self, part: Bump) {
        match part {
            Bump::Major => self.major += 1,
            Bump::Minor => self.minor += 1,
            Bump::Patch => self.patch += 1,
        }
    }

    /// Replaces the build metadata with a single identifier
    pub fn set_build(&mut self, build: &str) -> Result<(), VersionError> {
        let ids = identifiers(build)
            .ok_or_else(|| VersionError::Invalid(format!("{}+{}", self.core(), build)))?;
        self.build = ids;
        Ok(())
    }

    fn core(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn numeric(s: &str) -> Option<u64> {
    if s.is_empty()
        || !s.bytes().all(|b| b.is_ascii_digit())
        || (s.len() > 1 && s.starts_with('0'))
    {
        return None;
    }
    s.parse().ok()
}

fn identifiers(s: &str) -> Option<Vec<String>> {
    let ids: Vec<String> = s.split('.').map(String::from).collect();
    let valid = ids
        .iter()
        .all(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-'));
    valid.then_some(ids)
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::Invalid(s.to_string());
        let s = s.trim();

        let (rest, build) = match s.split_once('+') {
            Some((rest, build)) => (rest, identifiers(build).ok_or_else(invalid)?),
            None => (s, Vec::new()),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, identifiers(pre).ok_or_else(invalid)?),
            None => (rest, Vec::new()),
        };

        let parts: Vec<&str> = core.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(invalid());
        };

        Ok(Version {
            major: numeric(major).ok_or_else(invalid)?,
            minor: numeric(minor).ok_or_else(invalid)?,
            patch: numeric(patch).ok_or_else(invalid)?,
            pre,
            build,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.core())?;
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre.join("."))?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build.join("."))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_version() {
        let v: Version = "3.0.1-alpha.1+abc1231467392993".parse().unwrap();

        assert_eq!((v.major, v.minor, v.patch), (3, 0, 1));
        assert_eq!(v.pre, vec!["alpha", "1"]);
        assert_eq!(v.build, vec!["abc1231467392993"]);
        assert_eq!(v.to_string(), "3.0.1-alpha.1+abc1231467392993");
    }

    #[test]
    fn bumps_keep_metadata() {
        let mut v: Version = "3.0.1-alpha.1+abc1231467392993".parse().unwrap();

        v.bump(Bump::Major);
        assert_eq!(v.to_string(), "4.0.1-alpha.1+abc1231467392993");
        v.bump(Bump::Minor);
        assert_eq!(v.to_string(), "4.1.1-alpha.1+abc1231467392993");
        v.bump(Bump::Patch);
        assert_eq!(v.to_string(), "4.1.2-alpha.1+abc1231467392993");
    }

    #[test]
    fn set_build_metadata() {
        let mut v = Version::new(0, 0, 0);
        v.set_build("5f2e1a9").unwrap();
        assert_eq!(v.to_string(), "0.0.0+5f2e1a9");

        assert!(v.set_build("not valid!").is_err());
    }

    #[test]
    fn rejects_invalid() {
        for s in ["", "1", "1.2", "1.2.3.4", "01.2.3", "1.2.x", "1.2.3-", "1.2.3+a..b"] {
            assert!(s.parse::<Version>().is_err(), "{s} should be rejected");
        }
    }

    #[test]
    fn hyphen_inside_prerelease() {
        let v: Version = "1.0.0-rc-1".parse().unwrap();
        assert_eq!(v.pre, vec!["rc-1"]);
    }
}

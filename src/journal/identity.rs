//! Package identity and version ordering

use crate::error::{PkgCacheError, PkgCacheResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// How a package version string is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionFormat {
    /// Semantic versioning (NuGet, npm, zip feeds)
    #[default]
    Semver,
    /// Maven artifact versions
    Maven,
}

impl fmt::Display for VersionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semver => write!(f, "semver"),
            Self::Maven => write!(f, "maven"),
        }
    }
}

/// A parsed, comparable version
#[derive(Debug, Clone)]
pub struct PackageVersion {
    raw: String,
    parsed: Parsed,
}

#[derive(Debug, Clone)]
enum Parsed {
    Semver(semver::Version),
    Maven(Vec<MavenToken>),
}

impl PackageVersion {
    /// Parse `raw` under `format`
    pub fn parse(raw: &str, format: VersionFormat) -> PkgCacheResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PkgCacheError::invalid_version(raw, format, "version is empty"));
        }
        let parsed = match format {
            VersionFormat::Semver => Parsed::Semver(parse_semver(trimmed)?),
            VersionFormat::Maven => Parsed::Maven(parse_maven(trimmed)),
        };
        Ok(Self {
            raw: trimmed.to_string(),
            parsed,
        })
    }

    /// The version as originally written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Format this version was parsed with
    pub fn format(&self) -> VersionFormat {
        match self.parsed {
            Parsed::Semver(_) => VersionFormat::Semver,
            Parsed::Maven(_) => VersionFormat::Maven,
        }
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.parsed, &other.parsed) {
            (Parsed::Semver(a), Parsed::Semver(b)) => a.cmp_precedence(b),
            (Parsed::Maven(a), Parsed::Maven(b)) => compare_maven(a, b),
            // Mixed formats never collide in practice; keep the order total
            _ => self.format().cmp_key().cmp(&other.format().cmp_key()),
        }
    }
}

impl VersionFormat {
    fn cmp_key(self) -> u8 {
        match self {
            Self::Semver => 0,
            Self::Maven => 1,
        }
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Accepts `1`, `1.2`, `1.2.3`, an optional `v`, pre-release and build metadata
fn parse_semver(raw: &str) -> PkgCacheResult<semver::Version> {
    let body = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
    let split = body.find(['-', '+']).unwrap_or(body.len());
    let (core, suffix) = body.split_at(split);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 {
        return Err(PkgCacheError::invalid_version(
            raw,
            VersionFormat::Semver,
            "more than three numeric components",
        ));
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    semver::Version::parse(&padded)
        .map_err(|e| PkgCacheError::invalid_version(raw, VersionFormat::Semver, e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MavenToken {
    Number(u64),
    Qualifier(String),
}

/// Qualifier rank; release (empty) sits between snapshot and sp
fn qualifier_rank(q: &str) -> (u8, &str) {
    match q {
        "alpha" | "a" => (0, ""),
        "beta" | "b" => (1, ""),
        "milestone" | "m" => (2, ""),
        "rc" | "cr" => (3, ""),
        "snapshot" => (4, ""),
        "" | "ga" | "final" | "release" => (5, ""),
        "sp" => (6, ""),
        other => (7, other),
    }
}

fn parse_maven(raw: &str) -> Vec<MavenToken> {
    let lower = raw.to_ascii_lowercase();
    let mut tokens = Vec::new();
    for part in lower.split(['.', '-']) {
        // "1rc2" style: split digit/letter transitions
        let mut current = String::new();
        let mut digits = None;
        for c in part.chars() {
            let is_digit = c.is_ascii_digit();
            if digits.is_some_and(|d| d != is_digit) {
                tokens.push(maven_token(&current));
                current.clear();
            }
            digits = Some(is_digit);
            current.push(c);
        }
        tokens.push(maven_token(&current));
    }

    // Trailing zeros and release markers do not change the version
    while tokens
        .last()
        .is_some_and(|t| matches!(t, MavenToken::Number(0)) || is_release(t))
    {
        tokens.pop();
    }
    tokens
}

fn maven_token(s: &str) -> MavenToken {
    match s.parse::<u64>() {
        Ok(n) => MavenToken::Number(n),
        Err(_) => MavenToken::Qualifier(s.to_string()),
    }
}

fn is_release(token: &MavenToken) -> bool {
    matches!(token, MavenToken::Qualifier(q) if qualifier_rank(q).0 == 5)
}

fn compare_maven(a: &[MavenToken], b: &[MavenToken]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let ord = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => compare_token(x, y),
            (Some(x), None) => compare_to_missing(x),
            (None, Some(y)) => compare_to_missing(y).reverse(),
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_token(a: &MavenToken, b: &MavenToken) -> Ordering {
    match (a, b) {
        (MavenToken::Number(x), MavenToken::Number(y)) => x.cmp(y),
        (MavenToken::Number(_), MavenToken::Qualifier(_)) => Ordering::Greater,
        (MavenToken::Qualifier(_), MavenToken::Number(_)) => Ordering::Less,
        (MavenToken::Qualifier(x), MavenToken::Qualifier(y)) => {
            qualifier_rank(x).cmp(&qualifier_rank(y))
        }
    }
}

/// A missing token behaves like `0` next to numbers and like a release next to qualifiers
fn compare_to_missing(token: &MavenToken) -> Ordering {
    match token {
        MavenToken::Number(n) => n.cmp(&0),
        MavenToken::Qualifier(q) => qualifier_rank(q).cmp(&qualifier_rank("")),
    }
}

/// Identity of a cached package: id, version and file extension
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity", into = "RawIdentity")]
pub struct PackageIdentity {
    id: String,
    version: PackageVersion,
    extension: String,
}

#[derive(Serialize, Deserialize)]
struct RawIdentity {
    id: String,
    version: String,
    #[serde(default)]
    version_format: VersionFormat,
    #[serde(default)]
    extension: String,
}

impl TryFrom<RawIdentity> for PackageIdentity {
    type Error = PkgCacheError;

    fn try_from(raw: RawIdentity) -> Result<Self, Self::Error> {
        Self::new(raw.id, &raw.version, raw.version_format, raw.extension)
    }
}

impl From<PackageIdentity> for RawIdentity {
    fn from(identity: PackageIdentity) -> Self {
        Self {
            version_format: identity.version.format(),
            version: identity.version.raw,
            id: identity.id,
            extension: identity.extension,
        }
    }
}

impl PackageIdentity {
    /// Validate and build an identity
    pub fn new(
        id: impl Into<String>,
        version: &str,
        format: VersionFormat,
        extension: impl Into<String>,
    ) -> PkgCacheResult<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(PkgCacheError::InvalidPackage("package id is empty".to_string()));
        }
        let extension = extension.into();
        let extension = extension.trim().trim_start_matches('.').to_string();

        Ok(Self {
            id,
            version: PackageVersion::parse(version, format)?,
            extension,
        })
    }

    /// Package id as registered
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lowercased id, for grouping versions of one package
    pub fn id_key(&self) -> String {
        self.id.to_ascii_lowercase()
    }

    /// Parsed version
    pub fn version(&self) -> &PackageVersion {
        &self.version
    }

    /// File extension without the leading dot
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Same package id, ignoring case
    pub fn same_package(&self, other: &PackageIdentity) -> bool {
        self.id.eq_ignore_ascii_case(&other.id)
    }
}

impl PartialEq for PackageIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.same_package(other)
            && self.version == other.version
            && self.extension.eq_ignore_ascii_case(&other.extension)
    }
}

impl Eq for PackageIdentity {}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)?;
        if !self.extension.is_empty() {
            write!(f, " ({})", self.extension)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semver(v: &str) -> PackageVersion {
        PackageVersion::parse(v, VersionFormat::Semver).unwrap()
    }

    fn maven(v: &str) -> PackageVersion {
        PackageVersion::parse(v, VersionFormat::Maven).unwrap()
    }

    #[test]
    fn semver_pads_short_versions() {
        assert_eq!(semver("1.0"), semver("1.0.0"));
        assert_eq!(semver("v2"), semver("2.0.0"));
        assert!(semver("1.0") < semver("1.1"));
        assert!(semver("1.10.0") > semver("1.9.3"));
    }

    #[test]
    fn semver_prerelease_sorts_first() {
        assert!(semver("1.0.0-beta.2") < semver("1.0.0"));
        assert!(semver("1.0-alpha") < semver("1.0-beta"));
        // Build metadata does not affect precedence
        assert_eq!(semver("1.0.0+build.7"), semver("1.0.0"));
    }

    #[test]
    fn semver_rejects_bad_input() {
        assert!(PackageVersion::parse("1.2.3.4", VersionFormat::Semver).is_err());
        assert!(PackageVersion::parse("one.two", VersionFormat::Semver).is_err());
        assert!(PackageVersion::parse("  ", VersionFormat::Semver).is_err());
    }

    #[test]
    fn maven_ordering() {
        assert_eq!(maven("1.0"), maven("1"));
        assert_eq!(maven("1.0.0-final"), maven("1"));
        assert!(maven("1.0-alpha-1") < maven("1.0-beta"));
        assert!(maven("1.0-rc1") < maven("1.0"));
        assert!(maven("1.0-SNAPSHOT") < maven("1.0"));
        assert!(maven("1.0") < maven("1.0-sp1"));
        assert!(maven("1.0") < maven("1.0.1"));
        assert!(maven("2.0.10") > maven("2.0.9"));
    }

    #[test]
    fn identity_is_case_insensitive() {
        let a = PackageIdentity::new("Acme.Web", "1.0", VersionFormat::Semver, ".ZIP").unwrap();
        let b = PackageIdentity::new("acme.web", "1.0.0", VersionFormat::Semver, "zip").unwrap();
        let c = PackageIdentity::new("acme.web", "1.0.1", VersionFormat::Semver, "zip").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.same_package(&c));
        assert_eq!(a.extension(), "ZIP");
        assert_eq!(a.to_string(), "Acme.Web@1.0 (ZIP)");
    }

    #[test]
    fn identity_requires_id() {
        assert!(PackageIdentity::new(" ", "1.0", VersionFormat::Semver, "zip").is_err());
    }

    #[test]
    fn identity_serde_keeps_raw_version_and_format() {
        let id = PackageIdentity::new("acme", "3.1-SNAPSHOT", VersionFormat::Maven, "jar").unwrap();
        let json = serde_json::to_string(&id).unwrap();

        assert!(json.contains("\"version\":\"3.1-SNAPSHOT\""));
        assert!(json.contains("\"version_format\":\"maven\""));

        let back: PackageIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.version().format(), VersionFormat::Maven);
    }

    #[test]
    fn identity_deserialize_rejects_invalid_version() {
        let json = r#"{"id":"acme","version":"not-a-version!","version_format":"semver"}"#;
        assert!(serde_json::from_str::<PackageIdentity>(json).is_err());
    }
}

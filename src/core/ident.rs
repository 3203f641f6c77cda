// src/core/ident.rs

//! Identifier utilities: slug derivation, semantic-version arithmetic, and
//! sanity checks for the handful of URL shapes the server accepts.

use crate::core::SignalsdError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Derives a URL-safe slug from a human-supplied title.
///
/// Every character that is not ASCII-alphanumeric maps to a single dash, so
/// `"Sample ISN @example.org"` becomes `"sample-isn--example-org"`. Interior
/// dash runs are preserved; leading and trailing dashes are trimmed.
pub fn derive_slug(title: &str) -> String {
    let mapped: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// A parsed semantic version. Ordered numerically, not lexically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "String", try_from = "String")]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// How to increment a signal type's version on creation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BumpType {
    Major,
    Minor,
    Patch,
}

impl SemVer {
    pub const ZERO: SemVer = SemVer {
        major: 0,
        minor: 0,
        patch: 0,
    };

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns the next version for the given bump type. Bumping resets the
    /// lower-order components, so `1.2.3` bumped `minor` is `1.3.0`.
    pub fn bump(self, bump: BumpType) -> SemVer {
        match bump {
            BumpType::Major => SemVer::new(self.major + 1, 0, 0),
            BumpType::Minor => SemVer::new(self.major, self.minor + 1, 0),
            BumpType::Patch => SemVer::new(self.major, self.minor, self.patch + 1),
        }
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = SignalsdError;

    /// Parses `major.minor.patch`, tolerating an optional leading `v` so
    /// path segments like `v0.0.1` round-trip.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix('v').unwrap_or(s);
        let mut parts = trimmed.splitn(3, '.');
        let mut next = || -> Result<u32, SignalsdError> {
            parts
                .next()
                .ok_or_else(|| SignalsdError::MalformedBody(format!("invalid sem_ver: {s:?}")))?
                .parse::<u32>()
                .map_err(|_| SignalsdError::MalformedBody(format!("invalid sem_ver: {s:?}")))
        };
        Ok(SemVer::new(next()?, next()?, next()?))
    }
}

impl From<SemVer> for String {
    fn from(v: SemVer) -> Self {
        v.to_string()
    }
}

impl TryFrom<String> for SemVer {
    type Error = SignalsdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Formats the `{slug}/v{sem_ver}` path used as the schema-cache key and in
/// claims payloads.
pub fn signal_type_path(slug: &str, sem_ver: SemVer) -> String {
    format!("{slug}/v{sem_ver}")
}

// Schema sources must be version-pinned GitHub blob URLs ending in .json;
// readmes are the same shape ending in .md.
static SCHEMA_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://github\.com/[\w.-]+/[\w.-]+/blob/[\w./-]+\.json$")
        .expect("schema url pattern is valid")
});

static README_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://github\.com/[\w.-]+/[\w.-]+/blob/[\w./-]+\.md$")
        .expect("readme url pattern is valid")
});

/// The sentinel schema URL that disables content validation for a signal type.
pub const SKIP_VALIDATION_URL: &str = "https://github.com/skip/validation/main/schema.json";

pub fn is_skip_validation_url(url: &str) -> bool {
    url == SKIP_VALIDATION_URL
}

/// Accepts the sentinel or an allow-listed GitHub blob URL pointing at a
/// `.json` document.
pub fn validate_schema_url(url: &str) -> Result<(), SignalsdError> {
    if is_skip_validation_url(url) || (parses_as_https(url) && SCHEMA_URL_RE.is_match(url)) {
        Ok(())
    } else {
        Err(SignalsdError::MalformedBody(format!(
            "schema_url must match https://github.com/{{org}}/{{repo}}/blob/{{ref}}/**.json, got {url:?}"
        )))
    }
}

pub fn validate_readme_url(url: &str) -> Result<(), SignalsdError> {
    if parses_as_https(url) && README_URL_RE.is_match(url) {
        Ok(())
    } else {
        Err(SignalsdError::MalformedBody(format!(
            "readme_url must match https://github.com/{{org}}/{{repo}}/blob/{{ref}}/**.md, got {url:?}"
        )))
    }
}

fn parses_as_https(raw: &str) -> bool {
    url::Url::parse(raw).is_ok_and(|u| u.scheme() == "https" && u.host_str().is_some())
}

/// Lowercases and minimally validates an email address. Full RFC parsing is
/// deliberately out of scope; the mailbox is only used as a unique login key.
pub fn normalize_email(email: &str) -> Result<String, SignalsdError> {
    let normalized = email.trim().to_ascii_lowercase();
    let well_formed = normalized.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
    });
    if !well_formed {
        return Err(SignalsdError::MalformedBody(format!(
            "invalid email address: {email:?}"
        )));
    }
    Ok(normalized)
}

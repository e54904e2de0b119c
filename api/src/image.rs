//! Image holds a parser for container image references.
//!
//! The accepted grammar is the common `[registry/]path[:tag][@digest]` form. The registry is
//! only recognized when the first path component looks like a host (contains a `.` or `:`, or is
//! `localhost`).

use std::{fmt, sync::LazyLock};

use regex::Regex;

static COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").unwrap());
static DIGEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sha256:[0-9a-f]{64}$").unwrap());
static REGISTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.-]+(?::[0-9]+)?$").unwrap());

/// ImageReference is a parsed container image reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, if one was given.
    pub registry: Option<String>,
    /// Repository path, without the registry.
    pub repository: String,
    /// Tag, if one was given.
    pub tag: Option<String>,
    /// Digest, if one was given.
    pub digest: Option<String>,
}

/// ParseError is returned for malformed image references.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The reference was empty.
    Empty,
    /// The reference contained whitespace.
    Whitespace,
    /// The registry component is not a valid host.
    InvalidRegistry(String),
    /// A repository path component is malformed.
    InvalidRepository(String),
    /// The tag is malformed.
    InvalidTag(String),
    /// The digest is malformed.
    InvalidDigest(String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::Whitespace => write!(f, "image reference contains whitespace"),
            ParseError::InvalidRegistry(r) => write!(f, "invalid registry: {r:?}"),
            ParseError::InvalidRepository(r) => write!(f, "invalid repository: {r:?}"),
            ParseError::InvalidTag(t) => write!(f, "invalid tag: {t:?}"),
            ParseError::InvalidDigest(d) => write!(f, "invalid digest: {d:?}"),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl ImageReference {
    /// Parse parses `s` as an image reference.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(ParseError::Whitespace);
        }

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => {
                if !DIGEST.is_match(digest) {
                    return Err(ParseError::InvalidDigest(digest.to_string()));
                }
                (rest, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // A colon after the last slash starts the tag; anything before is a registry port.
        let last_slash = rest.rfind('/');
        let (rest, tag) = match rest.rfind(':') {
            Some(pos) if last_slash.is_none_or(|slash| pos > slash) => {
                let (name, tag) = rest.split_at(pos);
                let tag = &tag[1..];
                if !TAG.is_match(tag) {
                    return Err(ParseError::InvalidTag(tag.to_string()));
                }
                (name, Some(tag.to_string()))
            }
            _ => (rest, None),
        };

        let (registry, repository) = match rest.split_once('/') {
            Some((first, path))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                if !REGISTRY.is_match(first) {
                    return Err(ParseError::InvalidRegistry(first.to_string()));
                }
                (Some(first.to_string()), path)
            }
            _ => (None, rest),
        };
        if repository.is_empty() || !repository.split('/').all(|c| COMPONENT.is_match(c)) {
            return Err(ParseError::InvalidRepository(repository.to_string()));
        }

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }
}

//! Storage path model
//!
//! Caller-supplied paths are normalized into a list of segments relative to the
//! backend root. `..` is resolved lexically and may never climb above the root;
//! a leading `/` anchors the path at the root instead of the host filesystem.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Characters rejected anywhere in a path, in addition to non-space whitespace
const DISALLOWED_CHARS: &[char] = &['~', '?', '*', '\\', '\0'];

/// A normalized, root-relative storage path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoragePath {
    segments: Vec<String>,
}

impl StoragePath {
    /// The backend root itself
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse and normalize a caller-supplied path.
    ///
    /// Fails with [`Error::InvalidPath`] when the input contains unsupported
    /// characters or when `..` segments would leave the root.
    pub fn parse(input: &str) -> Result<Self> {
        if let Some(c) = input
            .chars()
            .find(|c| DISALLOWED_CHARS.contains(c) || (c.is_whitespace() && *c != ' '))
        {
            return Err(Error::InvalidPath(format!(
                "unsupported character {c:?} in '{input}'"
            )));
        }

        let mut segments: Vec<String> = Vec::new();
        for segment in input.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(Error::InvalidPath(format!(
                            "'{input}' resolves outside the storage root"
                        )));
                    }
                }
                s => segments.push(s.to_string()),
            }
        }

        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, if any
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Containing path, or `None` for the root
    pub fn parent(&self) -> Option<StoragePath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a relative path, with the same containment rules as [`parse`](Self::parse)
    pub fn join(&self, child: &str) -> Result<StoragePath> {
        Self::parse(&format!("{}/{}", self.key(), child))
    }

    /// `/`-separated root-relative key; empty for the root
    pub fn key(&self) -> String {
        self.segments.join("/")
    }

    /// Key placed under an object-store prefix
    pub fn with_prefix(&self, prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        match (prefix.is_empty(), self.is_root()) {
            (true, _) => self.key(),
            (false, true) => prefix.to_string(),
            (false, false) => format!("{}/{}", prefix, self.key()),
        }
    }

    /// Host filesystem location of this path under `root`
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut full = root.to_path_buf();
        full.extend(&self.segments);
        full
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.key())
        }
    }
}

impl FromStr for StoragePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

//! Normalized virtual paths.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::result::AppResult;

/// A canonical path inside one owner's virtual tree.
///
/// Always absolute, `/`-separated, without empty, `.` or `..` segments and
/// without a trailing slash. The root is `/`. The canonical string is what
/// the path locker keys on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VfsPath(String);

impl VfsPath {
    /// The root path.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and normalize a user supplied path.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let mut segments = Vec::new();
        for segment in raw.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(AppError::validation(format!(
                        "Path '{raw}' must not contain '..'"
                    )));
                }
                s => {
                    validate_name(s)?;
                    segments.push(s);
                }
            }
        }
        if segments.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Path segments, root yields none.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// The last segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<VfsPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// Append one validated name.
    pub fn join(&self, name: &str) -> AppResult<VfsPath> {
        validate_name(name)?;
        if self.is_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// Whether `self` equals `other` or contains it.
    pub fn is_ancestor_of(&self, other: &VfsPath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0 == self.0
            || (other.0.starts_with(&self.0) && other.0.as_bytes().get(self.0.len()) == Some(&b'/'))
    }

    /// All proper ancestors from the root down to the parent.
    pub fn ancestors(&self) -> Vec<VfsPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(path) = current {
            current = path.parent();
            out.push(path);
        }
        out.reverse();
        out
    }

    /// The path of `self` relative to the ancestor `base`, without a leading slash.
    pub fn strip_prefix(&self, base: &VfsPath) -> Option<&str> {
        if !base.is_ancestor_of(self) {
            return None;
        }
        if base.is_root() {
            return Some(self.0.trim_start_matches('/'));
        }
        Some(self.0[base.0.len()..].trim_start_matches('/'))
    }
}

/// Validate a single file or directory name.
pub fn validate_name(name: &str) -> AppResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(AppError::validation(format!("Invalid name '{name}'")));
    }
    if name.len() > 255 {
        return Err(AppError::validation("Name exceeds 255 bytes"));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c == '\0') {
        return Err(AppError::validation(format!(
            "Name '{name}' contains a forbidden character"
        )));
    }
    Ok(())
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VfsPath {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VfsPath> for String {
    fn from(value: VfsPath) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(VfsPath::parse("").unwrap().as_str(), "/");
        assert_eq!(VfsPath::parse("a//b/./c/").unwrap().as_str(), "/a/b/c");
        assert!(VfsPath::parse("/a/../b").is_err());
    }

    #[test]
    fn test_parent_and_ancestors() {
        let path = VfsPath::parse("/docs/2024/report.pdf").unwrap();
        assert_eq!(path.name(), Some("report.pdf"));
        assert_eq!(path.parent().unwrap().as_str(), "/docs/2024");

        let ancestors: Vec<String> = path.ancestors().into_iter().map(String::from).collect();
        assert_eq!(ancestors, vec!["/", "/docs", "/docs/2024"]);
        assert!(VfsPath::root().parent().is_none());
    }

    #[test]
    fn test_ancestor_boundaries() {
        let docs = VfsPath::parse("/docs").unwrap();
        assert!(docs.is_ancestor_of(&VfsPath::parse("/docs/a").unwrap()));
        assert!(!docs.is_ancestor_of(&VfsPath::parse("/docsx").unwrap()));
        assert_eq!(
            VfsPath::parse("/docs/a/b").unwrap().strip_prefix(&docs),
            Some("a/b")
        );
    }
}

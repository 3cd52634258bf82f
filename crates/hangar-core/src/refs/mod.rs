//! Ref naming: the four-part identifier of an installable unit.
//!
//! A ref is `<kind>/<name>/<arch>/<branch>`, for example
//! `app/org.example.Foo/x86_64/master`. Composition validates every component;
//! decomposition only checks the shape so refs advertised by remotes can be
//! read back even when their names predate stricter rules.

mod arch;

pub use arch::default_arch;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Branch used when a caller does not name one.
pub const DEFAULT_BRANCH: &str = "master";

const SEPARATOR: char = '/';
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    App,
    Runtime,
}

impl RefKind {
    pub const ALL: [RefKind; 2] = [RefKind::App, RefKind::Runtime];

    pub fn as_str(self) -> &'static str {
        match self {
            RefKind::App => "app",
            RefKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "app" => Ok(RefKind::App),
            "runtime" => Ok(RefKind::Runtime),
            other => Err(Error::invalid(format!("unknown ref kind '{other}'"))),
        }
    }
}

/// Identifier of an app or runtime build.
///
/// Immutable once constructed; ordering and hashing follow the canonical
/// string so refs can key maps and sets directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ref {
    kind: RefKind,
    name: String,
    arch: String,
    branch: String,
}

impl Ref {
    /// Build a ref from its parts, validating each one.
    ///
    /// `branch` defaults to [`DEFAULT_BRANCH`] and `arch` to [`default_arch`].
    pub fn compose(
        kind: RefKind,
        name: &str,
        branch: Option<&str>,
        arch: Option<&str>,
    ) -> Result<Self> {
        let branch = branch.unwrap_or(DEFAULT_BRANCH);
        let arch = arch.unwrap_or_else(|| default_arch());

        validate_name(name)?;
        validate_branch(branch)?;
        validate_arch(arch)?;

        Ok(Self {
            kind,
            name: name.to_string(),
            arch: arch.to_string(),
            branch: branch.to_string(),
        })
    }

    pub fn app(name: &str, branch: Option<&str>, arch: Option<&str>) -> Result<Self> {
        Self::compose(RefKind::App, name, branch, arch)
    }

    pub fn runtime(name: &str, branch: Option<&str>, arch: Option<&str>) -> Result<Self> {
        Self::compose(RefKind::Runtime, name, branch, arch)
    }

    /// Split a canonical ref string back into its parts.
    pub fn decompose(full_ref: &str) -> Result<Self> {
        let parts: Vec<&str> = full_ref.split(SEPARATOR).collect();
        let [kind, name, arch, branch] = parts.as_slice() else {
            return Err(Error::invalid(format!(
                "wrong number of components in ref '{full_ref}'"
            )));
        };

        let kind: RefKind = kind.parse()?;
        for (label, value) in [("name", name), ("arch", arch), ("branch", branch)] {
            if value.is_empty() {
                return Err(Error::invalid(format!("empty {label} in ref '{full_ref}'")));
            }
            if matches!(*value, "." | "..") {
                return Err(Error::invalid(format!("bad {label} in ref '{full_ref}'")));
            }
        }

        Ok(Self {
            kind,
            name: name.to_string(),
            arch: arch.to_string(),
            branch: branch.to_string(),
        })
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn is_app(&self) -> bool {
        self.kind == RefKind::App
    }

    /// Relative directory of this ref below an installation root.
    pub fn relative_path(&self) -> PathBuf {
        [self.kind.as_str(), &self.name, &self.arch, &self.branch]
            .iter()
            .collect()
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.kind, self.name, self.arch, self.branch
        )
    }
}

impl FromStr for Ref {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decompose(s)
    }
}

impl TryFrom<String> for Ref {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::decompose(&value)
    }
}

impl From<Ref> for String {
    fn from(value: Ref) -> Self {
        value.to_string()
    }
}

/// Canonical string for the given parts, see [`Ref::compose`].
pub fn compose(kind: RefKind, name: &str, branch: Option<&str>, arch: Option<&str>) -> Result<String> {
    Ref::compose(kind, name, branch, arch).map(|r| r.to_string())
}

/// Parse a canonical ref string, see [`Ref::decompose`].
pub fn decompose(full_ref: &str) -> Result<Ref> {
    Ref::decompose(full_ref)
}

/// Validate an app or runtime name.
///
/// Names are reverse-DNS style: at least two dot-separated elements, each
/// starting with a letter or underscore and continuing with letters, digits,
/// underscores or dashes.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("name can't be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid(format!(
            "name can't be longer than {MAX_NAME_LEN} characters"
        )));
    }

    let elements: Vec<&str> = name.split('.').collect();
    if elements.len() < 2 {
        return Err(Error::invalid(format!(
            "name '{name}' must contain at least one period"
        )));
    }

    for element in elements {
        let mut chars = element.chars();
        let Some(first) = chars.next() else {
            return Err(Error::invalid(format!(
                "name '{name}' can't contain empty elements"
            )));
        };
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(Error::invalid(format!(
                "name '{name}' has an element starting with '{first}'"
            )));
        }
        if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
            return Err(Error::invalid(format!(
                "name '{name}' can't contain '{bad}'"
            )));
        }
    }

    Ok(())
}

pub fn validate_branch(branch: &str) -> Result<()> {
    let Some(first) = branch.chars().next() else {
        return Err(Error::invalid("branch can't be empty"));
    };
    if !(first.is_ascii_alphanumeric() || first == '_' || first == '-') {
        return Err(Error::invalid(format!(
            "branch '{branch}' can't start with '{first}'"
        )));
    }
    if let Some(bad) = branch
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(Error::invalid(format!(
            "branch '{branch}' can't contain '{bad}'"
        )));
    }
    Ok(())
}

pub fn validate_arch(arch: &str) -> Result<()> {
    if arch.is_empty() {
        return Err(Error::invalid("arch can't be empty"));
    }
    if let Some(bad) = arch
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(Error::invalid(format!("arch '{arch}' can't contain '{bad}'")));
    }
    Ok(())
}

//! Scope identifiers for the Month → Team → HQ hierarchy.
//!
//! A [`ScopeKey`] names one replicated document's domain. Its string forms
//! are deterministic so every client derives the same room name and the same
//! store path for the same scope.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing or validating scope components.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("invalid month {0:?}: expected YYYY-MM")]
    InvalidMonth(String),
    #[error("name must not be empty")]
    EmptyName,
    #[error("name {0:?} contains a path separator")]
    PathSeparator(String),
}

/// A calendar month in `YYYY-MM` form.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month(String);

impl Month {
    /// Parse and validate a `YYYY-MM` string.
    pub fn parse(s: &str) -> Result<Self, ScopeError> {
        let s = s.trim();
        let well_formed = s.len() == 7
            && s.as_bytes()[4] == b'-'
            && chrono::NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").is_ok();
        if well_formed {
            Ok(Self(s.to_string()))
        } else {
            Err(ScopeError::InvalidMonth(s.to_string()))
        }
    }

    /// The current UTC month.
    pub fn current() -> Self {
        Self(chrono::Utc::now().format("%Y-%m").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Month {
    type Error = ScopeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Month> for String {
    fn from(m: Month) -> String {
        m.0
    }
}

/// Check that a team or HQ name can be used as a path segment.
pub fn validate_segment(name: &str) -> Result<(), ScopeError> {
    if name.trim().is_empty() {
        return Err(ScopeError::EmptyName);
    }
    if name.contains('/') {
        return Err(ScopeError::PathSeparator(name.to_string()));
    }
    Ok(())
}

/// An HQ within a month, addressed by its team.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct HqRef {
    pub team: String,
    pub name: String,
}

impl HqRef {
    pub fn new(team: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for HqRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.team, self.name)
    }
}

/// A point in the Month → Team → HQ tree.
///
/// Constructors enforce that an HQ never appears without its team.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ScopeKey {
    month: Month,
    team: Option<String>,
    hq: Option<String>,
}

impl ScopeKey {
    pub fn for_month(month: Month) -> Self {
        Self { month, team: None, hq: None }
    }

    pub fn for_team(month: Month, team: impl Into<String>) -> Self {
        Self {
            month,
            team: Some(team.into()),
            hq: None,
        }
    }

    pub fn for_hq(month: Month, team: impl Into<String>, hq: impl Into<String>) -> Self {
        Self {
            month,
            team: Some(team.into()),
            hq: Some(hq.into()),
        }
    }

    pub fn from_hq_ref(month: Month, hq: &HqRef) -> Self {
        Self::for_hq(month, hq.team.clone(), hq.name.clone())
    }

    pub fn month(&self) -> &Month {
        &self.month
    }

    pub fn team(&self) -> Option<&str> {
        self.team.as_deref()
    }

    pub fn hq(&self) -> Option<&str> {
        self.hq.as_deref()
    }

    /// The (team, hq) pair for HQ-level scopes.
    pub fn hq_ref(&self) -> Option<HqRef> {
        match (&self.team, &self.hq) {
            (Some(team), Some(hq)) => Some(HqRef::new(team.clone(), hq.clone())),
            _ => None,
        }
    }

    /// Peer-transport channel name, derived by concatenation.
    ///
    /// Team and HQ segments are escaped (`%` → `%25`, `-` → `%2D`) so the
    /// separator never appears inside a segment and distinct scopes never
    /// share a room.
    pub fn room_name(&self) -> RoomName {
        let mut name = self.month.to_string();
        for part in [&self.team, &self.hq].into_iter().flatten() {
            name.push('-');
            push_room_segment(&mut name, part);
        }
        RoomName(name)
    }

    /// Sequence name inside a month-scoped document (`data/{team}/{hq}`).
    pub fn namespace(&self) -> String {
        let mut ns = String::from("data");
        for part in [&self.team, &self.hq].into_iter().flatten() {
            ns.push('/');
            ns.push_str(part);
        }
        ns
    }
}

fn push_room_segment(out: &mut String, segment: &str) {
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            '-' => out.push_str("%2D"),
            c => out.push(c),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.month)?;
        for part in [&self.team, &self.hq].into_iter().flatten() {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

/// Peer-transport channel name. Two clients with equal scopes always derive
/// equal room names.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

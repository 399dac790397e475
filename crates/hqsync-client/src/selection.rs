//! Selection state machine.
//!
//! Tracks what the user is looking at: one month, an ordered list of teams
//! and, only while exactly one team is selected, an ordered list of HQs of
//! that team. Every transition reports whether anything changed and bumps
//! [`SelectionState::version`] when it did.

use hqsync_types::{HqRef, Month};
use tracing::trace;

/// Current selection.
///
/// Invariant: `hqs` is empty whenever more than one team is selected, and
/// every entry of `hqs` belongs to the single selected team.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionState {
    month: Month,
    teams: Vec<String>,
    hqs: Vec<HqRef>,
    explicitly_all: bool,
    version: u64,
}

impl SelectionState {
    pub fn new(month: Month) -> Self {
        Self {
            month,
            teams: Vec::new(),
            hqs: Vec::new(),
            explicitly_all: false,
            version: 0,
        }
    }

    pub fn month(&self) -> &Month {
        &self.month
    }

    pub fn teams(&self) -> &[String] {
        &self.teams
    }

    pub fn hqs(&self) -> &[HqRef] {
        &self.hqs
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// The single selected team, if exactly one is selected.
    pub fn single_team(&self) -> Option<&str> {
        match self.teams.as_slice() {
            [team] => Some(team),
            _ => None,
        }
    }

    /// The single selected HQ, if exactly one team and one HQ are selected.
    pub fn single_hq(&self) -> Option<&HqRef> {
        match (self.single_team(), self.hqs.as_slice()) {
            (Some(_), [hq]) => Some(hq),
            _ => None,
        }
    }

    /// True after `select_all_hqs`, until the HQ list changes otherwise.
    /// Lets a UI tell "explicitly all" apart from "none selected", which
    /// aggregate the same.
    pub fn hqs_explicitly_all(&self) -> bool {
        self.explicitly_all
    }

    pub fn is_team_selected(&self, team: &str) -> bool {
        self.teams.iter().any(|t| t == team)
    }

    pub fn is_hq_selected(&self, hq: &HqRef) -> bool {
        self.hqs.contains(hq)
    }

    /// Replace the month and clear teams and HQs.
    pub fn set_month(&mut self, month: Month) -> bool {
        if month == self.month && self.teams.is_empty() && self.hqs.is_empty() {
            return false;
        }
        self.month = month;
        self.teams.clear();
        self.clear_hqs();
        self.bump("set_month")
    }

    /// Add or remove a team.
    ///
    /// Going above one team clears the HQ list; so does dropping from two
    /// teams back to one.
    pub fn toggle_team(&mut self, team: &str) -> bool {
        let before = self.teams.len();
        if let Some(pos) = self.teams.iter().position(|t| t == team) {
            self.teams.remove(pos);
        } else {
            self.teams.push(team.to_string());
        }
        let after = self.teams.len();

        if after != 1 || before > 1 {
            self.clear_hqs();
        } else if let Some(current) = self.teams.first() {
            let current = current.clone();
            self.hqs.retain(|hq| hq.team == current);
        }
        self.bump("toggle_team")
    }

    /// Add or remove an HQ. No-op unless exactly one team is selected and
    /// the HQ belongs to it.
    pub fn toggle_hq(&mut self, hq: &HqRef) -> bool {
        if self.single_team() != Some(hq.team.as_str()) {
            trace!("toggle_hq({}) ignored: not under the single selected team", hq);
            return false;
        }
        if let Some(pos) = self.hqs.iter().position(|h| h == hq) {
            self.hqs.remove(pos);
        } else {
            self.hqs.push(hq.clone());
        }
        self.explicitly_all = false;
        self.bump("toggle_hq")
    }

    /// Select every available HQ of the single selected team.
    pub fn select_all_hqs(&mut self, available: &[HqRef]) -> bool {
        let Some(team) = self.single_team().map(str::to_string) else {
            return false;
        };
        let all: Vec<HqRef> = available.iter().filter(|hq| hq.team == team).cloned().collect();
        if all == self.hqs && self.explicitly_all {
            return false;
        }
        self.hqs = all;
        self.explicitly_all = true;
        self.bump("select_all_hqs")
    }

    /// Clear the HQ list. Only valid with exactly one team selected.
    pub fn deselect_all_hqs(&mut self) -> bool {
        if self.single_team().is_none() || (self.hqs.is_empty() && !self.explicitly_all) {
            return false;
        }
        self.clear_hqs();
        self.bump("deselect_all_hqs")
    }

    fn clear_hqs(&mut self) {
        self.hqs.clear();
        self.explicitly_all = false;
    }

    fn bump(&mut self, action: &str) -> bool {
        debug_assert!(self.teams.len() <= 1 || self.hqs.is_empty());
        self.version += 1;
        trace!(
            "selection {} -> v{} teams={:?} hqs={}",
            action,
            self.version,
            self.teams,
            self.hqs.len()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SelectionState {
        SelectionState::new(Month::parse("2025-01").unwrap())
    }

    fn hq(team: &str, name: &str) -> HqRef {
        HqRef::new(team, name)
    }

    #[test]
    fn test_multi_team_clears_hqs() {
        let mut s = state();
        s.toggle_team("North");
        assert!(s.toggle_hq(&hq("North", "Delhi")));
        assert_eq!(s.hqs().len(), 1);

        s.toggle_team("South");
        assert_eq!(s.teams(), ["North", "South"]);
        assert!(s.hqs().is_empty());

        // HQ toggles are inert while multiple teams are selected.
        assert!(!s.toggle_hq(&hq("North", "Delhi")));
        assert!(s.hqs().is_empty());
    }

    #[test]
    fn test_two_to_one_team_clears_hqs() {
        let mut s = state();
        s.toggle_team("North");
        s.toggle_team("South");
        s.toggle_team("South");
        assert_eq!(s.single_team(), Some("North"));
        assert!(s.hqs().is_empty());
    }

    #[test]
    fn test_toggle_hq_requires_matching_team() {
        let mut s = state();
        assert!(!s.toggle_hq(&hq("North", "Delhi")));
        s.toggle_team("North");
        assert!(!s.toggle_hq(&hq("South", "Chennai")));
        assert!(s.toggle_hq(&hq("North", "Delhi")));
        assert!(s.toggle_hq(&hq("North", "Agra")));
        assert!(s.toggle_hq(&hq("North", "Delhi")));
        assert_eq!(s.hqs(), [hq("North", "Agra")]);
    }

    #[test]
    fn test_set_month_clears_everything() {
        let mut s = state();
        s.toggle_team("North");
        s.toggle_hq(&hq("North", "Delhi"));
        let v = s.version();
        assert!(s.set_month(Month::parse("2025-02").unwrap()));
        assert!(s.teams().is_empty());
        assert!(s.hqs().is_empty());
        assert!(s.version() > v);
    }

    #[test]
    fn test_select_and_deselect_all() {
        let mut s = state();
        let available = [hq("North", "Delhi"), hq("North", "Agra"), hq("South", "Chennai")];
        assert!(!s.select_all_hqs(&available));

        s.toggle_team("North");
        assert!(s.select_all_hqs(&available));
        assert_eq!(s.hqs(), [hq("North", "Delhi"), hq("North", "Agra")]);
        assert!(s.hqs_explicitly_all());
        assert!(!s.select_all_hqs(&available));

        assert!(s.deselect_all_hqs());
        assert!(s.hqs().is_empty());
        assert!(!s.hqs_explicitly_all());
        assert!(!s.deselect_all_hqs());
    }

    #[test]
    fn test_versions_bump_only_on_change() {
        let mut s = state();
        let v0 = s.version();
        assert!(!s.toggle_hq(&hq("North", "Delhi")));
        assert_eq!(s.version(), v0);
        s.toggle_team("North");
        assert_eq!(s.version(), v0 + 1);
    }

    #[test]
    fn test_invariant_holds_over_random_walk() {
        let teams = ["North", "South", "East"];
        let hqs = [hq("North", "Delhi"), hq("South", "Chennai"), hq("East", "Kolkata")];
        let mut s = state();
        // Deterministic pseudo-random walk.
        let mut x: u32 = 7;
        for _ in 0..500 {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            match (x >> 16) % 4 {
                0 => {
                    s.toggle_team(teams[(x as usize >> 3) % teams.len()]);
                }
                1 => {
                    s.toggle_hq(&hqs[(x as usize >> 5) % hqs.len()]);
                }
                2 => {
                    s.select_all_hqs(&hqs);
                }
                _ => {
                    s.deselect_all_hqs();
                }
            }
            assert!(s.teams().len() <= 1 || s.hqs().is_empty());
            if let Some(team) = s.single_team() {
                assert!(s.hqs().iter().all(|h| h.team == team));
            }
        }
    }
}

//! Teams and HQs available in a month.

use std::collections::BTreeMap;

use hqsync_types::HqRef;

/// What exists in the durable store for one month.
///
/// Teams keep the order of the month document's `teams` list; HQs of a team
/// are sorted by name (collection listing order).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    teams: Vec<String>,
    hqs: BTreeMap<String, Vec<String>>,
    version: u64,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn teams(&self) -> &[String] {
        &self.teams
    }

    pub fn has_team(&self, team: &str) -> bool {
        self.teams.iter().any(|t| t == team)
    }

    /// HQ names of a team; empty if not listed yet.
    pub fn hqs_of(&self, team: &str) -> &[String] {
        self.hqs.get(team).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_hq(&self, hq: &HqRef) -> bool {
        self.hqs_of(&hq.team).contains(&hq.name)
    }

    /// HQs of the given teams, in team order.
    pub fn available_hqs(&self, teams: &[String]) -> Vec<HqRef> {
        teams
            .iter()
            .flat_map(|team| self.hqs_of(team).iter().map(move |name| HqRef::new(team.clone(), name.clone())))
            .collect()
    }

    pub fn set_teams(&mut self, teams: Vec<String>) -> bool {
        if teams == self.teams {
            return false;
        }
        self.teams = teams;
        self.version += 1;
        true
    }

    pub fn add_team(&mut self, team: &str) -> bool {
        if self.has_team(team) {
            return false;
        }
        self.teams.push(team.to_string());
        self.version += 1;
        true
    }

    pub fn set_hqs(&mut self, team: &str, mut hqs: Vec<String>) -> bool {
        hqs.sort();
        hqs.dedup();
        if self.hqs.get(team) == Some(&hqs) {
            return false;
        }
        self.hqs.insert(team.to_string(), hqs);
        self.version += 1;
        true
    }

    pub fn add_hq(&mut self, hq: &HqRef) -> bool {
        let list = self.hqs.entry(hq.team.clone()).or_default();
        if list.contains(&hq.name) {
            return false;
        }
        list.push(hq.name.clone());
        list.sort();
        self.version += 1;
        true
    }
}

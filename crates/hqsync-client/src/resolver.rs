//! Selection → resident scopes.

use hqsync_types::ScopeKey;

use crate::catalog::Catalog;
use crate::selection::SelectionState;

/// HQ scopes whose data must be resident for the current selection.
///
/// - no team: nothing
/// - one team with explicit HQs: those HQs
/// - one team, no HQs: every HQ of the team
/// - several teams: every HQ of every team
///
/// Output order follows team order, then HQ order.
pub fn resolve(selection: &SelectionState, catalog: &Catalog) -> Vec<ScopeKey> {
    let month = selection.month();
    if selection.single_team().is_some() && !selection.hqs().is_empty() {
        return selection
            .hqs()
            .iter()
            .map(|hq| ScopeKey::from_hq_ref(month.clone(), hq))
            .collect();
    }
    catalog
        .available_hqs(selection.teams())
        .iter()
        .map(|hq| ScopeKey::from_hq_ref(month.clone(), hq))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hqsync_types::{HqRef, Month};

    fn fixture() -> (SelectionState, Catalog) {
        let mut catalog = Catalog::new();
        catalog.set_teams(vec!["North".into(), "South".into()]);
        catalog.set_hqs("North", vec!["Delhi".into(), "Agra".into()]);
        catalog.set_hqs("South", vec!["Chennai".into()]);
        (SelectionState::new(Month::parse("2025-01").unwrap()), catalog)
    }

    fn rooms(scopes: &[ScopeKey]) -> Vec<String> {
        scopes.iter().map(|s| s.room_name().to_string()).collect()
    }

    #[test]
    fn test_no_team_resolves_nothing() {
        let (s, c) = fixture();
        assert!(resolve(&s, &c).is_empty());
    }

    #[test]
    fn test_single_team_without_hqs_is_all_hqs() {
        let (mut s, c) = fixture();
        s.toggle_team("North");
        assert_eq!(rooms(&resolve(&s, &c)), ["2025-01-North-Agra", "2025-01-North-Delhi"]);
    }

    #[test]
    fn test_explicit_hqs() {
        let (mut s, c) = fixture();
        s.toggle_team("North");
        s.toggle_hq(&HqRef::new("North", "Delhi"));
        assert_eq!(rooms(&resolve(&s, &c)), ["2025-01-North-Delhi"]);
    }

    #[test]
    fn test_multi_team_covers_every_hq() {
        let (mut s, c) = fixture();
        s.toggle_team("South");
        s.toggle_team("North");
        assert_eq!(
            rooms(&resolve(&s, &c)),
            ["2025-01-South-Chennai", "2025-01-North-Agra", "2025-01-North-Delhi"]
        );
    }
}

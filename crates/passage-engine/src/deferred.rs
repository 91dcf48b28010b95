//! Deferred prop-group tracking.
//!
//! After a primary page commits, each declared deferred group is fetched
//! by one independent partial reload, so slow groups never block fast
//! ones. Groups fire once per page commit; results arriving after a newer
//! primary commit are discarded by the generation check in the visit path.

use std::collections::HashMap;

use passage_types::VisitToken;
use passage_types::page::Page;

/// Loading state of one deferred group on the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Loading,
    Resolved,
}

#[derive(Debug, Default)]
pub(crate) struct DeferredLoader {
    groups: HashMap<String, (GroupState, Option<VisitToken>)>,
}

impl DeferredLoader {
    /// A primary page committed: reset tracking and return the groups to
    /// request, each with the prop names it contains.
    pub fn on_commit(&mut self, page: &Page) -> Vec<(String, Vec<String>)> {
        self.groups.clear();
        page.deferred_groups
            .iter()
            .map(|(group, props)| {
                self.groups
                    .insert(group.clone(), (GroupState::Loading, None));
                (group.clone(), props.clone())
            })
            .collect()
    }

    /// Record the partial-reload token fetching `group`.
    pub fn mark_issued(&mut self, group: &str, token: VisitToken) {
        if let Some(entry) = self.groups.get_mut(group) {
            entry.1 = Some(token);
        }
    }

    /// A group's reload applied. Returns `true` on the loading→resolved
    /// transition (a late duplicate stays resolved).
    pub fn resolve(&mut self, group: &str) -> bool {
        match self.groups.get_mut(group) {
            Some(entry) if entry.0 == GroupState::Loading => {
                entry.0 = GroupState::Resolved;
                true
            }
            _ => false,
        }
    }

    /// The state of `group` on the current page.
    pub fn state(&self, group: &str) -> Option<GroupState> {
        self.groups.get(group).map(|(state, _)| *state)
    }

    /// Whether any group is still loading.
    pub fn any_loading(&self) -> bool {
        self.groups
            .values()
            .any(|(state, _)| *state == GroupState::Loading)
    }
}

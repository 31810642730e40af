//! Merge groups: union-find over entity ids with a direct index
//!
//! Every id belongs to at most one group and the index always points at the
//! live group owning it, so finding a group is a single lookup. The first
//! member of a group is its canonical head.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{Error, Result};

const GROUP_PREFIX: &str = "merging_lists";

/// Result of a [`MergeGroups::register_merging`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Neither id was grouped; a new group `[x, y]` was created
    Created,
    /// One id was grouped; the other was appended to its group
    Extended,
    /// Both ids were in different groups; the second group was absorbed
    Joined,
    /// Both ids already share a group
    AlreadyGrouped,
}

/// Merge groups and their index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeGroups {
    groups: BTreeMap<u64, Vec<String>>,
    index: HashMap<String, u64>,
    next_id: u64,
}

impl MergeGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild groups from persisted parts, checking the invariants
    pub fn from_parts(groups: BTreeMap<u64, Vec<String>>, next_id: u64) -> Result<Self> {
        let mut index = HashMap::new();
        for (group, members) in &groups {
            for member in members {
                if index.insert(member.clone(), *group).is_some() {
                    return Err(Error::MergeInvariantViolation(format!(
                        "entity {} belongs to more than one group",
                        member
                    )));
                }
            }
        }
        let floor = groups.keys().next_back().map(|n| n + 1).unwrap_or(0);
        Ok(Self {
            groups,
            index,
            next_id: next_id.max(floor),
        })
    }

    /// Record that `x` and `y` denote the same entity
    pub fn register_merging(&mut self, x: &str, y: &str) -> Result<MergeOutcome> {
        if x == y {
            return Err(Error::InvalidInput(format!("cannot merge {} with itself", x)));
        }

        let group_x = self.live_group(x)?;
        let group_y = self.live_group(y)?;

        let outcome = match (group_x, group_y) {
            (None, None) => {
                let group = self.next_id;
                self.next_id += 1;
                self.groups.insert(group, vec![x.to_string(), y.to_string()]);
                self.index.insert(x.to_string(), group);
                self.index.insert(y.to_string(), group);
                MergeOutcome::Created
            }
            (Some(group), None) => {
                self.append(group, y);
                MergeOutcome::Extended
            }
            (None, Some(group)) => {
                self.append(group, x);
                MergeOutcome::Extended
            }
            (Some(first), Some(second)) if first == second => MergeOutcome::AlreadyGrouped,
            (Some(first), Some(second)) => {
                let migrated = self.groups.remove(&second).unwrap_or_default();
                for member in &migrated {
                    self.append(first, member);
                }
                MergeOutcome::Joined
            }
        };

        debug!(x = %x, y = %y, outcome = ?outcome, "Registered merge");
        Ok(outcome)
    }

    fn live_group(&self, id: &str) -> Result<Option<u64>> {
        match self.index.get(id) {
            None => Ok(None),
            Some(group) if self.groups.contains_key(group) => Ok(Some(*group)),
            Some(group) => Err(Error::MergeInvariantViolation(format!(
                "index entry of {} points at missing group {}",
                id,
                group_id(*group)
            ))),
        }
    }

    fn append(&mut self, group: u64, id: &str) {
        if let Some(members) = self.groups.get_mut(&group) {
            if !members.iter().any(|m| m == id) {
                members.push(id.to_string());
            }
        }
        self.index.insert(id.to_string(), group);
    }

    /// Id of the group owning `id`
    pub fn group_of(&self, id: &str) -> Option<String> {
        self.index.get(id).map(|group| group_id(*group))
    }

    /// Canonical head of the group owning `id`
    pub fn head_of(&self, id: &str) -> Option<&str> {
        let group = self.index.get(id)?;
        self.groups.get(group)?.first().map(String::as_str)
    }

    /// Members of the group owning `id`, head first
    pub fn members(&self, id: &str) -> Option<&[String]> {
        let group = self.index.get(id)?;
        self.groups.get(group).map(Vec::as_slice)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All groups in creation order, as `(group id, members)`
    pub fn groups(&self) -> impl Iterator<Item = (String, &[String])> {
        self.groups
            .iter()
            .map(|(group, members)| (group_id(*group), members.as_slice()))
    }

    /// Raw groups keyed by their counter value
    pub fn raw_groups(&self) -> &BTreeMap<u64, Vec<String>> {
        &self.groups
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of grouped entity ids
    pub fn member_count(&self) -> usize {
        self.index.len()
    }

    /// Verify the partition and direct-index invariants
    pub fn check_invariants(&self) -> Result<()> {
        let mut seen = HashMap::new();
        for (group, members) in &self.groups {
            if members.len() < 2 {
                return Err(Error::MergeInvariantViolation(format!(
                    "group {} has fewer than two members",
                    group_id(*group)
                )));
            }
            for member in members {
                if seen.insert(member.as_str(), *group).is_some() {
                    return Err(Error::MergeInvariantViolation(format!(
                        "entity {} appears in more than one group",
                        member
                    )));
                }
                if self.index.get(member) != Some(group) {
                    return Err(Error::MergeInvariantViolation(format!(
                        "index entry of {} does not point at {}",
                        member,
                        group_id(*group)
                    )));
                }
            }
        }
        if seen.len() != self.index.len() {
            return Err(Error::MergeInvariantViolation(
                "index holds entries for ids outside every group".to_string(),
            ));
        }
        Ok(())
    }
}

/// Group id for a counter value
pub fn group_id(n: u64) -> String {
    format!("{}/{}", GROUP_PREFIX, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_extended_joined() {
        let mut groups = MergeGroups::new();

        assert_eq!(groups.register_merging("a", "b").unwrap(), MergeOutcome::Created);
        assert_eq!(groups.register_merging("c", "d").unwrap(), MergeOutcome::Created);
        assert_eq!(groups.register_merging("b", "e").unwrap(), MergeOutcome::Extended);
        assert_eq!(groups.register_merging("f", "d").unwrap(), MergeOutcome::Extended);

        assert_eq!(groups.members("a").unwrap(), ["a", "b", "e"]);
        assert_eq!(groups.members("c").unwrap(), ["c", "d", "f"]);

        assert_eq!(groups.register_merging("e", "f").unwrap(), MergeOutcome::Joined);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.members("f").unwrap(), ["a", "b", "e", "c", "d", "f"]);
        assert_eq!(groups.head_of("d"), Some("a"));
        assert_eq!(groups.group_of("d").as_deref(), Some("merging_lists/0"));
        groups.check_invariants().unwrap();
    }

    #[test]
    fn test_union_is_idempotent() {
        let mut once = MergeGroups::new();
        once.register_merging("a", "b").unwrap();
        once.register_merging("c", "a").unwrap();

        let mut twice = once.clone();
        assert_eq!(twice.register_merging("c", "a").unwrap(), MergeOutcome::AlreadyGrouped);
        assert_eq!(twice.register_merging("b", "c").unwrap(), MergeOutcome::AlreadyGrouped);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_self_merge_rejected() {
        let mut groups = MergeGroups::new();
        assert!(groups.register_merging("a", "a").is_err());
        assert!(groups.is_empty());
    }

    #[test]
    fn test_partition_invariant_after_arbitrary_unions() {
        // Linear congruential sequence keeps the test deterministic
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move |bound: u64| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) % bound
        };

        let mut groups = MergeGroups::new();
        for _ in 0..500 {
            let x = format!("software/{}", next(60));
            let y = format!("software/{}", next(60));
            if x == y {
                continue;
            }
            groups.register_merging(&x, &y).unwrap();
            groups.check_invariants().unwrap();
        }

        for (group, members) in groups.groups() {
            for member in members {
                assert_eq!(groups.group_of(member).as_deref(), Some(group.as_str()));
                assert_eq!(groups.head_of(member), Some(members[0].as_str()));
            }
        }
    }

    #[test]
    fn test_group_ids_are_monotonic() {
        let mut groups = MergeGroups::new();
        groups.register_merging("a", "b").unwrap();
        groups.register_merging("c", "d").unwrap();
        groups.register_merging("a", "c").unwrap();
        groups.register_merging("e", "f").unwrap();

        let ids: Vec<String> = groups.groups().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["merging_lists/0", "merging_lists/2"]);
        assert_eq!(groups.next_id(), 3);
    }

    #[test]
    fn test_from_parts_round_trip() {
        let mut groups = MergeGroups::new();
        groups.register_merging("a", "b").unwrap();
        groups.register_merging("c", "d").unwrap();
        groups.register_merging("b", "c").unwrap();

        let restored =
            MergeGroups::from_parts(groups.raw_groups().clone(), groups.next_id()).unwrap();
        assert_eq!(restored, groups);

        let mut broken = BTreeMap::new();
        broken.insert(0, vec!["a".to_string(), "b".to_string()]);
        broken.insert(1, vec!["b".to_string(), "c".to_string()]);
        assert!(matches!(
            MergeGroups::from_parts(broken, 2),
            Err(Error::MergeInvariantViolation(_))
        ));
    }

    #[test]
    fn test_dangling_index_is_reported() {
        let mut groups = MergeGroups::new();
        groups.register_merging("a", "b").unwrap();
        groups.groups.clear();

        assert!(matches!(
            groups.register_merging("a", "c"),
            Err(Error::MergeInvariantViolation(_))
        ));
    }
}

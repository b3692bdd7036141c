//! Track the members of a protocol run and the faults attributed to them.
//!
//! Each member keeps its own [Group] view. Faults are recorded locally as
//! messages arrive (or fail to arrive) and are never synchronized directly;
//! members converge only through the result they later agree on.

use std::collections::BTreeSet;
use thiserror::Error;

/// Position of a member within a single protocol run.
///
/// Valid indices are `1..=255`. Index `0` is never assigned.
pub type MemberIndex = u8;

/// Errors that can occur when mutating a [Group].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid member index: {0}")]
    InvalidMemberIndex(MemberIndex),
}

/// Local view of a protocol run's members and their faults.
#[derive(Clone, Debug)]
pub struct Group {
    dishonest_threshold: usize,
    member_ids: Vec<MemberIndex>,
    disqualified_ids: BTreeSet<MemberIndex>,
    inactive_ids: BTreeSet<MemberIndex>,
}

impl Group {
    /// Create a group of `size` members (indices `1..=size`) that tolerates
    /// `dishonest_threshold` faulty members.
    pub fn new(dishonest_threshold: usize, size: u8) -> Self {
        Self {
            dishonest_threshold,
            member_ids: (1..=size).collect(),
            disqualified_ids: BTreeSet::new(),
            inactive_ids: BTreeSet::new(),
        }
    }

    /// Create a group with no registered members.
    pub fn empty(dishonest_threshold: usize) -> Self {
        Self::new(dishonest_threshold, 0)
    }

    /// Register a member. Registering an already present member is a no-op.
    pub fn register_member_id(&mut self, id: MemberIndex) -> Result<(), Error> {
        if id == 0 {
            return Err(Error::InvalidMemberIndex(id));
        }
        if !self.member_ids.contains(&id) {
            self.member_ids.push(id);
        }
        Ok(())
    }

    /// Mark a member as disqualified.
    ///
    /// Does nothing if the member is not currently operating, so the first
    /// fault recorded for a member is final.
    pub fn mark_member_as_disqualified(&mut self, id: MemberIndex) {
        if self.is_operating(id) {
            self.disqualified_ids.insert(id);
        }
    }

    /// Mark a member as inactive.
    ///
    /// Does nothing if the member is not currently operating, so the first
    /// fault recorded for a member is final.
    pub fn mark_member_as_inactive(&mut self, id: MemberIndex) {
        if self.is_operating(id) {
            self.inactive_ids.insert(id);
        }
    }

    /// Returns true if the member is registered and has not been marked faulty.
    pub fn is_operating(&self, id: MemberIndex) -> bool {
        self.member_ids.contains(&id)
            && !self.inactive_ids.contains(&id)
            && !self.disqualified_ids.contains(&id)
    }

    /// Returns the operating members in registration order.
    pub fn operating_member_ids(&self) -> Vec<MemberIndex> {
        self.member_ids
            .iter()
            .copied()
            .filter(|id| self.is_operating(*id))
            .collect()
    }

    /// Returns true if the number of faulty members is within the safety
    /// margin of half the dishonest threshold (rounded down).
    pub fn is_threshold_satisfied(&self) -> bool {
        self.disqualified_ids.len() + self.inactive_ids.len() <= self.dishonest_threshold / 2
    }

    pub fn dishonest_threshold(&self) -> usize {
        self.dishonest_threshold
    }

    /// Returns all registered members in registration order.
    pub fn member_ids(&self) -> &[MemberIndex] {
        &self.member_ids
    }

    pub fn disqualified_member_ids(&self) -> &BTreeSet<MemberIndex> {
        &self.disqualified_ids
    }

    pub fn inactive_member_ids(&self) -> &BTreeSet<MemberIndex> {
        &self.inactive_ids
    }

    pub fn size(&self) -> usize {
        self.member_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(group: &Group) {
        // Fault sets are disjoint
        assert!(group
            .disqualified_member_ids()
            .is_disjoint(group.inactive_member_ids()));

        // Fault sets are subsets of the roster
        for id in group
            .disqualified_member_ids()
            .iter()
            .chain(group.inactive_member_ids())
        {
            assert!(group.member_ids().contains(id));
        }

        // Operating members are the complement, in registration order
        let expected: Vec<_> = group
            .member_ids()
            .iter()
            .copied()
            .filter(|id| {
                !group.disqualified_member_ids().contains(id)
                    && !group.inactive_member_ids().contains(id)
            })
            .collect();
        assert_eq!(group.operating_member_ids(), expected);
    }

    #[test]
    fn test_register_member_id() {
        let mut group = Group::empty(2);
        assert_eq!(
            group.register_member_id(0),
            Err(Error::InvalidMemberIndex(0))
        );
        group.register_member_id(3).unwrap();
        group.register_member_id(1).unwrap();
        group.register_member_id(3).unwrap();
        assert_eq!(group.member_ids(), &[3, 1]);
        assert_eq!(group.operating_member_ids(), vec![3, 1]);
    }

    #[test]
    fn test_first_mark_is_final() {
        let mut group = Group::new(2, 4);

        group.mark_member_as_inactive(2);
        group.mark_member_as_disqualified(2);
        assert!(group.inactive_member_ids().contains(&2));
        assert!(!group.disqualified_member_ids().contains(&2));

        group.mark_member_as_disqualified(3);
        group.mark_member_as_inactive(3);
        group.mark_member_as_disqualified(3);
        assert!(group.disqualified_member_ids().contains(&3));
        assert!(!group.inactive_member_ids().contains(&3));

        assert_eq!(group.operating_member_ids(), vec![1, 4]);
        assert_invariants(&group);
    }

    #[test]
    fn test_mark_unknown_member() {
        let mut group = Group::new(2, 3);
        group.mark_member_as_disqualified(7);
        group.mark_member_as_inactive(9);
        assert!(group.disqualified_member_ids().is_empty());
        assert!(group.inactive_member_ids().is_empty());
        assert!(!group.is_operating(7));
        assert_invariants(&group);
    }

    #[test]
    fn test_invariants_over_mixed_operations() {
        let mut group = Group::new(5, 10);
        for step in 0u16..40 {
            let id = ((step * 7) % 12) as MemberIndex;
            match step % 3 {
                0 => group.mark_member_as_inactive(id),
                1 => group.mark_member_as_disqualified(id),
                _ => {
                    let _ = group.register_member_id(id);
                }
            }
            assert_invariants(&group);
        }
    }

    #[test]
    fn test_threshold_satisfied() {
        // A dishonest threshold of 5 tolerates 2 faults
        let mut group = Group::new(5, 11);
        assert!(group.is_threshold_satisfied());
        group.mark_member_as_inactive(1);
        group.mark_member_as_disqualified(2);
        assert!(group.is_threshold_satisfied());
        group.mark_member_as_inactive(3);
        assert!(!group.is_threshold_satisfied());

        // Repeated marks do not count twice
        let mut group = Group::new(3, 5);
        group.mark_member_as_inactive(4);
        group.mark_member_as_inactive(4);
        group.mark_member_as_disqualified(4);
        assert!(group.is_threshold_satisfied());
    }
}

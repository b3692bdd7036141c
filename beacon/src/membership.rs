//! Map operator identities to their positions within a group.

use crate::group::MemberIndex;
use commonware_cryptography::PublicKey;
use std::sync::Arc;

/// Confirms that a transport identity belongs to the group and that a claimed
/// member index is the position selected for it.
///
/// The roster is the ordered list of operators selected for the group: the
/// operator at position `i` (0-based) is member `i + 1`. An operator selected
/// more than once holds several member indices.
#[derive(Clone, Debug)]
pub struct Validator<P: PublicKey> {
    operators: Arc<Vec<P>>,
}

impl<P: PublicKey> Validator<P> {
    pub fn new(operators: Vec<P>) -> Self {
        Self {
            operators: Arc::new(operators),
        }
    }

    /// Returns true if `public_key` was selected for the group at least once.
    pub fn is_in_group(&self, public_key: &P) -> bool {
        self.operators.contains(public_key)
    }

    /// Returns true if `index` is a position held by `public_key`.
    pub fn is_valid_membership(&self, index: MemberIndex, public_key: &P) -> bool {
        if index == 0 {
            return false;
        }
        self.operators
            .get(index as usize - 1)
            .is_some_and(|operator| operator == public_key)
    }

    /// Returns every member index held by `public_key`.
    pub fn indices_of(&self, public_key: &P) -> Vec<MemberIndex> {
        self.operators
            .iter()
            .enumerate()
            .filter(|(_, operator)| *operator == public_key)
            .filter_map(|(position, _)| MemberIndex::try_from(position + 1).ok())
            .collect()
    }

    pub fn operators(&self) -> &[P] {
        &self.operators
    }
}

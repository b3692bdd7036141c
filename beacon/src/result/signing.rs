//! Sign the preferred result and verify the signatures of other members.

use super::{DkgResult, Error, NAMESPACE};
use crate::{group::MemberIndex, wire::ResultSignature};
use commonware_cryptography::{sha256::Digest, Signer, Verifier};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// A member taking part in result signing.
#[derive(Clone)]
pub struct SigningMember<C: Signer> {
    index: MemberIndex,
    signer: C,
    preferred: Option<(Digest, C::Signature)>,
}

impl<C: Signer> SigningMember<C> {
    pub fn new(index: MemberIndex, signer: C) -> Self {
        Self {
            index,
            signer,
            preferred: None,
        }
    }

    pub fn index(&self) -> MemberIndex {
        self.index
    }

    /// Hashes `result`, signs the hash, and returns the message to broadcast.
    ///
    /// The hash becomes the member's preferred hash: only signatures over the
    /// same hash are accepted during verification.
    pub fn sign_dkg_result(&mut self, result: &DkgResult) -> ResultSignature<C::PublicKey> {
        let result_hash = result.digest();
        let signature = self.signer.sign(Some(NAMESPACE), &result_hash);
        self.preferred = Some((result_hash, signature.clone()));
        ResultSignature {
            sender: self.index,
            result_hash,
            signature,
            public_key: self.signer.public_key(),
        }
    }

    /// Returns the valid signatures over the preferred hash, by signer.
    ///
    /// The member's own signature is always included. A message is excluded if
    /// it comes from this member, if its sender broadcast more than once (all
    /// messages of such a sender are excluded, even identical ones), if it
    /// signs a different hash, or if its signature does not verify.
    pub fn verify_dkg_result_signatures(
        &self,
        messages: &[ResultSignature<C::PublicKey>],
    ) -> Result<BTreeMap<MemberIndex, C::Signature>, Error> {
        let Some((preferred, own)) = &self.preferred else {
            return Err(Error::NotSigned);
        };

        // Count messages per sender
        let mut broadcasts: HashMap<MemberIndex, usize> = HashMap::new();
        for message in messages {
            *broadcasts.entry(message.sender).or_default() += 1;
        }

        let mut accepted = BTreeMap::new();
        accepted.insert(self.index, own.clone());
        for message in messages {
            let sender = message.sender;
            if sender == self.index {
                continue;
            }
            if broadcasts.get(&sender).copied().unwrap_or_default() > 1 {
                warn!(member = self.index, sender, "sender broadcast more than one signature");
                continue;
            }
            if message.result_hash != *preferred {
                debug!(member = self.index, sender, "sender signed a different result");
                continue;
            }
            if !message
                .public_key
                .verify(Some(NAMESPACE), &message.result_hash, &message.signature)
            {
                warn!(member = self.index, sender, "invalid result signature");
                continue;
            }
            accepted.insert(sender, message.signature.clone());
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;
    use commonware_cryptography::{ed25519, PrivateKeyExt as _};
    use std::collections::BTreeSet;
    use test_case::test_case;

    fn key(index: MemberIndex) -> ed25519::PrivateKey {
        ed25519::PrivateKey::from_seed(index as u64)
    }

    fn results() -> (DkgResult, DkgResult) {
        let preferred = DkgResult::new(vec![1; 8], &Group::new(2, 5));
        let mut group = Group::new(2, 5);
        group.mark_member_as_inactive(5);
        let other = DkgResult::new(vec![1; 8], &group);
        (preferred, other)
    }

    fn signed(sender: MemberIndex, result: &DkgResult) -> ResultSignature<ed25519::PublicKey> {
        let mut member = SigningMember::new(sender, key(sender));
        member.sign_dkg_result(result)
    }

    #[test]
    fn test_exclusion_matrix() {
        let (h1, h2) = results();
        let mut me = SigningMember::new(1, key(1));
        me.sign_dkg_result(&h1);

        // Sender 3 broadcasts two different signatures, each individually
        // valid for H1
        let mut other_key = SigningMember::new(3, ed25519::PrivateKey::from_seed(30));
        let messages = vec![
            signed(2, &h1),
            signed(3, &h1),
            other_key.sign_dkg_result(&h1),
            signed(4, &h1),
            signed(4, &h2),
            signed(5, &h2),
        ];
        let accepted = me.verify_dkg_result_signatures(&messages).unwrap();
        assert_eq!(accepted.keys().copied().collect::<BTreeSet<_>>(), BTreeSet::from([1, 2]));
    }

    #[test_case(false; "unique sender")]
    #[test_case(true; "duplicated identical message")]
    fn test_duplicates(duplicate: bool) {
        let (preferred, _) = results();
        let mut me = SigningMember::new(1, key(1));
        me.sign_dkg_result(&preferred);

        let message = signed(2, &preferred);
        let mut messages = vec![message.clone()];
        if duplicate {
            messages.push(message);
        }
        let accepted = me.verify_dkg_result_signatures(&messages).unwrap();
        assert_eq!(accepted.contains_key(&2), !duplicate);
        assert!(accepted.contains_key(&1));
    }

    #[test]
    fn test_invalid_signature() {
        let (preferred, _) = results();
        let mut me = SigningMember::new(1, key(1));
        me.sign_dkg_result(&preferred);

        // Signature made with a key other than the embedded one
        let mut forged = signed(2, &preferred);
        forged.public_key = key(3).public_key();
        let accepted = me.verify_dkg_result_signatures(&[forged]).unwrap();
        assert_eq!(accepted.len(), 1);

        // Own index reported by someone else is ignored
        let impostor = signed(1, &preferred);
        let accepted = me.verify_dkg_result_signatures(&[impostor]).unwrap();
        assert_eq!(accepted.len(), 1);
    }

    #[test]
    fn test_verify_before_signing() {
        let me = SigningMember::new(1, key(1));
        assert!(matches!(
            me.verify_dkg_result_signatures(&[]),
            Err(Error::NotSigned)
        ));
    }
}

use crate::{
    chain::BlockCounter,
    dkg::{self, KeyGenerator, Output},
    group::{Group, MemberIndex},
};
use commonware_cryptography::bls12381::{dkg::ops::generate_shares, primitives::variant::Variant};
use rand::{rngs::StdRng, SeedableRng};
use std::collections::BTreeSet;

/// Trusted dealer standing in for interactive key generation.
///
/// Every member derives the same polynomial from the group seed and keeps its
/// own share. Members configured as faulty are marked in every member's view.
#[derive(Clone)]
pub struct Dealer<B: BlockCounter> {
    block_counter: B,
    group_size: u8,
    honest_threshold: u8,
    keygen_blocks: u64,
    disqualified: BTreeSet<MemberIndex>,
    inactive: BTreeSet<MemberIndex>,
}

impl<B: BlockCounter> Dealer<B> {
    /// Creates a dealer whose key generation lasts `keygen_blocks`.
    pub fn new(block_counter: B, group_size: u8, honest_threshold: u8, keygen_blocks: u64) -> Self {
        Self {
            block_counter,
            group_size,
            honest_threshold,
            keygen_blocks,
            disqualified: BTreeSet::new(),
            inactive: BTreeSet::new(),
        }
    }

    /// Marks members as inactive in every view.
    pub fn with_inactive(mut self, members: impl IntoIterator<Item = MemberIndex>) -> Self {
        self.inactive.extend(members);
        self
    }

    /// Marks members as disqualified in every view.
    pub fn with_disqualified(mut self, members: impl IntoIterator<Item = MemberIndex>) -> Self {
        self.disqualified.extend(members);
        self
    }
}

impl<B: BlockCounter, V: Variant> KeyGenerator<V> for Dealer<B> {
    async fn generate(
        &self,
        member: MemberIndex,
        seed: u64,
        start_block: u64,
    ) -> Result<Output<V>, dkg::Error> {
        let end_block = start_block + self.keygen_blocks;
        self.block_counter.wait_for_block_height(end_block).await?;

        let mut rng = StdRng::seed_from_u64(seed);
        let (public, shares) = generate_shares::<_, V>(
            &mut rng,
            None,
            self.group_size as u32,
            self.honest_threshold as u32,
        );
        let share = (member as usize)
            .checked_sub(1)
            .and_then(|position| shares.into_iter().nth(position))
            .ok_or_else(|| dkg::Error::KeyGeneration(format!("member {member} is not in the group")))?;

        let dishonest_threshold = self.group_size.saturating_sub(self.honest_threshold);
        let mut group = Group::new(dishonest_threshold as usize, self.group_size);
        for &index in &self.disqualified {
            group.mark_member_as_disqualified(index);
        }
        for &index in &self.inactive {
            group.mark_member_as_inactive(index);
        }
        Ok(Output {
            group,
            public,
            share,
            end_block,
        })
    }
}

//! Tie the protocols together for one operator.
//!
//! # Overview
//!
//! A [Node] reacts to chain events on behalf of its operator:
//!
//! * When a new group is requested, it joins key generation for every
//!   position the operator was selected for ([Node::join_dkg_if_eligible])
//!   and registers the resulting signers.
//! * When a relay entry is requested from a group it is a member of, it
//!   runs the entry protocol for each of its memberships
//!   ([Node::generate_relay_entry]) and watches for the request to time out
//!   ([Node::monitor_relay_entry]).
//! * On startup, it rejoins an entry request that is still in progress
//!   ([Node::resume_signing_if_eligible]).

use crate::{
    chain::{self, BlockCounter as _, Relay, RelayEntryRequested},
    dkg::{self, KeyGenerator},
    entry::{self, states as entry_states},
    membership::Validator,
    p2p::{Channel, Provider},
    registry::{self, Persistence, Registry},
    state::{self, Machine},
    submission::{self, Race},
};
use commonware_cryptography::{bls12381::primitives::variant::Variant, Signer};
use commonware_macros::select;
use commonware_runtime::{Metrics, Spawner};
use commonware_utils::hex;
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while reacting to chain events.
#[derive(Debug, Error)]
pub enum Error {
    #[error("chain: {0}")]
    Chain(#[from] chain::Error),
    #[error("registry: {0}")]
    Registry(#[from] registry::Error),
}

/// Configuration for the [Node].
pub struct Config<C: Signer, K, R, P, S> {
    /// Operator key.
    pub signer: C,

    pub key_generator: K,
    pub relay: R,
    pub provider: P,

    /// Where memberships are persisted.
    pub storage: S,

    /// Blocks between the end of key generation and result publication.
    pub publication_delay_blocks: u64,
}

/// A beacon node acting for one operator.
#[derive(Clone)]
pub struct Node<E, C, V, K, R, P, S>
where
    C: Signer,
    V: Variant,
    S: Persistence,
{
    context: E,
    signer: C,
    key_generator: K,
    relay: R,
    provider: P,
    registry: Registry<C::PublicKey, V, S>,
    publication_delay_blocks: u64,
}

impl<E, C, V, K, R, P, S> Node<E, C, V, K, R, P, S>
where
    E: Spawner + Metrics,
    C: Signer,
    V: Variant,
    K: KeyGenerator<V>,
    R: Relay<PublicKey = C::PublicKey>,
    P: Provider,
    P::Channel: Channel<PublicKey = C::PublicKey>,
    S: Persistence,
{
    pub fn new(context: E, cfg: Config<C, K, R, P, S>) -> Self {
        Self {
            context,
            signer: cfg.signer,
            key_generator: cfg.key_generator,
            relay: cfg.relay,
            provider: cfg.provider,
            registry: Registry::new(cfg.storage),
            publication_delay_blocks: cfg.publication_delay_blocks,
        }
    }

    /// Returns the memberships of this node.
    pub fn registry(&self) -> &Registry<C::PublicKey, V, S> {
        &self.registry
    }

    /// Joins key generation for every position this operator holds in the
    /// group selected with `seed`, and registers the resulting signers.
    ///
    /// Returns the number of memberships registered.
    pub async fn join_dkg_if_eligible(&self, seed: u64, start_block: u64) -> Result<usize, Error> {
        // Find our positions in the group
        let operators = self.relay.select_group(seed).await?;
        let validator = Validator::new(operators);
        let indices = validator.indices_of(&self.signer.public_key());
        if indices.is_empty() {
            debug!(seed, "not selected for group");
            return Ok(0);
        }
        info!(seed, ?indices, start_block, "joining key generation");

        // Run one execution per position
        let channel = self.provider.channel(&format!("dkg_{seed}"));
        let mut executions = Vec::with_capacity(indices.len());
        for member_index in indices {
            let cfg = dkg::Config {
                signer: self.signer.clone(),
                member_index,
                validator: validator.clone(),
                key_generator: self.key_generator.clone(),
                relay: self.relay.clone(),
                channel: channel.clone(),
                seed,
                publication_delay_blocks: self.publication_delay_blocks,
            };
            let handle = self
                .context
                .with_label(&format!("dkg_{seed}_{member_index}"))
                .spawn(move |context| dkg::execute::<_, _, V, _, _, _>(context, cfg, start_block));
            executions.push((member_index, handle));
        }

        // Register the signers of successful executions
        let mut joined = 0;
        for (member_index, handle) in executions {
            match handle.await {
                Ok(Ok(membership)) => {
                    self.registry.register_group(membership)?;
                    joined += 1;
                }
                Ok(Err(err)) => warn!(seed, member_index, ?err, "key generation failed"),
                Err(err) => warn!(seed, member_index, ?err, "key generation aborted"),
            }
        }
        Ok(joined)
    }

    /// Runs the entry protocol for each membership in the requested group.
    ///
    /// Returns the number of memberships that completed the protocol.
    pub async fn generate_relay_entry(&self, request: &RelayEntryRequested) -> Result<usize, Error> {
        let memberships = self.registry.get_group(&request.group_public_key);
        if memberships.is_empty() {
            debug!(group = hex(&request.group_public_key), "not a member of requested group");
            return Ok(0);
        }
        let channel = self
            .provider
            .channel(&format!("entry_{}", hex(&request.group_public_key)));

        let mut executions = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let member_index = membership.signer.member_index();
            let initial = entry_states::State::new(entry_states::Context {
                signer: membership.signer,
                group: membership.group,
                previous_entry: request.previous_entry.clone(),
                relay: self.relay.clone(),
                channel: channel.clone(),
                validator: membership.validator.clone(),
                start_block: request.block,
            });
            let block_counter = self.relay.block_counter();
            let channel = channel.clone();
            let start_block = request.block;
            let handle = self
                .context
                .with_label(&format!("entry_{member_index}"))
                .spawn(move |context| async move {
                    let machine = Machine::new(
                        context,
                        state::Config {
                            block_counter,
                            channel,
                            validator: Some(membership.validator),
                        },
                        initial,
                    );
                    let (last, _) = machine.execute(start_block).await?;
                    Ok::<_, state::Error<entry::Error>>(last.outcome())
                });
            executions.push((member_index, handle));
        }

        let mut completed = 0;
        for (member_index, handle) in executions {
            match handle.await {
                Ok(Ok(Some(outcome))) => {
                    info!(member_index, ?outcome, "relay entry protocol completed");
                    completed += 1;
                }
                Ok(Ok(None)) => warn!(member_index, "relay entry protocol ended early"),
                Ok(Err(err)) => warn!(member_index, ?err, "relay entry protocol failed"),
                Err(err) => warn!(member_index, ?err, "relay entry protocol aborted"),
            }
        }
        Ok(completed)
    }

    /// Waits for the current request to be served and reports a timeout if
    /// it is not served within the chain's timeout.
    ///
    /// Returns true if a timeout was reported.
    pub async fn monitor_relay_entry(&self, request_start_block: u64) -> Result<bool, Error> {
        let accepted = self.relay.on_relay_entry_submitted();
        if !self.relay.is_entry_in_progress().await? {
            return Ok(false);
        }
        let timeout = request_start_block + self.relay.config().relay_entry_timeout;
        let block_counter = self.relay.block_counter();
        match submission::race(&block_counter, timeout, accepted, |_| true).await? {
            Race::Eligible(height) => {
                if !self.relay.is_entry_in_progress().await? {
                    return Ok(false);
                }
                warn!(request_start_block, height, "relay entry timed out");
                self.relay.report_relay_entry_timeout().await?;
                Ok(true)
            }
            Race::Accepted(event) => {
                debug!(height = event.block, "relay entry submitted in time");
                Ok(false)
            }
        }
    }

    /// Rejoins the entry request in progress, if this node is a member of the
    /// requested group.
    pub async fn resume_signing_if_eligible(&self) -> Result<usize, Error> {
        if !self.relay.is_entry_in_progress().await? {
            return Ok(0);
        }
        let request = self.relay.current_request().await?;
        info!(
            group = hex(&request.group_public_key),
            start_block = request.block,
            current = self.relay.block_counter().current_block(),
            "resuming relay entry signing"
        );
        self.generate_relay_entry(&request).await
    }

    /// Drops memberships in groups the chain considers stale.
    async fn forget_stale_groups(&self) -> Result<(), Error> {
        for group_public_key in self.registry.group_public_keys() {
            if self.relay.is_stale_group(&group_public_key).await? {
                self.registry.unregister_group(&group_public_key);
            }
        }
        Ok(())
    }

    /// Reacts to chain events until the chain stops emitting them.
    pub async fn run(self) {
        // Subscribe before resuming so no request is missed
        let mut selections = self.relay.on_group_selection_requested();
        let mut requests = self.relay.on_relay_entry_requested();
        self.context.with_label("resume").spawn({
            let node = self.clone();
            move |_| async move {
                if let Err(err) = node.resume_signing_if_eligible().await {
                    warn!(?err, "failed to resume signing");
                }
            }
        });

        loop {
            select! {
                selection = selections.next() => {
                    let Some(selection) = selection else {
                        warn!("group selection subscription closed");
                        return;
                    };
                    self.context.with_label("join").spawn({
                        let node = self.clone();
                        move |_| async move {
                            match node.join_dkg_if_eligible(selection.seed, selection.block).await {
                                Ok(joined) => debug!(seed = selection.seed, joined, "key generation finished"),
                                Err(err) => warn!(seed = selection.seed, ?err, "failed to join key generation"),
                            }
                        }
                    });
                },
                request = requests.next() => {
                    let Some(request) = request else {
                        warn!("relay request subscription closed");
                        return;
                    };
                    if let Err(err) = self.forget_stale_groups().await {
                        warn!(?err, "failed to check for stale groups");
                    }
                    self.context.with_label("monitor").spawn({
                        let node = self.clone();
                        let start = request.block;
                        move |_| async move {
                            if let Err(err) = node.monitor_relay_entry(start).await {
                                warn!(?err, "failed to monitor relay entry");
                            }
                        }
                    });
                    self.context.with_label("entry").spawn({
                        let node = self.clone();
                        move |_| async move {
                            if let Err(err) = node.generate_relay_entry(&request).await {
                                warn!(?err, "failed to generate relay entry");
                            }
                        }
                    });
                },
            }
        }
    }
}

use super::{metrics, Error, Phase};
use crate::{chain::BlockCounter, membership, p2p::Channel};
use bytes::Bytes;
use commonware_codec::Decode;
use commonware_macros::select;
use commonware_runtime::Metrics;
use futures::{channel::oneshot, StreamExt};
use tracing::{debug, info, warn};

/// Configuration for the [Machine].
pub struct Config<B: BlockCounter, N: Channel> {
    /// Shared block-height clock.
    pub block_counter: B,

    /// Channel the phases broadcast on.
    pub channel: N,

    /// If set, messages from transport identities outside the group are
    /// dropped before they are decoded.
    pub validator: Option<membership::Validator<N::PublicKey>>,
}

/// Executes a chain of [Phase]s synchronized to block height.
pub struct Machine<E: Metrics, B: BlockCounter, N: Channel, S: Phase<PublicKey = N::PublicKey>> {
    context: E,
    block_counter: B,
    channel: N,
    validator: Option<membership::Validator<N::PublicKey>>,
    initial: S,
    metrics: metrics::Metrics,
}

impl<E: Metrics, B: BlockCounter, N: Channel, S: Phase<PublicKey = N::PublicKey>> Machine<E, B, N, S> {
    /// Create a new machine that starts in `initial`.
    pub fn new(context: E, cfg: Config<B, N>, initial: S) -> Self {
        let metrics = metrics::Metrics::init(context.clone());
        Self {
            context,
            block_counter: cfg.block_counter,
            channel: cfg.channel,
            validator: cfg.validator,
            initial,
            metrics,
        }
    }

    /// Runs the phases, starting the schedule at `start_block_height`.
    ///
    /// Returns the phase the run terminated in and the block height at which
    /// it ended.
    pub async fn execute(self, start_block_height: u64) -> Result<(S, u64), Error<S::Error>> {
        // Subscribe before the first phase initiates so no message sent at
        // the boundary is missed
        let mut inbound = self.channel.subscribe();
        let mut current = self.initial;
        info!(
            label = self.context.label(),
            member = current.member_index(),
            start_block_height,
            "starting state machine"
        );

        let mut waiter = Self::transition(
            &self.block_counter,
            &self.metrics,
            &mut current,
            start_block_height,
        )
        .await?;
        loop {
            let mut ended = None;
            select! {
                message = inbound.next() => {
                    let Some((sender, message)) = message else {
                        return Err(Error::ChannelClosed);
                    };
                    Self::deliver(&self.validator, &self.metrics, &mut current, sender, message);
                },
                height = &mut waiter => {
                    let height = height.map_err(|_| crate::chain::Error::BlockCounterClosed)?;
                    ended = Some(height);
                },
            }
            let Some(end) = ended else {
                continue;
            };

            // Move to the next phase
            self.metrics.phase_end.set(end as i64);
            debug!(
                member = current.member_index(),
                phase = current.name(),
                end,
                "phase ended"
            );
            let Some(next) = current.next() else {
                info!(
                    member = current.member_index(),
                    phase = current.name(),
                    end,
                    "state machine terminated"
                );
                return Ok((current, end));
            };
            current = next;
            waiter =
                Self::transition(&self.block_counter, &self.metrics, &mut current, end).await?;
        }
    }

    /// Waits out the phase's delay, initiates it, and returns a waiter for
    /// the end of its active window.
    async fn transition(
        block_counter: &B,
        metrics: &metrics::Metrics,
        phase: &mut S,
        last_end: u64,
    ) -> Result<oneshot::Receiver<u64>, Error<S::Error>> {
        let initiate_at = last_end + phase.delay_blocks();
        block_counter.wait_for_block_height(initiate_at).await?;

        // Initiate the phase
        debug!(
            member = phase.member_index(),
            phase = phase.name(),
            initiate_at,
            "initiating phase"
        );
        phase.initiate().await.map_err(|source| Error::Initiate {
            phase: phase.name(),
            source,
        })?;
        metrics.phases.inc();

        Ok(block_counter.block_height_waiter(initiate_at + phase.active_blocks()))
    }

    /// Decodes a message and passes it to the active phase.
    ///
    /// Failures only affect the message at hand.
    fn deliver(
        validator: &Option<membership::Validator<N::PublicKey>>,
        metrics: &metrics::Metrics,
        phase: &mut S,
        sender: N::PublicKey,
        message: Bytes,
    ) {
        if let Some(validator) = validator {
            if !validator.is_in_group(&sender) {
                metrics.rejected.inc();
                debug!(?sender, "dropping message from outside the group");
                return;
            }
        }
        let message = match S::Message::decode_cfg(message, &()) {
            Ok(message) => message,
            Err(err) => {
                metrics.rejected.inc();
                warn!(?err, ?sender, phase = phase.name(), "failed to decode message");
                return;
            }
        };
        if let Err(err) = phase.receive(&sender, message) {
            metrics.rejected.inc();
            warn!(
                ?err,
                ?sender,
                member = phase.member_index(),
                phase = phase.name(),
                "failed to receive message"
            );
            return;
        }
        metrics.received.inc();
    }
}

//! Simulate a beacon network on an in-memory chain.
//!
//! Operators form a single group and then serve a number of relay requests,
//! each entry signing the previous one. Offline operators are marked inactive
//! by key generation and never run a node.
//!
//! # Usage
//!
//! ```sh
//! cargo run --release --features mocks -- --operators 5 --honest-threshold 3 --offline 5 --rounds 3
//! ```

use clap::{value_parser, Arg, Command};
use commonware_beacon::{
    chain::{self, BlockCounter as _, Relay as _},
    config::DEFAULT_PUBLICATION_DELAY_BLOCKS,
    group::MemberIndex,
    mocks,
    node::{self, Node},
};
use commonware_cryptography::{
    bls12381::primitives::variant::MinSig, ed25519, PrivateKeyExt as _, Signer as _,
};
use commonware_runtime::{deterministic, Clock, Metrics, Runner, Spawner};
use commonware_utils::hex;
use std::{str::FromStr, time::Duration};
use tracing::{error, info};

/// Blocks taken by key generation.
const KEYGEN_BLOCKS: u64 = 5;

/// Blocks after which a relay request may be reported as timed out.
const RELAY_ENTRY_TIMEOUT: u64 = 24;

/// Blocks to wait for a group to be published before giving up.
const MAX_FORMATION_BLOCKS: u64 = 64;

fn main() {
    // Parse arguments
    let matches = Command::new("commonware-beacon")
        .about("simulate a threshold random beacon on an in-memory chain")
        .arg(
            Arg::new("operators")
                .long("operators")
                .default_value("5")
                .value_parser(value_parser!(u8).range(1..))
                .help("Number of operators selected into the group"),
        )
        .arg(
            Arg::new("honest-threshold")
                .long("honest-threshold")
                .default_value("3")
                .value_parser(value_parser!(u8).range(1..))
                .help("Signature shares required to produce an entry"),
        )
        .arg(
            Arg::new("offline")
                .long("offline")
                .required(false)
                .value_delimiter(',')
                .value_parser(value_parser!(u8))
                .help("Members that never come online"),
        )
        .arg(
            Arg::new("rounds")
                .long("rounds")
                .default_value("3")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .default_value("0")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("block-time")
                .long("block-time")
                .default_value("1000")
                .value_parser(value_parser!(u64))
                .help("Milliseconds between blocks"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .help("opts: error, warn, info, debug, trace"),
        )
        .get_matches();

    // Create logger
    let level = matches
        .get_one::<String>("log-level")
        .and_then(|level| tracing::Level::from_str(level).ok())
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    // Load configuration
    let operators = *matches.get_one::<u8>("operators").unwrap();
    let honest_threshold = *matches.get_one::<u8>("honest-threshold").unwrap();
    if honest_threshold > operators {
        panic!("honest threshold must not exceed the number of operators");
    }
    let offline: Vec<MemberIndex> = matches
        .get_many::<u8>("offline")
        .map(|values| values.copied().collect())
        .unwrap_or_default();
    let rounds = *matches.get_one::<u64>("rounds").unwrap();
    let seed = *matches.get_one::<u64>("seed").unwrap();
    let block_time = Duration::from_millis(*matches.get_one::<u64>("block-time").unwrap());

    // Run the simulation
    let executor = deterministic::Runner::seeded(seed);
    executor.start(|context| async move {
        // Start chain
        let signers: Vec<_> = (0..operators as u64)
            .map(ed25519::PrivateKey::from_seed)
            .collect();
        let chain = mocks::Chain::new(
            context.with_label("chain"),
            mocks::ChainConfig {
                chain: chain::Config {
                    group_size: operators,
                    honest_threshold,
                    result_publication_block_step: 2,
                    relay_entry_submission_block_step: 2,
                    relay_entry_timeout: RELAY_ENTRY_TIMEOUT,
                },
                block_time,
            },
            signers.iter().map(|signer| signer.public_key()).collect(),
        );
        let counter = chain.block_counter();

        // Start nodes
        let network = mocks::Network::new();
        let dealer = mocks::Dealer::new(counter.clone(), operators, honest_threshold, KEYGEN_BLOCKS)
            .with_inactive(offline.iter().copied());
        for (position, signer) in signers.into_iter().enumerate() {
            let member = position as MemberIndex + 1;
            if offline.contains(&member) {
                info!(member, "operator offline");
                continue;
            }
            info!(member, key = hex(&signer.public_key()), "starting node");
            let node = Node::<_, _, MinSig, _, _, _, _>::new(
                context.with_label(&format!("node_{member}")),
                node::Config {
                    provider: network.register(signer.public_key()),
                    signer,
                    key_generator: dealer.clone(),
                    relay: chain.clone(),
                    storage: mocks::Storage::default(),
                    publication_delay_blocks: DEFAULT_PUBLICATION_DELAY_BLOCKS,
                },
            );
            context
                .with_label(&format!("run_{member}"))
                .spawn(move |_| node.run());
        }
        counter.wait_for_block_height(1).await.unwrap();

        // Form group
        let selection = chain.request_group_selection(seed);
        let deadline = selection.block + MAX_FORMATION_BLOCKS;
        while chain.dkg_submissions().is_empty() {
            if counter.current_block() >= deadline {
                error!(deadline, "group was not published");
                return;
            }
            context.sleep(block_time).await;
        }
        let (submitter, result, signatures) = chain.dkg_submissions().remove(0);
        info!(
            submitter,
            signatures,
            group = hex(&result.group_public_key),
            inactive = ?result.inactive_members(),
            disqualified = ?result.disqualified_members(),
            "group published"
        );

        // Serve relay requests
        let mut previous = seed.to_be_bytes().to_vec();
        for round in 0..rounds {
            let entries = chain.entries().len();
            let timeouts = chain.timeouts_reported();
            let request = chain.request_relay_entry(result.group_public_key.clone(), previous.clone());
            while chain.entries().len() == entries && chain.timeouts_reported() == timeouts {
                context.sleep(block_time).await;
            }
            if chain.timeouts_reported() > timeouts {
                error!(round, requested = request.block, "relay entry timed out");
                return;
            }
            if let Some(entry) = chain.entries().pop() {
                info!(
                    round,
                    requested = request.block,
                    height = counter.current_block(),
                    entry = hex(&entry),
                    "relay entry published"
                );
                previous = entry;
            }
        }
        info!(
            height = counter.current_block(),
            in_progress = chain.is_entry_in_progress().await.unwrap_or(false),
            "simulation complete"
        );
    });
}

//! Tessera Daemon (`tesserad`)
//!
//! Runs an in-process committee over a snapshot dump: every record becomes
//! a create or update on its package chain, the committee witnesses the
//! resulting heads each epoch, and every package's inclusion proof is
//! checked against the published root.

use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tessera_core::keyring::KeyRing;
use tessera_model::clock::SystemClock;
use tessera_model::codec;
use tessera_model::witness::Roster;
use tessera_net_sim::{spawn_member, CommitteeNetwork, MemberHooks, SimCosigner, SimPropagator};
use tessera_service::engine::check_signed_pair;
use tessera_service::{
    parse_snapshot, CreatePackage, ReleaseSigner, Service, ServiceConfig, ServiceError,
    ServiceState, UpdatePackage,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tesserad", version, about = "Tessera update-authentication daemon")]
struct Args {
    /// Snapshot dump to ingest (CSV, six fields per record)
    #[arg(long)]
    snapshot: PathBuf,

    /// Number of committee members
    #[arg(long, default_value_t = 5)]
    members: usize,

    /// Policy signature threshold for ingested releases
    #[arg(long, default_value_t = 3)]
    threshold: u32,

    /// Seconds between witnesses
    #[arg(long, default_value_t = 10)]
    epoch: u64,

    /// Stop witnessing after this many epochs (0 = run until Ctrl+C)
    #[arg(long, default_value_t = 0)]
    max_iterations: u32,

    /// Directory for the persisted state file
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tesserad starting");

    let config = ServiceConfig {
        epoch_duration: Duration::from_secs(args.epoch),
        max_iterations: args.max_iterations,
        ..ServiceConfig::default()
    };
    let clock = Arc::new(SystemClock);
    let network = CommitteeNetwork::new();

    // Committee: each member keeps a replica store fed by propagation and
    // refuses to co-sign anything that disagrees with it.
    let rings: Vec<KeyRing> = (0..args.members).map(|_| KeyRing::generate()).collect();
    let roster = Roster::new(rings.iter().map(|r| r.public()).collect());
    let reasonable_time = config.reasonable_time;
    for ring in &rings {
        let state = Arc::new(RwLock::new(ServiceState::default()));
        let announce_state = state.clone();
        let accept_state = state;
        let accept_clock = clock.clone();
        let hooks = MemberHooks {
            on_announce: Box::new(move |announce| {
                if let Ok(mut state) = announce_state.write() {
                    state.store.apply_announce(announce);
                }
            }),
            accept: Box::new(move |message| {
                accept_state
                    .read()
                    .map(|state| {
                        check_signed_pair(&state, accept_clock.as_ref(), reasonable_time, message)
                    })
                    .unwrap_or(false)
            }),
        };
        spawn_member(ring.clone(), &network, hooks).await;
    }
    tracing::info!(members = args.members, roster = %roster.id, "committee ready");

    let service = Service::new(
        Arc::new(SimPropagator::new(
            network.clone(),
            config.propagation_deadline,
        )),
        Arc::new(SimCosigner::new(network, config.cosign_timeout)),
        clock,
        config,
        args.data_dir.clone(),
    )?;

    ingest_snapshot(&service, &roster, &args).await?;

    // One explicit epoch so the report below has a witness to check.
    match service.engine().force_epoch().await {
        Ok(witness) => {
            tracing::info!(
                root = %witness.root,
                timestamp = witness.timestamp,
                packages = witness.proofs.len(),
                "witness published"
            );
            let message = codec::encode_signed_pair(&witness.root, witness.timestamp);
            anyhow::ensure!(
                roster.verify_aggregate(&message, &witness.signature),
                "aggregate signature does not verify"
            );
            for (name, proof) in &witness.proofs {
                let head = service.package_sc(name)?.last;
                anyhow::ensure!(
                    proof.verify(&head, &witness.root),
                    "inclusion proof failed for {name}"
                );
            }
            tracing::info!("all inclusion proofs verified");
        }
        Err(e) => tracing::warn!("no witness this epoch: {e}"),
    }

    tracing::info!("witnessing every {}s; Ctrl+C to stop", args.epoch);
    shutdown_signal().await;
    tracing::info!("shutting down");
    service.stop().await;
    Ok(())
}

/// Replay a snapshot dump through the service: first sighting of a package
/// creates its chain, later records append to it.
async fn ingest_snapshot(
    service: &Service,
    roster: &Roster,
    args: &Args,
) -> anyhow::Result<(usize, usize)> {
    let content = std::fs::read_to_string(&args.snapshot)?;
    let records = parse_snapshot(&content);
    tracing::info!(records = records.len(), "snapshot parsed");

    let mut signer = ReleaseSigner::new(vec![KeyRing::generate()]);
    let (mut created, mut updated) = (0usize, 0usize);
    for record in &records {
        let release = signer.release_for(record, args.threshold);
        match service.package_sc(&record.name) {
            Ok(chain) => {
                match service
                    .update_package(UpdatePackage {
                        prev: chain.last,
                        release,
                    })
                    .await
                {
                    Ok(_) => updated += 1,
                    Err(e) => tracing::warn!(package = %record.name, "update skipped: {e}"),
                }
            }
            Err(ServiceError::UnknownPackage(_)) => {
                service
                    .create_package(CreatePackage {
                        roster: roster.clone(),
                        base: 2,
                        height: 10,
                        release,
                    })
                    .await?;
                created += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    tracing::info!(created, updated, "snapshot ingested");
    Ok((created, updated))
}

fn init_tracing(verbosity: u8) {
    // An explicit RUST_LOG beats the -v count, which picks the default level.
    let default_level = ["info", "debug", "trace"][verbosity.min(2) as usize];
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
            return;
        };
        let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
            return;
        };
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

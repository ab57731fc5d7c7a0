//! End-to-end scenarios over an in-process committee.

use std::sync::{Arc, RwLock};
use std::time::Duration;
use tessera_core::keyring::KeyRing;
use tessera_core::verifier::ReleaseRejected;
use tessera_model::clock::{Clock, MockClock};
use tessera_model::codec;
use tessera_model::policy::{Policy, Release};
use tessera_model::types::Hash;
use tessera_model::witness::Roster;
use tessera_net_sim::{spawn_member, CommitteeNetwork, MemberHooks, SimCosigner, SimPropagator};
use tessera_service::engine::check_signed_pair;
use tessera_service::{
    CreatePackage, Service, ServiceConfig, ServiceError, ServiceState, UpdatePackage,
};

const REASONABLE: Duration = Duration::from_secs(3600);
const START_TIME: i64 = 1_700_000_000;

struct Sim {
    service: Arc<Service>,
    roster: Roster,
    clock: Arc<MockClock>,
    member_states: Vec<Arc<RwLock<ServiceState>>>,
    _dir: tempfile::TempDir,
}

/// Release signed by the first `threshold` of `rings`.
fn release(rings: &[KeyRing], name: &str, version: &str, threshold: u32) -> Release {
    let policy = Policy {
        name: name.into(),
        version: version.into(),
        source_hash: format!("src-{name}-{version}"),
        threshold,
        keys: rings.iter().map(|r| r.public()).collect(),
    };
    let bytes = codec::encode_policy(&policy);
    Release {
        signatures: rings.iter().map(|r| r.sign(&bytes)).collect(),
        policy,
        verify_build: false,
    }
}

fn config() -> ServiceConfig {
    ServiceConfig {
        // Long enough that only explicit requests drive epochs in tests.
        epoch_duration: Duration::from_secs(3600),
        reasonable_time: REASONABLE,
        propagation_deadline: Duration::from_secs(5),
        cosign_timeout: Duration::from_secs(5),
        max_iterations: 0,
    }
}

/// A committee of `n` members, each holding a replica store kept current by
/// propagation and vetting every signing request against it.
async fn committee_sim(n: usize) -> Sim {
    let network = CommitteeNetwork::new();
    let clock = Arc::new(MockClock::new(START_TIME));
    let rings: Vec<KeyRing> = (0..n).map(|_| KeyRing::generate()).collect();
    let roster = Roster::new(rings.iter().map(|r| r.public()).collect());

    let mut member_states = Vec::new();
    for ring in &rings {
        let state = Arc::new(RwLock::new(ServiceState::default()));
        let announce_state = state.clone();
        let accept_state = state.clone();
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
                        check_signed_pair(&state, accept_clock.as_ref(), REASONABLE, message)
                    })
                    .unwrap_or(false)
            }),
        };
        spawn_member(ring.clone(), &network, hooks).await;
        member_states.push(state);
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let service = Service::new(
        Arc::new(SimPropagator::new(network.clone(), Duration::from_secs(5))),
        Arc::new(SimCosigner::new(network, Duration::from_secs(5))),
        clock.clone(),
        config(),
        Some(dir.path().to_path_buf()),
    )
    .expect("service");

    Sim {
        service: Arc::new(service),
        roster,
        clock,
        member_states,
        _dir: dir,
    }
}

fn create_req(roster: &Roster, release: Release) -> CreatePackage {
    CreatePackage {
        roster: roster.clone(),
        base: 2,
        height: 10,
        release,
    }
}

#[tokio::test]
async fn genesis_and_update_move_the_head() {
    let sim = committee_sim(5).await;
    let signers: Vec<KeyRing> = (0..3).map(|_| KeyRing::generate()).collect();

    let created = sim
        .service
        .create_package(create_req(&sim.roster, release(&signers, "libc", "1.0", 3)))
        .await
        .unwrap();
    assert_eq!(created.first, created.last);

    let head = sim
        .service
        .update_package(UpdatePackage {
            prev: created.last,
            release: release(&signers, "libc", "1.1", 3),
        })
        .await
        .unwrap();

    let chain = sim.service.package_sc("libc").unwrap();
    assert_eq!(chain.first, created.first);
    assert_eq!(chain.last, head);
    assert_ne!(chain.first, chain.last);

    sim.service.stop().await;
}

#[tokio::test]
async fn short_signature_list_is_rejected() {
    let sim = committee_sim(3).await;
    let signers: Vec<KeyRing> = (0..3).map(|_| KeyRing::generate()).collect();

    let mut genesis = release(&signers, "libc", "1.0", 3);
    genesis.signatures.truncate(2);

    let err = sim
        .service
        .create_package(create_req(&sim.roster, genesis))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Rejected(ReleaseRejected::SignaturesShort { got: 2, .. })
    ));
    assert!(matches!(
        sim.service.package_sc("libc"),
        Err(ServiceError::UnknownPackage(_))
    ));
}

#[tokio::test]
async fn disjoint_key_rotation_is_unauthorized() {
    let sim = committee_sim(3).await;
    let signers: Vec<KeyRing> = (0..3).map(|_| KeyRing::generate()).collect();
    let strangers: Vec<KeyRing> = (0..3).map(|_| KeyRing::generate()).collect();

    let created = sim
        .service
        .create_package(create_req(&sim.roster, release(&signers, "libc", "1.0", 3)))
        .await
        .unwrap();

    let err = sim
        .service
        .update_package(UpdatePackage {
            prev: created.last,
            release: release(&strangers, "libc", "1.1", 3),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Rejected(ReleaseRejected::PolicyRotationUnauthorized)
    ));

    // The chain did not move.
    let chain = sim.service.package_sc("libc").unwrap();
    assert_eq!(chain.last, created.last);
}

#[tokio::test]
async fn concurrent_appends_leave_one_stale() {
    let sim = committee_sim(3).await;
    let signers: Vec<KeyRing> = (0..2).map(|_| KeyRing::generate()).collect();

    let created = sim
        .service
        .create_package(create_req(&sim.roster, release(&signers, "libc", "1.0", 2)))
        .await
        .unwrap();

    let a = {
        let service = sim.service.clone();
        let release = release(&signers, "libc", "1.1", 2);
        let prev = created.last;
        tokio::spawn(async move { service.update_package(UpdatePackage { prev, release }).await })
    };
    let b = {
        let service = sim.service.clone();
        let release = release(&signers, "libc", "1.2", 2);
        let prev = created.last;
        tokio::spawn(async move { service.update_package(UpdatePackage { prev, release }).await })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    let (wins, loses) = if a.is_ok() { (a, b) } else { (b, a) };
    let head = wins.unwrap();
    match loses.unwrap_err() {
        ServiceError::StalePrev { head: current } => assert_eq!(current, head),
        other => panic!("expected StalePrev, got {other:?}"),
    }
}

#[tokio::test]
async fn witness_covers_every_package_head() {
    let sim = committee_sim(5).await;
    let signers: Vec<KeyRing> = (0..3).map(|_| KeyRing::generate()).collect();

    for name in ["acl", "bash", "curl"] {
        sim.service
            .create_package(create_req(&sim.roster, release(&signers, name, "1.0", 3)))
            .await
            .unwrap();
    }

    let witness = sim.service.engine().force_epoch().await.unwrap();
    assert_eq!(witness.proofs.len(), 3);
    assert_eq!(witness.timestamp, sim.clock.now_secs());

    // The aggregate signature verifies against the roster over the
    // canonical (timestamp ‖ root) message.
    let message = codec::encode_signed_pair(&witness.root, witness.timestamp);
    assert!(sim.roster.verify_aggregate(&message, &witness.signature));

    // Every package's head is provably included in the root.
    for name in ["acl", "bash", "curl"] {
        let head = sim.service.package_sc(name).unwrap().last;
        let proof = sim.service.timestamp_proof(name).unwrap();
        assert!(proof.verify(&head, &witness.root), "proof for {name}");
    }

    let proofs = sim
        .service
        .timestamp_proofs(&["acl".into(), "curl".into()])
        .unwrap();
    assert_eq!(proofs.len(), 2);

    assert!(matches!(
        sim.service.timestamp_proof("zsh"),
        Err(ServiceError::UnknownPackage(_))
    ));

    sim.service.stop().await;
}

#[tokio::test]
async fn stale_witness_is_rejected_by_the_committee_predicate() {
    let sim = committee_sim(3).await;
    let signers: Vec<KeyRing> = (0..2).map(|_| KeyRing::generate()).collect();

    sim.service
        .create_package(create_req(&sim.roster, release(&signers, "libc", "1.0", 2)))
        .await
        .unwrap();
    let witness = sim.service.engine().force_epoch().await.unwrap();

    let message = codec::encode_signed_pair(&witness.root, witness.timestamp);
    {
        let state = sim.service.state();
        let state = state.read().unwrap();
        assert!(check_signed_pair(
            &state,
            sim.clock.as_ref(),
            REASONABLE,
            &message
        ));

        // An hour and a bit later the same witness is too old.
        sim.clock.advance(REASONABLE.as_secs() as i64 + 60);
        assert!(!check_signed_pair(
            &state,
            sim.clock.as_ref(),
            REASONABLE,
            &message
        ));
    }
    sim.service.stop().await;
}

#[tokio::test]
async fn propagation_converges_member_replicas() {
    let sim = committee_sim(4).await;
    let signers: Vec<KeyRing> = (0..2).map(|_| KeyRing::generate()).collect();

    let created = sim
        .service
        .create_package(create_req(&sim.roster, release(&signers, "libc", "1.0", 2)))
        .await
        .unwrap();
    let head = sim
        .service
        .update_package(UpdatePackage {
            prev: created.last,
            release: release(&signers, "libc", "1.1", 2),
        })
        .await
        .unwrap();

    for state in &sim.member_states {
        let state = state.read().unwrap();
        let entry = state.store.get("libc").expect("replica has the chain");
        assert_eq!(entry.genesis, created.first);
        assert_eq!(entry.head, head);
    }
}

#[tokio::test]
async fn latest_block_returns_witness_and_chain_walk() {
    let sim = committee_sim(3).await;
    let signers: Vec<KeyRing> = (0..2).map(|_| KeyRing::generate()).collect();

    let created = sim
        .service
        .create_package(create_req(&sim.roster, release(&signers, "libc", "1.0", 2)))
        .await
        .unwrap();
    let head = sim
        .service
        .update_package(UpdatePackage {
            prev: created.last,
            release: release(&signers, "libc", "1.1", 2),
        })
        .await
        .unwrap();
    sim.service.engine().force_epoch().await.unwrap();

    let update = sim.service.latest_block(created.first).unwrap();
    assert_eq!(update.blocks.len(), 2);
    assert_eq!(update.blocks[0].id(), created.first);
    assert_eq!(update.blocks[1].id(), head);

    assert!(matches!(
        sim.service.latest_block(Hash([9; 32])),
        Err(ServiceError::UnknownBlock(_))
    ));

    sim.service.stop().await;
}

#[tokio::test]
async fn latest_blocks_skips_unmoved_chains() {
    let sim = committee_sim(3).await;
    let signers: Vec<KeyRing> = (0..2).map(|_| KeyRing::generate()).collect();

    let moved = sim
        .service
        .create_package(create_req(&sim.roster, release(&signers, "acl", "1.0", 2)))
        .await
        .unwrap();
    sim.service
        .update_package(UpdatePackage {
            prev: moved.last,
            release: release(&signers, "acl", "1.1", 2),
        })
        .await
        .unwrap();
    let unmoved = sim
        .service
        .create_package(create_req(&sim.roster, release(&signers, "bash", "1.0", 2)))
        .await
        .unwrap();
    sim.service.engine().force_epoch().await.unwrap();

    let updates = sim
        .service
        .latest_blocks(&[moved.first, unmoved.first])
        .unwrap();
    assert_eq!(updates.lengths, vec![2]);
    assert_eq!(updates.blocks.len(), 2);

    sim.service.stop().await;
}

#[tokio::test]
async fn witness_missing_until_a_round_succeeds() {
    // No committee members are reachable, so signing rounds fail and the
    // local operation still succeeds with a warning.
    let network = CommitteeNetwork::new();
    let clock = Arc::new(MockClock::new(START_TIME));
    let rings: Vec<KeyRing> = (0..3).map(|_| KeyRing::generate()).collect();
    let roster = Roster::new(rings.iter().map(|r| r.public()).collect());
    let service = Service::new(
        Arc::new(SimPropagator::new(network.clone(), Duration::from_millis(100))),
        Arc::new(SimCosigner::new(network, Duration::from_millis(100))),
        clock,
        config(),
        None,
    )
    .unwrap();

    let signers: Vec<KeyRing> = (0..2).map(|_| KeyRing::generate()).collect();
    let created = service
        .create_package(CreatePackage {
            roster: roster.clone(),
            base: 2,
            height: 10,
            release: release(&signers, "libc", "1.0", 2),
        })
        .await
        .unwrap();

    let err = service.engine().force_epoch().await.unwrap_err();
    assert!(matches!(err, tessera_service::EngineError::Signing(_)));
    assert!(matches!(
        service.latest_block(created.first),
        Err(ServiceError::WitnessMissing)
    ));
    assert!(matches!(
        service.timestamp_proof("libc"),
        Err(ServiceError::WitnessMissing)
    ));
    service.stop().await;
}

#[tokio::test]
async fn state_survives_restart_byte_for_byte() {
    let sim = committee_sim(3).await;
    let signers: Vec<KeyRing> = (0..2).map(|_| KeyRing::generate()).collect();
    let created = sim
        .service
        .create_package(create_req(&sim.roster, release(&signers, "libc", "1.0", 2)))
        .await
        .unwrap();
    sim.service
        .update_package(UpdatePackage {
            prev: created.last,
            release: release(&signers, "libc", "1.1", 2),
        })
        .await
        .unwrap();
    sim.service.engine().force_epoch().await.unwrap();
    sim.service.stop().await;

    let before = {
        let state = sim.service.state();
        let state = state.read().unwrap();
        tessera_service::persist::encode_state(&state)
    };

    // Reload from the same directory: same bytes, same witness.
    let reloaded = Service::new(
        Arc::new(SimPropagator::new(
            CommitteeNetwork::new(),
            Duration::from_millis(100),
        )),
        Arc::new(SimCosigner::new(
            CommitteeNetwork::new(),
            Duration::from_millis(100),
        )),
        sim.clock.clone(),
        config(),
        Some(sim._dir.path().to_path_buf()),
    )
    .unwrap();

    let after = {
        let state = reloaded.state();
        let state = state.read().unwrap();
        tessera_service::persist::encode_state(&state)
    };
    assert_eq!(before, after);
    assert!(reloaded.witness().is_ok());
    assert_eq!(
        reloaded.package_sc("libc").unwrap().last,
        sim.service.package_sc("libc").unwrap().last
    );
}

#[tokio::test]
async fn idle_engine_queues_witness_requests_until_roster_arrives() {
    let sim = committee_sim(3).await;
    let signers: Vec<KeyRing> = (0..2).map(|_| KeyRing::generate()).collect();

    let queued = {
        let service = sim.service.clone();
        tokio::spawn(async move { service.engine().force_epoch().await })
    };
    // Give the queued request time to land before the engine exists.
    tokio::time::sleep(Duration::from_millis(50)).await;

    sim.service
        .create_package(create_req(&sim.roster, release(&signers, "libc", "1.0", 2)))
        .await
        .unwrap();

    let witness = queued.await.unwrap().unwrap();
    assert_eq!(witness.proofs.len(), 1);
    sim.service.stop().await;
}

#[tokio::test]
async fn snapshot_ingestion_builds_chains_end_to_end() {
    let sim = committee_sim(3).await;
    let dump = "\
snapshot,name,version,source_hash,binaries,size
20170102030405,acl,2.2.52,00aa,acl libacl1,1234
20170102030405,bash,4.4,11bb,bash,5678
20170103030405,acl,2.2.53,22cc,acl libacl1,1250
";
    let records = tessera_service::parse_snapshot(dump);
    let mut signer = tessera_service::ReleaseSigner::new(vec![KeyRing::generate()]);

    for record in &records {
        let release = signer.release_for(record, 3);
        match sim.service.package_sc(&record.name) {
            Ok(chain) => {
                sim.service
                    .update_package(UpdatePackage {
                        prev: chain.last,
                        release,
                    })
                    .await
                    .unwrap();
            }
            Err(ServiceError::UnknownPackage(_)) => {
                sim.service
                    .create_package(create_req(&sim.roster, release))
                    .await
                    .unwrap();
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    let acl = sim.service.package_sc("acl").unwrap();
    assert_ne!(acl.first, acl.last);
    let bash = sim.service.package_sc("bash").unwrap();
    assert_eq!(bash.first, bash.last);

    let witness = sim.service.engine().force_epoch().await.unwrap();
    assert_eq!(witness.proofs.len(), 2);
    sim.service.stop().await;
}

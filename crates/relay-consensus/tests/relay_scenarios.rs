// End-to-end relay scenarios: voting rounds, rollover finalization, backfill
// and atomic rejection of fatal rollovers.

use std::sync::Arc;

use relay_consensus::{
    AdmissionPolicy, BlockProposal, BlockRelay, Credentials, InvariantViolation, ManualClock, MemberId,
    RelayConfig, RelayError, RoundOutcome, StaticActiveSet, VoteId,
};
use relay_crypto::{sha256, Hash256, MerkleTree};

type TestRelay = BlockRelay<Arc<StaticActiveSet>, ManualClock>;

struct Fixture {
    relay: TestRelay,
    clock: ManualClock,
    oracle: Arc<StaticActiveSet>,
}

fn fixture(start: u64, members: &[&str]) -> Fixture {
    let oracle = Arc::new(StaticActiveSet::with_members(members.iter().copied()));
    let clock = ManualClock::new(start);
    let config = RelayConfig { genesis_time: 0, epoch_duration: 100, ..Default::default() };
    let relay = BlockRelay::new(config, Arc::clone(&oracle), clock.clone()).unwrap();
    Fixture { relay, clock, oracle }
}

fn block(tag: &str, epoch: u64, previous: Option<VoteId>) -> BlockProposal {
    BlockProposal {
        block_hash: sha256(tag.as_bytes()),
        epoch,
        dr_merkle_root: sha256(format!("{}-dr", tag).as_bytes()),
        tally_merkle_root: sha256(format!("{}-tally", tag).as_bytes()),
        previous_vote_id: previous,
    }
}

fn vote(f: &mut Fixture, voters: &[&str], proposal: &BlockProposal) -> VoteId {
    let mut id = None;
    for voter in voters {
        let credentials = Credentials::Member(MemberId::new(*voter));
        id = Some(f.relay.propose_block(&credentials, proposal.clone()).unwrap());
    }
    id.unwrap()
}

#[test_log::test]
fn three_of_four_votes_finalize_at_rollover() {
    let mut f = fixture(100, &["a", "b", "c", "d"]);
    let h1 = block("H1", 1, None);
    vote(&mut f, &["a", "b", "c"], &h1);
    assert!(f.relay.last_beacon().is_none());

    f.clock.set(200);
    let outcome = f.relay.advance_epoch().unwrap().unwrap();
    assert!(matches!(outcome, RoundOutcome::Finalized { .. }));
    assert_eq!(f.relay.last_hash(), Some(h1.block_hash));
    assert_eq!(f.relay.last_epoch(), Some(1));
    assert_eq!(f.relay.block_for_epoch(1), Some(h1.block_hash));
    assert_eq!(f.relay.state().ledger.round_size(), 0);
}

#[test_log::test]
fn two_of_four_votes_are_discarded() {
    let mut f = fixture(100, &["a", "b", "c", "d"]);
    let h1 = block("H1", 1, None);
    let id = vote(&mut f, &["a", "b"], &h1);

    f.clock.set(200);
    let outcome = f.relay.advance_epoch().unwrap().unwrap();
    assert_eq!(outcome, RoundOutcome::Skipped { leader: id, votes: 2, active_set_size: 4 });
    assert!(f.relay.last_beacon().is_none());
    assert_eq!(f.relay.state().ledger.votes_for(&id), 0);
    assert_eq!(
        f.relay.read_dr_merkle_root(&h1.block_hash),
        Err(RelayError::NotFound { block_hash: h1.block_hash })
    );
}

#[test_log::test]
fn exact_two_thirds_does_not_finalize() {
    let mut f = fixture(100, &["a", "b", "c"]);
    vote(&mut f, &["a", "b"], &block("H1", 1, None));
    f.clock.set(200);
    assert!(matches!(
        f.relay.advance_epoch().unwrap(),
        Some(RoundOutcome::Skipped { votes: 2, active_set_size: 3, .. })
    ));
    assert!(f.relay.last_beacon().is_none());
}

#[test_log::test]
fn rollover_runs_before_the_new_ballot() {
    let mut f = fixture(100, &["a", "b", "c", "d"]);
    let h1 = block("H1", 1, None);
    let h1_id = vote(&mut f, &["a", "b", "c"], &h1);

    f.clock.set(200);
    let h2 = block("H2", 2, Some(h1_id));
    let h2_id = vote(&mut f, &["a"], &h2);

    assert_eq!(f.relay.last_hash(), Some(h1.block_hash));
    assert_eq!(f.relay.state().ledger.proposal_epoch(), 2);
    assert_eq!(f.relay.state().ledger.votes_for(&h2_id), 1);
    assert_eq!(f.relay.state().ledger.leader().unwrap().vote_id, h2_id);
}

#[test_log::test]
fn finalizing_a_descendant_backfills_skipped_epochs() {
    let mut f = fixture(500, &["a", "b", "c", "d"]);
    let b1 = block("B1", 5, None);
    let b1_id = vote(&mut f, &["a", "b"], &b1);

    f.clock.set(700);
    let b2 = block("B2", 7, Some(b1_id));
    vote(&mut f, &["a", "b", "c"], &b2);
    // Epoch 5's round closed without quorum
    assert!(f.relay.last_beacon().is_none());

    f.clock.set(800);
    let outcome = f.relay.advance_epoch().unwrap().unwrap();
    match outcome {
        RoundOutcome::Finalized { beacon, backfilled } => {
            assert_eq!(beacon.block_hash, b2.block_hash);
            assert_eq!(beacon.epoch, 7);
            assert_eq!(backfilled, vec![5]);
        }
        other => panic!("expected finalization, got {:?}", other),
    }

    assert_eq!(f.relay.block_for_epoch(5), Some(b1.block_hash));
    assert_eq!(f.relay.block_for_epoch(6), None);
    assert_eq!(f.relay.block_for_epoch(7), Some(b2.block_hash));
    assert_eq!(f.relay.read_tally_merkle_root(&b1.block_hash).unwrap(), b1.tally_merkle_root);
    assert_eq!(f.relay.finalized_block(&b2.block_hash).unwrap().previous_vote_id, Some(b1_id));
}

#[test_log::test]
fn descendant_of_a_losing_vote_for_the_tip_block_is_rejected() {
    let mut f = fixture(100, &["a", "b", "c", "d"]);
    let honest = block("A", 1, None);
    let mut forged = honest.clone();
    forged.dr_merkle_root = sha256(b"A-forged-dr");
    let honest_id = vote(&mut f, &["a", "b", "c"], &honest);
    let forged_id = vote(&mut f, &["d"], &forged);

    f.clock.set(200);
    f.relay.advance_epoch().unwrap();
    assert_eq!(f.relay.last_hash(), Some(honest.block_hash));

    let b = block("B", 2, Some(forged_id));
    vote(&mut f, &["a", "b", "c"], &b);
    let before = f.relay.snapshot().unwrap();

    f.clock.set(300);
    let err = f.relay.advance_epoch().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(
        err,
        RelayError::Invariant(InvariantViolation::VoteMismatchAtTip {
            epoch: 1,
            expected: Some(honest_id),
            found: forged_id,
        })
    );
    assert_eq!(f.relay.last_epoch(), Some(1));
    assert_eq!(f.relay.read_dr_merkle_root(&honest.block_hash).unwrap(), honest.dr_merkle_root);
    assert_eq!(f.relay.snapshot().unwrap(), before);
}

#[test_log::test]
fn backfill_splices_onto_existing_beacon() {
    let mut f = fixture(100, &["a", "b", "c", "d"]);
    let b1 = block("B1", 1, None);
    let b1_id = vote(&mut f, &["a", "b", "c"], &b1);

    f.clock.set(200);
    let b2 = block("B2", 2, Some(b1_id));
    let b2_id = vote(&mut f, &["a"], &b2);

    f.clock.set(300);
    let b3 = block("B3", 3, Some(b2_id));
    vote(&mut f, &["a", "b", "c", "d"], &b3);

    f.clock.set(400);
    f.relay.advance_epoch().unwrap();
    let epochs: Vec<(u64, Hash256)> = f.relay.state().finality.finalized_epochs().map(|(e, h)| (e, *h)).collect();
    assert_eq!(epochs, vec![(1, b1.block_hash), (2, b2.block_hash), (3, b3.block_hash)]);
}

#[test_log::test]
fn fork_at_tip_aborts_the_call_and_keeps_state() {
    let mut f = fixture(100, &["a", "b", "c", "d"]);
    let h1 = block("H1", 1, None);
    vote(&mut f, &["a", "b", "c"], &h1);
    let rival_id = vote(&mut f, &["d"], &block("R1", 1, None));

    f.clock.set(200);
    let forked = block("X2", 2, Some(rival_id));
    let forked_id = vote(&mut f, &["a", "b", "c"], &forked);
    assert_eq!(f.relay.last_hash(), Some(h1.block_hash));

    f.clock.set(300);
    let err = f
        .relay
        .propose_block(&Credentials::Member(MemberId::new("a")), block("Y3", 3, None))
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, RelayError::Invariant(InvariantViolation::ForkAtTip { epoch: 1, .. })));

    // Nothing from the aborted call survived
    assert_eq!(f.relay.last_hash(), Some(h1.block_hash));
    assert_eq!(f.relay.state().ledger.proposal_epoch(), 2);
    assert_eq!(f.relay.state().ledger.votes_for(&forked_id), 3);
    assert!(f.relay.finalized_block(&forked.block_hash).is_err());

    // The same corruption is reported again rather than swallowed
    assert!(f.relay.advance_epoch().unwrap_err().is_fatal());
}

#[test_log::test]
fn unknown_predecessor_is_fatal() {
    let mut f = fixture(100, &["a", "b", "c"]);
    let orphan = block("O1", 1, Some(sha256(b"missing vote")));
    vote(&mut f, &["a", "b", "c"], &orphan);

    f.clock.set(200);
    assert_eq!(
        f.relay.advance_epoch().unwrap_err(),
        RelayError::Invariant(InvariantViolation::UnknownPredecessor { vote_id: sha256(b"missing vote") })
    );
    assert!(f.relay.last_beacon().is_none());
}

#[test_log::test]
fn quorum_denominator_is_refreshed_only_on_finalization() {
    let mut f = fixture(100, &["a", "b", "c", "d"]);
    let b1_id = vote(&mut f, &["a", "b", "c"], &block("B1", 1, None));

    f.clock.set(200);
    f.relay.advance_epoch().unwrap();
    assert_eq!(f.relay.state().active_set_size, 4);

    // Growth after the snapshot does not raise the bar for this round
    f.oracle.add_member("e");
    f.oracle.add_member("f");
    let b2_id = vote(&mut f, &["a", "b", "c"], &block("B2", 2, Some(b1_id)));
    f.clock.set(300);
    f.relay.advance_epoch().unwrap();
    assert_eq!(f.relay.last_epoch(), Some(2));
    assert_eq!(f.relay.state().active_set_size, 6);

    // Now four of six is exactly two thirds
    vote(&mut f, &["a", "b", "c", "d"], &block("B3", 3, Some(b2_id)));
    f.clock.set(400);
    assert!(matches!(f.relay.advance_epoch().unwrap(), Some(RoundOutcome::Skipped { .. })));
    assert_eq!(f.relay.last_epoch(), Some(2));
}

#[test_log::test]
fn tie_keeps_first_candidate() {
    let mut f = fixture(100, &["a", "b", "c", "d", "e", "f"]);
    let first = block("First", 1, None);
    let second = block("Second", 1, None);
    vote(&mut f, &["a", "b"], &first);
    vote(&mut f, &["c", "d"], &second);
    assert_eq!(f.relay.state().ledger.leader().unwrap().block_hash, first.block_hash);

    vote(&mut f, &["e"], &second);
    assert_eq!(f.relay.state().ledger.leader().unwrap().block_hash, second.block_hash);
}

#[test_log::test]
fn reads_are_idempotent() {
    let mut f = fixture(100, &["a", "b", "c", "d"]);
    let leaves: Vec<Hash256> = (0u8..8).map(|i| sha256(&[i])).collect();
    let tree = MerkleTree::from_leaves(leaves.clone()).unwrap();
    let mut h1 = block("H1", 1, None);
    h1.dr_merkle_root = tree.root();
    vote(&mut f, &["a", "b", "c"], &h1);
    f.clock.set(200);
    f.relay.advance_epoch().unwrap();

    let proof = tree.proof(6).unwrap();
    let before = f.relay.snapshot().unwrap();
    for _ in 0..2 {
        assert_eq!(f.relay.last_beacon_bytes().unwrap().len(), 64);
        assert_eq!(f.relay.read_dr_merkle_root(&h1.block_hash).unwrap(), tree.root());
        assert!(f.relay.verify_dr_poi(&proof.path, &h1.block_hash, 6, &leaves[6]).unwrap());
    }
    assert_eq!(f.relay.snapshot().unwrap(), before);
}

#[test_log::test]
fn restored_relay_continues_the_chain() {
    let mut f = fixture(100, &["a", "b", "c", "d"]);
    let b1_id = vote(&mut f, &["a", "b", "c"], &block("B1", 1, None));
    f.clock.set(200);
    let b2 = block("B2", 2, Some(b1_id));
    vote(&mut f, &["a", "b", "c"], &b2);

    let snapshot = f.relay.snapshot().unwrap();
    let config = f.relay.config().clone();
    let mut restored = BlockRelay::restore(config, Arc::clone(&f.oracle), f.clock.clone(), &snapshot).unwrap();
    assert_eq!(restored.last_beacon(), f.relay.last_beacon());

    f.clock.set(300);
    restored.advance_epoch().unwrap();
    assert_eq!(restored.last_hash(), Some(b2.block_hash));
    assert_eq!(restored.last_epoch(), Some(2));
}

#[test_log::test]
fn self_reported_weight_reaches_quorum_in_one_ballot() {
    let oracle = Arc::new(StaticActiveSet::with_size(4));
    let clock = ManualClock::new(100);
    let config = RelayConfig {
        epoch_duration: 100,
        admission: AdmissionPolicy::SelfReported,
        ..Default::default()
    };
    let mut relay = BlockRelay::new(config, oracle, clock.clone()).unwrap();

    let keys = Credentials::SignerKeys(vec![b"k1".to_vec(), b"k2".to_vec(), b"k3".to_vec()]);
    relay.propose_block(&keys, block("H1", 1, None)).unwrap();
    clock.set(200);
    relay.advance_epoch().unwrap();
    assert_eq!(relay.last_hash(), Some(sha256(b"H1")));
}

//! Property-based and adversarial tests for the ledger
//!
//! These tests verify invariants hold under random inputs and tampering.

use proptest::prelude::*;
use pow_ledger::consensus::{meets_target, target, validate, Block};
use pow_ledger::crypto::{merkle_digest, sha256, Hash, PrivateKey, PubKeyHash};
use pow_ledger::transaction::{PriorTransactions, Transaction, TxInput, TxOutput};

const TEST_DIFFICULTY: u32 = 4;

fn arb_input() -> impl Strategy<Value = TxInput> {
    (
        any::<[u8; 32]>(),
        -1i64..16,
        prop::collection::vec(any::<u8>(), 0..72),
        prop::collection::vec(any::<u8>(), 0..65),
    )
        .prop_map(|(txid, vout, signature, public_key)| TxInput {
            txid: Hash(txid),
            vout,
            signature,
            public_key,
        })
}

fn arb_output() -> impl Strategy<Value = TxOutput> {
    (any::<u64>(), any::<[u8; 20]>()).prop_map(|(value, pkh)| TxOutput::new(value, PubKeyHash(pkh)))
}

fn arb_transaction() -> impl Strategy<Value = Transaction> {
    (
        prop::collection::vec(arb_input(), 0..4),
        prop::collection::vec(arb_output(), 0..4),
    )
        .prop_map(|(inputs, outputs)| Transaction::new(inputs, outputs))
}

fn arb_block() -> impl Strategy<Value = Block> {
    (
        any::<[u8; 32]>(),
        prop::option::of(any::<[u8; 32]>()),
        prop::collection::vec(arb_transaction(), 1..4),
        any::<u64>(),
        any::<u64>(),
        any::<u64>(),
        any::<u32>(),
    )
        .prop_map(|(hash, prev, transactions, nonce, height, timestamp, difficulty)| Block {
            hash: Hash(hash),
            prev_hash: prev.map(Hash),
            transactions,
            nonce,
            height,
            timestamp,
            difficulty,
        })
}

/// One spendable prior transaction owned by `key`, plus a signed spend of it
fn signed_spend(key: &PrivateKey, value: u64) -> (Transaction, PriorTransactions) {
    let prev = Transaction::coinbase(key.public_key().pubkey_hash(), "prior", value);
    let mut tx = Transaction::new(
        vec![TxInput::new(prev.id, 0, key.public_key().to_bytes())],
        vec![TxOutput::new(value, PubKeyHash([9u8; 20]))],
    );
    let prior: PriorTransactions = [(prev.id, prev)].into_iter().collect();
    tx.sign(key, &prior).unwrap();
    (tx, prior)
}

fn flip_bit(bytes: &mut [u8], bit: usize) {
    let bit = bit % (bytes.len() * 8);
    bytes[bit / 8] ^= 1 << (bit % 8);
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

proptest! {
    /// Merkle digest is a pure function of the ordered list
    #[test]
    fn prop_merkle_digest_deterministic(
        items in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..10),
    ) {
        prop_assert_eq!(merkle_digest(&items), merkle_digest(&items));
    }

    /// Swapping two distinct elements changes the digest
    #[test]
    fn prop_merkle_digest_order_sensitive(
        items in prop::collection::hash_set(prop::collection::vec(any::<u8>(), 1..16), 2..8),
        i in any::<prop::sample::Index>(),
        j in any::<prop::sample::Index>(),
    ) {
        let items: Vec<Vec<u8>> = items.into_iter().collect();
        let (a, b) = (i.index(items.len()), j.index(items.len()));
        prop_assume!(a != b);

        let mut swapped = items.clone();
        swapped.swap(a, b);
        prop_assert_ne!(merkle_digest(&items), merkle_digest(&swapped));
    }

    /// Transaction encoding round-trips, including multi-input/output shapes
    #[test]
    fn prop_transaction_roundtrip(tx in arb_transaction()) {
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        prop_assert_eq!(&decoded, &tx);
        prop_assert_eq!(decoded.compute_id(), tx.id);
    }

    /// Block encoding round-trips, genesis (no parent) included
    #[test]
    fn prop_block_roundtrip(block in arb_block()) {
        prop_assert_eq!(Block::from_bytes(&block.to_bytes()).unwrap(), block);
    }

    /// Truncated encodings never decode
    #[test]
    fn prop_truncated_block_rejected(block in arb_block(), cut in any::<prop::sample::Index>()) {
        let bytes = block.to_bytes();
        let len = cut.index(bytes.len());
        prop_assert!(Block::from_bytes(&bytes[..len]).is_err());
    }

    /// The leading-zero check agrees with `hash < 1 << (256 - difficulty)`
    #[test]
    fn prop_target_comparison(
        data in prop::collection::vec(any::<u8>(), 0..64),
        difficulty in 1u32..=32,
    ) {
        let hash = sha256(&data);
        prop_assert_eq!(meets_target(&hash, difficulty), hash.0 < target(difficulty));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Mined blocks validate; flipping any bit of hash, nonce or parent breaks them
    #[test]
    fn prop_mined_block_tamper_detected(
        memo in "[a-z]{1,12}",
        bit in 0usize..256,
        field in 0u8..3,
    ) {
        let genesis = Block::create_genesis(
            Transaction::coinbase(PubKeyHash([1u8; 20]), "genesis", 100),
            TEST_DIFFICULTY,
        ).unwrap();
        let block = Block::create(
            vec![Transaction::coinbase(PubKeyHash([2u8; 20]), &memo, 100)],
            Some(genesis.hash),
            1,
            TEST_DIFFICULTY,
        ).unwrap();
        prop_assert!(validate(&block));

        let mut tampered = block.clone();
        match field {
            0 => flip_bit(&mut tampered.hash.0, bit),
            1 => tampered.nonce ^= 1u64 << (bit % 64),
            _ => {
                let mut prev = genesis.hash;
                flip_bit(&mut prev.0, bit);
                tampered.prev_hash = Some(prev);
            }
        }
        prop_assert!(!validate(&tampered));
    }

    /// Changing any output value of a mined block's transactions breaks it
    #[test]
    fn prop_mined_block_transaction_tamper_detected(delta in 1u64..1000) {
        let block = Block::create_genesis(
            Transaction::coinbase(PubKeyHash([1u8; 20]), "genesis", 100),
            TEST_DIFFICULTY,
        ).unwrap();

        let mut tampered = block;
        tampered.transactions[0].outputs[0].value += delta;
        prop_assert!(!validate(&tampered));
    }

    /// A correctly signed spend verifies; any single bit flip in a signature,
    /// public key or output value makes it fail
    #[test]
    fn prop_signature_tamper_detected(
        bit in 0usize..512,
        value in 1u64..1_000_000,
        part in 0u8..3,
    ) {
        let key = PrivateKey::generate();
        let (tx, prior) = signed_spend(&key, value);
        prop_assert!(tx.verify(&prior).unwrap());

        let mut tampered = tx.clone();
        match part {
            0 => flip_bit(&mut tampered.inputs[0].signature, bit),
            1 => flip_bit(&mut tampered.inputs[0].public_key, bit),
            _ => tampered.outputs[0].value ^= 1u64 << (bit % 64),
        }
        prop_assert!(!tampered.verify(&prior).unwrap());
    }
}

// ============================================================================
// ADVERSARIAL TESTS
// ============================================================================

/// Test: Signature replay onto a different transaction
///
/// A signature lifted from one spend must not authorize another spend of
/// the same output to a different recipient.
#[test]
fn test_signature_replay_rejected() {
    let key = PrivateKey::generate();
    let (tx, prior) = signed_spend(&key, 50);

    let mut redirected = Transaction::new(
        vec![TxInput::new(tx.inputs[0].txid, 0, key.public_key().to_bytes())],
        vec![TxOutput::new(50, PubKeyHash([0xEE; 20]))],
    );
    redirected.inputs[0].signature = tx.inputs[0].signature.clone();

    assert!(!redirected.verify(&prior).unwrap());
}

/// Test: Spending someone else's output with a valid signature of one's own
#[test]
fn test_foreign_output_rejected() {
    let owner = PrivateKey::generate();
    let thief = PrivateKey::generate();
    let prev = Transaction::coinbase(owner.public_key().pubkey_hash(), "owned", 10);
    let prior: PriorTransactions = [(prev.id, prev.clone())].into_iter().collect();

    let mut tx = Transaction::new(
        vec![TxInput::new(prev.id, 0, thief.public_key().to_bytes())],
        vec![TxOutput::new(10, thief.public_key().pubkey_hash())],
    );
    tx.sign(&thief, &prior).unwrap();

    assert!(!tx.verify(&prior).unwrap());
}

/// Test: Coinbase impersonation
///
/// A transaction only counts as coinbase with exactly one input referencing
/// the empty id at index -1.
#[test]
fn test_coinbase_shape_is_strict() {
    let mut fake = Transaction::coinbase(PubKeyHash([3u8; 20]), "fake", 100);
    fake.inputs[0].vout = 0;
    assert!(!fake.is_coinbase());

    let mut fake = Transaction::coinbase(PubKeyHash([3u8; 20]), "fake", 100);
    fake.inputs[0].txid = sha256(b"not empty");
    assert!(!fake.is_coinbase());
}

/// Test: Block mined at an easier difficulty does not satisfy a harder one
#[test]
fn test_difficulty_is_bound_to_hash() {
    let block = Block::create_genesis(
        Transaction::coinbase(PubKeyHash([1u8; 20]), "genesis", 100),
        TEST_DIFFICULTY,
    )
    .unwrap();

    let mut relabelled = block;
    relabelled.difficulty = TEST_DIFFICULTY + 8;
    assert!(!validate(&relabelled));
}

//! Transaction structure, signing and verification
//!
//! UTXO-referencing transactions signed with ECDSA. Each input is signed
//! independently over a trimmed copy of the transaction in which only that
//! input carries data (the `pubkey_hash` of the output it spends).

use std::collections::HashMap;
use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{DecodeError, Reader, Writer};
use crate::constants::{COINBASE_VOUT, RANDOM_MEMO_LEN};
use crate::crypto::{sha256, verify_signature, Hash, KeyError, PrivateKey, PubKeyHash};

/// Transaction errors
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Previous transaction {0} is unknown")]
    UnknownPriorTransaction(Hash),
    #[error("Transaction {txid} has no output {vout}")]
    InvalidOutputIndex { txid: Hash, vout: i64 },
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Transfer amount must be positive")]
    InvalidAmount,
    #[error("Output values overflow")]
    ValueOverflow,
    #[error("Malformed transaction encoding: {0}")]
    Encoding(#[from] DecodeError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// Prior transactions an input set refers to, keyed by id
pub type PriorTransactions = HashMap<Hash, Transaction>;

/// A transaction input referencing a previous output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction containing the output (zero for coinbase)
    pub txid: Hash,
    /// Index of the output in that transaction (-1 for coinbase)
    pub vout: i64,
    /// `r || s` ECDSA signature; empty until signed
    pub signature: Vec<u8>,
    /// SEC1 public key of the signer; the memo on a coinbase input
    pub public_key: Vec<u8>,
}

impl TxInput {
    /// Unsigned input spending `txid:vout` with `public_key`
    pub fn new(txid: Hash, vout: i64, public_key: Vec<u8>) -> Self {
        Self {
            txid,
            vout,
            signature: Vec::new(),
            public_key,
        }
    }

    /// Whether the embedded public key hashes to `pubkey_hash`
    pub fn uses_key(&self, pubkey_hash: &PubKeyHash) -> bool {
        PubKeyHash::from_public_key(&self.public_key) == *pubkey_hash
    }
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in base units
    pub value: u64,
    /// Identity of the recipient
    pub pubkey_hash: PubKeyHash,
}

impl TxOutput {
    pub fn new(value: u64, pubkey_hash: PubKeyHash) -> Self {
        Self { value, pubkey_hash }
    }

    pub fn is_locked_with(&self, pubkey_hash: &PubKeyHash) -> bool {
        self.pubkey_hash == *pubkey_hash
    }
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Digest of the encoding with `id` cleared
    pub id: Hash,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a transaction and set its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Create a coinbase transaction minting `reward` to `to`.
    ///
    /// An empty memo is replaced by random bytes so that coinbases paying
    /// the same address still get distinct ids.
    pub fn coinbase(to: PubKeyHash, memo: &str, reward: u64) -> Self {
        let memo = if memo.is_empty() {
            let mut random = [0u8; RANDOM_MEMO_LEN];
            rand::thread_rng().fill_bytes(&mut random);
            hex::encode(random).into_bytes()
        } else {
            memo.as_bytes().to_vec()
        };

        Self::new(
            vec![TxInput::new(Hash::zero(), COINBASE_VOUT, memo)],
            vec![TxOutput::new(reward, to)],
        )
    }

    /// Exactly one input, with an empty referenced id and index -1
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].txid.is_zero()
            && self.inputs[0].vout == COINBASE_VOUT
    }

    /// Digest of the encoding with `id` cleared
    pub fn compute_id(&self) -> Hash {
        let mut copy = self.clone();
        copy.id = Hash::zero();
        sha256(&copy.to_bytes())
    }

    /// Output referenced by `vout`, if it exists
    pub fn output(&self, vout: i64) -> Option<&TxOutput> {
        usize::try_from(vout).ok().and_then(|i| self.outputs.get(i))
    }

    /// Copy with signatures and public keys stripped from every input
    pub fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: self.id,
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput::new(input.txid, input.vout, Vec::new()))
                .collect(),
            outputs: self.outputs.clone(),
        }
    }

    /// Per-input signing digests.
    ///
    /// For input `i` the trimmed copy gets the spent output's `pubkey_hash`
    /// in place of input `i`'s public key, and its recomputed id is the
    /// digest for that input.
    fn signing_digests(&self, prev_txs: &PriorTransactions) -> Result<Vec<Hash>, TransactionError> {
        let mut copy = self.trimmed_copy();
        let mut digests = Vec::with_capacity(self.inputs.len());

        for (i, input) in self.inputs.iter().enumerate() {
            let spent = resolve_output(input, prev_txs)?;

            copy.inputs[i].public_key = spent.pubkey_hash.0.to_vec();
            digests.push(copy.compute_id());
            copy.inputs[i].public_key.clear();
        }

        Ok(digests)
    }

    /// Sign every input in place and refresh the id. A coinbase is left
    /// untouched.
    ///
    /// All referenced transactions are resolved before any signature is
    /// written, so a failure leaves the transaction unchanged.
    pub fn sign(
        &mut self,
        key: &PrivateKey,
        prev_txs: &PriorTransactions,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let digests = self.signing_digests(prev_txs)?;
        for (input, digest) in self.inputs.iter_mut().zip(digests) {
            input.signature = key.sign(&digest);
        }
        self.id = self.compute_id();

        Ok(())
    }

    /// Verify every input signature.
    ///
    /// Each input's public key must hash to the `pubkey_hash` of the output
    /// it spends and its signature must cover that input's digest. A missing
    /// prior transaction is an error, not a `false`.
    pub fn verify(&self, prev_txs: &PriorTransactions) -> Result<bool, TransactionError> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let digests = match self.signing_digests(prev_txs) {
            Ok(digests) => digests,
            Err(TransactionError::InvalidOutputIndex { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        for (input, digest) in self.inputs.iter().zip(&digests) {
            let spent = resolve_output(input, prev_txs)?;
            if !input.uses_key(&spent.pubkey_hash) {
                return Ok(false);
            }
            if !verify_signature(&input.public_key, digest, &input.signature) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Total output value
    pub fn total_output_value(&self) -> Result<u64, TransactionError> {
        checked_sum(self.outputs.iter().map(|o| o.value))
    }

    /// Total value of the outputs this transaction spends
    pub fn input_value(&self, prev_txs: &PriorTransactions) -> Result<u64, TransactionError> {
        let mut values = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            values.push(resolve_output(input, prev_txs)?.value);
        }
        checked_sum(values)
    }

    /// Canonical encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.finish()
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        w.hash(&self.id).count(self.inputs.len());
        for input in &self.inputs {
            w.hash(&input.txid)
                .i64(input.vout)
                .bytes(&input.signature)
                .bytes(&input.public_key);
        }
        w.count(self.outputs.len());
        for output in &self.outputs {
            w.u64(output.value).pubkey_hash(&output.pubkey_hash);
        }
    }

    /// Decode a canonical encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = Reader::new(bytes)?;
        let tx = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let id = r.hash()?;

        let input_count = r.count()?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxInput {
                txid: r.hash()?,
                vout: r.i64()?,
                signature: r.bytes()?,
                public_key: r.bytes()?,
            });
        }

        let output_count = r.count()?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOutput {
                value: r.u64()?,
                pubkey_hash: r.pubkey_hash()?,
            });
        }

        Ok(Self { id, inputs, outputs })
    }
}

/// Sum of amounts, failing instead of wrapping
pub fn checked_sum<I: IntoIterator<Item = u64>>(values: I) -> Result<u64, TransactionError> {
    values
        .into_iter()
        .try_fold(0u64, |total, value| total.checked_add(value))
        .ok_or(TransactionError::ValueOverflow)
}

fn resolve_output<'a>(
    input: &TxInput,
    prev_txs: &'a PriorTransactions,
) -> Result<&'a TxOutput, TransactionError> {
    let prev = prev_txs
        .get(&input.txid)
        .ok_or(TransactionError::UnknownPriorTransaction(input.txid))?;
    prev.output(input.vout).ok_or(TransactionError::InvalidOutputIndex {
        txid: input.txid,
        vout: input.vout,
    })
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "      Input {}:", i)?;
            writeln!(f, "        TXID:      {}", input.txid)?;
            writeln!(f, "        Out:       {}", input.vout)?;
            writeln!(f, "        Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "        PubKey:    {}", hex::encode(&input.public_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "      Output {}:", i)?;
            writeln!(f, "        Value:     {}", output.value)?;
            writeln!(f, "        Script:    {}", output.pubkey_hash)?;
        }
        Ok(())
    }
}

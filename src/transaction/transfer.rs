//! Transfer construction from the sender's spendable outputs

use crate::crypto::{PubKeyHash, PublicKey};
use crate::storage::{ChainError, KvStore, UtxoIndex};

use super::{Transaction, TransactionError, TxInput, TxOutput};

/// Build an unsigned transfer of `amount` from `from` to `to`.
///
/// Spendable outputs are gathered greedily from the UTXO index. Every
/// consumed output becomes one input carrying the sender's public key and an
/// empty signature; change goes back to the sender when the gathered value
/// exceeds `amount`. Nothing is mutated when funds are insufficient.
pub fn build_transfer<S: KvStore>(
    from: &PublicKey,
    to: PubKeyHash,
    amount: u64,
    utxo: &UtxoIndex<'_, S>,
) -> Result<Transaction, ChainError> {
    if amount == 0 {
        return Err(TransactionError::InvalidAmount.into());
    }

    let sender = from.pubkey_hash();
    let (accumulated, spendable) = utxo.find_spendable(&sender, amount)?;
    if accumulated < amount {
        return Err(TransactionError::InsufficientFunds {
            have: accumulated,
            need: amount,
        }
        .into());
    }

    let public_key = from.to_bytes();
    let inputs = spendable
        .into_iter()
        .flat_map(|(txid, indices)| {
            let public_key = public_key.clone();
            indices
                .into_iter()
                .map(move |index| TxInput::new(txid, i64::from(index), public_key.clone()))
        })
        .collect();

    let mut outputs = vec![TxOutput::new(amount, to)];
    if accumulated > amount {
        outputs.push(TxOutput::new(accumulated - amount, sender));
    }

    Ok(Transaction::new(inputs, outputs))
}

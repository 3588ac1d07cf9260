use std::collections::HashSet;

use crate::crypto::HexDigest;

use super::transaction::Transaction;
use super::txn_verify_error::ErrorKind::{
    AmountOverflow, BadSignature, DuplicateInputs, Mint, OutputIdMismatch, SpentOrUnknownInputs,
    UnknownReceiver, UnknownSender,
};
use super::txn_verify_error::TxnVerifyResult;
use super::wallet::Ring;

/// Verifies a transaction against a ring and, on success, consumes its
/// inputs from the sender's wallet in that ring. The caller credits the
/// outputs afterward; on failure the ring is untouched.
///
/// The final step is the sender wallet's atomic check-and-consume, which is
/// what rejects a double spend when two transactions race over the same
/// inputs.
pub fn verify_transaction(txn: &Transaction, ring: &mut Ring) -> TxnVerifyResult<()> {
    // Mint transactions are replayed as direct credits during chain
    // validation and are never relayed on their own.
    let sender = match txn.sender_pubk.key() {
        None => return Err(Box::new(Mint)),
        Some(key) => key,
    };

    if !sender.verify(&txn.digest(), &txn.signature) {
        return Err(Box::new(BadSignature));
    }

    let mut seen: HashSet<&HexDigest> = HashSet::new();
    for input in &txn.transaction_inputs {
        if !seen.insert(input) {
            return Err(Box::new(DuplicateInputs(input.clone())));
        }
    }

    for output in &txn.transaction_outputs {
        if output.transaction_id != txn.transaction_id {
            return Err(Box::new(OutputIdMismatch(output.transaction_id.clone())));
        }
    }

    let amount = match txn.output_sum() {
        None => return Err(Box::new(AmountOverflow)),
        Some(amount) => amount,
    };

    if ring.id_of(sender).is_none() {
        return Err(Box::new(UnknownSender));
    }

    // Receivers are checked up front so that crediting the outputs after a
    // successful consume cannot fail halfway through.
    for output in &txn.transaction_outputs {
        if ring.id_of(&output.receiver_pubk).is_none() {
            return Err(Box::new(UnknownReceiver));
        }
    }

    let wallet = ring.wallet_of_mut(sender).unwrap();
    if !wallet.check_and_consume(&txn.transaction_inputs, amount) {
        return Err(Box::new(SpentOrUnknownInputs));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::v1::transaction::{Transaction, TransactionOutput};
    use crate::v1::wallet::Wallet;

    struct Net {
        alice: Keypair,
        bob: Keypair,
        ring: Ring,
    }

    /// Two peers; alice starts with a single 100-coin UTXO.
    fn two_peer_ring() -> Net {
        let alice = Keypair::generate().unwrap();
        let bob = Keypair::generate().unwrap();

        let mut ring = Ring::default();
        ring.insert(0, Wallet::new(alice.public().clone(), "127.0.0.1:5000".into()));
        ring.insert(1, Wallet::new(bob.public().clone(), "127.0.0.1:5001".into()));
        ring.get_mut(0).unwrap().add_utxo(TransactionOutput {
            transaction_id: "aa".into(),
            receiver_pubk: alice.public().clone(),
            amount: 100,
        });

        Net { alice, bob, ring }
    }

    fn transfer(net: &mut Net, amount: u64) -> Transaction {
        let wallet = net.ring.get_mut(0).unwrap();
        Transaction::new(net.bob.public().clone(), amount, &net.alice, wallet).unwrap()
    }

    #[test]
    fn valid_transfer_consumes_inputs() {
        let mut net = two_peer_ring();
        let txn = transfer(&mut net, 60);

        // reset to a receiver's view: alice still holds her UTXO there
        let mut ring = net.ring.fresh();
        ring.get_mut(0).unwrap().add_utxo(TransactionOutput {
            transaction_id: "aa".into(),
            receiver_pubk: net.alice.public().clone(),
            amount: 100,
        });

        assert!(verify_transaction(&txn, &mut ring).is_ok());
        assert_eq!(ring.get(0).unwrap().balance(), 0);

        // crediting the outputs completes the transfer
        assert!(ring.credit_outputs(&txn.transaction_outputs));
        assert_eq!(ring.get(0).unwrap().balance(), 40);
        assert_eq!(ring.get(1).unwrap().balance(), 60);
    }

    #[test]
    fn double_spend_loses_the_race() {
        let mut net = two_peer_ring();
        let txn = transfer(&mut net, 60);

        let mut ring = net.ring.fresh();
        ring.get_mut(0).unwrap().add_utxo(TransactionOutput {
            transaction_id: "aa".into(),
            receiver_pubk: net.alice.public().clone(),
            amount: 100,
        });

        assert!(verify_transaction(&txn, &mut ring).is_ok());
        ring.credit_outputs(&txn.transaction_outputs);

        // a second transaction spending the same input must fail
        let err = verify_transaction(&txn, &mut ring).unwrap_err();
        assert_eq!(*err, SpentOrUnknownInputs);
    }

    #[test]
    fn tampered_amount_is_rejected() {
        let mut net = two_peer_ring();
        let mut txn = transfer(&mut net, 60);
        txn.transaction_outputs[0].amount = 90;

        let mut ring = net.ring.fresh();
        ring.get_mut(0).unwrap().add_utxo(TransactionOutput {
            transaction_id: "aa".into(),
            receiver_pubk: net.alice.public().clone(),
            amount: 100,
        });

        let err = verify_transaction(&txn, &mut ring).unwrap_err();
        assert_eq!(*err, SpentOrUnknownInputs);
        // rejection must not touch the sender wallet
        assert_eq!(ring.get(0).unwrap().balance(), 100);
    }

    #[test]
    fn forged_signature_is_rejected() {
        let mut net = two_peer_ring();
        let mut txn = transfer(&mut net, 60);
        txn.signature[0] ^= 0xff;

        let mut ring = net.ring.clone();
        let err = verify_transaction(&txn, &mut ring).unwrap_err();
        assert_eq!(*err, BadSignature);
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let mut net = two_peer_ring();
        let txn = transfer(&mut net, 60);

        // a ring that has never heard of alice
        let mut ring = Ring::default();
        ring.insert(1, Wallet::new(net.bob.public().clone(), "127.0.0.1:5001".into()));

        let err = verify_transaction(&txn, &mut ring).unwrap_err();
        assert_eq!(*err, UnknownSender);
    }

    #[test]
    fn mint_is_rejected_outside_genesis() {
        let net = two_peer_ring();
        let mint = Transaction::genesis(net.alice.public().clone(), 300);

        let mut ring = net.ring.clone();
        let err = verify_transaction(&mint, &mut ring).unwrap_err();
        assert_eq!(*err, Mint);
    }
}

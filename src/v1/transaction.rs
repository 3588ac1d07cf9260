use serde::{Deserialize, Serialize};

use crate::crypto::{sha1_bytes, sha1_hex, HexDigest, Keypair, PubKey, Sender};

use super::wallet::Wallet;

/// Placeholder signature carried by the genesis mint. It never verifies and
/// never needs to: the genesis transaction is only replayed as a direct
/// credit, never through signature validation.
pub const GENESIS_SIGNATURE: &[u8] = b"genesis";

/// A single unspent transaction output. Immutable once created; the
/// `transaction_id` is the id of the transaction that produced it, which is
/// also the key under which a wallet holds it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub transaction_id: HexDigest,
    pub receiver_pubk: PubKey,
    pub amount: u64,
}

/// A bare value transfer. The id is derived from `(sender, receiver, inputs)`
/// alone: the amount is implied by the outputs, which themselves carry the id,
/// so the amount cannot be altered without changing the inputs and therefore
/// the id and signature.
///
/// The id is never transmitted. Deserialization recomputes it from the
/// canonical message, so a received transaction always carries the id implied
/// by its fields, whatever the sender claimed.
#[derive(Clone, Serialize)]
pub struct Transaction {
    pub sender_pubk: Sender,
    pub receiver_pubk: PubKey,
    pub transaction_inputs: Vec<HexDigest>,
    pub transaction_outputs: Vec<TransactionOutput>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    #[serde(skip_serializing)]
    pub transaction_id: HexDigest,
}

/// The exact byte form that is hashed and signed: compact JSON with this
/// field order, nothing else.
#[derive(Serialize)]
struct TxnMessage<'a> {
    sender_pubk: &'a Sender,
    receiver_pubk: &'a PubKey,
    transaction_inputs: &'a [HexDigest],
}

impl Transaction {
    /// Create and sign a transfer from the owner of `keypair` to
    /// `receiver_pubk`. Picks just enough UTXOs from `wallet` (debiting it)
    /// and pays any excess back to the sender as change. Returns `None` if
    /// the wallet cannot cover `amount`.
    pub fn new(
        receiver_pubk: PubKey,
        amount: u64,
        keypair: &Keypair,
        wallet: &mut Wallet,
    ) -> Option<Transaction> {
        let (transaction_inputs, change) = wallet.get_sufficient_utxos(amount)?;

        let mut txn = Transaction {
            sender_pubk: Sender::Key(keypair.public().clone()),
            receiver_pubk,
            transaction_inputs,
            transaction_outputs: vec![],
            signature: vec![],
            transaction_id: HexDigest::new(),
        };

        txn.transaction_id = txn.make_hash();
        txn.signature = keypair
            .sign(&txn.digest())
            .expect("failed to sign transaction");
        txn.build_outputs(amount, change);

        Some(txn)
    }

    /// The mint: credits `amount` to `receiver_pubk` out of nothing. Only
    /// ever appears in block 0.
    pub fn genesis(receiver_pubk: PubKey, amount: u64) -> Transaction {
        let mut txn = Transaction {
            sender_pubk: Sender::Genesis,
            receiver_pubk,
            transaction_inputs: vec![],
            transaction_outputs: vec![],
            signature: GENESIS_SIGNATURE.to_vec(),
            transaction_id: HexDigest::new(),
        };

        txn.transaction_id = txn.make_hash();
        txn.build_outputs(amount, 0);

        txn
    }

    /// Sign a transfer over an arbitrary set of input ids without touching
    /// any wallet. The result is well-formed (correct id, valid signature)
    /// but its inputs need not cover the amount; whether it survives
    /// validation is up to the receiving peers. Testing aid.
    pub fn forge(
        receiver_pubk: PubKey,
        amount: u64,
        keypair: &Keypair,
        transaction_inputs: Vec<HexDigest>,
    ) -> Transaction {
        let mut txn = Transaction {
            sender_pubk: Sender::Key(keypair.public().clone()),
            receiver_pubk,
            transaction_inputs,
            transaction_outputs: vec![],
            signature: vec![],
            transaction_id: HexDigest::new(),
        };

        txn.transaction_id = txn.make_hash();
        txn.signature = keypair
            .sign(&txn.digest())
            .expect("failed to sign transaction");
        txn.build_outputs(amount, 0);

        txn
    }

    fn build_outputs(&mut self, amount: u64, change: u64) {
        self.transaction_outputs = vec![TransactionOutput {
            transaction_id: self.transaction_id.clone(),
            receiver_pubk: self.receiver_pubk.clone(),
            amount,
        }];

        if change > 0 {
            if let Some(sender) = self.sender_pubk.key() {
                self.transaction_outputs.push(TransactionOutput {
                    transaction_id: self.transaction_id.clone(),
                    receiver_pubk: sender.clone(),
                    amount: change,
                });
            }
        }
    }

    /// Canonical message covering id and signature.
    pub fn message(&self) -> String {
        serde_json::to_string(&TxnMessage {
            sender_pubk: &self.sender_pubk,
            receiver_pubk: &self.receiver_pubk,
            transaction_inputs: &self.transaction_inputs,
        })
        .expect("failed to serialize transaction message")
    }

    pub fn make_hash(&self) -> HexDigest {
        sha1_hex(self.message().as_bytes())
    }

    /// Raw SHA-1 digest of the canonical message; this is what gets signed.
    pub fn digest(&self) -> [u8; 20] {
        sha1_bytes(self.message().as_bytes())
    }

    /// Sum of output amounts, or `None` on overflow.
    pub fn output_sum(&self) -> Option<u64> {
        self.transaction_outputs
            .iter()
            .try_fold(0_u64, |acc, out| acc.checked_add(out.amount))
    }
}

impl<'de> Deserialize<'de> for Transaction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct WireTransaction {
            sender_pubk: Sender,
            receiver_pubk: PubKey,
            transaction_inputs: Vec<HexDigest>,
            transaction_outputs: Vec<TransactionOutput>,
            #[serde(with = "hex::serde")]
            signature: Vec<u8>,
        }

        let wire = WireTransaction::deserialize(deserializer)?;

        let mut txn = Transaction {
            sender_pubk: wire.sender_pubk,
            receiver_pubk: wire.receiver_pubk,
            transaction_inputs: wire.transaction_inputs,
            transaction_outputs: wire.transaction_outputs,
            signature: wire.signature,
            transaction_id: HexDigest::new(),
        };
        txn.transaction_id = txn.make_hash();

        Ok(txn)
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.transaction_id == other.transaction_id
    }
}

impl Eq for Transaction {}

impl std::hash::Hash for Transaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.transaction_id.hash(state);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.transaction_id)
            .field("sender", &self.sender_pubk)
            .field("receiver", &self.receiver_pubk)
            .field("inputs", &self.transaction_inputs)
            .field("outputs", &self.transaction_outputs)
            .finish()
    }
}

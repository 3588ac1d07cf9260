use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::crypto::{HexDigest, PubKey};

use super::transaction::TransactionOutput;

/// One peer's coins, as seen by this node. The UTXO list is kept in insertion
/// order so input selection spends the oldest outputs first; a wallet holds at
/// most one UTXO per transaction id because the outputs of a transaction
/// share its id and are credited to different wallets.
///
/// Invariant: `balance == sum of utxos amounts`.
#[derive(Clone, Debug)]
pub struct Wallet {
    pub pubkey: PubKey,
    pub address: String,
    utxos: Vec<TransactionOutput>,
    balance: u64,
}

impl Wallet {
    pub fn new(pubkey: PubKey, address: String) -> Self {
        Wallet {
            pubkey,
            address,
            utxos: vec![],
            balance: 0,
        }
    }

    pub fn from_info(info: &WalletInfo) -> Self {
        Wallet::new(info.public_key.clone(), info.address.clone())
    }

    pub fn info(&self) -> WalletInfo {
        WalletInfo {
            public_key: self.pubkey.clone(),
            address: self.address.clone(),
        }
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn utxos(&self) -> &[TransactionOutput] {
        &self.utxos
    }

    pub fn add_utxo(&mut self, utxo: TransactionOutput) {
        self.balance += utxo.amount;
        self.utxos.push(utxo);
    }

    /// Remove the listed UTXOs. Returns `false` and leaves the wallet
    /// untouched if any id is missing (a repeated id counts as missing the
    /// second time).
    pub fn remove_utxos(&mut self, utxo_ids: &[HexDigest]) -> bool {
        let mut positions: Vec<usize> = Vec::with_capacity(utxo_ids.len());
        for id in utxo_ids {
            let pos = self
                .utxos
                .iter()
                .enumerate()
                .position(|(i, u)| !positions.contains(&i) && u.transaction_id == *id);

            match pos {
                Some(pos) => positions.push(pos),
                None => return false,
            }
        }

        positions.sort_unstable_by(|a, b| b.cmp(a));
        for pos in positions {
            let utxo = self.utxos.remove(pos);
            self.balance -= utxo.amount;
        }

        true
    }

    /// Sum of the amounts held under the given ids, or `None` if any id is
    /// missing from the wallet.
    pub fn filtered_sum(&self, utxo_ids: &[HexDigest]) -> Option<u64> {
        utxo_ids
            .iter()
            .map(|id| {
                self.utxos
                    .iter()
                    .find(|u| u.transaction_id == *id)
                    .map(|u| u.amount)
            })
            .sum()
    }

    /// The transactional boundary against double spends: either the listed
    /// inputs exist and carry exactly `amount`, in which case they are
    /// removed and `true` is returned, or nothing changes. Two concurrent
    /// transactions spending the same inputs race through here and exactly
    /// one wins.
    pub fn check_and_consume(&mut self, utxo_ids: &[HexDigest], amount: u64) -> bool {
        match self.filtered_sum(utxo_ids) {
            Some(sum) if sum == amount => self.remove_utxos(utxo_ids),
            _ => false,
        }
    }

    /// Input selection: accumulate UTXOs in insertion order until they cover
    /// `amount`, remove them, and return their ids together with the change.
    /// Returns `None` (wallet untouched) if the balance cannot cover the
    /// amount.
    pub fn get_sufficient_utxos(&mut self, amount: u64) -> Option<(Vec<HexDigest>, u64)> {
        if amount > self.balance {
            return None;
        }

        let mut sum = 0;
        let mut count = 0;
        for utxo in &self.utxos {
            sum += utxo.amount;
            count += 1;
            if sum >= amount {
                break;
            }
        }

        let ids = self
            .utxos
            .drain(..count)
            .map(|u| u.transaction_id)
            .collect();
        self.balance -= sum;

        Some((ids, sum - amount))
    }
}

/// The wallet a peer sends when introducing itself: public key and listening
/// address, nothing else.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletInfo {
    pub public_key: PubKey,
    pub address: String,
}

/// A read-only row of the ring for views and the `/ring` endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerView {
    pub id: usize,
    pub address: String,
    pub pubkey: String,
    pub balance: u64,
}

/// All known peers and their wallets, keyed by node id, with a reverse index
/// from public key to id. The node keeps two of these: one tracking every
/// validated transaction (mined or not) and one tracking only mined
/// transactions.
#[derive(Clone, Debug, Default)]
pub struct Ring {
    wallets: BTreeMap<usize, Wallet>,
    pubk2id: HashMap<PubKey, usize>,
}

impl Ring {
    pub fn insert(&mut self, id: usize, wallet: Wallet) {
        self.pubk2id.insert(wallet.pubkey.clone(), id);
        self.wallets.insert(id, wallet);
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Wallet> {
        self.wallets.get(&id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Wallet> {
        self.wallets.get_mut(&id)
    }

    pub fn id_of(&self, pubkey: &PubKey) -> Option<usize> {
        self.pubk2id.get(pubkey).copied()
    }

    pub fn wallet_of_mut(&mut self, pubkey: &PubKey) -> Option<&mut Wallet> {
        let id = self.id_of(pubkey)?;
        self.wallets.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Wallet)> {
        self.wallets.iter().map(|(id, wallet)| (*id, wallet))
    }

    /// Credit each output to its receiver's wallet. Returns `false` if any
    /// receiver is unknown to the ring; the caller treats that as an invalid
    /// transaction rather than dropping coins on the floor.
    pub fn credit_outputs(&mut self, outputs: &[TransactionOutput]) -> bool {
        if !outputs
            .iter()
            .all(|out| self.pubk2id.contains_key(&out.receiver_pubk))
        {
            return false;
        }

        for out in outputs {
            let wallet = self.wallet_of_mut(&out.receiver_pubk).unwrap();
            wallet.add_utxo(out.clone());
        }

        true
    }

    pub fn balances(&self) -> BTreeMap<usize, u64> {
        self.wallets
            .iter()
            .map(|(id, wallet)| (*id, wallet.balance()))
            .collect()
    }

    pub fn total_balance(&self) -> u64 {
        self.wallets.values().map(|w| w.balance()).sum()
    }

    /// Same peers, same keys and addresses, empty wallets. Used as the
    /// starting point for replaying a chain from genesis.
    pub fn fresh(&self) -> Ring {
        let mut out = Ring::default();
        for (id, wallet) in &self.wallets {
            out.insert(*id, Wallet::new(wallet.pubkey.clone(), wallet.address.clone()));
        }

        out
    }

    pub fn infos(&self) -> BTreeMap<usize, WalletInfo> {
        self.wallets
            .iter()
            .map(|(id, wallet)| (*id, wallet.info()))
            .collect()
    }

    pub fn views(&self) -> Vec<PeerView> {
        self.wallets
            .iter()
            .map(|(id, wallet)| PeerView {
                id: *id,
                address: wallet.address.clone(),
                pubkey: wallet.pubkey.fingerprint(),
                balance: wallet.balance(),
            })
            .collect()
    }
}

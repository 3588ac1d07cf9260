use std::error::Error;
use std::str::FromStr;

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{self, Serialize, SerializeStruct, Serializer};
use sha1::{Digest, Sha1};

/// Lowercase hex SHA-1 digest. Transaction ids and block hashes are kept in
/// this form because their only uses are equality tests, wallet keys, and the
/// proof-of-work inequality.
pub type HexDigest = String;

pub const KEY_BITS: usize = 2048;

pub fn sha1_bytes(data: &[u8]) -> [u8; 20] {
    let digest = Sha1::digest(data);
    let mut out = [0_u8; 20];
    out.copy_from_slice(&digest);

    out
}

pub fn sha1_hex(data: &[u8]) -> HexDigest {
    hex::encode(sha1_bytes(data))
}

/// An RSA public key as the pair `(n, e)`. Identity of a peer on the network
/// is exactly this pair, so equality and hashing are derived on it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PubKey {
    pub n: BigUint,
    pub e: BigUint,
}

impl PubKey {
    /// Verify a PKCS#1 v1.5 signature over a SHA-1 digest.
    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> bool {
        let key = match RsaPublicKey::new(self.n.clone(), self.e.clone()) {
            Ok(key) => key,
            Err(_) => return false,
        };

        key.verify(Pkcs1v15Sign::new::<Sha1>(), digest, signature)
            .is_ok()
    }

    /// Short fingerprint for log messages and views. Two distinct keys
    /// colliding here is harmless; the full `(n, e)` pair is authoritative.
    pub fn fingerprint(&self) -> String {
        sha1_hex(&self.n.to_bytes_be())[..8].to_string()
    }
}

impl std::fmt::Debug for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PubKey({})", self.fingerprint())
    }
}

// The modulus does not fit in any machine integer, but the wire form is
// `{n: int, e: int}`, so both components go through serde_json's
// arbitrary-precision numbers rather than strings.
impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PubKey", 2)?;
        state.serialize_field("n", &big_to_number(&self.n).map_err(ser::Error::custom)?)?;
        state.serialize_field("e", &big_to_number(&self.e).map_err(ser::Error::custom)?)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        struct RawPubKey {
            n: serde_json::Number,
            e: serde_json::Number,
        }

        let raw = RawPubKey::deserialize(deserializer)?;
        let n = BigUint::from_str(&raw.n.to_string()).map_err(de::Error::custom)?;
        let e = BigUint::from_str(&raw.e.to_string()).map_err(de::Error::custom)?;

        Ok(PubKey { n, e })
    }
}

fn big_to_number(value: &BigUint) -> Result<serde_json::Number, String> {
    serde_json::Number::from_str(&value.to_string())
        .map_err(|err| format!("bad integer literal: {}", err))
}

/// The sender field of a transaction: a real public key, or the integer `0`
/// for the genesis mint.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Sender {
    Genesis,
    Key(PubKey),
}

impl Sender {
    pub fn key(&self) -> Option<&PubKey> {
        match self {
            Sender::Genesis => None,
            Sender::Key(key) => Some(key),
        }
    }
}

impl Serialize for Sender {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Sender::Genesis => serializer.serialize_u64(0),
            Sender::Key(key) => key.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Sender {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;

        match value {
            serde_json::Value::Number(num) if num.to_string() == "0" => Ok(Sender::Genesis),
            serde_json::Value::Number(_) => Err(de::Error::custom("unknown sender constant")),
            other => serde_json::from_value(other)
                .map(Sender::Key)
                .map_err(de::Error::custom),
        }
    }
}

/// This node's RSA-2048 keypair. The private key never leaves this struct;
/// peers only ever see the `(n, e)` pair.
pub struct Keypair {
    private: RsaPrivateKey,
    public: PubKey,
}

impl Keypair {
    pub fn generate() -> Result<Self, Box<dyn Error>> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, KEY_BITS)?;
        let public = PubKey {
            n: private.n().clone(),
            e: private.e().clone(),
        };

        Ok(Keypair { private, public })
    }

    pub fn public(&self) -> &PubKey {
        &self.public
    }

    /// Sign a SHA-1 digest with PKCS#1 v1.5.
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, Box<dyn Error>> {
        let sig = self.private.sign(Pkcs1v15Sign::new::<Sha1>(), digest)?;

        Ok(sig)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .finish()
    }
}

use std::error::Error;
use std::fmt;

use crate::crypto::HexDigest;

pub type TxnVerifyResult<T> = std::result::Result<T, TxnVerifyError>;

pub type TxnVerifyError = Box<ErrorKind>;

/// Why an incoming transaction was rejected. Rejections are silent on the
/// network; these exist for the operator console and for tests.
#[derive(Debug, PartialEq, Eq)]
pub enum ErrorKind {
    BadSignature,
    DuplicateInputs(HexDigest),
    OutputIdMismatch(HexDigest),
    AmountOverflow,
    UnknownSender,
    UnknownReceiver,
    Mint,
    SpentOrUnknownInputs,
}

impl ErrorKind {
    fn as_str(&self) -> &str {
        match self {
            ErrorKind::BadSignature => "Signature does not verify under the sender key",
            ErrorKind::DuplicateInputs(_) => "Transaction consumes the same input twice",
            ErrorKind::OutputIdMismatch(_) => {
                "Transaction output does not carry the transaction id"
            }
            ErrorKind::AmountOverflow => "Transaction output amounts overflow",
            ErrorKind::UnknownSender => "Sender key does not belong to any known peer",
            ErrorKind::UnknownReceiver => "Output receiver does not belong to any known peer",
            ErrorKind::Mint => "Mint transactions are only valid inside the genesis block",
            ErrorKind::SpentOrUnknownInputs => {
                "Inputs are missing from the sender wallet or do not cover the outputs"
            }
        }
    }
}

impl Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::DuplicateInputs(id) => write!(fmt, "{}: input {}", self.as_str(), id),
            ErrorKind::OutputIdMismatch(id) => write!(fmt, "{}: output {}", self.as_str(), id),
            _ => write!(fmt, "{}", self.as_str()),
        }
    }
}

use std::error::Error;
use std::fmt;

use crate::crypto::HexDigest;

use super::txn_verify_error::TxnVerifyError;

pub type BlockVerifyResult<T> = std::result::Result<T, BlockVerifyError>;

pub type BlockVerifyError = Box<ErrorKind>;

#[derive(Debug)]
pub enum ErrorKind {
    FailedProofOfWork(HexDigest),
    Txn(TxnVerifyError, HexDigest),
}

impl Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::FailedProofOfWork(hash) => {
                write!(fmt, "Block hash {} does not satisfy proof of work", hash)
            }
            ErrorKind::Txn(err, id) => {
                write!(fmt, "Block contains invalid transaction {}: {}", id, err)
            }
        }
    }
}

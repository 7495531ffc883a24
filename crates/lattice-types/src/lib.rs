//! Shared wire types for the ledger: accounts, hashes, amounts, the block
//! model, and its binary and JSON encodings.

pub mod block;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod json;
pub mod numbers;

pub use block::{AirdropBlock, Block, Common, Opcode, RepresentativeBlock, TransactionBlock};
pub use error::{Error, Result};
pub use numbers::{now, Account, Amount, BlockHash, Height, Signature512, Timestamp};

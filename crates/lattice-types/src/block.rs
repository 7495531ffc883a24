//! The polymorphic block model (spec §3-4, §6.1). Dispatch is always by
//! matching on the [`Block`] tag, never by runtime type inspection, per
//! the "sealed visitor" guidance in spec §9.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::constants::{EXTENSIONS_MAX_LEN, TRANSACTIONS_PER_CREDIT};
use crate::error::{Error, Result};
use crate::numbers::{Account, Amount, BlockHash, Height, Signature512, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Send,
    Receive,
    Change,
    Credit,
    Reward,
    Destroy,
    Bind,
}

impl Opcode {
    pub fn tag(self) -> u8 {
        match self {
            Opcode::Send => 0,
            Opcode::Receive => 1,
            Opcode::Change => 2,
            Opcode::Credit => 3,
            Opcode::Reward => 4,
            Opcode::Destroy => 5,
            Opcode::Bind => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Opcode> {
        Ok(match tag {
            0 => Opcode::Send,
            1 => Opcode::Receive,
            2 => Opcode::Change,
            3 => Opcode::Credit,
            4 => Opcode::Reward,
            5 => Opcode::Destroy,
            6 => Opcode::Bind,
            other => return Err(Error::InvalidOpcode(other)),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::Send => "send",
            Opcode::Receive => "receive",
            Opcode::Change => "change",
            Opcode::Credit => "credit",
            Opcode::Reward => "reward",
            Opcode::Destroy => "destroy",
            Opcode::Bind => "bind",
        }
    }

    pub fn from_str(s: &str) -> Result<Opcode> {
        Ok(match s {
            "send" => Opcode::Send,
            "receive" => Opcode::Receive,
            "change" => Opcode::Change,
            "credit" => Opcode::Credit,
            "reward" => Opcode::Reward,
            "destroy" => Opcode::Destroy,
            "bind" => Opcode::Bind,
            _ => return Err(Error::InvalidMessage),
        })
    }
}

/// Fields common to every block variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Common {
    pub opcode: Opcode,
    pub credit: u16,
    pub counter: u32,
    pub timestamp: Timestamp,
    pub height: Height,
    pub account: Account,
    pub previous: BlockHash,
    pub balance: Amount,
    /// Polymorphic 32 bytes: destination account on `send`, source block
    /// hash otherwise.
    pub link: [u8; 32],
    pub signature: Signature512,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBlock {
    pub common: Common,
    pub representative: Account,
    pub extensions: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepresentativeBlock {
    pub common: Common,
    /// Only present when `opcode == Bind`.
    pub chain: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirdropBlock {
    pub common: Common,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Transaction(TransactionBlock),
    Representative(RepresentativeBlock),
    Airdrop(AirdropBlock),
}

impl Block {
    pub fn common(&self) -> &Common {
        match self {
            Block::Transaction(b) => &b.common,
            Block::Representative(b) => &b.common,
            Block::Airdrop(b) => &b.common,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.common().opcode
    }

    pub fn account(&self) -> Account {
        self.common().account
    }

    pub fn height(&self) -> Height {
        self.common().height
    }

    pub fn previous(&self) -> BlockHash {
        self.common().previous
    }

    pub fn balance(&self) -> Amount {
        self.common().balance
    }

    pub fn timestamp(&self) -> Timestamp {
        self.common().timestamp
    }

    pub fn signature(&self) -> Signature512 {
        self.common().signature
    }

    /// Representative the account delegates to, when this block's type
    /// carries one. `Representative` blocks other than the genesis-style
    /// `bind` variant also act as a change-of-representative in the
    /// reference implementation's sibling currencies, but in this
    /// subsystem only `Transaction` blocks carry the field (spec §3).
    pub fn representative(&self) -> Option<Account> {
        match self {
            Block::Transaction(b) => Some(b.representative),
            _ => None,
        }
    }

    /// Link interpreted as an account (valid on `send`).
    pub fn link_account(&self) -> Account {
        Account(self.common().link)
    }

    /// Link interpreted as a source block hash (valid on non-`send`
    /// opcodes).
    pub fn link_hash(&self) -> BlockHash {
        BlockHash(self.common().link)
    }

    /// Structural invariants that do not require chain context: credit,
    /// counter, and extensions length (spec §3 "Invariants on any
    /// well-formed block"). Height/timestamp/previous/balance/signature
    /// invariants require the account's chain state and are checked by
    /// the block processor.
    pub fn validate_structural(&self) -> Result<()> {
        let common = self.common();
        if common.credit < 1 {
            return Err(Error::InvalidCredit);
        }
        let max_counter = common.credit as u64 * TRANSACTIONS_PER_CREDIT as u64;
        if common.counter < 1 || common.counter as u64 > max_counter {
            return Err(Error::InvalidCounter);
        }
        if let Block::Transaction(b) = self {
            if b.extensions.len() as u32 > EXTENSIONS_MAX_LEN {
                return Err(Error::ExtensionsTooLong(
                    b.extensions.len() as u32,
                    EXTENSIONS_MAX_LEN,
                ));
            }
        }
        Ok(())
    }

    /// Checks the block's timestamp is non-decreasing relative to the
    /// previous block on the chain (`None` for a genesis block) and not
    /// more than [`crate::constants::MAX_FUTURE_TIMESTAMP_SECS`] beyond
    /// wall clock (spec §3 "Timestamp is non-decreasing ...").
    pub fn validate_timestamp(&self, previous_timestamp: Option<Timestamp>, now: Timestamp) -> Result<()> {
        if let Some(previous) = previous_timestamp {
            if self.timestamp() < previous {
                return Err(Error::TimestampDecreased);
            }
        }
        if self.timestamp() > now + crate::constants::MAX_FUTURE_TIMESTAMP_SECS {
            return Err(Error::TimestampInFuture);
        }
        Ok(())
    }

    /// Checks `balance_new < balance_prev` for `send`, per §3. Other
    /// opcodes have their own balance relationship enforced by the block
    /// processor's after-append hook, since they depend on the
    /// receivable/reward being applied, not just the two balances.
    pub fn validate_send_balance(&self, previous_balance: Amount) -> Result<()> {
        if self.opcode() == Opcode::Send && self.balance() >= previous_balance {
            return Err(Error::InvalidSendBalance);
        }
        Ok(())
    }

    pub fn verify_signature(&self) -> Result<()> {
        let hash = self.hash();
        let key = VerifyingKey::from_bytes(self.account().as_bytes())
            .map_err(|_| Error::InvalidSignature)?;
        let sig = Signature::from_bytes(self.signature().as_bytes());
        key.verify(hash.as_bytes(), &sig)
            .map_err(|_| Error::InvalidSignature)
    }

    /// BLAKE2b-256 of the block's fields excluding the signature (§3, §6.1).
    pub fn hash(&self) -> BlockHash {
        let mut buf = Vec::new();
        crate::encoding::write_hashable_fields(self, &mut buf);
        let digest = blake2b_simd::Params::new().hash_length(32).hash(&buf);
        let mut out = [0u8; 32];
        out.copy_from_slice(digest.as_bytes());
        BlockHash(out)
    }
}

// Account text encoding is modeled on the 5-bit-per-character base32
// scheme used by block-lattice currencies: a fixed alphabet, a trailing
// BLAKE2b-40 checksum folded into the encoded integer, then reversed so
// the checksum lands at the tail of the final string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::ACCOUNT_PREFIX;
use crate::error::{Error, Result};

const ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";

fn alphabet_index(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u8)
}

fn account_checksum(bytes: &[u8; 32]) -> [u8; 5] {
    let hash = blake2b_simd::Params::new().hash_length(5).hash(bytes);
    let mut out = [0u8; 5];
    out.copy_from_slice(hash.as_bytes());
    out
}

/// A 256-bit account identifier (an Ed25519 public key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Account(pub [u8; 32]);

impl Account {
    pub const ZERO: Account = Account([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encodes the account as `{ACCOUNT_PREFIX}` followed by 52
    /// base32 characters: 256 data bits + 40 checksum bits, 5 bits per
    /// character.
    pub fn encode(&self) -> String {
        let checksum = account_checksum(&self.0);

        // Treat account bytes ‖ checksum as one big-endian bit string and
        // emit it 5 bits at a time, most-significant group first.
        let mut bits: Vec<u8> = Vec::with_capacity(37 * 8);
        for byte in self.0.iter().chain(checksum.iter()) {
            for i in (0..8).rev() {
                bits.push((byte >> i) & 1);
            }
        }
        // 37 bytes = 296 bits; pad to a multiple of 5 at the front.
        let pad = (5 - (bits.len() % 5)) % 5;
        let mut padded = vec![0u8; pad];
        padded.extend_from_slice(&bits);

        let mut out = String::with_capacity(ACCOUNT_PREFIX.len() + padded.len() / 5);
        out.push_str(ACCOUNT_PREFIX);
        for chunk in padded.chunks(5) {
            let mut v = 0u8;
            for b in chunk {
                v = (v << 1) | b;
            }
            out.push(ALPHABET[v as usize] as char);
        }
        out
    }

    pub fn decode(text: &str) -> Result<Account> {
        let body = text
            .strip_prefix(ACCOUNT_PREFIX)
            .ok_or(Error::InvalidAccountEncoding)?;

        let mut bits: Vec<u8> = Vec::with_capacity(body.len() * 5);
        for c in body.bytes() {
            let v = alphabet_index(c).ok_or(Error::InvalidAccountEncoding)?;
            for i in (0..5).rev() {
                bits.push((v >> i) & 1);
            }
        }
        if bits.len() < 296 {
            return Err(Error::InvalidAccountEncoding);
        }
        // Drop the leading pad bits so the remainder is exactly 296 bits.
        let bits = &bits[bits.len() - 296..];

        let mut raw = [0u8; 37];
        for (i, chunk) in bits.chunks(8).enumerate() {
            let mut v = 0u8;
            for b in chunk {
                v = (v << 1) | b;
            }
            raw[i] = v;
        }

        let mut account = [0u8; 32];
        account.copy_from_slice(&raw[0..32]);
        let mut checksum = [0u8; 5];
        checksum.copy_from_slice(&raw[32..37]);

        if checksum != account_checksum(&account) {
            return Err(Error::InvalidAccountEncoding);
        }

        Ok(Account(account))
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({})", self.encode())
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Account {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Account::decode(s)
    }
}

impl Serialize for Account {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Account {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        Account::decode(&text).map_err(serde::de::Error::custom)
    }
}

macro_rules! hash_like {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn encode_hex(&self) -> String {
                hex::encode_upper(self.0)
            }

            pub fn decode_hex(s: &str) -> Result<Self> {
                let bytes = hex::decode(s).map_err(|_| Error::InvalidHexEncoding)?;
                if bytes.len() != $len {
                    return Err(Error::InvalidHexEncoding);
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(&bytes);
                Ok(Self(out))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.encode_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.encode_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.serialize_str(&self.encode_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
                let text = String::deserialize(d)?;
                Self::decode_hex(&text).map_err(serde::de::Error::custom)
            }
        }
    };
}

hash_like!(BlockHash, 32);
hash_like!(Signature512, 64);

/// 128-bit unsigned balance amount, big-endian on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Amount {
        Amount(u128::from_be_bytes(bytes))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        text.parse::<u128>()
            .map(Amount)
            .map_err(serde::de::Error::custom)
    }
}

/// Seconds-since-epoch. Signed so that election weight-factor arithmetic
/// (§4.3, `t - now`) never has to worry about unsigned underflow.
pub type Timestamp = i64;

/// Height along an account's chain. [`crate::constants::INVALID_HEIGHT`]
/// is reserved to mean "none".
pub type Height = u64;

/// Wall-clock seconds since the Unix epoch.
pub fn now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_round_trips() {
        let account = Account([7u8; 32]);
        let text = account.encode();
        assert!(text.starts_with(ACCOUNT_PREFIX));
        assert_eq!(Account::decode(&text).unwrap(), account);
    }

    #[test]
    fn account_rejects_bad_checksum() {
        let account = Account([9u8; 32]);
        let mut text = account.encode();
        // Flip the last character to corrupt the checksum.
        let last = text.pop().unwrap();
        let replacement = if last == ALPHABET[0] as char {
            ALPHABET[1] as char
        } else {
            ALPHABET[0] as char
        };
        text.push(replacement);
        assert!(Account::decode(&text).is_err());
    }

    #[test]
    fn hash_hex_round_trips() {
        let hash = BlockHash([0xAB; 32]);
        let hex = hash.encode_hex();
        assert_eq!(hex, hex.to_uppercase());
        assert_eq!(BlockHash::decode_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn amount_json_round_trips() {
        let amount = Amount(123_456_789_012_345_678_901_234_567_890u128);
        let json = serde_json::to_string(&amount).unwrap();
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(amount, back);
    }
}

//! Core value types shared by the steward
//!
//! Addresses, bounded weights, token amounts and the closed vote enumeration.
//! Everything here is validated at construction so the governance pipeline
//! never sees raw operator text.

use crate::error::AppError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("address pattern compiles"));

/// Proposal identifier, assigned by the ledger at submission.
pub type ProposalId = u64;

/// Ledger block height.
pub type BlockNumber = u64;

/// Upper bound on shares + loot the guild will ever hold (10^18).
pub const MAX_WEIGHT: u128 = 1_000_000_000_000_000_000;

// =============================================================================
// ADDRESS
// =============================================================================

/// A 20-byte ledger address, stored lowercase with its `0x` prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if !ADDRESS_RE.is_match(trimmed) {
            return Err(AppError::Validation(format!(
                "Invalid address '{}'. Expected 0x followed by 40 hex digits",
                raw
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// The all-zero address
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(40)))
    }

    /// Wrap a compile-time literal already in canonical form
    pub(crate) fn known(literal: &'static str) -> Self {
        debug_assert!(ADDRESS_RE.is_match(literal));
        Self(literal.to_ascii_lowercase())
    }

    /// Address whose low 8 bytes hold `value` (reserved accounts, fixtures)
    pub fn from_low_u64(value: u64) -> Self {
        Self(format!("0x{:040x}", value))
    }

    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identity that signs a mutating call, or on whose behalf a read is made.
///
/// Threaded through every operation instead of living in process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signer(Address);

impl Signer {
    pub fn new(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> &Address {
        &self.0
    }
}

impl fmt::Display for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// AMOUNTS AND WEIGHTS
// =============================================================================

/// Accepts either a decimal string or a plain JSON number
#[derive(Deserialize)]
#[serde(untagged)]
pub enum NumericRepr {
    Text(String),
    Number(u64),
}

impl NumericRepr {
    fn into_u128(self, what: &str) -> Result<u128, AppError> {
        match self {
            NumericRepr::Number(n) => Ok(n as u128),
            NumericRepr::Text(s) => s.trim().parse::<u128>().map_err(|_| {
                AppError::Validation(format!("Invalid {} '{}': expected a non-negative integer", what, s))
            }),
        }
    }
}

/// A token amount in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "NumericRepr", into = "String")]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<NumericRepr> for Amount {
    type Error = AppError;

    fn try_from(value: NumericRepr) -> Result<Self, Self::Error> {
        value.into_u128("amount").map(Amount)
    }
}

impl FromStr for Amount {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NumericRepr::Text(s.to_string()).try_into()
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.0.to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Voting or economic weight (shares, loot, vote tallies), bounded by [`MAX_WEIGHT`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "NumericRepr", into = "String")]
pub struct Weight(u128);

impl Weight {
    pub const ZERO: Weight = Weight(0);
    pub const ONE: Weight = Weight(1);

    pub fn new(value: u128) -> Result<Self, AppError> {
        if value > MAX_WEIGHT {
            return Err(AppError::Validation(format!(
                "Weight {} exceeds the maximum of {}",
                value, MAX_WEIGHT
            )));
        }
        Ok(Self(value))
    }

    pub const fn value(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<NumericRepr> for Weight {
    type Error = AppError;

    fn try_from(value: NumericRepr) -> Result<Self, Self::Error> {
        Weight::new(value.into_u128("weight")?)
    }
}

impl FromStr for Weight {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NumericRepr::Text(s.to_string()).try_into()
    }
}

impl From<Weight> for String {
    fn from(weight: Weight) -> Self {
        weight.0.to_string()
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// VOTE
// =============================================================================

/// A ballot. Anything other than yes/no is rejected before reaching the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum Vote {
    Yes,
    No,
}

impl Vote {
    /// Ledger encoding of the ballot
    pub fn as_u8(self) -> u8 {
        match self {
            Vote::Yes => 1,
            Vote::No => 2,
        }
    }
}

impl FromStr for Vote {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yes" => Ok(Vote::Yes),
            "no" => Ok(Vote::No),
            _ => Err(AppError::Validation(format!(
                "Invalid vote '{}'. It must be \"yes\" or \"no\"",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Vote {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Yes => write!(f, "yes"),
            Vote::No => write!(f, "no"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_vote_parsing_is_case_insensitive() {
        for raw in ["yes", "Yes", "YES", "yEs"] {
            assert_eq!(raw.parse::<Vote>().unwrap(), Vote::Yes);
        }
        for raw in ["no", "No", "NO"] {
            assert_eq!(raw.parse::<Vote>().unwrap(), Vote::No);
        }
    }

    #[test]
    fn test_vote_rejects_other_text() {
        for raw in ["", "y", "maybe", "abstain", "1", "nope", " yes", "no ", "\tYES\n", " yEs "] {
            assert!(matches!(raw.parse::<Vote>(), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn test_vote_encoding() {
        assert_eq!(Vote::Yes.as_u8(), 1);
        assert_eq!(Vote::No.as_u8(), 2);
    }

    #[test]
    fn test_address_is_normalized() {
        let address = Address::parse("0x9Fd6b308b593Ba02a5DbCfEF0F30fbBcA8B79B91").unwrap();
        assert_eq!(address.as_str(), "0x9fd6b308b593ba02a5dbcfef0f30fbbca8b79b91");
        assert!(!address.is_zero());
        assert!(Address::zero().is_zero());
    }

    #[test]
    fn test_invalid_address() {
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("9fd6b308b593ba02a5dbcfef0f30fbbca8b79b91").is_err());
        assert!(Address::parse("0xzzd6b308b593ba02a5dbcfef0f30fbbca8b79b91").is_err());
    }

    #[test]
    fn test_weight_is_bounded() {
        assert!(Weight::new(MAX_WEIGHT).is_ok());
        assert!(Weight::new(MAX_WEIGHT + 1).is_err());
        assert!("-3".parse::<Weight>().is_err());
    }

    #[test]
    fn test_amount_accepts_strings_and_numbers() {
        let from_text: Amount = serde_json::from_str("\"340282366920938463463374607431768211455\"").unwrap();
        assert_eq!(from_text.value(), u128::MAX);

        let from_number: Amount = serde_json::from_str("42").unwrap();
        assert_eq!(from_number, Amount::new(42));
        assert_eq!(serde_json::to_string(&from_number).unwrap(), "\"42\"");
    }
}

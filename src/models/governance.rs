//! Governance request and response bodies

use crate::types::{Address, Amount, BlockNumber, Weight};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to propose whitelisting a token
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistRequest {
    pub token: Address,
    #[validate(length(max = 4096, message = "Details must be at most 4096 characters"))]
    #[serde(default)]
    pub details: String,
}

/// Request to propose kicking a member
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GuildKickRequest {
    pub member: Address,
    #[validate(length(max = 4096, message = "Details must be at most 4096 characters"))]
    #[serde(default)]
    pub details: String,
}

/// Ballot as typed by the operator; parsed case-insensitively
#[derive(Debug, Deserialize, Validate)]
pub struct VoteRequest {
    #[validate(length(min = 1, message = "Vote is required"))]
    pub vote: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagequitRequest {
    #[serde(default)]
    pub shares_to_burn: Weight,
    #[serde(default)]
    pub loot_to_burn: Weight,
}

#[derive(Debug, Deserialize)]
pub struct RagekickRequest {
    pub member: Address,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateRequest {
    pub new_delegate_key: Address,
}

/// Withdrawal of an internal balance, in base units
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub token: Address,
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct CollectRequest {
    pub token: Address,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: u64,
    #[validate(range(min = 1, max = 1000, message = "Limit must be between 1 and 1000"))]
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersQuery {
    pub from_block: Option<BlockNumber>,
}

/// Custody diagnostics for one holder; `amount` defaults to the proposal deposit
#[derive(Debug, Deserialize)]
pub struct EscrowQuery {
    pub token: Option<Address>,
    pub holder: Address,
    pub amount: Option<Amount>,
}

/// Snapshot of the guild's headline parameters
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaoInfo {
    pub network: String,
    pub ledger_address: Address,
    pub proposal_deposit: Amount,
    pub deposit_token: Address,
    pub proposal_count: u64,
    pub block_number: BlockNumber,
}

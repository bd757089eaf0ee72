//! Ledger collaborator surface
//!
//! The deployed guild contract and the tokens it escrows are authoritative.
//! The steward only talks to them through the two traits below, so the
//! governance pipeline can run against any transport that implements them.

pub mod memory;

pub use memory::{InMemoryLedger, SimulationParams};

use crate::types::{Address, Amount, BlockNumber, ProposalId, Signer, Vote, Weight};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Failure reported by a ledger or token collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The call reached the ledger and was reverted; the reason is verbatim
    #[error("{0}")]
    Reverted(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// =============================================================================
// RECORDS
// =============================================================================

/// Status flags of a proposal as stored on the ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalFlags {
    pub sponsored: bool,
    pub processed: bool,
    pub did_pass: bool,
    pub cancelled: bool,
    pub whitelist: bool,
    pub guild_kick: bool,
}

/// What a proposal asks the guild to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    Standard,
    Whitelist,
    GuildKick,
}

/// A proposal record fetched by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    pub id: ProposalId,
    pub applicant: Address,
    pub proposer: Address,
    pub sponsor: Option<Address>,
    pub shares_requested: Weight,
    pub loot_requested: Weight,
    pub tribute_offered: Amount,
    pub tribute_token: Address,
    pub payment_requested: Amount,
    pub payment_token: Address,
    pub starting_period: u64,
    pub yes_votes: Weight,
    pub no_votes: Weight,
    pub details: String,
    pub flags: ProposalFlags,
}

impl ProposalRecord {
    pub fn kind(&self) -> ProposalKind {
        if self.flags.whitelist {
            ProposalKind::Whitelist
        } else if self.flags.guild_kick {
            ProposalKind::GuildKick
        } else {
            ProposalKind::Standard
        }
    }
}

/// A member record fetched by address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub delegate_key: Address,
    pub shares: Weight,
    pub loot: Weight,
    pub exists: bool,
    pub highest_index_yes_vote: u64,
    pub jailed: bool,
}

impl MemberRecord {
    /// The record the ledger returns for an address that never joined
    pub fn absent() -> Self {
        Self {
            delegate_key: Address::zero(),
            shares: Weight::ZERO,
            loot: Weight::ZERO,
            exists: false,
            highest_index_yes_vote: 0,
            jailed: false,
        }
    }
}

/// Parameters of a standard membership/funding proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSubmission {
    pub applicant: Address,
    #[serde(default)]
    pub shares_requested: Weight,
    #[serde(default)]
    pub loot_requested: Weight,
    #[serde(default)]
    pub tribute_offered: Amount,
    pub tribute_token: Address,
    #[serde(default)]
    pub payment_requested: Amount,
    pub payment_token: Address,
    #[validate(length(max = 4096, message = "Details must be at most 4096 characters"))]
    #[serde(default)]
    pub details: String,
}

/// Amount of one token moved by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAmount {
    pub token: Address,
    pub amount: Amount,
}

// =============================================================================
// EVENTS AND RECEIPTS
// =============================================================================

/// Events emitted by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LedgerEvent {
    #[serde(rename_all = "camelCase")]
    SubmitProposal {
        proposal_id: ProposalId,
        applicant: Address,
        member_address: Address,
    },
    #[serde(rename_all = "camelCase")]
    SponsorProposal {
        delegate_key: Address,
        member_address: Address,
        proposal_id: ProposalId,
        proposal_index: u64,
        starting_period: u64,
    },
    #[serde(rename_all = "camelCase")]
    SubmitVote {
        proposal_id: ProposalId,
        proposal_index: u64,
        delegate_key: Address,
        member_address: Address,
        vote: Vote,
    },
    #[serde(rename_all = "camelCase")]
    ProcessProposal {
        proposal_index: u64,
        proposal_id: ProposalId,
        did_pass: bool,
    },
    #[serde(rename_all = "camelCase")]
    ProcessWhitelistProposal {
        proposal_index: u64,
        proposal_id: ProposalId,
        did_pass: bool,
    },
    #[serde(rename_all = "camelCase")]
    ProcessGuildKickProposal {
        proposal_index: u64,
        proposal_id: ProposalId,
        did_pass: bool,
    },
    #[serde(rename_all = "camelCase")]
    Ragequit {
        member_address: Address,
        shares_to_burn: Weight,
        loot_to_burn: Weight,
        returned: Vec<TokenAmount>,
    },
    #[serde(rename_all = "camelCase")]
    TokensCollected { token: Address, amount_to_collect: Amount },
    #[serde(rename_all = "camelCase")]
    CancelProposal {
        proposal_id: ProposalId,
        applicant_address: Address,
    },
    #[serde(rename_all = "camelCase")]
    UpdateDelegateKey {
        member_address: Address,
        new_delegate_key: Address,
    },
    #[serde(rename_all = "camelCase")]
    Withdraw {
        member_address: Address,
        token: Address,
        amount: Amount,
    },
    #[serde(rename_all = "camelCase")]
    Approval {
        token: Address,
        owner: Address,
        spender: Address,
        amount: Amount,
    },
}

/// Event discriminant used to filter the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    SubmitProposal,
    SponsorProposal,
    SubmitVote,
    ProcessProposal,
    ProcessWhitelistProposal,
    ProcessGuildKickProposal,
    Ragequit,
    TokensCollected,
    CancelProposal,
    UpdateDelegateKey,
    Withdraw,
    Approval,
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::SubmitProposal { .. } => EventKind::SubmitProposal,
            LedgerEvent::SponsorProposal { .. } => EventKind::SponsorProposal,
            LedgerEvent::SubmitVote { .. } => EventKind::SubmitVote,
            LedgerEvent::ProcessProposal { .. } => EventKind::ProcessProposal,
            LedgerEvent::ProcessWhitelistProposal { .. } => EventKind::ProcessWhitelistProposal,
            LedgerEvent::ProcessGuildKickProposal { .. } => EventKind::ProcessGuildKickProposal,
            LedgerEvent::Ragequit { .. } => EventKind::Ragequit,
            LedgerEvent::TokensCollected { .. } => EventKind::TokensCollected,
            LedgerEvent::CancelProposal { .. } => EventKind::CancelProposal,
            LedgerEvent::UpdateDelegateKey { .. } => EventKind::UpdateDelegateKey,
            LedgerEvent::Withdraw { .. } => EventKind::Withdraw,
            LedgerEvent::Approval { .. } => EventKind::Approval,
        }
    }
}

/// An event as it sits in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedEvent {
    pub block_number: BlockNumber,
    pub tx_hash: String,
    pub event: LedgerEvent,
}

/// Inclusive block range query over one event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub kind: EventKind,
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
}

/// Confirmation that a mutating call was included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: String,
    pub block_number: BlockNumber,
    pub events: Vec<LedgerEvent>,
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// Standard escrow primitives of a fungible token
#[async_trait]
pub trait TokenGateway: Send + Sync {
    async fn balance_of(&self, token: &Address, holder: &Address) -> LedgerResult<Amount>;

    async fn allowance(
        &self,
        token: &Address,
        holder: &Address,
        spender: &Address,
    ) -> LedgerResult<Amount>;

    /// Set `spender`'s allowance over the signer's tokens to `amount`
    async fn approve(
        &self,
        token: &Address,
        signer: &Signer,
        spender: &Address,
        amount: Amount,
    ) -> LedgerResult<Receipt>;
}

/// The deployed guild contract.
///
/// Every mutating method blocks until the call is included and returns its
/// receipt, or the revert reason.
#[async_trait]
pub trait DaoGateway: Send + Sync {
    /// Address of the contract, i.e. the spender for every escrow
    fn address(&self) -> &Address;

    async fn proposal_deposit(&self) -> LedgerResult<Amount>;

    async fn deposit_token(&self) -> LedgerResult<Address>;

    async fn proposal_count(&self) -> LedgerResult<u64>;

    async fn proposal(&self, id: ProposalId) -> LedgerResult<ProposalRecord>;

    async fn member(&self, address: &Address) -> LedgerResult<MemberRecord>;

    /// Internal (guild-held) balance credited to a member
    async fn user_token_balance(&self, member: &Address, token: &Address) -> LedgerResult<Amount>;

    async fn block_number(&self) -> LedgerResult<BlockNumber>;

    async fn events(&self, filter: &EventFilter) -> LedgerResult<Vec<LoggedEvent>>;

    async fn submit_proposal(
        &self,
        signer: &Signer,
        submission: &ProposalSubmission,
    ) -> LedgerResult<Receipt>;

    async fn submit_whitelist_proposal(
        &self,
        signer: &Signer,
        token: &Address,
        details: &str,
    ) -> LedgerResult<Receipt>;

    async fn submit_guild_kick_proposal(
        &self,
        signer: &Signer,
        member: &Address,
        details: &str,
    ) -> LedgerResult<Receipt>;

    async fn sponsor_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt>;

    async fn submit_vote(&self, signer: &Signer, id: ProposalId, vote: Vote) -> LedgerResult<Receipt>;

    async fn process_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt>;

    async fn process_whitelist_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt>;

    async fn process_guild_kick_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt>;

    async fn cancel_proposal(&self, signer: &Signer, id: ProposalId) -> LedgerResult<Receipt>;

    async fn ragequit(&self, signer: &Signer, shares: Weight, loot: Weight) -> LedgerResult<Receipt>;

    async fn ragekick(&self, signer: &Signer, member: &Address) -> LedgerResult<Receipt>;

    async fn update_delegate_key(&self, signer: &Signer, new_delegate: &Address) -> LedgerResult<Receipt>;

    async fn withdraw_balance(&self, signer: &Signer, token: &Address, amount: Amount) -> LedgerResult<Receipt>;

    async fn collect_tokens(&self, signer: &Signer, token: &Address) -> LedgerResult<Receipt>;
}

//! Lifecycle command dispatch
//!
//! One method per governance action. Each sends exactly one mutating call to
//! the ledger and decodes the receipt into a typed outcome. Reverts surface
//! as `AppError::LedgerRejection` with the ledger's reason untouched.

use crate::error::AppError;
use crate::ledger::{DaoGateway, LedgerEvent, ProposalSubmission, Receipt, TokenAmount};
use crate::types::{Address, Amount, BlockNumber, ProposalId, Signer, Vote, Weight};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Inclusion proof for a fire-and-confirm action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutcome {
    pub tx_hash: String,
    pub block_number: BlockNumber,
}

impl From<&Receipt> for TxOutcome {
    fn from(receipt: &Receipt) -> Self {
        Self {
            tx_hash: receipt.tx_hash.clone(),
            block_number: receipt.block_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedProposal {
    pub proposal_id: ProposalId,
    #[serde(flatten)]
    pub tx: TxOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredProposal {
    pub delegate_key: Address,
    pub member_address: Address,
    pub proposal_id: ProposalId,
    pub queue_index: u64,
    pub starting_period: u64,
    #[serde(flatten)]
    pub tx: TxOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagequitOutcome {
    pub member_address: Address,
    pub shares_burned: Weight,
    pub loot_burned: Weight,
    /// Tokens credited to the member's internal balance
    pub returned: Vec<TokenAmount>,
    #[serde(flatten)]
    pub tx: TxOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectOutcome {
    pub token: Address,
    pub amount_collected: Amount,
    #[serde(flatten)]
    pub tx: TxOutcome,
}

fn missing_event(action: &str, event: &str) -> AppError {
    AppError::Internal(format!("{} receipt carries no {} event", action, event))
}

/// Log and convert a gateway failure
fn rejected(action: &str, err: crate::ledger::LedgerError) -> AppError {
    warn!("⛔ {} rejected by the ledger: {}", action, err);
    err.into()
}

fn decode_submitted(action: &str, receipt: &Receipt) -> Result<SubmittedProposal, AppError> {
    receipt
        .events
        .iter()
        .find_map(|event| match event {
            LedgerEvent::SubmitProposal { proposal_id, .. } => Some(*proposal_id),
            _ => None,
        })
        .map(|proposal_id| SubmittedProposal {
            proposal_id,
            tx: receipt.into(),
        })
        .ok_or_else(|| missing_event(action, "SubmitProposal"))
}

fn decode_ragequit(action: &str, receipt: &Receipt) -> Result<RagequitOutcome, AppError> {
    receipt
        .events
        .iter()
        .find_map(|event| match event {
            LedgerEvent::Ragequit {
                member_address,
                shares_to_burn,
                loot_to_burn,
                returned,
            } => Some(RagequitOutcome {
                member_address: member_address.clone(),
                shares_burned: *shares_to_burn,
                loot_burned: *loot_to_burn,
                returned: returned.clone(),
                tx: receipt.into(),
            }),
            _ => None,
        })
        .ok_or_else(|| missing_event(action, "Ragequit"))
}

/// Maps each governance action onto its ledger call
#[derive(Clone)]
pub struct CommandDispatcher {
    dao: Arc<dyn DaoGateway>,
}

impl CommandDispatcher {
    pub fn new(dao: Arc<dyn DaoGateway>) -> Self {
        Self { dao }
    }

    pub async fn submit(
        &self,
        signer: &Signer,
        submission: &ProposalSubmission,
    ) -> Result<SubmittedProposal, AppError> {
        let receipt = self
            .dao
            .submit_proposal(signer, submission)
            .await
            .map_err(|e| rejected("submitProposal", e))?;
        let outcome = decode_submitted("submitProposal", &receipt)?;
        info!(
            "📨 Proposal {} submitted by {} for applicant {}",
            outcome.proposal_id, signer, submission.applicant
        );
        Ok(outcome)
    }

    pub async fn submit_whitelist(
        &self,
        signer: &Signer,
        token: &Address,
        details: &str,
    ) -> Result<SubmittedProposal, AppError> {
        let receipt = self
            .dao
            .submit_whitelist_proposal(signer, token, details)
            .await
            .map_err(|e| rejected("submitWhitelistProposal", e))?;
        let outcome = decode_submitted("submitWhitelistProposal", &receipt)?;
        info!("📨 Whitelist proposal {} submitted for token {}", outcome.proposal_id, token);
        Ok(outcome)
    }

    pub async fn submit_guild_kick(
        &self,
        signer: &Signer,
        member: &Address,
        details: &str,
    ) -> Result<SubmittedProposal, AppError> {
        let receipt = self
            .dao
            .submit_guild_kick_proposal(signer, member, details)
            .await
            .map_err(|e| rejected("submitGuildKickProposal", e))?;
        let outcome = decode_submitted("submitGuildKickProposal", &receipt)?;
        info!("📨 Guild kick proposal {} submitted against {}", outcome.proposal_id, member);
        Ok(outcome)
    }

    pub async fn sponsor(&self, signer: &Signer, id: ProposalId) -> Result<SponsoredProposal, AppError> {
        let receipt = self
            .dao
            .sponsor_proposal(signer, id)
            .await
            .map_err(|e| rejected("sponsorProposal", e))?;
        let outcome = receipt
            .events
            .iter()
            .find_map(|event| match event {
                LedgerEvent::SponsorProposal {
                    delegate_key,
                    member_address,
                    proposal_id,
                    proposal_index,
                    starting_period,
                } => Some(SponsoredProposal {
                    delegate_key: delegate_key.clone(),
                    member_address: member_address.clone(),
                    proposal_id: *proposal_id,
                    queue_index: *proposal_index,
                    starting_period: *starting_period,
                    tx: (&receipt).into(),
                }),
                _ => None,
            })
            .ok_or_else(|| missing_event("sponsorProposal", "SponsorProposal"))?;
        info!(
            "🤝 Proposal {} sponsored by {} (queue index {}, starting period {})",
            outcome.proposal_id, outcome.member_address, outcome.queue_index, outcome.starting_period
        );
        Ok(outcome)
    }

    pub async fn vote(&self, signer: &Signer, id: ProposalId, vote: Vote) -> Result<TxOutcome, AppError> {
        let receipt = self
            .dao
            .submit_vote(signer, id, vote)
            .await
            .map_err(|e| rejected("submitVote", e))?;
        info!("🗳️  {} voted {} ({}) on proposal {}", signer, vote, vote.as_u8(), id);
        Ok((&receipt).into())
    }

    pub async fn process(&self, signer: &Signer, id: ProposalId) -> Result<TxOutcome, AppError> {
        let receipt = self
            .dao
            .process_proposal(signer, id)
            .await
            .map_err(|e| rejected("processProposal", e))?;
        info!("⚙️  Proposal {} processed", id);
        Ok((&receipt).into())
    }

    pub async fn process_whitelist(&self, signer: &Signer, id: ProposalId) -> Result<TxOutcome, AppError> {
        let receipt = self
            .dao
            .process_whitelist_proposal(signer, id)
            .await
            .map_err(|e| rejected("processWhitelistProposal", e))?;
        info!("⚙️  Whitelist proposal {} processed", id);
        Ok((&receipt).into())
    }

    pub async fn process_guild_kick(&self, signer: &Signer, id: ProposalId) -> Result<TxOutcome, AppError> {
        let receipt = self
            .dao
            .process_guild_kick_proposal(signer, id)
            .await
            .map_err(|e| rejected("processGuildKickProposal", e))?;
        info!("⚙️  Guild kick proposal {} processed", id);
        Ok((&receipt).into())
    }

    pub async fn cancel(&self, signer: &Signer, id: ProposalId) -> Result<TxOutcome, AppError> {
        let receipt = self
            .dao
            .cancel_proposal(signer, id)
            .await
            .map_err(|e| rejected("cancelProposal", e))?;
        info!("🚫 Proposal {} cancelled", id);
        Ok((&receipt).into())
    }

    pub async fn ragequit(&self, signer: &Signer, shares: Weight, loot: Weight) -> Result<RagequitOutcome, AppError> {
        let receipt = self
            .dao
            .ragequit(signer, shares, loot)
            .await
            .map_err(|e| rejected("ragequit", e))?;
        info!("🔥 {} burned {} shares and {} loot", signer, shares, loot);
        decode_ragequit("ragequit", &receipt)
    }

    pub async fn ragekick(&self, signer: &Signer, member: &Address) -> Result<RagequitOutcome, AppError> {
        let receipt = self
            .dao
            .ragekick(signer, member)
            .await
            .map_err(|e| rejected("ragekick", e))?;
        info!("🥾 Member {} ragekicked by {}", member, signer);
        decode_ragequit("ragekick", &receipt)
    }

    pub async fn update_delegate(&self, signer: &Signer, new_delegate: &Address) -> Result<TxOutcome, AppError> {
        let receipt = self
            .dao
            .update_delegate_key(signer, new_delegate)
            .await
            .map_err(|e| rejected("updateDelegateKey", e))?;
        info!("🔑 Delegate of {} updated to {}", signer, new_delegate);
        Ok((&receipt).into())
    }

    pub async fn withdraw(&self, signer: &Signer, token: &Address, amount: Amount) -> Result<TxOutcome, AppError> {
        let receipt = self
            .dao
            .withdraw_balance(signer, token, amount)
            .await
            .map_err(|e| rejected("withdrawBalance", e))?;
        info!("💸 {} of {} withdrawn by {}", amount, token, signer);
        Ok((&receipt).into())
    }

    pub async fn collect(&self, signer: &Signer, token: &Address) -> Result<CollectOutcome, AppError> {
        let receipt = self
            .dao
            .collect_tokens(signer, token)
            .await
            .map_err(|e| rejected("collectTokens", e))?;
        let amount_collected = receipt
            .events
            .iter()
            .find_map(|event| match event {
                LedgerEvent::TokensCollected { amount_to_collect, .. } => Some(*amount_to_collect),
                _ => None,
            })
            .ok_or_else(|| missing_event("collectTokens", "TokensCollected"))?;
        info!("🧺 Collected {} of {} into the guild bank", amount_collected, token);
        Ok(CollectOutcome {
            token: token.clone(),
            amount_collected,
            tx: (&receipt).into(),
        })
    }
}

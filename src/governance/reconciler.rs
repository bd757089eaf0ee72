//! Lifecycle state reconciliation
//!
//! The ledger keeps no queryable index of members or proposal history, so the
//! read model is rebuilt on demand: proposals by a bounded scan over ids,
//! members by replaying processed-proposal events over a block range. Nothing
//! here writes to the ledger or caches between calls.

use crate::error::AppError;
use crate::ledger::{DaoGateway, EventFilter, EventKind, LedgerEvent, MemberRecord, ProposalRecord};
use crate::types::{Address, Amount, BlockNumber, ProposalId, Weight};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One page of the proposal sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalPage {
    pub total: u64,
    pub offset: u64,
    pub proposals: Vec<ProposalRecord>,
}

/// Lazy, restartable walk over proposals in id order
pub struct ProposalCursor {
    dao: Arc<dyn DaoGateway>,
    next: u64,
    page_size: u64,
    seen_total: u64,
}

impl ProposalCursor {
    /// Id of the next proposal this cursor will fetch; feed it back to `resume`
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Proposal count observed by the last fetch
    pub fn seen_total(&self) -> u64 {
        self.seen_total
    }

    /// Fetch the next page, or `None` once the ledger's current count is reached
    pub async fn next_page(&mut self) -> Result<Option<Vec<ProposalRecord>>, AppError> {
        let total = self.dao.proposal_count().await?;
        self.seen_total = total;
        if self.next >= total {
            return Ok(None);
        }
        let end = (self.next + self.page_size).min(total);
        let mut proposals = Vec::with_capacity((end - self.next) as usize);
        for id in self.next..end {
            proposals.push(self.dao.proposal(id).await?);
        }
        self.next = end;
        Ok(Some(proposals))
    }
}

/// A processed proposal that passed, as read from the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassedProposal {
    pub proposal_id: ProposalId,
    pub proposal_index: u64,
    pub block_number: BlockNumber,
}

/// Current state of one member admitted by a passing proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    pub address: Address,
    pub delegate_key: Address,
    pub shares: Weight,
    pub loot: Weight,
    pub exists: bool,
    pub jailed: bool,
    /// Internal balance of the tribute token of the first granting proposal
    pub balance_token: Address,
    pub token_balance: Amount,
    /// Passing proposals that named this address as applicant, in ledger order
    pub granted_by: Vec<ProposalId>,
}

/// The reconstructed membership and the range it was replayed over
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipView {
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
    pub passed: Vec<PassedProposal>,
    pub members: Vec<MemberSnapshot>,
}

/// Rebuilds the proposal and membership read model from the ledger
#[derive(Clone)]
pub struct StateReconciler {
    dao: Arc<dyn DaoGateway>,
    page_size: u64,
    scan_window: u64,
    checkpoint: BlockNumber,
}

impl StateReconciler {
    pub fn new(dao: Arc<dyn DaoGateway>, page_size: u64, scan_window: u64, checkpoint: BlockNumber) -> Self {
        Self {
            dao,
            page_size: page_size.max(1),
            scan_window: scan_window.max(1),
            checkpoint,
        }
    }

    /// A cursor starting at proposal id `position`
    pub fn resume(&self, position: u64) -> ProposalCursor {
        ProposalCursor {
            dao: self.dao.clone(),
            next: position,
            page_size: self.page_size,
            seen_total: 0,
        }
    }

    /// Every proposal from `offset` to count - 1, fetched one cursor page at a time
    pub async fn list_proposals(&self, offset: u64) -> Result<ProposalPage, AppError> {
        let mut cursor = self.resume(offset);
        let mut proposals = Vec::new();
        while let Some(page) = cursor.next_page().await? {
            proposals.extend(page);
        }
        debug!("Listed proposals {}..{}", offset, cursor.position());
        Ok(ProposalPage {
            total: cursor.seen_total(),
            offset,
            proposals,
        })
    }

    /// Proposals `offset..offset + limit`, clamped to the current count
    pub async fn proposals_page(&self, offset: u64, limit: u64) -> Result<ProposalPage, AppError> {
        let total = self.dao.proposal_count().await?;
        let end = offset.saturating_add(limit).min(total);
        let mut proposals = Vec::new();
        for id in offset..end {
            proposals.push(self.dao.proposal(id).await?);
        }
        Ok(ProposalPage {
            total,
            offset,
            proposals,
        })
    }

    pub async fn proposal(&self, id: ProposalId) -> Result<ProposalRecord, AppError> {
        let total = self.dao.proposal_count().await?;
        if id >= total {
            return Err(AppError::NotFound(format!("Proposal {} not found", id)));
        }
        Ok(self.dao.proposal(id).await?)
    }

    pub async fn member(&self, address: &Address) -> Result<MemberRecord, AppError> {
        Ok(self.dao.member(address).await?)
    }

    /// Replay processed-proposal events between `from_block` and the tip,
    /// keeping those that passed
    pub async fn passed_proposals(&self, from_block: BlockNumber, to_block: BlockNumber) -> Result<Vec<PassedProposal>, AppError> {
        let mut passed = Vec::new();
        let mut start = from_block;
        while start <= to_block {
            let end = start.saturating_add(self.scan_window - 1).min(to_block);
            debug!("Scanning ProcessProposal events in blocks {}..={}", start, end);
            let filter = EventFilter {
                kind: EventKind::ProcessProposal,
                from_block: start,
                to_block: end,
            };
            for logged in self.dao.events(&filter).await? {
                if let LedgerEvent::ProcessProposal {
                    proposal_index,
                    proposal_id,
                    did_pass: true,
                } = logged.event
                {
                    passed.push(PassedProposal {
                        proposal_id,
                        proposal_index,
                        block_number: logged.block_number,
                    });
                }
            }
            if end == BlockNumber::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(passed)
    }

    /// Rebuild current membership from passing proposals.
    ///
    /// `from_block` overrides the configured checkpoint.
    pub async fn list_members(&self, from_block: Option<BlockNumber>) -> Result<MembershipView, AppError> {
        let from_block = from_block.unwrap_or(self.checkpoint);
        let to_block = self.dao.block_number().await?;
        let passed = self.passed_proposals(from_block, to_block).await?;

        let mut members: Vec<MemberSnapshot> = Vec::new();
        let mut seen: HashMap<Address, usize> = HashMap::new();
        for entry in &passed {
            let proposal = self.dao.proposal(entry.proposal_id).await?;
            if let Some(position) = seen.get(&proposal.applicant) {
                members[*position].granted_by.push(entry.proposal_id);
                continue;
            }

            let record = self.dao.member(&proposal.applicant).await?;
            let token_balance = self
                .dao
                .user_token_balance(&proposal.applicant, &proposal.tribute_token)
                .await?;
            seen.insert(proposal.applicant.clone(), members.len());
            members.push(MemberSnapshot {
                address: proposal.applicant.clone(),
                delegate_key: record.delegate_key,
                shares: record.shares,
                loot: record.loot,
                exists: record.exists,
                jailed: record.jailed,
                balance_token: proposal.tribute_token.clone(),
                token_balance,
                granted_by: vec![entry.proposal_id],
            });
        }

        debug!(
            "Rebuilt {} members from {} passing proposals in blocks {}..={}",
            members.len(),
            passed.len(),
            from_block,
            to_block
        );
        Ok(MembershipView {
            from_block,
            to_block,
            passed,
            members,
        })
    }
}

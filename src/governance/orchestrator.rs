//! Proposal orchestration
//!
//! Multi-step workflows where one call's success is the precondition for the
//! next. All local checks are advisory: the ledger may change between read
//! and write, in which case the final call simply reverts.

use crate::error::AppError;
use crate::governance::dispatcher::{
    CollectOutcome, CommandDispatcher, RagequitOutcome, SponsoredProposal, SubmittedProposal, TxOutcome,
};
use crate::governance::escrow::EscrowValidator;
use crate::ledger::{DaoGateway, ProposalSubmission};
use crate::types::{Address, Amount, ProposalId, Signer, Vote, Weight};
use std::sync::Arc;
use tracing::{info, warn};

/// Drives governance actions through validation and dispatch
#[derive(Clone)]
pub struct ProposalOrchestrator {
    dao: Arc<dyn DaoGateway>,
    escrow: EscrowValidator,
    dispatcher: CommandDispatcher,
}

impl ProposalOrchestrator {
    pub fn new(dao: Arc<dyn DaoGateway>, escrow: EscrowValidator, dispatcher: CommandDispatcher) -> Self {
        Self {
            dao,
            escrow,
            dispatcher,
        }
    }

    /// Submit a proposal after making sure the proposer can cover the deposit
    /// and the applicant has escrowed the tribute.
    ///
    /// A missing deposit allowance is raised for the proposer before the
    /// tribute is checked. The applicant's tribute allowance is never touched
    /// since it is someone else's custody.
    pub async fn submit_with_escrow(
        &self,
        proposer: &Signer,
        submission: &ProposalSubmission,
    ) -> Result<SubmittedProposal, AppError> {
        let spender = self.dao.address().clone();
        let deposit = self.dao.proposal_deposit().await?;
        let deposit_token = self.dao.deposit_token().await?;

        if !self
            .escrow
            .has_enough_balance(&deposit_token, proposer.address(), deposit)
            .await?
        {
            warn!("Proposer {} cannot pay the deposit", proposer);
            return Err(self.funds_shortfall(&deposit_token, proposer.address(), deposit).await?);
        }

        if !self
            .escrow
            .has_enough_allowance(&deposit_token, proposer.address(), &spender, deposit)
            .await?
        {
            info!("Deposit allowance of {} is below {}, raising it", proposer, deposit);
            self.escrow
                .raise_allowance(&deposit_token, proposer, &spender, deposit)
                .await?;
        }

        if !submission.tribute_offered.is_zero() {
            self.check_tribute(submission, &spender).await?;
        }

        self.dispatcher.submit(proposer, submission).await
    }

    async fn check_tribute(&self, submission: &ProposalSubmission, spender: &Address) -> Result<(), AppError> {
        let token = &submission.tribute_token;
        let applicant = &submission.applicant;
        let tribute = submission.tribute_offered;

        if !self.escrow.has_enough_balance(token, applicant, tribute).await? {
            warn!("Applicant {} cannot pay the tribute", applicant);
            return Err(self.funds_shortfall(token, applicant, tribute).await?);
        }

        if !self
            .escrow
            .has_enough_allowance(token, applicant, spender, tribute)
            .await?
        {
            warn!("Applicant {} must give allowance to the guild before being proposed", applicant);
            return Err(self.allowance_shortfall(token, applicant, spender, tribute).await?);
        }
        Ok(())
    }

    /// Sponsor a proposal if the sponsor has already approved the deposit.
    ///
    /// The allowance is not raised automatically for the sponsor.
    pub async fn sponsor_with_allowance_check(
        &self,
        sponsor: &Signer,
        id: ProposalId,
    ) -> Result<SponsoredProposal, AppError> {
        let spender = self.dao.address().clone();
        let deposit = self.dao.proposal_deposit().await?;
        let deposit_token = self.dao.deposit_token().await?;

        if !self
            .escrow
            .has_enough_allowance(&deposit_token, sponsor.address(), &spender, deposit)
            .await?
        {
            let err = self
                .allowance_shortfall(&deposit_token, sponsor.address(), &spender, deposit)
                .await?;
            warn!("Sponsor {} must give allowance to the guild before sponsoring: {}", sponsor, err);
            return Err(err);
        }

        self.dispatcher.sponsor(sponsor, id).await
    }

    // Failed checks re-read the amount so the error can state it

    async fn funds_shortfall(&self, token: &Address, who: &Address, need: Amount) -> Result<AppError, AppError> {
        let balance = self.escrow.balance_coverage(token, who, need).await?;
        Ok(AppError::InsufficientFunds {
            who: who.clone(),
            token: token.clone(),
            have: balance.available,
            need,
        })
    }

    async fn allowance_shortfall(
        &self,
        token: &Address,
        who: &Address,
        spender: &Address,
        need: Amount,
    ) -> Result<AppError, AppError> {
        let allowance = self.escrow.allowance_coverage(token, who, spender, need).await?;
        Ok(AppError::InsufficientAllowance {
            who: who.clone(),
            token: token.clone(),
            have: allowance.available,
            need,
        })
    }

    /// Parse operator text into a ballot and cast it
    pub async fn cast_vote(&self, voter: &Signer, id: ProposalId, raw: &str) -> Result<TxOutcome, AppError> {
        let vote: Vote = raw.parse()?;
        self.dispatcher.vote(voter, id, vote).await
    }

    // -------------------------------------------------------------------------
    // Pass-through actions: the ledger enforces everything these need
    // -------------------------------------------------------------------------

    pub async fn submit_whitelist(&self, signer: &Signer, token: &Address, details: &str) -> Result<SubmittedProposal, AppError> {
        self.dispatcher.submit_whitelist(signer, token, details).await
    }

    pub async fn submit_guild_kick(&self, signer: &Signer, member: &Address, details: &str) -> Result<SubmittedProposal, AppError> {
        self.dispatcher.submit_guild_kick(signer, member, details).await
    }

    pub async fn process(&self, signer: &Signer, id: ProposalId) -> Result<TxOutcome, AppError> {
        self.dispatcher.process(signer, id).await
    }

    pub async fn process_whitelist(&self, signer: &Signer, id: ProposalId) -> Result<TxOutcome, AppError> {
        self.dispatcher.process_whitelist(signer, id).await
    }

    pub async fn process_guild_kick(&self, signer: &Signer, id: ProposalId) -> Result<TxOutcome, AppError> {
        self.dispatcher.process_guild_kick(signer, id).await
    }

    pub async fn cancel(&self, signer: &Signer, id: ProposalId) -> Result<TxOutcome, AppError> {
        self.dispatcher.cancel(signer, id).await
    }

    pub async fn ragequit(&self, signer: &Signer, shares: Weight, loot: Weight) -> Result<RagequitOutcome, AppError> {
        self.dispatcher.ragequit(signer, shares, loot).await
    }

    pub async fn ragekick(&self, signer: &Signer, member: &Address) -> Result<RagequitOutcome, AppError> {
        self.dispatcher.ragekick(signer, member).await
    }

    pub async fn update_delegate(&self, signer: &Signer, new_delegate: &Address) -> Result<TxOutcome, AppError> {
        self.dispatcher.update_delegate(signer, new_delegate).await
    }

    pub async fn withdraw(&self, signer: &Signer, token: &Address, amount: Amount) -> Result<TxOutcome, AppError> {
        self.dispatcher.withdraw(signer, token, amount).await
    }

    pub async fn collect(&self, signer: &Signer, token: &Address) -> Result<CollectOutcome, AppError> {
        self.dispatcher.collect(signer, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::tests::{addr, ledger, signer, submission, DAO, SUMMONER, TOKEN};
    use crate::ledger::{InMemoryLedger, TokenGateway};
    use pretty_assertions::assert_eq;

    fn orchestrator(ledger: &Arc<InMemoryLedger>) -> ProposalOrchestrator {
        ProposalOrchestrator::new(
            ledger.clone(),
            EscrowValidator::new(ledger.clone()),
            CommandDispatcher::new(ledger.clone()),
        )
    }

    fn methods(calls: &[crate::ledger::memory::CallRecord]) -> Vec<&'static str> {
        calls.iter().map(|c| c.method).collect()
    }

    #[tokio::test]
    async fn test_submit_raises_missing_deposit_allowance_first() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;
        let count_before = ledger.proposal_count().await.unwrap();

        let outcome = orchestrator(&ledger)
            .submit_with_escrow(&signer(SUMMONER), &submission(0xb0, 1, 0))
            .await
            .unwrap();

        assert_eq!(outcome.proposal_id, count_before);
        assert_eq!(methods(&ledger.calls().await), vec!["approve", "submitProposal"]);
        let allowance = ledger.allowance(&addr(TOKEN), &addr(SUMMONER), &addr(DAO)).await.unwrap();
        assert!(allowance >= Amount::new(10));
    }

    #[tokio::test]
    async fn test_submit_skips_approval_when_allowance_covers_deposit() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;
        ledger
            .approve(&addr(TOKEN), &signer(SUMMONER), &addr(DAO), Amount::new(25))
            .await
            .unwrap();

        orchestrator(&ledger)
            .submit_with_escrow(&signer(SUMMONER), &submission(0xb0, 1, 0))
            .await
            .unwrap();
        assert_eq!(ledger.calls_to("approve").await, 1);
        assert_eq!(ledger.calls_to("submitProposal").await, 1);
    }

    #[tokio::test]
    async fn test_submit_without_deposit_funds_sends_nothing() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(9)).await;

        let err = orchestrator(&ledger)
            .submit_with_escrow(&signer(SUMMONER), &submission(0xb0, 1, 0))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AppError::InsufficientFunds {
                who: addr(SUMMONER),
                token: addr(TOKEN),
                have: Amount::new(9),
                need: Amount::new(10),
            }
        );
        assert!(ledger.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_applicant_tribute_allowance_is_not_sent() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;
        ledger.mint(&addr(TOKEN), &addr(0xb0), Amount::new(50)).await;

        let err = orchestrator(&ledger)
            .submit_with_escrow(&signer(SUMMONER), &submission(0xb0, 1, 50))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AppError::InsufficientAllowance {
                who: addr(0xb0),
                token: addr(TOKEN),
                have: Amount::ZERO,
                need: Amount::new(50),
            }
        );
        // the proposer's deposit allowance is fixed before the tribute is checked
        assert_eq!(methods(&ledger.calls().await), vec!["approve"]);
        let allowance = ledger.allowance(&addr(TOKEN), &addr(SUMMONER), &addr(DAO)).await.unwrap();
        assert_eq!(allowance, Amount::new(10));
        assert_eq!(ledger.allowance(&addr(TOKEN), &addr(0xb0), &addr(DAO)).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_submit_without_applicant_tribute_balance_is_not_sent() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;
        ledger
            .approve(&addr(TOKEN), &signer(0xb0), &addr(DAO), Amount::new(50))
            .await
            .unwrap();

        let err = orchestrator(&ledger)
            .submit_with_escrow(&signer(SUMMONER), &submission(0xb0, 1, 50))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InsufficientFunds { ref who, .. } if *who == addr(0xb0)));
        assert_eq!(ledger.calls_to("submitProposal").await, 0);
        // the applicant's own approval plus the proposer's deposit approval
        assert_eq!(ledger.calls_to("approve").await, 2);
    }

    #[tokio::test]
    async fn test_submit_with_escrowed_tribute() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;
        ledger.mint(&addr(TOKEN), &addr(0xb0), Amount::new(50)).await;
        ledger
            .approve(&addr(TOKEN), &signer(0xb0), &addr(DAO), Amount::new(50))
            .await
            .unwrap();

        let outcome = orchestrator(&ledger)
            .submit_with_escrow(&signer(SUMMONER), &submission(0xb0, 1, 50))
            .await
            .unwrap();
        let proposal = ledger.proposal(outcome.proposal_id).await.unwrap();
        assert_eq!(proposal.tribute_offered, Amount::new(50));
        assert_eq!(proposal.proposer, addr(SUMMONER));
        assert_eq!(ledger.balance_of(&addr(TOKEN), &addr(0xb0)).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_sponsor_with_short_allowance_reports_both_amounts() {
        let ledger = Arc::new(ledger());
        let orchestrator = orchestrator(&ledger);
        orchestrator
            .dispatcher
            .submit(&signer(SUMMONER), &submission(0xb0, 1, 0))
            .await
            .unwrap();
        ledger
            .approve(&addr(TOKEN), &signer(SUMMONER), &addr(DAO), Amount::new(5))
            .await
            .unwrap();

        let err = orchestrator
            .sponsor_with_allowance_check(&signer(SUMMONER), 0)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("5 < 10"));
        assert_eq!(ledger.calls_to("sponsorProposal").await, 0);
        // the sponsor's allowance is left alone
        assert_eq!(ledger.calls_to("approve").await, 1);
    }

    #[tokio::test]
    async fn test_sponsor_with_allowance_dispatches() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(20)).await;
        let orchestrator = orchestrator(&ledger);
        let submitted = orchestrator
            .submit_with_escrow(&signer(SUMMONER), &submission(0xb0, 1, 0))
            .await
            .unwrap();

        let sponsored = orchestrator
            .sponsor_with_allowance_check(&signer(SUMMONER), submitted.proposal_id)
            .await
            .unwrap();
        assert_eq!(sponsored.proposal_id, submitted.proposal_id);
        let flags = ledger.proposal(submitted.proposal_id).await.unwrap().flags;
        assert!(flags.sponsored && !flags.processed);
    }

    #[tokio::test]
    async fn test_cast_vote_rejects_unknown_ballot_locally() {
        let ledger = Arc::new(ledger());
        let orchestrator = orchestrator(&ledger);

        for raw in ["maybe", "", "yes please", "0"] {
            let err = orchestrator.cast_vote(&signer(SUMMONER), 0, raw).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert!(ledger.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_cast_vote_accepts_any_case() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;
        let orchestrator = orchestrator(&ledger);
        orchestrator
            .submit_with_escrow(&signer(SUMMONER), &submission(0xb0, 1, 0))
            .await
            .unwrap();
        orchestrator.sponsor_with_allowance_check(&signer(SUMMONER), 0).await.unwrap();
        ledger.advance_periods(1).await;

        orchestrator.cast_vote(&signer(SUMMONER), 0, "YES").await.unwrap();
        assert_eq!(ledger.proposal(0).await.unwrap().yes_votes, Weight::new(1).unwrap());
    }
}

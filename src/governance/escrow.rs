//! Token escrow validation
//!
//! Fresh balance/allowance reads against a token collaborator. Nothing is
//! cached: custody can change between any two calls.

use crate::error::AppError;
use crate::ledger::{Receipt, TokenGateway};
use crate::types::{Address, Amount, Signer};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// An available amount measured against a required one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    pub available: Amount,
    pub required: Amount,
}

impl Coverage {
    pub fn is_sufficient(&self) -> bool {
        self.available >= self.required
    }
}

/// Balance and allowance of one holder for one token, as seen right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowReport {
    pub token: Address,
    pub holder: Address,
    pub spender: Address,
    pub balance: Coverage,
    pub allowance: Coverage,
}

/// Checks token custody before any call that depends on it
#[derive(Clone)]
pub struct EscrowValidator {
    tokens: Arc<dyn TokenGateway>,
}

impl EscrowValidator {
    pub fn new(tokens: Arc<dyn TokenGateway>) -> Self {
        Self { tokens }
    }

    /// Holder's balance of `token` measured against `amount`
    pub async fn balance_coverage(
        &self,
        token: &Address,
        holder: &Address,
        amount: Amount,
    ) -> Result<Coverage, AppError> {
        let available = self
            .tokens
            .balance_of(token, holder)
            .await
            .map_err(|e| AppError::token_query(token, e))?;
        debug!("Balance of {} in {}: {} (need {})", holder, token, available, amount);
        Ok(Coverage {
            available,
            required: amount,
        })
    }

    /// Holder's allowance for `spender` measured against `amount`
    pub async fn allowance_coverage(
        &self,
        token: &Address,
        holder: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<Coverage, AppError> {
        let available = self
            .tokens
            .allowance(token, holder, spender)
            .await
            .map_err(|e| AppError::token_query(token, e))?;
        debug!(
            "Allowance of {} for {} in {}: {} (need {})",
            holder, spender, token, available, amount
        );
        Ok(Coverage {
            available,
            required: amount,
        })
    }

    /// True iff the holder's current balance of `token` is at least `amount`
    pub async fn has_enough_balance(
        &self,
        token: &Address,
        holder: &Address,
        amount: Amount,
    ) -> Result<bool, AppError> {
        Ok(self.balance_coverage(token, holder, amount).await?.is_sufficient())
    }

    pub async fn has_enough_allowance(
        &self,
        token: &Address,
        holder: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<bool, AppError> {
        Ok(self
            .allowance_coverage(token, holder, spender, amount)
            .await?
            .is_sufficient())
    }

    /// Approve `spender` for `amount` on behalf of the signer.
    ///
    /// Always sends the approval, even if the current allowance already covers it.
    pub async fn raise_allowance(
        &self,
        token: &Address,
        holder: &Signer,
        spender: &Address,
        amount: Amount,
    ) -> Result<Receipt, AppError> {
        let receipt = self
            .tokens
            .approve(token, holder, spender, amount)
            .await
            .map_err(|e| AppError::token_query(token, e))?;
        info!(
            "🔓 Allowance of {} for {} in {} raised to {} (tx {})",
            holder, spender, token, amount, receipt.tx_hash
        );
        Ok(receipt)
    }

    /// Both custody figures for a holder in one report
    pub async fn report(
        &self,
        token: &Address,
        holder: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<EscrowReport, AppError> {
        let balance = self.balance_coverage(token, holder, amount).await?;
        let allowance = self.allowance_coverage(token, holder, spender, amount).await?;
        Ok(EscrowReport {
            token: token.clone(),
            holder: holder.clone(),
            spender: spender.clone(),
            balance,
            allowance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::tests::{addr, ledger, signer, DAO, SUMMONER, TOKEN};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_balance_and_allowance_checks() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;
        let escrow = EscrowValidator::new(ledger.clone());

        assert!(escrow
            .has_enough_balance(&addr(TOKEN), &addr(SUMMONER), Amount::new(10))
            .await
            .unwrap());
        assert!(!escrow
            .has_enough_balance(&addr(TOKEN), &addr(SUMMONER), Amount::new(11))
            .await
            .unwrap());
        assert!(!escrow
            .has_enough_allowance(&addr(TOKEN), &addr(SUMMONER), &addr(DAO), Amount::new(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_repeated_allowance_checks_agree() {
        let ledger = Arc::new(ledger());
        let escrow = EscrowValidator::new(ledger.clone());
        escrow
            .raise_allowance(&addr(TOKEN), &signer(SUMMONER), &addr(DAO), Amount::new(7))
            .await
            .unwrap();

        let mut answers = Vec::new();
        for _ in 0..3 {
            answers.push(
                escrow
                    .has_enough_allowance(&addr(TOKEN), &addr(SUMMONER), &addr(DAO), Amount::new(7))
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(answers, vec![true, true, true]);
        assert_eq!(ledger.calls_to("approve").await, 1);
    }

    #[tokio::test]
    async fn test_raise_allowance_always_sends_the_call() {
        let ledger = Arc::new(ledger());
        let escrow = EscrowValidator::new(ledger.clone());
        for _ in 0..2 {
            escrow
                .raise_allowance(&addr(TOKEN), &signer(SUMMONER), &addr(DAO), Amount::new(10))
                .await
                .unwrap();
        }
        assert_eq!(ledger.calls_to("approve").await, 2);
        let coverage = escrow
            .allowance_coverage(&addr(TOKEN), &addr(SUMMONER), &addr(DAO), Amount::new(10))
            .await
            .unwrap();
        assert!(coverage.is_sufficient());
    }

    #[tokio::test]
    async fn test_broken_token_surfaces_query_failure() {
        let ledger = Arc::new(ledger());
        let escrow = EscrowValidator::new(ledger);
        let err = escrow
            .has_enough_balance(&addr(0xbad), &addr(SUMMONER), Amount::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TokenQueryFailed { ref token, .. } if *token == addr(0xbad)));
    }
}

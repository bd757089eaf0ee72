//! Application state management
//!
//! Contains shared state accessible across all handlers. The ledger
//! collaborator is chosen once at startup and every component is built on it.

use crate::config::DaoConfig;
use crate::governance::{CommandDispatcher, EscrowValidator, ProposalOrchestrator, StateReconciler};
use crate::ledger::{DaoGateway, TokenGateway};
use crate::types::{Address, Signer};
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub dao_config: DaoConfig,

    /// Guild contract on the selected network
    pub dao: Arc<dyn DaoGateway>,

    /// Token custody checks
    pub escrow: EscrowValidator,

    /// Governance workflows
    pub orchestrator: ProposalOrchestrator,

    /// Read model rebuilt from the ledger
    pub reconciler: StateReconciler,
}

impl AppState {
    pub fn new(dao_config: DaoConfig, dao: Arc<dyn DaoGateway>, tokens: Arc<dyn TokenGateway>) -> Self {
        let escrow = EscrowValidator::new(tokens);
        let dispatcher = CommandDispatcher::new(dao.clone());
        let orchestrator = ProposalOrchestrator::new(dao.clone(), escrow.clone(), dispatcher);
        let reconciler = StateReconciler::new(
            dao.clone(),
            dao_config.page_size,
            dao_config.scan_window,
            dao_config.members_from_block,
        );

        Self {
            dao_config,
            dao,
            escrow,
            orchestrator,
            reconciler,
        }
    }

    /// Identity used when a request does not name one
    pub fn default_signer(&self) -> Option<Signer> {
        self.dao_config.signer.clone().map(Signer::new)
    }

    pub fn ledger_address(&self) -> &Address {
        self.dao.address()
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;

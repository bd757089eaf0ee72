//! Governance Module
//!
//! Everything the steward does against the guild, layered bottom-up:
//!
//! 1. **Escrow**: fresh balance/allowance reads for a holder and spender
//! 2. **Dispatcher**: one mutating ledger call per action, receipts decoded
//! 3. **Orchestrator**: multi-step workflows with pre-flight checks
//! 4. **Reconciler**: proposal listing and membership rebuilt from the ledger

pub mod dispatcher;
pub mod escrow;
pub mod orchestrator;
pub mod reconciler;

// Re-export main types for convenient access
pub use dispatcher::CommandDispatcher;
pub use escrow::EscrowValidator;
pub use orchestrator::ProposalOrchestrator;
pub use reconciler::StateReconciler;

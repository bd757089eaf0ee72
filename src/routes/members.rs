//! Member Routes
//!
//! Membership read model, member-initiated exits and balance housekeeping.

use crate::error::ApiResult;
use crate::governance::dispatcher::{CollectOutcome, RagequitOutcome, TxOutcome};
use crate::governance::escrow::EscrowReport;
use crate::governance::reconciler::MembershipView;
use crate::ledger::MemberRecord;
use crate::models::{
    CollectRequest, DelegateRequest, EscrowQuery, MembersQuery, RagekickRequest, RagequitRequest,
    SuccessResponse, WithdrawRequest,
};
use crate::routes::{ActingSigner, ApiJson, ApiPath, ApiQuery};
use crate::state::SharedState;
use crate::types::Address;
use axum::{
    extract::State,
    Json,
};

// =============================================================================
// READS
// =============================================================================

/// Rebuild membership from passing proposals
pub async fn list_members(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<MembersQuery>,
) -> ApiResult<Json<SuccessResponse<MembershipView>>> {
    let view = state.reconciler.list_members(query.from_block).await?;
    Ok(Json(SuccessResponse::with_data(
        format!(
            "{} members rebuilt from blocks {}..={}",
            view.members.len(),
            view.from_block,
            view.to_block
        ),
        view,
    )))
}

pub async fn get_member(
    State(state): State<SharedState>,
    ApiPath(address): ApiPath<String>,
) -> ApiResult<Json<SuccessResponse<MemberRecord>>> {
    let address = Address::parse(&address)?;
    let member = state.reconciler.member(&address).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Member {}", address),
        member,
    )))
}

/// Balance and allowance of a holder towards the guild
pub async fn escrow_report(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<EscrowQuery>,
) -> ApiResult<Json<SuccessResponse<EscrowReport>>> {
    let token = match query.token {
        Some(token) => token,
        None => state.dao.deposit_token().await?,
    };
    let amount = match query.amount {
        Some(amount) => amount,
        None => state.dao.proposal_deposit().await?,
    };

    let report = state
        .escrow
        .report(&token, &query.holder, state.ledger_address(), amount)
        .await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Escrow of {} in {}", query.holder, token),
        report,
    )))
}

// =============================================================================
// MEMBER ACTIONS
// =============================================================================

pub async fn ragequit(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiJson(payload): ApiJson<RagequitRequest>,
) -> ApiResult<Json<SuccessResponse<RagequitOutcome>>> {
    let outcome = state
        .orchestrator
        .ragequit(&signer, payload.shares_to_burn, payload.loot_to_burn)
        .await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} ragequit", outcome.member_address),
        outcome,
    )))
}

pub async fn ragekick(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiJson(payload): ApiJson<RagekickRequest>,
) -> ApiResult<Json<SuccessResponse<RagequitOutcome>>> {
    let outcome = state.orchestrator.ragekick(&signer, &payload.member).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} ragekicked", payload.member),
        outcome,
    )))
}

pub async fn update_delegate(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiJson(payload): ApiJson<DelegateRequest>,
) -> ApiResult<Json<SuccessResponse<TxOutcome>>> {
    let outcome = state
        .orchestrator
        .update_delegate(&signer, &payload.new_delegate_key)
        .await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Delegate key set to {}", payload.new_delegate_key),
        outcome,
    )))
}

pub async fn withdraw(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiJson(payload): ApiJson<WithdrawRequest>,
) -> ApiResult<Json<SuccessResponse<TxOutcome>>> {
    let outcome = state
        .orchestrator
        .withdraw(&signer, &payload.token, payload.amount)
        .await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Withdrew {} of {}", payload.amount, payload.token),
        outcome,
    )))
}

pub async fn collect(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiJson(payload): ApiJson<CollectRequest>,
) -> ApiResult<Json<SuccessResponse<CollectOutcome>>> {
    let outcome = state.orchestrator.collect(&signer, &payload.token).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Collected {} of {}", outcome.amount_collected, outcome.token),
        outcome,
    )))
}

//! Proposal Routes
//!
//! Submission, sponsorship, voting and processing of guild proposals, plus the
//! paginated proposal listing.

use crate::error::{validation_error, ApiResult};
use crate::governance::dispatcher::{SponsoredProposal, SubmittedProposal, TxOutcome};
use crate::governance::reconciler::ProposalPage;
use crate::ledger::{ProposalRecord, ProposalSubmission};
use crate::models::{GuildKickRequest, PageQuery, SuccessResponse, VoteRequest, WhitelistRequest};
use crate::routes::{ActingSigner, ApiJson, ApiPath, ApiQuery};
use crate::state::SharedState;
use crate::types::ProposalId;
use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use validator::Validate;

// =============================================================================
// SUBMISSION
// =============================================================================

/// Submit a standard proposal, escrowing the deposit first
pub async fn submit_proposal(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiJson(payload): ApiJson<ProposalSubmission>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<SubmittedProposal>>)> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let submitted = state.orchestrator.submit_with_escrow(&signer, &payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            format!("Proposal {} submitted", submitted.proposal_id),
            submitted,
        )),
    ))
}

pub async fn submit_whitelist(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiJson(payload): ApiJson<WhitelistRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<SubmittedProposal>>)> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let submitted = state
        .orchestrator
        .submit_whitelist(&signer, &payload.token, &payload.details)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            format!("Whitelist proposal {} submitted", submitted.proposal_id),
            submitted,
        )),
    ))
}

pub async fn submit_guild_kick(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiJson(payload): ApiJson<GuildKickRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<SubmittedProposal>>)> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let submitted = state
        .orchestrator
        .submit_guild_kick(&signer, &payload.member, &payload.details)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            format!("Guild kick proposal {} submitted", submitted.proposal_id),
            submitted,
        )),
    ))
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Sponsor a proposal; the sponsor must already have approved the deposit
pub async fn sponsor_proposal(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiPath(id): ApiPath<ProposalId>,
) -> ApiResult<Json<SuccessResponse<SponsoredProposal>>> {
    let sponsored = state.orchestrator.sponsor_with_allowance_check(&signer, id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Proposal {} sponsored, queued at {}", id, sponsored.queue_index),
        sponsored,
    )))
}

pub async fn vote_proposal(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiPath(id): ApiPath<ProposalId>,
    ApiJson(payload): ApiJson<VoteRequest>,
) -> ApiResult<Json<SuccessResponse<TxOutcome>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let outcome = state.orchestrator.cast_vote(&signer, id, &payload.vote).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Vote recorded on proposal {}", id),
        outcome,
    )))
}

pub async fn process_proposal(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiPath(id): ApiPath<ProposalId>,
) -> ApiResult<Json<SuccessResponse<TxOutcome>>> {
    let outcome = state.orchestrator.process(&signer, id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Proposal {} processed", id),
        outcome,
    )))
}

pub async fn process_whitelist(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiPath(id): ApiPath<ProposalId>,
) -> ApiResult<Json<SuccessResponse<TxOutcome>>> {
    let outcome = state.orchestrator.process_whitelist(&signer, id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Whitelist proposal {} processed", id),
        outcome,
    )))
}

pub async fn process_guild_kick(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiPath(id): ApiPath<ProposalId>,
) -> ApiResult<Json<SuccessResponse<TxOutcome>>> {
    let outcome = state.orchestrator.process_guild_kick(&signer, id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Guild kick proposal {} processed", id),
        outcome,
    )))
}

pub async fn cancel_proposal(
    State(state): State<SharedState>,
    ActingSigner(signer): ActingSigner,
    ApiPath(id): ApiPath<ProposalId>,
) -> ApiResult<Json<SuccessResponse<TxOutcome>>> {
    let outcome = state.orchestrator.cancel(&signer, id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Proposal {} cancelled", id),
        outcome,
    )))
}

// =============================================================================
// READS
// =============================================================================

pub async fn list_proposals(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<Json<SuccessResponse<ProposalPage>>> {
    query.validate().map_err(|e| validation_error(e.to_string()))?;

    // without a limit the whole tail from `offset` is walked page by page
    let page = match query.limit {
        Some(limit) => state.reconciler.proposals_page(query.offset, limit).await?,
        None => state.reconciler.list_proposals(query.offset).await?,
    };
    Ok(Json(SuccessResponse::with_data(
        format!("{} of {} proposals", page.proposals.len(), page.total),
        page,
    )))
}

pub async fn get_proposal(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<ProposalId>,
) -> ApiResult<Json<SuccessResponse<ProposalRecord>>> {
    let proposal = state.reconciler.proposal(id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Proposal {}", id),
        proposal,
    )))
}

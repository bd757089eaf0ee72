//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod members;
mod proposals;

use crate::config::Settings;
use crate::error::{validation_error, ApiResult, AppError};
use crate::models::{DaoInfo, SuccessResponse};
use crate::state::SharedState;
use crate::types::{Address, Signer};
use axum::{
    extract::{FromRequest, FromRequestParts, State},
    http::{header, request::Parts, HeaderName, Method},
    routing::{get, post},
    Json, Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Header naming the identity a request acts as
pub const SIGNER_HEADER: &str = "x-steward-signer";

/// The identity a mutating request acts as: the signer header if present,
/// otherwise the configured default signer
pub struct ActingSigner(pub Signer);

impl FromRequestParts<SharedState> for ActingSigner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        match parts.headers.get(SIGNER_HEADER) {
            Some(value) => {
                let raw = value
                    .to_str()
                    .map_err(|_| validation_error("Signer header must be plain text"))?;
                Ok(Self(Signer::new(Address::parse(raw)?)))
            }
            None => state.default_signer().map(Self).ok_or_else(|| {
                validation_error("No signer: send the X-Steward-Signer header or configure dao.signer")
            }),
        }
    }
}

/// Endpoint table printed at startup, grouped by section
pub const ENDPOINTS: &[(&str, &[(&str, &str, &str)])] = &[
    (
        "Guild",
        &[
            ("GET", "/api/dao", "Guild parameters"),
            ("GET", "/api/escrow", "Balance/allowance of a holder"),
        ],
    ),
    (
        "Proposals",
        &[
            ("POST", "/api/proposals", "Submit (escrows the deposit)"),
            ("POST", "/api/proposals/whitelist", "Propose a token"),
            ("POST", "/api/proposals/guild-kick", "Propose a kick"),
            ("GET", "/api/proposals", "List proposals (offset, limit)"),
            ("GET", "/api/proposals/{id}", "One proposal"),
            ("POST", "/api/proposals/{id}/sponsor", "Sponsor"),
            ("POST", "/api/proposals/{id}/vote", "Vote yes/no"),
            ("POST", "/api/proposals/{id}/process", "Process"),
            ("POST", "/api/proposals/{id}/process/whitelist", "Process a token proposal"),
            ("POST", "/api/proposals/{id}/process/guild-kick", "Process a kick"),
            ("POST", "/api/proposals/{id}/cancel", "Cancel"),
        ],
    ),
    (
        "Members",
        &[
            ("GET", "/api/members", "Rebuild membership"),
            ("GET", "/api/members/{address}", "One member record"),
            ("POST", "/api/ragequit", "Burn shares and loot for a share of the bank"),
            ("POST", "/api/ragekick", "Force a jailed member out"),
            ("POST", "/api/delegate", "Change the delegate key"),
            ("POST", "/api/withdraw", "Withdraw an internal balance"),
            ("POST", "/api/collect", "Sweep unaccounted tokens into the bank"),
        ],
    ),
];

/// JSON body whose rejections use the API error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Path parameters whose rejections use the API error envelope
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// Query string whose rejections use the API error envelope
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/api/dao", get(dao_info))

        // Proposal lifecycle
        .route("/api/proposals", get(proposals::list_proposals).post(proposals::submit_proposal))
        .route("/api/proposals/whitelist", post(proposals::submit_whitelist))
        .route("/api/proposals/guild-kick", post(proposals::submit_guild_kick))
        .route("/api/proposals/{id}", get(proposals::get_proposal))
        .route("/api/proposals/{id}/sponsor", post(proposals::sponsor_proposal))
        .route("/api/proposals/{id}/vote", post(proposals::vote_proposal))
        .route("/api/proposals/{id}/process", post(proposals::process_proposal))
        .route("/api/proposals/{id}/process/whitelist", post(proposals::process_whitelist))
        .route("/api/proposals/{id}/process/guild-kick", post(proposals::process_guild_kick))
        .route("/api/proposals/{id}/cancel", post(proposals::cancel_proposal))

        // Members
        .route("/api/members", get(members::list_members))
        .route("/api/members/{address}", get(members::get_member))
        .route("/api/ragequit", post(members::ragequit))
        .route("/api/ragekick", post(members::ragekick))
        .route("/api/delegate", post(members::update_delegate))
        .route("/api/withdraw", post(members::withdraw))
        .route("/api/collect", post(members::collect))
        .route("/api/escrow", get(members::escrow_report))

        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let headers = [
        header::CONTENT_TYPE,
        header::ACCEPT,
        HeaderName::from_static(SIGNER_HEADER),
    ];

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    }
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Headline parameters of the selected guild
async fn dao_info(State(state): State<SharedState>) -> ApiResult<Json<SuccessResponse<DaoInfo>>> {
    let info = DaoInfo {
        network: state.dao_config.network.clone(),
        ledger_address: state.ledger_address().clone(),
        proposal_deposit: state.dao.proposal_deposit().await?,
        deposit_token: state.dao.deposit_token().await?,
        proposal_count: state.dao.proposal_count().await?,
        block_number: state.dao.block_number().await?,
    };
    Ok(Json(SuccessResponse::with_data(
        format!("Guild on {}", info.network),
        info,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaoConfig;
    use crate::ledger::memory::tests::{addr, ledger, submission, DAO, SUMMONER, TOKEN};
    use crate::ledger::{DaoGateway, InMemoryLedger, TokenGateway};
    use crate::state::AppState;
    use crate::types::Amount;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(ledger: Arc<InMemoryLedger>, signer: Option<Address>) -> Router {
        let settings = Settings::default();
        let dao_config = DaoConfig {
            signer,
            ..DaoConfig::default()
        };
        let state = Arc::new(AppState::new(dao_config, ledger.clone(), ledger));
        create_router(state, &settings)
    }

    fn post_json(uri: &str, signer: Option<&Address>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signer) = signer {
            builder = builder.header(SIGNER_HEADER, signer.as_str());
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_dao_info_reads_the_ledger() {
        let response = app(Arc::new(ledger()), None)
            .oneshot(Request::get("/api/dao").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["ledgerAddress"], json!(addr(DAO).as_str()));
        assert_eq!(body["proposalDeposit"], json!("10"));
        assert_eq!(body["proposalCount"], json!(0));
    }

    #[tokio::test]
    async fn test_invalid_vote_is_a_validation_error() {
        let summoner = addr(SUMMONER);
        let response = app(Arc::new(ledger()), None)
            .oneshot(post_json("/api/proposals/0/vote", Some(&summoner), json!({ "vote": "maybe" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_missing_signer_is_rejected() {
        let response = app(Arc::new(ledger()), None)
            .oneshot(post_json("/api/proposals/0/process", None, json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_configured_signer_is_the_fallback() {
        let ledger = Arc::new(ledger());
        ledger.mint(&addr(TOKEN), &addr(SUMMONER), Amount::new(10)).await;

        let response = app(ledger.clone(), Some(addr(SUMMONER)))
            .oneshot(post_json(
                "/api/proposals",
                None,
                json!({
                    "applicant": addr(0xb0).as_str(),
                    "sharesRequested": "1",
                    "tributeToken": addr(TOKEN).as_str(),
                    "paymentToken": addr(TOKEN).as_str(),
                    "details": "first member"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["proposalId"], json!(0));
        assert_eq!(ledger.calls_to("approve").await, 1);
    }

    #[tokio::test]
    async fn test_sponsor_without_allowance_is_unprocessable() {
        let ledger = Arc::new(ledger());
        let summoner = addr(SUMMONER);
        ledger.mint(&addr(TOKEN), &summoner, Amount::new(10)).await;
        let app = app(ledger.clone(), None);

        let submit = json!({
            "applicant": addr(0xb0).as_str(),
            "tributeToken": addr(TOKEN).as_str(),
            "paymentToken": addr(TOKEN).as_str()
        });
        let response = app
            .clone()
            .oneshot(post_json("/api/proposals", Some(&summoner), submit))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // lower the allowance below the deposit
        ledger
            .approve(&addr(TOKEN), &Signer::new(summoner.clone()), &addr(DAO), Amount::new(5))
            .await
            .unwrap();
        let response = app
            .oneshot(post_json("/api/proposals/0/sponsor", Some(&summoner), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["code"], json!("INSUFFICIENT_ALLOWANCE"));
        assert!(body["message"].as_str().unwrap().contains("5 < 10"));
        assert_eq!(ledger.calls_to("sponsorProposal").await, 0);
    }

    #[tokio::test]
    async fn test_padded_vote_is_rejected_before_the_ledger() {
        let ledger = Arc::new(ledger());
        let summoner = addr(SUMMONER);
        let response = app(ledger.clone(), None)
            .oneshot(post_json("/api/proposals/0/vote", Some(&summoner), json!({ "vote": " yes" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], json!("VALIDATION_ERROR"));
        assert!(ledger.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_uses_the_error_envelope() {
        let summoner = addr(SUMMONER);
        let request = Request::builder()
            .method("POST")
            .uri("/api/proposals/0/vote")
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNER_HEADER, summoner.as_str())
            .body(Body::from("{\"vote\":"))
            .unwrap();
        let response = app(Arc::new(ledger()), None).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["code"], json!("BAD_REQUEST"));
    }

    #[tokio::test]
    async fn test_non_numeric_proposal_id_is_a_bad_request() {
        let response = app(Arc::new(ledger()), None)
            .oneshot(Request::get("/api/proposals/first").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], json!("BAD_REQUEST"));
    }

    #[tokio::test]
    async fn test_listing_without_limit_walks_every_proposal() {
        let ledger = Arc::new(ledger());
        for applicant in 0xb0..0xb4 {
            ledger
                .submit_proposal(&Signer::new(addr(SUMMONER)), &submission(applicant, 1, 0))
                .await
                .unwrap();
        }
        let app = app(ledger, None);

        let response = app
            .clone()
            .oneshot(Request::get("/api/proposals").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], json!(4));
        assert_eq!(body["proposals"].as_array().unwrap().len(), 4);

        let response = app
            .oneshot(Request::get("/api/proposals?offset=1&limit=2").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        let ids: Vec<Value> = body["proposals"].as_array().unwrap().iter().map(|p| p["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_every_listed_endpoint_is_routed() {
        let ledger = Arc::new(ledger());
        ledger
            .submit_proposal(&Signer::new(addr(SUMMONER)), &submission(0xb0, 1, 0))
            .await
            .unwrap();
        let app = app(ledger, Some(addr(SUMMONER)));

        for (_, endpoints) in ENDPOINTS {
            for (method, path, _) in *endpoints {
                let uri = path.replace("{id}", "0").replace("{address}", addr(SUMMONER).as_str());
                let uri = if uri == "/api/escrow" {
                    format!("{}?holder={}", uri, addr(SUMMONER).as_str())
                } else {
                    uri
                };
                let body = if *method == "POST" { Body::from("{}") } else { Body::empty() };
                let request = Request::builder()
                    .method(*method)
                    .uri(&uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .unwrap();
                let status = app.clone().oneshot(request).await.unwrap().status();
                assert_ne!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
                assert_ne!(status, StatusCode::METHOD_NOT_ALLOWED, "{} {}", method, uri);
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_proposal_is_not_found() {
        let response = app(Arc::new(ledger()), None)
            .oneshot(Request::get("/api/proposals/9").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

//! HTTP handlers and wire types
//!
//! Identity arrives pre-verified from the external auth layer as
//! `x-user-id` / `x-username` headers; the core never parses
//! credentials itself.

use crate::events::LeaderboardEntry;
use action_auth::{now_ms, ActionError, ActionToken, ActionTokenIssuer};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use score_runtime::{RankingEngine, ScoreLedger, SubmissionPipeline};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Shared state for all HTTP handlers, wired by the process entry
/// point
pub struct ApiContext {
    pub issuer: ActionTokenIssuer,
    pub pipeline: Arc<SubmissionPipeline>,
    pub ledger: Arc<ScoreLedger>,
    pub ranking: Arc<RankingEngine>,
}

// ============ Request/Response Types ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeActionRequest {
    pub action_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeActionResponse {
    pub action_id: Uuid,
    pub signature: String,
    pub expires_at: i64,
    pub expected_score: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScoreRequest {
    pub action_id: Uuid,
    pub action_type: String,
    /// The `issued_at` from initialization; part of the signed payload
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScoreResponse {
    pub score_awarded: u64,
    pub new_total_score: u64,
    pub current_rank: usize,
    pub previous_rank: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub score: u64,
    pub rank: Option<usize>,
    pub percentile: Option<f64>,
}

/// Error body shared by all endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `REPLAYED_ACTION`
    pub error: String,
    pub message: String,
    /// HTTP status, duplicated for clients that lose it in transport
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<i64>,
}

/// Handler-level error, mapped onto status + `ErrorBody`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Action(ActionError::InvalidSignature) => StatusCode::UNAUTHORIZED,
            ApiError::Action(ActionError::ExpiredAction) => StatusCode::GONE,
            ApiError::Action(ActionError::ReplayedAction) => StatusCode::CONFLICT,
            ApiError::Action(ActionError::RateLimitExceeded { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Action(ActionError::UnknownActionType(_)) => StatusCode::BAD_REQUEST,
            ApiError::Action(ActionError::Unauthorized) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> ErrorBody {
        let retry_after_ms = match self {
            ApiError::Action(ActionError::RateLimitExceeded { retry_after_ms }) => {
                Some(*retry_after_ms)
            }
            _ => None,
        };

        let error = match self {
            ApiError::Action(action) => action.code().to_string(),
            ApiError::BadRequest(_) => "BAD_REQUEST".to_string(),
        };

        ErrorBody {
            error,
            message: self.to_string(),
            code: self.status().as_u16(),
            retry_after_ms,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

// ============ Identity ============

/// Verified identity placed on the request by the external auth layer
#[derive(Clone, Debug)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Extract identity headers; absence means the auth layer rejected or
/// never saw the request
pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::Action(ActionError::Unauthorized))?
        .to_string();

    let username = headers
        .get("x-username")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| user_id.clone());

    Ok(Identity { user_id, username })
}

// ============ Handlers ============

/// `POST /actions/initialize`
pub fn handle_initialize_action(
    ctx: &ApiContext,
    identity: &Identity,
    request: InitializeActionRequest,
) -> Result<InitializeActionResponse, ApiError> {
    let token = ctx.issuer.issue(
        &identity.user_id,
        &request.action_type,
        &request.metadata,
        now_ms(),
    )?;

    Ok(InitializeActionResponse {
        action_id: token.action_id,
        signature: token.signature,
        expires_at: token.expires_at,
        expected_score: token.expected_score,
    })
}

/// `POST /scores/submit`
///
/// The token is rebuilt from the request plus the verified identity;
/// the expected score is recomputed from the server-side scoring
/// table, never read from the wire. The award is covered by the
/// signature, so metadata that scores differently than at issuance
/// fails verification.
pub fn handle_submit_score(
    ctx: &ApiContext,
    identity: &Identity,
    source_addr: &str,
    request: SubmitScoreRequest,
) -> Result<SubmitScoreResponse, ApiError> {
    let expected_score = ctx
        .issuer
        .scoring()
        .score_for(&request.action_type, &request.metadata)
        .ok_or_else(|| ActionError::UnknownActionType(request.action_type.clone()))?;

    let token = ActionToken {
        action_id: request.action_id,
        user_id: identity.user_id.clone(),
        action_type: request.action_type,
        issued_at: request.timestamp,
        expires_at: request.timestamp + ctx.issuer.window_ms(),
        signature: request.signature,
        expected_score,
    };

    let outcome = ctx
        .pipeline
        .submit(&token, &identity.username, source_addr, now_ms())?;

    Ok(SubmitScoreResponse {
        score_awarded: outcome.transaction.score_awarded,
        new_total_score: outcome.transaction.score_after,
        current_rank: outcome.rank,
        previous_rank: outcome.previous_rank,
    })
}

const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_PAGE_SIZE: usize = 10;

/// `GET /scores/leaderboard?limit&offset`
pub fn handle_get_leaderboard(
    ctx: &ApiContext,
    query: LeaderboardQuery,
) -> Vec<LeaderboardEntry> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    ctx.ranking
        .page(offset, limit)
        .into_iter()
        .map(|snapshot| {
            let record = ctx.ledger.get_record(&snapshot.user_id);
            LeaderboardEntry {
                rank: snapshot.rank,
                username: record
                    .as_ref()
                    .map(|r| r.username.clone())
                    .unwrap_or_else(|| snapshot.user_id.clone()),
                last_updated: record.map(|r| r.last_updated_at).unwrap_or_default(),
                user_id: snapshot.user_id,
                score: snapshot.score,
            }
        })
        .collect()
}

/// `GET /scores/me`
///
/// Score, rank, and percentile all come from one snapshot of the
/// ranking index, so a concurrent submission can never surface a new
/// total alongside a stale rank.
pub fn handle_get_me(ctx: &ApiContext, identity: &Identity) -> MeResponse {
    match ctx.ranking.standing_of(&identity.user_id) {
        Some(standing) => MeResponse {
            score: standing.score,
            rank: Some(standing.rank),
            percentile: Some(standing.percentile),
        },
        None => MeResponse {
            score: 0,
            rank: None,
            percentile: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_auth::{
        ActionValidator, ConsumedActions, RateLimiter, RateLimiterConfig, ScoringTable,
        DEFAULT_TOKEN_WINDOW_MS,
    };
    use axum::http::HeaderValue;
    use serde_json::json;

    const SECRET: &[u8] = b"handler-test-secret";

    fn context() -> ApiContext {
        let issuer = ActionTokenIssuer::new(SECRET.to_vec(), ScoringTable::default());
        let consumed = Arc::new(ConsumedActions::new(DEFAULT_TOKEN_WINDOW_MS));
        let validator = ActionValidator::new(SECRET.to_vec(), consumed);
        let ledger = Arc::new(ScoreLedger::new());
        let ranking = Arc::new(RankingEngine::new());
        let (pipeline, _events) = SubmissionPipeline::new(
            validator,
            RateLimiter::new(RateLimiterConfig::default()),
            ledger.clone(),
            ranking.clone(),
        );

        ApiContext {
            issuer,
            pipeline: Arc::new(pipeline),
            ledger,
            ranking,
        }
    }

    fn alice() -> Identity {
        Identity {
            user_id: "alice".to_string(),
            username: "Alice".to_string(),
        }
    }

    #[test]
    fn test_identity_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("alice"));
        headers.insert("x-username", HeaderValue::from_static("Alice"));

        let identity = identity_from_headers(&headers).unwrap();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.username, "Alice");
    }

    #[test]
    fn test_identity_missing_is_unauthorized() {
        let headers = HeaderMap::new();
        let err = identity_from_headers(&headers).unwrap_err();
        assert!(matches!(
            err,
            ApiError::Action(ActionError::Unauthorized)
        ));
    }

    #[test]
    fn test_identity_username_defaults_to_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("alice"));
        let identity = identity_from_headers(&headers).unwrap();
        assert_eq!(identity.username, "alice");
    }

    #[test]
    fn test_initialize_then_submit_roundtrip() {
        let ctx = context();
        let identity = alice();

        let init = handle_initialize_action(
            &ctx,
            &identity,
            InitializeActionRequest {
                action_type: "quiz_complete".to_string(),
                metadata: json!({}),
            },
        )
        .unwrap();
        assert_eq!(init.expected_score, 100);

        let response = handle_submit_score(
            &ctx,
            &identity,
            "10.0.0.1",
            SubmitScoreRequest {
                action_id: init.action_id,
                action_type: "quiz_complete".to_string(),
                timestamp: init.expires_at - DEFAULT_TOKEN_WINDOW_MS,
                metadata: json!({}),
                signature: init.signature,
            },
        )
        .unwrap();

        assert_eq!(response.score_awarded, 100);
        assert_eq!(response.new_total_score, 100);
        assert_eq!(response.current_rank, 1);
        assert_eq!(response.previous_rank, None);
    }

    #[test]
    fn test_submit_with_forged_signature_rejected() {
        let ctx = context();
        let identity = alice();

        let err = handle_submit_score(
            &ctx,
            &identity,
            "10.0.0.1",
            SubmitScoreRequest {
                action_id: Uuid::new_v4(),
                action_type: "quiz_complete".to_string(),
                timestamp: now_ms(),
                metadata: json!({}),
                signature: "Zm9yZ2Vk".to_string(),
            },
        )
        .unwrap_err();

        assert!(matches!(
            err,
            ApiError::Action(ActionError::InvalidSignature)
        ));
        assert_eq!(ctx.ledger.transaction_count(), 0);
    }

    #[test]
    fn test_submit_metadata_cannot_inflate_award() {
        let ctx = context();
        let identity = alice();

        let init = handle_initialize_action(
            &ctx,
            &identity,
            InitializeActionRequest {
                action_type: "quiz_complete".to_string(),
                metadata: json!({"multiplier": 1}),
            },
        )
        .unwrap();
        assert_eq!(init.expected_score, 100);

        // Same signature, fattened multiplier: the recomputed award no
        // longer matches the signed one
        let err = handle_submit_score(
            &ctx,
            &identity,
            "10.0.0.1",
            SubmitScoreRequest {
                action_id: init.action_id,
                action_type: "quiz_complete".to_string(),
                timestamp: init.expires_at - DEFAULT_TOKEN_WINDOW_MS,
                metadata: json!({"multiplier": 5}),
                signature: init.signature.clone(),
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Action(ActionError::InvalidSignature)
        ));
        assert_eq!(ctx.ledger.transaction_count(), 0);

        // The metadata the token was issued for still submits cleanly
        let response = handle_submit_score(
            &ctx,
            &identity,
            "10.0.0.1",
            SubmitScoreRequest {
                action_id: init.action_id,
                action_type: "quiz_complete".to_string(),
                timestamp: init.expires_at - DEFAULT_TOKEN_WINDOW_MS,
                metadata: json!({"multiplier": 1}),
                signature: init.signature,
            },
        )
        .unwrap();
        assert_eq!(response.score_awarded, 100);
    }

    #[test]
    fn test_submit_unknown_action_type() {
        let ctx = context();
        let err = handle_submit_score(
            &ctx,
            &alice(),
            "10.0.0.1",
            SubmitScoreRequest {
                action_id: Uuid::new_v4(),
                action_type: "no_such_action".to_string(),
                timestamp: now_ms(),
                metadata: json!({}),
                signature: "x".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Action(ActionError::UnknownActionType(_))
        ));
    }

    #[test]
    fn test_me_unranked_and_ranked() {
        let ctx = context();
        let identity = alice();

        let me = handle_get_me(&ctx, &identity);
        assert_eq!(me.score, 0);
        assert_eq!(me.rank, None);
        assert_eq!(me.percentile, None);

        let init = handle_initialize_action(
            &ctx,
            &identity,
            InitializeActionRequest {
                action_type: "daily_challenge".to_string(),
                metadata: json!({}),
            },
        )
        .unwrap();
        handle_submit_score(
            &ctx,
            &identity,
            "10.0.0.1",
            SubmitScoreRequest {
                action_id: init.action_id,
                action_type: "daily_challenge".to_string(),
                timestamp: init.expires_at - DEFAULT_TOKEN_WINDOW_MS,
                metadata: json!({}),
                signature: init.signature,
            },
        )
        .unwrap();

        let me = handle_get_me(&ctx, &identity);
        assert_eq!(me.score, 250);
        assert_eq!(me.rank, Some(1));
    }

    #[test]
    fn test_me_never_shows_score_without_rank() {
        let ctx = Arc::new(context());
        let users: Vec<String> = (0..16).map(|i| format!("user-{i}")).collect();

        let writers: Vec<_> = users
            .iter()
            .cloned()
            .map(|user_id| {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    let identity = Identity {
                        username: user_id.clone(),
                        user_id,
                    };
                    let init = handle_initialize_action(
                        &ctx,
                        &identity,
                        InitializeActionRequest {
                            action_type: "quiz_complete".to_string(),
                            metadata: json!({}),
                        },
                    )
                    .unwrap();
                    handle_submit_score(
                        &ctx,
                        &identity,
                        "10.0.0.1",
                        SubmitScoreRequest {
                            action_id: init.action_id,
                            action_type: "quiz_complete".to_string(),
                            timestamp: init.expires_at - DEFAULT_TOKEN_WINDOW_MS,
                            metadata: json!({}),
                            signature: init.signature,
                        },
                    )
                    .unwrap();
                })
            })
            .collect();

        let reader = {
            let ctx = ctx.clone();
            let users = users.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    for user_id in &users {
                        let identity = Identity {
                            user_id: user_id.clone(),
                            username: user_id.clone(),
                        };
                        let me = handle_get_me(&ctx, &identity);
                        if me.score > 0 {
                            // A visible total always comes with its rank
                            assert!(me.rank.is_some());
                            assert!(me.percentile.is_some());
                        } else {
                            assert_eq!(me.rank, None);
                        }
                    }
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();
    }

    #[test]
    fn test_error_body_shapes() {
        let rate_limited = ApiError::Action(ActionError::RateLimitExceeded {
            retry_after_ms: 1_500,
        });
        let body = rate_limited.body();
        assert_eq!(body.error, "RATE_LIMIT_EXCEEDED");
        assert_eq!(body.code, 429);
        assert_eq!(body.retry_after_ms, Some(1_500));

        let replayed = ApiError::Action(ActionError::ReplayedAction);
        let body = replayed.body();
        assert_eq!(body.error, "REPLAYED_ACTION");
        assert_eq!(body.code, 409);
        assert_eq!(body.retry_after_ms, None);
    }

    #[test]
    fn test_leaderboard_pagination_defaults() {
        let ctx = context();
        let identity = alice();
        let init = handle_initialize_action(
            &ctx,
            &identity,
            InitializeActionRequest {
                action_type: "quiz_complete".to_string(),
                metadata: json!({}),
            },
        )
        .unwrap();
        handle_submit_score(
            &ctx,
            &identity,
            "10.0.0.1",
            SubmitScoreRequest {
                action_id: init.action_id,
                action_type: "quiz_complete".to_string(),
                timestamp: init.expires_at - DEFAULT_TOKEN_WINDOW_MS,
                metadata: json!({}),
                signature: init.signature,
            },
        )
        .unwrap();

        let page = handle_get_leaderboard(&ctx, LeaderboardQuery::default());
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].rank, 1);
        assert_eq!(page[0].username, "Alice");

        let empty = handle_get_leaderboard(
            &ctx,
            LeaderboardQuery {
                limit: Some(10),
                offset: Some(5),
            },
        );
        assert!(empty.is_empty());
    }
}

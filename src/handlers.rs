/// HTTP 핸들러
/// 얇은 어댑터 계층. 커맨드/정합 로직은 bidding, payments 모듈에 있다.
// region:    --- Imports
use crate::bidding::{handle_place_bid, winning_bid, PlaceBidCommand};
use crate::config::EngineConfig;
use crate::error::AuctionError;
use crate::notification::NotificationSink;
use crate::payments::{PaymentReconciler, WebhookOutcome};
use crate::store::AuctionStore;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

// region:    --- App State
pub type AppState = (
    Arc<dyn AuctionStore>,
    Arc<dyn NotificationSink>,
    Arc<PaymentReconciler>,
    EngineConfig,
);

/// 웹훅 서명 헤더 이름
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

// endregion: --- App State

// region:    --- Error Mapping
/// 에러를 {"error", "code"} 응답으로 변환
fn error_response(e: &AuctionError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        AuctionError::ListingNotFound(_)
        | AuctionError::LotNotFound(_)
        | AuctionError::PromotionNotFound(_) => StatusCode::NOT_FOUND,
        AuctionError::LotClosed { .. }
        | AuctionError::BidTooLow { .. }
        | AuctionError::MissingEndDate(_)
        | AuctionError::MalformedDocument(_) => StatusCode::BAD_REQUEST,
        AuctionError::VersionConflict { .. } | AuctionError::MaxRetriesExceeded => {
            StatusCode::CONFLICT
        }
        AuctionError::InvalidSignature => StatusCode::UNAUTHORIZED,
        AuctionError::Store(_) | AuctionError::Notification(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(serde_json::json!({
            "error": e.to_string(),
            "code": e.code(),
        })),
    )
}
// endregion: --- Error Mapping

// region:    --- Command Handlers
/// 입찰 요청 처리
pub async fn handle_bid(
    State((store, sink, _, cfg)): State<AppState>,
    Json(cmd): Json<PlaceBidCommand>,
) -> impl IntoResponse {
    info!("{:<12} --> 입찰 요청 처리 시작: {:?}", "Handler", cmd);

    match handle_place_bid(cmd, Utc::now(), store.as_ref(), sink.as_ref(), &cfg).await {
        Ok(bid) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": "입찰이 성공적으로 처리되었습니다.",
                "bid_id": bid.id,
                "lot_id": bid.lot_id,
                "amount": bid.amount,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// 결제 웹훅 수신 처리
pub async fn handle_payment_webhook(
    State((_, _, reconciler, _)): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match reconciler.handle_webhook(&body, signature, Utc::now()).await {
        Ok(outcome) => {
            let result = match outcome {
                WebhookOutcome::Applied => "applied",
                WebhookOutcome::AlreadyApplied => "already_applied",
                WebhookOutcome::Ignored => "ignored",
            };
            (StatusCode::OK, Json(serde_json::json!({ "result": result }))).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}
// endregion: --- Command Handlers

// region:    --- Query Handlers
/// 로트 조회
pub async fn handle_get_lot(
    State((store, _, _, _)): State<AppState>,
    Path(lot_id): Path<i64>,
) -> impl IntoResponse {
    info!("{:<12} --> 로트 조회 id: {}", "HandlerQuery", lot_id);
    match store.get_lot(lot_id).await {
        Ok(lot) => Json(lot).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// 현재 선두 입찰 조회
pub async fn handle_get_winning_bid(
    State((store, _, _, _)): State<AppState>,
    Path(lot_id): Path<i64>,
) -> impl IntoResponse {
    info!(
        "{:<12} --> 선두 입찰 조회 id: {}",
        "HandlerQuery", lot_id
    );
    match winning_bid(store.as_ref(), lot_id).await {
        Ok(bid) => Json(bid).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// 입찰 이력 조회
pub async fn handle_get_lot_bids(
    State((store, _, _, _)): State<AppState>,
    Path(lot_id): Path<i64>,
) -> impl IntoResponse {
    info!("{:<12} --> 입찰 이력 조회 id: {}", "HandlerQuery", lot_id);
    match store.bids_of_lot(lot_id).await {
        Ok(bids) => Json(bids).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// 리스팅(+소속 로트) 조회
pub async fn handle_get_listing(
    State((store, _, _, _)): State<AppState>,
    Path(listing_id): Path<i64>,
) -> impl IntoResponse {
    info!(
        "{:<12} --> 리스팅 조회 id: {}",
        "HandlerQuery", listing_id
    );
    let listing = match store.get_listing(listing_id).await {
        Ok(listing) => listing,
        Err(e) => return error_response(&e).into_response(),
    };
    match store.lots_of_listing(listing_id).await {
        Ok(lots) => Json(serde_json::json!({
            "listing": listing,
            "lots": lots,
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
// endregion: --- Query Handlers

// region:    --- Imports
use crate::config::EngineConfig;
use crate::database::DatabaseManager;
use crate::handlers::AppState;
use crate::notification::{KafkaNotificationSink, NotificationSink, NOTIFICATION_TOPIC};
use crate::payments::{HmacVerifier, PaymentReconciler, SignatureVerifier};
use crate::scheduler::ClosingScheduler;
use crate::store::{AuctionStore, PostgresAuctionStore};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
// endregion: --- Imports

// region:    --- Modules
mod auction;
mod bidding;
mod config;
mod database;
mod error;
mod handlers;
mod notification;
mod payments;
mod scheduler;
mod store;

// endregion: --- Modules

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // logging 초기화
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    let cfg = EngineConfig::from_env();

    // DatabaseManager 생성
    let db_manager = match DatabaseManager::new().await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("{:<12} --> 데이터베이스 연결 실패: {:?}", "Main", e);
            return Err(e.into());
        }
    };

    // 데이터베이스 초기화
    if let Err(e) = db_manager.initialize_database().await {
        error!("{:<12} --> 데이터베이스 초기화 실패: {:?}", "Main", e);
        return Err(e.into());
    }
    info!("{:<12} --> 데이터베이스 초기화 성공", "Main");

    // 알림 싱크(Kafka) 생성 및 토픽 준비
    let brokers = std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
    KafkaNotificationSink::create_topic(&brokers, NOTIFICATION_TOPIC, 5, 1).await?;
    let sink: Arc<dyn NotificationSink> =
        Arc::new(KafkaNotificationSink::new(&brokers, NOTIFICATION_TOPIC)?);
    info!("{:<12} --> 알림 싱크 초기화 성공", "Main");

    // 저장소 생성
    let store: Arc<dyn AuctionStore> = Arc::new(PostgresAuctionStore::new(Arc::clone(&db_manager)));

    // 종료 스케줄러 시작 (주기 스캔 + 벽시계 고정 스캔)
    let closing_scheduler = Arc::new(ClosingScheduler::new(
        Arc::clone(&store),
        Arc::clone(&sink),
        cfg.clone(),
    ));
    closing_scheduler.start();

    // 결제 웹훅 정합 처리기 + 만료 스윕 시작
    let verifier: Arc<dyn SignatureVerifier> = Arc::new(HmacVerifier::new(&cfg.webhook_secret));
    let reconciler = Arc::new(PaymentReconciler::new(
        Arc::clone(&store),
        Arc::clone(&sink),
        verifier,
        cfg.clone(),
    ));
    Arc::clone(&reconciler).start_sweep();

    // 테스트 페이지를 위한 cors 설정
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state: AppState = (store, sink, reconciler, cfg);

    // 라우터 설정
    let routes_all = Router::new()
        .route("/bid", post(handlers::handle_bid))
        .route("/webhooks/payment", post(handlers::handle_payment_webhook))
        .route("/lots/:id", get(handlers::handle_get_lot))
        .route(
            "/lots/:id/winning-bid",
            get(handlers::handle_get_winning_bid),
        )
        .route("/lots/:id/bids", get(handlers::handle_get_lot_bids))
        .route("/listings/:id", get(handlers::handle_get_listing))
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 20)) // 동시성을 위한 바디 사이즈 증가(20MB)
        .with_state(state);

    // 리스너 생성(로컬 호스트의 3000번 포트를 사용)
    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    // 서버 실행
    if let Err(err) = axum::serve(listener, routes_all.into_make_service()).await {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}
// endregion: --- Main

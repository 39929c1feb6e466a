use async_trait::async_trait;
use auction_lots_service::auction::events::AuctionEvent;
use auction_lots_service::auction::model::{
    Bid, Listing, ListingStatus, Lot, LotStatus, PaymentStatus, Promotion, PromotionStatus,
};
use auction_lots_service::auction::timing;
use auction_lots_service::bidding::{handle_place_bid, winning_bid, PlaceBidCommand};
use auction_lots_service::config::{EngineConfig, ReservePolicy};
use auction_lots_service::error::{AuctionError, Result};
use auction_lots_service::notification::{MemorySink, NotificationSink};
use auction_lots_service::payments::{HmacVerifier, PaymentReconciler, WebhookOutcome};
use auction_lots_service::scheduler::ClosingScheduler;
use auction_lots_service::store::{
    AuctionStore, BidPlacement, LotPatch, MemoryAuctionStore, NewLot, PromotionPatch,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// 테스트 기준 시각: 2025-01-01T00:00:00Z
fn base_end_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// 테스트용 엔진 구성
fn test_config() -> EngineConfig {
    EngineConfig::default()
}

/// 테스트용 저장소/싱크 생성
fn setup() -> (Arc<MemoryAuctionStore>, Arc<MemorySink>, EngineConfig) {
    (
        Arc::new(MemoryAuctionStore::new()),
        Arc::new(MemorySink::new()),
        test_config(),
    )
}

/// 종료 시각이 파생된 로트들을 가진 테스트용 리스팅 생성
async fn seed_listing(
    store: &MemoryAuctionStore,
    end_date: DateTime<Utc>,
    lot_count: usize,
    starting_price: i64,
    reserve_price: Option<i64>,
) -> (Listing, Vec<Lot>) {
    let listing = store
        .insert_listing(Some(end_date), ListingStatus::Active)
        .await
        .unwrap();
    let end_times = timing::derive_lot_end_times(
        listing.id,
        listing.auction_end_date,
        lot_count,
        Duration::minutes(1),
    )
    .unwrap();
    let mut lots = Vec::with_capacity(lot_count);
    for (i, end_time) in end_times.into_iter().enumerate() {
        let lot = store
            .insert_lot(NewLot {
                listing_id: listing.id,
                seq_index: i as i32,
                lot_end_time: end_time,
                starting_price,
                reserve_price,
            })
            .await
            .unwrap();
        lots.push(lot);
    }
    (listing, lots)
}

/// 테스트용 스케줄러 생성
fn make_scheduler(
    store: &Arc<MemoryAuctionStore>,
    sink: &Arc<MemorySink>,
    cfg: EngineConfig,
) -> ClosingScheduler {
    ClosingScheduler::new(
        Arc::clone(store) as Arc<dyn AuctionStore>,
        Arc::clone(sink) as Arc<dyn NotificationSink>,
        cfg,
    )
}

/// 테스트용 웹훅 정합 처리기 생성
fn make_reconciler(
    store: &Arc<MemoryAuctionStore>,
    sink: &Arc<MemorySink>,
    cfg: EngineConfig,
) -> PaymentReconciler {
    PaymentReconciler::new(
        Arc::clone(store) as Arc<dyn AuctionStore>,
        Arc::clone(sink) as Arc<dyn NotificationSink>,
        Arc::new(HmacVerifier::new(&cfg.webhook_secret)),
        cfg,
    )
}

/// 서명된 웹훅 바디 생성
fn signed_webhook(cfg: &EngineConfig, event_id: &str, object_ref: i64, status: &str) -> (Vec<u8>, String) {
    let body = serde_json::json!({
        "event_id": event_id,
        "type": "payment_intent.updated",
        "object_ref": object_ref,
        "status": status,
    })
    .to_string()
    .into_bytes();
    let signature = HmacVerifier::new(&cfg.webhook_secret).sign(&body);
    (body, signature)
}

/// 항상 실패하는 알림 싱크 (브로커 전달 장애 재현)
struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn emit(&self, _event: AuctionEvent) -> Result<()> {
        Err(AuctionError::Notification("브로커 연결 끊김".to_string()))
    }
}

/// 일시 장애 재현용 저장소: 지정 횟수만큼 프로모션 갱신을 실패시키고 이후는 위임한다
struct FlakyPromotionStore {
    inner: MemoryAuctionStore,
    fail_updates: AtomicU32,
}

impl FlakyPromotionStore {
    fn failing_once() -> Self {
        Self {
            inner: MemoryAuctionStore::new(),
            fail_updates: AtomicU32::new(1),
        }
    }
}

#[async_trait]
impl AuctionStore for FlakyPromotionStore {
    async fn insert_listing(
        &self,
        auction_end_date: Option<DateTime<Utc>>,
        status: ListingStatus,
    ) -> Result<Listing> {
        self.inner.insert_listing(auction_end_date, status).await
    }

    async fn get_listing(&self, id: i64) -> Result<Listing> {
        self.inner.get_listing(id).await
    }

    async fn update_listing_status(
        &self,
        id: i64,
        expected_version: i64,
        status: ListingStatus,
    ) -> Result<Listing> {
        self.inner
            .update_listing_status(id, expected_version, status)
            .await
    }

    async fn insert_lot(&self, new: NewLot) -> Result<Lot> {
        self.inner.insert_lot(new).await
    }

    async fn get_lot(&self, id: i64) -> Result<Lot> {
        self.inner.get_lot(id).await
    }

    async fn update_lot(&self, id: i64, expected_version: i64, patch: LotPatch) -> Result<Lot> {
        self.inner.update_lot(id, expected_version, patch).await
    }

    async fn find_due_lots(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Lot>> {
        self.inner.find_due_lots(now, limit).await
    }

    async fn find_stuck_closing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Lot>> {
        self.inner.find_stuck_closing(cutoff).await
    }

    async fn lots_of_listing(&self, listing_id: i64) -> Result<Vec<Lot>> {
        self.inner.lots_of_listing(listing_id).await
    }

    async fn place_bid_if_higher(
        &self,
        lot_id: i64,
        bidder_id: i64,
        amount: i64,
        placed_at: DateTime<Utc>,
        min_increment: i64,
    ) -> Result<BidPlacement> {
        self.inner
            .place_bid_if_higher(lot_id, bidder_id, amount, placed_at, min_increment)
            .await
    }

    async fn winning_bid(&self, lot_id: i64) -> Result<Option<Bid>> {
        self.inner.winning_bid(lot_id).await
    }

    async fn bids_of_lot(&self, lot_id: i64) -> Result<Vec<Bid>> {
        self.inner.bids_of_lot(lot_id).await
    }

    async fn insert_promotion(
        &self,
        listing_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<Promotion> {
        self.inner.insert_promotion(listing_id, created_at).await
    }

    async fn get_promotion(&self, id: i64) -> Result<Promotion> {
        self.inner.get_promotion(id).await
    }

    async fn update_promotion(
        &self,
        id: i64,
        expected_version: i64,
        patch: PromotionPatch,
    ) -> Result<Promotion> {
        if self.fail_updates.load(Ordering::SeqCst) > 0 {
            self.fail_updates.fetch_sub(1, Ordering::SeqCst);
            return Err(AuctionError::Store(sqlx::Error::PoolTimedOut));
        }
        self.inner.update_promotion(id, expected_version, patch).await
    }

    async fn find_stale_pending_promotions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Promotion>> {
        self.inner.find_stale_pending_promotions(cutoff).await
    }

    async fn webhook_event_seen(&self, event_id: &str) -> Result<bool> {
        self.inner.webhook_event_seen(event_id).await
    }

    async fn record_webhook_event(&self, event_id: &str) -> Result<bool> {
        self.inner.record_webhook_event(event_id).await
    }
}

// region:    --- TimeDerivation

/// 로트 종료 시각 파생: 정확한 값과 순단조 증가
#[tokio::test]
async fn test_lot_end_times_exact_and_increasing() {
    let end_date = base_end_date();
    let times =
        timing::derive_lot_end_times(1, Some(end_date), 5, Duration::minutes(1)).unwrap();

    assert_eq!(times.len(), 5);
    for (i, t) in times.iter().enumerate() {
        assert_eq!(*t, end_date + Duration::minutes(i as i64));
    }
    for pair in times.windows(2) {
        assert!(pair[0] < pair[1], "종료 시각은 순번에 대해 순증가해야 한다");
    }

    // 같은 입력이면 같은 결과 (재파생 안전)
    let again =
        timing::derive_lot_end_times(1, Some(end_date), 5, Duration::minutes(1)).unwrap();
    assert_eq!(times, again);
}

/// 종료 기준 시각 미설정은 입력 오류 (기본값 대체 금지)
#[tokio::test]
async fn test_missing_end_date_rejected() {
    let err = timing::derive_lot_end_times(7, None, 3, Duration::minutes(1)).unwrap_err();
    assert!(matches!(err, AuctionError::MissingEndDate(7)));
}

/// 관리자 정정 백필: 간격 변경 시 달라진 로트만 다시 기록
#[tokio::test]
async fn test_backfill_rederives_end_times() {
    let (store, _, _) = setup();
    let end_date = base_end_date();
    let listing = store
        .insert_listing(Some(end_date), ListingStatus::Active)
        .await
        .unwrap();

    // 잘못된 간격(2분)으로 생성된 로트들
    for i in 0..3 {
        store
            .insert_lot(NewLot {
                listing_id: listing.id,
                seq_index: i,
                lot_end_time: end_date + Duration::minutes(2 * i as i64),
                starting_price: 1000,
                reserve_price: None,
            })
            .await
            .unwrap();
    }

    // 1분 간격으로 백필: 순번 0은 이미 일치, 1과 2만 갱신
    let updated = timing::backfill_lot_end_times(&*store, listing.id, Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let lots = store.lots_of_listing(listing.id).await.unwrap();
    for lot in &lots {
        assert_eq!(
            lot.lot_end_time,
            end_date + Duration::minutes(lot.seq_index as i64)
        );
    }
}

/// 종료 기준 시각이 없는 리스팅 아래에는 로트를 만들 수 없다
#[tokio::test]
async fn test_insert_lot_requires_listing_end_date() {
    let (store, _, _) = setup();
    let listing = store
        .insert_listing(None, ListingStatus::Active)
        .await
        .unwrap();

    let err = store
        .insert_lot(NewLot {
            listing_id: listing.id,
            seq_index: 0,
            lot_end_time: base_end_date(),
            starting_price: 10,
            reserve_price: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuctionError::MissingEndDate(id) if id == listing.id));
}

// endregion: --- TimeDerivation

// region:    --- BidLedger

/// 100 입찰 후 90 입찰은 LOW_BID 거부, 선두는 100 유지
#[tokio::test]
async fn test_lower_bid_rejected() {
    let (store, sink, cfg) = setup();
    let (_, lots) = seed_listing(&store, base_end_date(), 1, 10, None).await;
    let lot_id = lots[0].id;
    let now = base_end_date() - Duration::minutes(10);

    let cmd = |bidder_id, amount| PlaceBidCommand {
        lot_id,
        bidder_id,
        amount,
    };

    handle_place_bid(cmd(1, 100), now, &*store, &*sink, &cfg)
        .await
        .unwrap();

    let err = handle_place_bid(cmd(2, 90), now + Duration::seconds(1), &*store, &*sink, &cfg)
        .await
        .unwrap_err();
    assert!(matches!(err, AuctionError::BidTooLow { .. }));
    assert_eq!(err.code(), "LOW_BID");

    let leader = winning_bid(&*store, lot_id).await.unwrap().unwrap();
    assert_eq!(leader.amount, 100);
    assert_eq!(leader.bidder_id, 1);
}

/// 동액 입찰은 거부되어 먼저 기록된 입찰이 선두를 지킨다
#[tokio::test]
async fn test_tie_keeps_earlier_bid() {
    let (store, sink, cfg) = setup();
    let (_, lots) = seed_listing(&store, base_end_date(), 1, 10, None).await;
    let lot_id = lots[0].id;
    let now = base_end_date() - Duration::minutes(10);

    handle_place_bid(
        PlaceBidCommand {
            lot_id,
            bidder_id: 1,
            amount: 500,
        },
        now,
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap();

    let err = handle_place_bid(
        PlaceBidCommand {
            lot_id,
            bidder_id: 2,
            amount: 500,
        },
        now + Duration::seconds(5),
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AuctionError::BidTooLow { .. }));

    let leader = winning_bid(&*store, lot_id).await.unwrap().unwrap();
    assert_eq!(leader.bidder_id, 1);
}

/// 종료 시각 정각의 입찰은 지각으로 거부 (경계 포함)
#[tokio::test]
async fn test_bid_at_end_time_rejected() {
    let (store, sink, cfg) = setup();
    let end_date = base_end_date();
    let (_, lots) = seed_listing(&store, end_date, 1, 10, None).await;
    let lot_id = lots[0].id;

    // 정각: 거부
    let err = handle_place_bid(
        PlaceBidCommand {
            lot_id,
            bidder_id: 1,
            amount: 100,
        },
        end_date,
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AuctionError::LotClosed { .. }));
    assert_eq!(err.code(), "ALREADY_ENDED");

    // 정각 1초 전: 허용
    handle_place_bid(
        PlaceBidCommand {
            lot_id,
            bidder_id: 1,
            amount: 100,
        },
        end_date - Duration::seconds(1),
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap();
}

/// 선두 교체 시 이전 선두에게 outbid 알림이 나간다
#[tokio::test]
async fn test_outbid_notification() {
    let (store, sink, cfg) = setup();
    let (_, lots) = seed_listing(&store, base_end_date(), 1, 10, None).await;
    let lot_id = lots[0].id;
    let now = base_end_date() - Duration::minutes(10);

    handle_place_bid(
        PlaceBidCommand {
            lot_id,
            bidder_id: 1,
            amount: 100,
        },
        now,
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap();
    handle_place_bid(
        PlaceBidCommand {
            lot_id,
            bidder_id: 2,
            amount: 200,
        },
        now + Duration::seconds(1),
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap();

    let events = sink.events().await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        AuctionEvent::Outbid {
            lot_id: event_lot,
            bidder_id,
            outbid_amount,
            ..
        } => {
            assert_eq!(*event_lot, lot_id);
            assert_eq!(*bidder_id, 1);
            assert_eq!(*outbid_amount, 200);
        }
        other => panic!("outbid 알림이 아님: {other:?}"),
    }
}

/// 기록된 입찰은 outbid 알림 발행이 실패해도 성공으로 보고된다
#[tokio::test]
async fn test_bid_stands_when_notification_fails() {
    let (store, _, cfg) = setup();
    let (_, lots) = seed_listing(&store, base_end_date(), 1, 10, None).await;
    let lot_id = lots[0].id;
    let now = base_end_date() - Duration::minutes(10);
    let sink = FailingSink;

    handle_place_bid(
        PlaceBidCommand {
            lot_id,
            bidder_id: 1,
            amount: 100,
        },
        now,
        &*store,
        &sink,
        &cfg,
    )
    .await
    .unwrap();

    // 선두 교체: 알림은 실패하지만 입찰 자체는 이미 기록됐다
    let bid = handle_place_bid(
        PlaceBidCommand {
            lot_id,
            bidder_id: 2,
            amount: 200,
        },
        now + Duration::seconds(1),
        &*store,
        &sink,
        &cfg,
    )
    .await
    .unwrap();
    assert_eq!(bid.amount, 200);

    let leader = winning_bid(&*store, lot_id).await.unwrap().unwrap();
    assert_eq!(leader.bidder_id, 2);
    assert_eq!(leader.amount, 200);
}

/// 알 수 없는 로트 입찰은 LotNotFound
#[tokio::test]
async fn test_bid_unknown_lot() {
    let (store, sink, cfg) = setup();
    let err = handle_place_bid(
        PlaceBidCommand {
            lot_id: 9999,
            bidder_id: 1,
            amount: 100,
        },
        Utc::now(),
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AuctionError::LotNotFound(9999)));
}

/// 동시 입찰: 최종 선두는 최대 금액 입찰자
#[tokio::test]
async fn test_concurrent_bidding_single_winner() {
    let (store, sink, cfg) = setup();
    let (_, lots) = seed_listing(&store, base_end_date(), 1, 0, None).await;
    let lot_id = lots[0].id;
    let now = base_end_date() - Duration::minutes(10);

    // 50개의 동시 입찰 생성
    let mut handles = vec![];
    for i in 1..=50i64 {
        let store = Arc::clone(&store);
        let sink = Arc::clone(&sink);
        let cfg = cfg.clone();
        handles.push(tokio::spawn(async move {
            handle_place_bid(
                PlaceBidCommand {
                    lot_id,
                    bidder_id: i,
                    amount: i * 1000,
                },
                now + Duration::milliseconds(i),
                &*store,
                &*sink,
                &cfg,
            )
            .await
        }));
    }

    let mut successful = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successful += 1,
            // 도착 순서에 따라 낮은 금액은 거부될 수 있다
            Err(AuctionError::BidTooLow { .. }) => {}
            Err(e) => panic!("예상 못 한 오류: {e:?}"),
        }
    }
    assert!(successful >= 1);

    // 최종 선두는 항상 최대 금액
    let leader = winning_bid(&*store, lot_id).await.unwrap().unwrap();
    assert_eq!(leader.amount, 50_000);
    assert_eq!(leader.bidder_id, 50);
}

// endregion: --- BidLedger

// region:    --- ClosingScheduler

/// 시나리오: 3개 로트, Δ=1분. 00:00:30 스캔은 로트 0만 닫는다.
#[tokio::test]
async fn test_partial_scan_closes_only_due_lot() {
    let (store, sink, cfg) = setup();
    let end_date = base_end_date();
    let (listing, lots) = seed_listing(&store, end_date, 3, 10, None).await;

    // 로트 0에 입찰
    handle_place_bid(
        PlaceBidCommand {
            lot_id: lots[0].id,
            bidder_id: 7,
            amount: 100,
        },
        end_date - Duration::minutes(5),
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap();

    let scheduler = make_scheduler(&store, &sink, cfg);
    let report = scheduler
        .run_scan(end_date + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(report.closed_sold, 1);
    assert_eq!(report.closed_unsold, 0);

    // 로트 0은 SOLD, 1과 2는 여전히 ACTIVE
    assert_eq!(store.get_lot(lots[0].id).await.unwrap().status, LotStatus::Sold);
    assert_eq!(
        store.get_lot(lots[1].id).await.unwrap().status,
        LotStatus::Active
    );
    assert_eq!(
        store.get_lot(lots[2].id).await.unwrap().status,
        LotStatus::Active
    );

    // 남은 로트가 있으므로 리스팅은 아직 열려 있다
    assert_eq!(
        store.get_listing(listing.id).await.unwrap().status,
        ListingStatus::Active
    );

    // 낙찰 알림 확인
    let events = sink.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        AuctionEvent::LotWon { lot_id, bidder_id: 7, amount: 100, .. } if *lot_id == lots[0].id
    )));
}

/// 모든 로트가 터미널이 되면 리스팅이 닫힌다
#[tokio::test]
async fn test_listing_closed_when_all_lots_terminal() {
    let (store, sink, cfg) = setup();
    let end_date = base_end_date();
    let (listing, lots) = seed_listing(&store, end_date, 3, 10, None).await;

    let scheduler = make_scheduler(&store, &sink, cfg);
    let report = scheduler
        .run_scan(end_date + Duration::minutes(10))
        .await
        .unwrap();

    // 입찰이 없었으므로 전부 유찰
    assert_eq!(report.closed_unsold, 3);
    assert_eq!(report.listings_closed, 1);
    for lot in &lots {
        assert_eq!(store.get_lot(lot.id).await.unwrap().status, LotStatus::Unsold);
    }
    assert_eq!(
        store.get_listing(listing.id).await.unwrap().status,
        ListingStatus::Closed
    );

    // 유찰 알림은 로트당 1건
    let unsold_events = sink
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, AuctionEvent::LotUnsold { .. }))
        .count();
    assert_eq!(unsold_events, 3);
}

/// 두 스케줄러 인스턴스가 동시에 스캔해도 로트는 정확히 한 번만 확정된다
#[tokio::test]
async fn test_concurrent_scans_emit_once() {
    let (store, sink, cfg) = setup();
    let end_date = base_end_date();
    let (_, lots) = seed_listing(&store, end_date, 1, 10, None).await;

    handle_place_bid(
        PlaceBidCommand {
            lot_id: lots[0].id,
            bidder_id: 3,
            amount: 300,
        },
        end_date - Duration::minutes(1),
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap();

    // 레플리카 2개가 같은 저장소를 스캔
    let scheduler_a = make_scheduler(&store, &sink, cfg.clone());
    let scheduler_b = make_scheduler(&store, &sink, cfg);
    let now = end_date + Duration::seconds(30);
    let (ra, rb) = tokio::join!(scheduler_a.run_scan(now), scheduler_b.run_scan(now));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    // 확정은 한쪽에서만
    assert_eq!(ra.closed_sold + rb.closed_sold, 1);
    assert_eq!(store.get_lot(lots[0].id).await.unwrap().status, LotStatus::Sold);

    // lot_won 알림은 정확히 1건
    let won_events = sink
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, AuctionEvent::LotWon { .. }))
        .count();
    assert_eq!(won_events, 1);
}

/// 전이 도중 죽은 프로세스가 남긴 CLOSING 로트를 워치독이 복구한다
#[tokio::test]
async fn test_watchdog_reclaims_stuck_closing() {
    let (store, sink, cfg) = setup();
    let end_date = base_end_date();
    let (_, lots) = seed_listing(&store, end_date, 1, 10, None).await;
    let lot_id = lots[0].id;

    handle_place_bid(
        PlaceBidCommand {
            lot_id,
            bidder_id: 5,
            amount: 777,
        },
        end_date - Duration::minutes(1),
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap();

    // CLOSING 진입 후 죽은 상황 재현: 워치독 한계보다 오래된 closing_since
    let now = end_date + Duration::minutes(30);
    let lot = store.get_lot(lot_id).await.unwrap();
    store
        .update_lot(
            lot.id,
            lot.version,
            LotPatch {
                status: Some(LotStatus::Closing),
                closing_since: Some(Some(now - Duration::minutes(10))),
                ..LotPatch::default()
            },
        )
        .await
        .unwrap();

    let scheduler = make_scheduler(&store, &sink, cfg);
    let report = scheduler.run_scan(now).await.unwrap();
    assert_eq!(report.reclaimed, 1);
    assert_eq!(report.closed_sold, 1);

    // 실제 선두를 재확인해 낙찰로 확정, 알림은 1건
    assert_eq!(store.get_lot(lot_id).await.unwrap().status, LotStatus::Sold);
    let won_events = sink
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, AuctionEvent::LotWon { bidder_id: 5, amount: 777, .. }))
        .count();
    assert_eq!(won_events, 1);
}

/// 워치독 한계 이내의 CLOSING 로트는 건드리지 않는다
#[tokio::test]
async fn test_fresh_closing_lot_left_alone() {
    let (store, sink, cfg) = setup();
    let end_date = base_end_date();
    let (_, lots) = seed_listing(&store, end_date, 1, 10, None).await;

    let now = end_date + Duration::minutes(1);
    let lot = store.get_lot(lots[0].id).await.unwrap();
    store
        .update_lot(
            lot.id,
            lot.version,
            LotPatch {
                status: Some(LotStatus::Closing),
                closing_since: Some(Some(now - Duration::seconds(10))),
                ..LotPatch::default()
            },
        )
        .await
        .unwrap();

    let scheduler = make_scheduler(&store, &sink, cfg);
    let report = scheduler.run_scan(now).await.unwrap();
    assert_eq!(report.reclaimed, 0);
    assert_eq!(
        store.get_lot(lots[0].id).await.unwrap().status,
        LotStatus::Closing
    );
}

/// reserve 미달 로트는 유찰, 정책에 따라 미달 사실을 구분해 알린다
#[tokio::test]
async fn test_reserve_not_met_policy() {
    let (store, sink, mut cfg) = setup();
    cfg.reserve_policy = ReservePolicy::ReserveNotMet;
    let end_date = base_end_date();
    let (_, lots) = seed_listing(&store, end_date, 1, 10, Some(500)).await;

    // reserve(500) 미달 입찰
    handle_place_bid(
        PlaceBidCommand {
            lot_id: lots[0].id,
            bidder_id: 1,
            amount: 300,
        },
        end_date - Duration::minutes(1),
        &*store,
        &*sink,
        &cfg,
    )
    .await
    .unwrap();

    let scheduler = make_scheduler(&store, &sink, cfg);
    scheduler
        .run_scan(end_date + Duration::seconds(30))
        .await
        .unwrap();

    assert_eq!(
        store.get_lot(lots[0].id).await.unwrap().status,
        LotStatus::Unsold
    );
    assert!(sink.events().await.iter().any(|e| matches!(
        e,
        AuctionEvent::LotUnsold { reserve_met: false, .. }
    )));
}

/// 확정 실패 후 재스캔이 치유한다 (레벨 트리거)
#[tokio::test]
async fn test_rescan_self_heals() {
    let (store, sink, cfg) = setup();
    let end_date = base_end_date();
    let (_, lots) = seed_listing(&store, end_date, 2, 10, None).await;

    let scheduler = make_scheduler(&store, &sink, cfg);
    // 첫 스캔에서 전부 닫힘
    scheduler
        .run_scan(end_date + Duration::minutes(5))
        .await
        .unwrap();
    // 재스캔은 해야 할 일이 없어야 한다
    let report = scheduler
        .run_scan(end_date + Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(report, Default::default());
    for lot in &lots {
        assert_eq!(store.get_lot(lot.id).await.unwrap().status, LotStatus::Unsold);
    }
}

// endregion: --- ClosingScheduler

// region:    --- PaymentWebhookReconciler

/// paid 웹훅은 프로모션을 활성화하고, 재전달은 아무 것도 바꾸지 않는다
#[tokio::test]
async fn test_webhook_paid_then_redelivery() {
    let (store, sink, cfg) = setup();
    let listing = store
        .insert_listing(Some(base_end_date()), ListingStatus::Active)
        .await
        .unwrap();
    let promotion = store
        .insert_promotion(listing.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(promotion.status, PromotionStatus::Pending);

    let reconciler = make_reconciler(&store, &sink, cfg.clone());
    let (body, signature) = signed_webhook(&cfg, "e1", promotion.id, "paid");

    let outcome = reconciler
        .handle_webhook(&body, &signature, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let updated = store.get_promotion(promotion.id).await.unwrap();
    assert_eq!(updated.status, PromotionStatus::Active);
    assert_eq!(updated.payment_status, PaymentStatus::Paid);

    // e1 재전달: 재적용도, 중복 알림도 없어야 한다
    let outcome = reconciler
        .handle_webhook(&body, &signature, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyApplied);

    let after = store.get_promotion(promotion.id).await.unwrap();
    assert_eq!(after.version, updated.version);

    let activated = sink
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, AuctionEvent::PromotionActivated { .. }))
        .count();
    assert_eq!(activated, 1);
}

/// 같은 상태를 함의하는 다른 이벤트 id도 멱등 처리된다
#[tokio::test]
async fn test_webhook_same_status_new_event_id() {
    let (store, sink, cfg) = setup();
    let listing = store
        .insert_listing(Some(base_end_date()), ListingStatus::Active)
        .await
        .unwrap();
    let promotion = store
        .insert_promotion(listing.id, Utc::now())
        .await
        .unwrap();

    let reconciler = make_reconciler(&store, &sink, cfg.clone());
    let (body, signature) = signed_webhook(&cfg, "e1", promotion.id, "paid");
    reconciler
        .handle_webhook(&body, &signature, Utc::now())
        .await
        .unwrap();

    let (body2, signature2) = signed_webhook(&cfg, "e2", promotion.id, "paid");
    let outcome = reconciler
        .handle_webhook(&body2, &signature2, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyApplied);
}

/// declined 웹훅은 프로모션을 FAILED로 내린다
#[tokio::test]
async fn test_webhook_declined() {
    let (store, sink, cfg) = setup();
    let listing = store
        .insert_listing(Some(base_end_date()), ListingStatus::Active)
        .await
        .unwrap();
    let promotion = store
        .insert_promotion(listing.id, Utc::now())
        .await
        .unwrap();

    let reconciler = make_reconciler(&store, &sink, cfg.clone());
    let (body, signature) = signed_webhook(&cfg, "e1", promotion.id, "declined");
    let outcome = reconciler
        .handle_webhook(&body, &signature, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let updated = store.get_promotion(promotion.id).await.unwrap();
    assert_eq!(updated.status, PromotionStatus::Failed);
    assert_eq!(updated.payment_status, PaymentStatus::Unpaid);
    // 활성화 알림은 없어야 한다
    assert!(sink.events().await.is_empty());
}

/// 서명 검증 실패는 상태 변화 없이 거부된다
#[tokio::test]
async fn test_webhook_invalid_signature() {
    let (store, sink, cfg) = setup();
    let listing = store
        .insert_listing(Some(base_end_date()), ListingStatus::Active)
        .await
        .unwrap();
    let promotion = store
        .insert_promotion(listing.id, Utc::now())
        .await
        .unwrap();

    let reconciler = make_reconciler(&store, &sink, cfg.clone());
    let (body, _) = signed_webhook(&cfg, "e1", promotion.id, "paid");
    let err = reconciler
        .handle_webhook(&body, "deadbeef", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AuctionError::InvalidSignature));

    let unchanged = store.get_promotion(promotion.id).await.unwrap();
    assert_eq!(unchanged.status, PromotionStatus::Pending);
    assert_eq!(unchanged.payment_status, PaymentStatus::Unpaid);
}

/// 알 수 없는 참조는 기록 후 ACK (재시도 대상 아님)
#[tokio::test]
async fn test_webhook_unknown_reference_acknowledged() {
    let (store, sink, cfg) = setup();
    let reconciler = make_reconciler(&store, &sink, cfg.clone());
    let (body, signature) = signed_webhook(&cfg, "e1", 9999, "paid");
    let outcome = reconciler
        .handle_webhook(&body, &signature, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
}

/// 타임아웃을 넘긴 PENDING 프로모션은 스윕이 FAILED로 내린다
#[tokio::test]
async fn test_sweep_expires_stale_pending() {
    let (store, sink, cfg) = setup();
    let listing = store
        .insert_listing(Some(base_end_date()), ListingStatus::Active)
        .await
        .unwrap();
    let now = Utc::now();

    // 25시간 전 생성: 만료 대상
    let stale = store
        .insert_promotion(listing.id, now - Duration::hours(25))
        .await
        .unwrap();
    // 1시간 전 생성: 아직 유예
    let fresh = store
        .insert_promotion(listing.id, now - Duration::hours(1))
        .await
        .unwrap();
    // 이미 결제 완료된 프로모션은 스윕 대상이 아니다
    let paid = store
        .insert_promotion(listing.id, now - Duration::hours(30))
        .await
        .unwrap();
    let reconciler = make_reconciler(&store, &sink, cfg.clone());
    let (body, signature) = signed_webhook(&cfg, "e1", paid.id, "paid");
    reconciler.handle_webhook(&body, &signature, now).await.unwrap();

    let expired = reconciler.expire_stale(now).await.unwrap();
    assert_eq!(expired, 1);

    assert_eq!(
        store.get_promotion(stale.id).await.unwrap().status,
        PromotionStatus::Failed
    );
    assert_eq!(
        store.get_promotion(fresh.id).await.unwrap().status,
        PromotionStatus::Pending
    );
    assert_eq!(
        store.get_promotion(paid.id).await.unwrap().status,
        PromotionStatus::Active
    );
}

/// 전이 적용이 일시 실패하면 이벤트 id가 남지 않아 같은 id 재전달로 복구된다
#[tokio::test]
async fn test_webhook_redelivery_recovers_after_transient_failure() {
    let store = Arc::new(FlakyPromotionStore::failing_once());
    let sink = Arc::new(MemorySink::new());
    let cfg = test_config();
    let listing = store
        .insert_listing(Some(base_end_date()), ListingStatus::Active)
        .await
        .unwrap();
    let promotion = store
        .insert_promotion(listing.id, Utc::now())
        .await
        .unwrap();

    let reconciler = PaymentReconciler::new(
        Arc::clone(&store) as Arc<dyn AuctionStore>,
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::new(HmacVerifier::new(&cfg.webhook_secret)),
        cfg.clone(),
    );
    let (body, signature) = signed_webhook(&cfg, "e1", promotion.id, "paid");

    // 첫 전달: 저장소 일시 장애로 실패, 상태는 그대로
    let err = reconciler
        .handle_webhook(&body, &signature, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AuctionError::Store(_)));
    let unchanged = store.get_promotion(promotion.id).await.unwrap();
    assert_eq!(unchanged.status, PromotionStatus::Pending);
    assert_eq!(unchanged.payment_status, PaymentStatus::Unpaid);

    // 같은 id 재전달이 복구 경로: 이번에는 적용된다
    let outcome = reconciler
        .handle_webhook(&body, &signature, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);
    let updated = store.get_promotion(promotion.id).await.unwrap();
    assert_eq!(updated.status, PromotionStatus::Active);
    assert_eq!(updated.payment_status, PaymentStatus::Paid);

    let activated = sink
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, AuctionEvent::PromotionActivated { .. }))
        .count();
    assert_eq!(activated, 1);
}

/// 같은 이벤트 id의 동시 전달은 전이 1회, 알림 1건으로 수렴한다
#[tokio::test]
async fn test_webhook_concurrent_same_event_id() {
    let (store, sink, cfg) = setup();
    let listing = store
        .insert_listing(Some(base_end_date()), ListingStatus::Active)
        .await
        .unwrap();
    let promotion = store
        .insert_promotion(listing.id, Utc::now())
        .await
        .unwrap();

    let reconciler = Arc::new(make_reconciler(&store, &sink, cfg.clone()));
    let (body, signature) = signed_webhook(&cfg, "e1", promotion.id, "paid");
    let now = Utc::now();

    let a = Arc::clone(&reconciler);
    let b = Arc::clone(&reconciler);
    let (body_a, sig_a) = (body.clone(), signature.clone());
    let (body_b, sig_b) = (body.clone(), signature.clone());
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.handle_webhook(&body_a, &sig_a, now).await }),
        tokio::spawn(async move { b.handle_webhook(&body_b, &sig_b, now).await }),
    );
    let (ra, rb) = (ra.unwrap().unwrap(), rb.unwrap().unwrap());

    // 전이는 정확히 한쪽에서만, 나머지는 멱등 ACK
    let applied = [ra, rb]
        .iter()
        .filter(|o| **o == WebhookOutcome::Applied)
        .count();
    assert_eq!(applied, 1);
    assert!([ra, rb].iter().all(|o| *o != WebhookOutcome::Ignored));

    let updated = store.get_promotion(promotion.id).await.unwrap();
    assert_eq!(updated.status, PromotionStatus::Active);
    assert_eq!(updated.payment_status, PaymentStatus::Paid);

    let activated = sink
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, AuctionEvent::PromotionActivated { .. }))
        .count();
    assert_eq!(activated, 1);
}

/// 이후 전이가 끝난 과거 이벤트의 늦은 재전달은 상태를 되돌리지 않는다
#[tokio::test]
async fn test_webhook_late_redelivery_does_not_revert() {
    let (store, sink, cfg) = setup();
    let listing = store
        .insert_listing(Some(base_end_date()), ListingStatus::Active)
        .await
        .unwrap();
    let promotion = store
        .insert_promotion(listing.id, Utc::now())
        .await
        .unwrap();

    let reconciler = make_reconciler(&store, &sink, cfg.clone());
    let (paid_body, paid_sig) = signed_webhook(&cfg, "e1", promotion.id, "paid");
    reconciler
        .handle_webhook(&paid_body, &paid_sig, Utc::now())
        .await
        .unwrap();

    let (refund_body, refund_sig) = signed_webhook(&cfg, "e2", promotion.id, "refunded");
    reconciler
        .handle_webhook(&refund_body, &refund_sig, Utc::now())
        .await
        .unwrap();
    let refunded = store.get_promotion(promotion.id).await.unwrap();
    assert_eq!(refunded.status, PromotionStatus::Expired);
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);

    // e1 늦은 재전달: PAID로 되돌리지 않고 ACK만 한다
    let outcome = reconciler
        .handle_webhook(&paid_body, &paid_sig, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyApplied);
    let after = store.get_promotion(promotion.id).await.unwrap();
    assert_eq!(after.status, PromotionStatus::Expired);
    assert_eq!(after.payment_status, PaymentStatus::Refunded);
    assert_eq!(after.version, refunded.version);
}

// endregion: --- PaymentWebhookReconciler

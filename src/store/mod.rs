/// 경매 저장소 경계
/// 코어는 이 트레이트만 바라본다. 저장 포맷은 불투명하며,
/// 복수 스케줄러 레플리카 간 조정은 전부 저장소의 버전 가드로 이뤄진다.
// region:    --- Imports
use crate::auction::model::{
    Bid, Listing, ListingStatus, Lot, LotStatus, PaymentStatus, Promotion, PromotionStatus,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// endregion: --- Imports

// region:    --- Modules
pub mod memory;
pub mod postgres;
mod queries;

pub use memory::MemoryAuctionStore;
pub use postgres::PostgresAuctionStore;

// endregion: --- Modules

// region:    --- Patch Types
/// 로트 부분 갱신 (버전 가드와 함께 적용)
#[derive(Debug, Clone, Default)]
pub struct LotPatch {
    pub status: Option<LotStatus>,
    pub lot_end_time: Option<DateTime<Utc>>,
    /// Some(None)은 closing_since 해제
    pub closing_since: Option<Option<DateTime<Utc>>>,
}

/// 프로모션 부분 갱신
#[derive(Debug, Clone, Default)]
pub struct PromotionPatch {
    pub status: Option<PromotionStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// 신규 로트 입력
#[derive(Debug, Clone)]
pub struct NewLot {
    pub listing_id: i64,
    pub seq_index: i32,
    pub lot_end_time: DateTime<Utc>,
    pub starting_price: i64,
    pub reserve_price: Option<i64>,
}

/// 입찰 조건부 기록 결과
#[derive(Debug, Clone)]
pub struct BidPlacement {
    pub bid: Bid,
    /// 밀려난 이전 선두 (있으면 outbid 알림 대상)
    pub outbid: Option<Bid>,
}
// endregion: --- Patch Types

// region:    --- Store Trait
#[async_trait]
pub trait AuctionStore: Send + Sync {
    // -- 리스팅
    async fn insert_listing(
        &self,
        auction_end_date: Option<DateTime<Utc>>,
        status: ListingStatus,
    ) -> Result<Listing>;
    async fn get_listing(&self, id: i64) -> Result<Listing>;
    /// 버전 가드 상태 전이. 불일치면 VersionConflict.
    async fn update_listing_status(
        &self,
        id: i64,
        expected_version: i64,
        status: ListingStatus,
    ) -> Result<Listing>;

    // -- 로트
    /// 신규 로트 기록. 소속 리스팅에 종료 기준 시각이 없으면 MissingEndDate.
    async fn insert_lot(&self, new: NewLot) -> Result<Lot>;
    async fn get_lot(&self, id: i64) -> Result<Lot>;
    /// 버전 가드 부분 갱신. 불일치면 VersionConflict.
    async fn update_lot(&self, id: i64, expected_version: i64, patch: LotPatch) -> Result<Lot>;
    /// 종료 시각이 지난 ACTIVE 로트 (lot_end_time, id 순 정렬)
    async fn find_due_lots(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Lot>>;
    /// cutoff 이전부터 CLOSING에 머문 로트 (워치독 대상)
    async fn find_stuck_closing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Lot>>;
    async fn lots_of_listing(&self, listing_id: i64) -> Result<Vec<Lot>>;

    // -- 입찰
    /// 조건부 입찰 기록: 요구 금액 이상일 때만 선두 캐시를 교체하고
    /// 입찰을 기록한다. 로트 단위 원자 연산이며 프로세스 락을 쓰지 않는다.
    async fn place_bid_if_higher(
        &self,
        lot_id: i64,
        bidder_id: i64,
        amount: i64,
        placed_at: DateTime<Utc>,
        min_increment: i64,
    ) -> Result<BidPlacement>;
    /// 현재 선두 입찰 (없으면 None)
    async fn winning_bid(&self, lot_id: i64) -> Result<Option<Bid>>;
    async fn bids_of_lot(&self, lot_id: i64) -> Result<Vec<Bid>>;

    // -- 프로모션
    async fn insert_promotion(
        &self,
        listing_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<Promotion>;
    async fn get_promotion(&self, id: i64) -> Result<Promotion>;
    async fn update_promotion(
        &self,
        id: i64,
        expected_version: i64,
        patch: PromotionPatch,
    ) -> Result<Promotion>;
    /// cutoff 이전에 생성돼 아직 PENDING인 프로모션 (만료 스윕 대상)
    async fn find_stale_pending_promotions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Promotion>>;

    // -- 웹훅 멱등성
    /// 이벤트 id가 이미 기록됐는지 조회 (기록 없이)
    async fn webhook_event_seen(&self, event_id: &str) -> Result<bool>;
    /// 이벤트 id 기록. 처음 보는 id면 true, 재전달이면 false.
    async fn record_webhook_event(&self, event_id: &str) -> Result<bool>;
}
// endregion: --- Store Trait

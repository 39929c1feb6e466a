/// Postgres 저장소 구현체
/// 모든 변이는 버전 가드 UPDATE 한 방 또는 단일 트랜잭션으로 처리한다.
/// 저장된 상태 문자열이 유효하지 않으면 기본값으로 대체하지 않고 거부한다.
// region:    --- Imports
use super::{queries, AuctionStore, BidPlacement, LotPatch, NewLot, PromotionPatch};
use crate::auction::model::{
    Bid, Listing, ListingStatus, Lot, LotStatus, PaymentStatus, Promotion, PromotionStatus,
};
use crate::database::DatabaseManager;
use crate::error::{AuctionError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

// endregion: --- Imports

// region:    --- Row Mapping
fn row_to_listing(row: &PgRow) -> Result<Listing> {
    Ok(Listing {
        id: row.try_get("id")?,
        auction_end_date: row.try_get("auction_end_date")?,
        status: ListingStatus::from_str(row.try_get::<String, _>("status")?.as_str())?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_lot(row: &PgRow) -> Result<Lot> {
    Ok(Lot {
        id: row.try_get("id")?,
        listing_id: row.try_get("listing_id")?,
        seq_index: row.try_get("seq_index")?,
        lot_end_time: row.try_get("lot_end_time")?,
        status: LotStatus::from_str(row.try_get::<String, _>("status")?.as_str())?,
        starting_price: row.try_get("starting_price")?,
        current_price: row.try_get("current_price")?,
        current_bidder: row.try_get("current_bidder")?,
        reserve_price: row.try_get("reserve_price")?,
        version: row.try_get("version")?,
        closing_since: row.try_get("closing_since")?,
    })
}

fn row_to_bid(row: &PgRow) -> Result<Bid> {
    Ok(Bid {
        id: row.try_get("id")?,
        lot_id: row.try_get("lot_id")?,
        bidder_id: row.try_get("bidder_id")?,
        amount: row.try_get("amount")?,
        placed_at: row.try_get("placed_at")?,
    })
}

fn row_to_promotion(row: &PgRow) -> Result<Promotion> {
    Ok(Promotion {
        id: row.try_get("id")?,
        listing_id: row.try_get("listing_id")?,
        status: PromotionStatus::from_str(row.try_get::<String, _>("status")?.as_str())?,
        payment_status: PaymentStatus::from_str(
            row.try_get::<String, _>("payment_status")?.as_str(),
        )?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
// endregion: --- Row Mapping

// region:    --- Postgres Store
pub struct PostgresAuctionStore {
    db: Arc<DatabaseManager>,
}

impl PostgresAuctionStore {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuctionStore for PostgresAuctionStore {
    async fn insert_listing(
        &self,
        auction_end_date: Option<DateTime<Utc>>,
        status: ListingStatus,
    ) -> Result<Listing> {
        let row = sqlx::query(queries::INSERT_LISTING)
            .bind(auction_end_date)
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;
        row_to_listing(&row)
    }

    async fn get_listing(&self, id: i64) -> Result<Listing> {
        let row = sqlx::query(queries::GET_LISTING)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(AuctionError::ListingNotFound(id))?;
        row_to_listing(&row)
    }

    async fn update_listing_status(
        &self,
        id: i64,
        expected_version: i64,
        status: ListingStatus,
    ) -> Result<Listing> {
        self.db
            .transaction(|tx| {
                Box::pin(async move {
                    let row = sqlx::query(queries::UPDATE_LISTING_STATUS)
                        .bind(id)
                        .bind(expected_version)
                        .bind(status.as_str())
                        .fetch_optional(&mut **tx)
                        .await?;
                    match row {
                        Some(row) => row_to_listing(&row),
                        // 갱신 실패 원인 구분: 미존재 vs 버전 불일치
                        None => {
                            let exists = sqlx::query(queries::LISTING_EXISTS)
                                .bind(id)
                                .fetch_optional(&mut **tx)
                                .await?
                                .is_some();
                            if exists {
                                Err(AuctionError::VersionConflict {
                                    entity: "listing",
                                    id,
                                    expected: expected_version,
                                })
                            } else {
                                Err(AuctionError::ListingNotFound(id))
                            }
                        }
                    }
                })
            })
            .await
    }

    async fn insert_lot(&self, new: NewLot) -> Result<Lot> {
        self.db
            .transaction(|tx| {
                Box::pin(async move {
                    // 종료 기준 시각 없는 리스팅 아래에는 로트를 만들 수 없다
                    let listing = sqlx::query(queries::GET_LISTING)
                        .bind(new.listing_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or(AuctionError::ListingNotFound(new.listing_id))?;
                    let end_date: Option<DateTime<Utc>> = listing.try_get("auction_end_date")?;
                    if end_date.is_none() {
                        return Err(AuctionError::MissingEndDate(new.listing_id));
                    }

                    let row = sqlx::query(queries::INSERT_LOT)
                        .bind(new.listing_id)
                        .bind(new.seq_index)
                        .bind(new.lot_end_time)
                        .bind(new.starting_price)
                        .bind(new.reserve_price)
                        .fetch_one(&mut **tx)
                        .await?;
                    row_to_lot(&row)
                })
            })
            .await
    }

    async fn get_lot(&self, id: i64) -> Result<Lot> {
        let row = sqlx::query(queries::GET_LOT)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(AuctionError::LotNotFound(id))?;
        row_to_lot(&row)
    }

    async fn update_lot(&self, id: i64, expected_version: i64, patch: LotPatch) -> Result<Lot> {
        self.db
            .transaction(|tx| {
                Box::pin(async move {
                    let row = sqlx::query(queries::UPDATE_LOT)
                        .bind(id)
                        .bind(expected_version)
                        .bind(patch.status.map(|s| s.as_str()))
                        .bind(patch.lot_end_time)
                        .bind(patch.closing_since.is_some())
                        .bind(patch.closing_since.flatten())
                        .fetch_optional(&mut **tx)
                        .await?;
                    match row {
                        Some(row) => row_to_lot(&row),
                        None => {
                            let exists = sqlx::query(queries::LOT_EXISTS)
                                .bind(id)
                                .fetch_optional(&mut **tx)
                                .await?
                                .is_some();
                            if exists {
                                Err(AuctionError::VersionConflict {
                                    entity: "lot",
                                    id,
                                    expected: expected_version,
                                })
                            } else {
                                Err(AuctionError::LotNotFound(id))
                            }
                        }
                    }
                })
            })
            .await
    }

    async fn find_due_lots(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Lot>> {
        let rows = sqlx::query(queries::FIND_DUE_LOTS)
            .bind(now)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_lot).collect()
    }

    async fn find_stuck_closing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Lot>> {
        let rows = sqlx::query(queries::FIND_STUCK_CLOSING)
            .bind(cutoff)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_lot).collect()
    }

    async fn lots_of_listing(&self, listing_id: i64) -> Result<Vec<Lot>> {
        let rows = sqlx::query(queries::LOTS_OF_LISTING)
            .bind(listing_id)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_lot).collect()
    }

    async fn place_bid_if_higher(
        &self,
        lot_id: i64,
        bidder_id: i64,
        amount: i64,
        placed_at: DateTime<Utc>,
        min_increment: i64,
    ) -> Result<BidPlacement> {
        self.db
            .transaction(|tx| {
                Box::pin(async move {
                    // 행 잠금으로 같은 로트의 동시 입찰을 직렬화한다.
                    let row = sqlx::query(queries::GET_LOT_FOR_UPDATE)
                        .bind(lot_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or(AuctionError::LotNotFound(lot_id))?;
                    let lot = row_to_lot(&row)?;

                    if lot.status != LotStatus::Active {
                        return Err(AuctionError::LotClosed { lot_id });
                    }

                    // 첫 입찰은 시작가 이상, 이후는 현재가 + 증가 단위 이상.
                    let required = if lot.has_bid() {
                        lot.current_price + min_increment
                    } else {
                        lot.starting_price
                    };
                    if amount < required {
                        return Err(AuctionError::BidTooLow { amount, required });
                    }

                    // 밀려나는 이전 선두 조회 (outbid 알림 대상)
                    let outbid = match lot.current_bidder {
                        Some(bidder) => {
                            let row = sqlx::query(queries::GET_LEADER_BID)
                                .bind(lot_id)
                                .bind(bidder)
                                .bind(lot.current_price)
                                .fetch_optional(&mut **tx)
                                .await?;
                            row.map(|r| row_to_bid(&r)).transpose()?
                        }
                        None => None,
                    };

                    sqlx::query(queries::UPDATE_LOT_LEADER)
                        .bind(lot_id)
                        .bind(amount)
                        .bind(bidder_id)
                        .execute(&mut **tx)
                        .await?;

                    let row = sqlx::query(queries::INSERT_BID)
                        .bind(lot_id)
                        .bind(bidder_id)
                        .bind(amount)
                        .bind(placed_at)
                        .fetch_one(&mut **tx)
                        .await?;
                    let bid = row_to_bid(&row)?;

                    Ok(BidPlacement { bid, outbid })
                })
            })
            .await
    }

    async fn winning_bid(&self, lot_id: i64) -> Result<Option<Bid>> {
        let lot = self.get_lot(lot_id).await?;
        let Some(bidder) = lot.current_bidder else {
            return Ok(None);
        };
        let row = sqlx::query(queries::GET_LEADER_BID)
            .bind(lot_id)
            .bind(bidder)
            .bind(lot.current_price)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|r| row_to_bid(&r)).transpose()
    }

    async fn bids_of_lot(&self, lot_id: i64) -> Result<Vec<Bid>> {
        let rows = sqlx::query(queries::GET_BID_HISTORY)
            .bind(lot_id)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_bid).collect()
    }

    async fn insert_promotion(
        &self,
        listing_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<Promotion> {
        let row = sqlx::query(queries::INSERT_PROMOTION)
            .bind(listing_id)
            .bind(created_at)
            .fetch_one(self.db.pool())
            .await?;
        row_to_promotion(&row)
    }

    async fn get_promotion(&self, id: i64) -> Result<Promotion> {
        let row = sqlx::query(queries::GET_PROMOTION)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(AuctionError::PromotionNotFound(id))?;
        row_to_promotion(&row)
    }

    async fn update_promotion(
        &self,
        id: i64,
        expected_version: i64,
        patch: PromotionPatch,
    ) -> Result<Promotion> {
        self.db
            .transaction(|tx| {
                Box::pin(async move {
                    let row = sqlx::query(queries::UPDATE_PROMOTION)
                        .bind(id)
                        .bind(expected_version)
                        .bind(patch.status.map(|s| s.as_str()))
                        .bind(patch.payment_status.map(|s| s.as_str()))
                        .bind(patch.updated_at)
                        .fetch_optional(&mut **tx)
                        .await?;
                    match row {
                        Some(row) => row_to_promotion(&row),
                        None => {
                            let exists = sqlx::query(queries::PROMOTION_EXISTS)
                                .bind(id)
                                .fetch_optional(&mut **tx)
                                .await?
                                .is_some();
                            if exists {
                                Err(AuctionError::VersionConflict {
                                    entity: "promotion",
                                    id,
                                    expected: expected_version,
                                })
                            } else {
                                Err(AuctionError::PromotionNotFound(id))
                            }
                        }
                    }
                })
            })
            .await
    }

    async fn find_stale_pending_promotions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Promotion>> {
        let rows = sqlx::query(queries::FIND_STALE_PENDING)
            .bind(cutoff)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_promotion).collect()
    }

    async fn webhook_event_seen(&self, event_id: &str) -> Result<bool> {
        let row = sqlx::query(queries::WEBHOOK_EVENT_SEEN)
            .bind(event_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some())
    }

    async fn record_webhook_event(&self, event_id: &str) -> Result<bool> {
        let row = sqlx::query(queries::RECORD_WEBHOOK_EVENT)
            .bind(event_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some())
    }
}
// endregion: --- Postgres Store

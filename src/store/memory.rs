/// 인메모리 저장소 구현체
/// 외부 인프라 없이 도는 테스트/로컬 백엔드.
/// 연산 하나가 쓰기 락 하나를 잡으므로 각 연산은 원자적이고,
/// 버전 가드 계약은 Postgres 구현체와 동일하게 지킨다.
// region:    --- Imports
use super::{AuctionStore, BidPlacement, LotPatch, NewLot, PromotionPatch};
use crate::auction::model::{
    Bid, Listing, ListingStatus, Lot, LotStatus, PaymentStatus, Promotion, PromotionStatus,
};
use crate::error::{AuctionError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

// endregion: --- Imports

// region:    --- Memory Store
#[derive(Default)]
struct Inner {
    listings: HashMap<i64, Listing>,
    lots: HashMap<i64, Lot>,
    bids: HashMap<i64, Vec<Bid>>,
    promotions: HashMap<i64, Promotion>,
    webhook_seen: HashSet<String>,
    next_id: i64,
}

impl Inner {
    fn alloc_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryAuctionStore {
    inner: RwLock<Inner>,
}

impl MemoryAuctionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuctionStore for MemoryAuctionStore {
    async fn insert_listing(
        &self,
        auction_end_date: Option<DateTime<Utc>>,
        status: ListingStatus,
    ) -> Result<Listing> {
        let mut inner = self.inner.write().await;
        let id = inner.alloc_id();
        let listing = Listing {
            id,
            auction_end_date,
            status,
            version: 1,
            created_at: Utc::now(),
        };
        inner.listings.insert(id, listing.clone());
        Ok(listing)
    }

    async fn get_listing(&self, id: i64) -> Result<Listing> {
        self.inner
            .read()
            .await
            .listings
            .get(&id)
            .cloned()
            .ok_or(AuctionError::ListingNotFound(id))
    }

    async fn update_listing_status(
        &self,
        id: i64,
        expected_version: i64,
        status: ListingStatus,
    ) -> Result<Listing> {
        let mut inner = self.inner.write().await;
        let listing = inner
            .listings
            .get_mut(&id)
            .ok_or(AuctionError::ListingNotFound(id))?;
        if listing.version != expected_version {
            return Err(AuctionError::VersionConflict {
                entity: "listing",
                id,
                expected: expected_version,
            });
        }
        listing.status = status;
        listing.version += 1;
        Ok(listing.clone())
    }

    async fn insert_lot(&self, new: NewLot) -> Result<Lot> {
        let mut inner = self.inner.write().await;
        let listing = inner
            .listings
            .get(&new.listing_id)
            .ok_or(AuctionError::ListingNotFound(new.listing_id))?;
        // 종료 기준 시각 없는 리스팅 아래에는 로트를 만들 수 없다
        if listing.auction_end_date.is_none() {
            return Err(AuctionError::MissingEndDate(new.listing_id));
        }
        let id = inner.alloc_id();
        let lot = Lot {
            id,
            listing_id: new.listing_id,
            seq_index: new.seq_index,
            lot_end_time: new.lot_end_time,
            status: LotStatus::Active,
            starting_price: new.starting_price,
            current_price: new.starting_price,
            current_bidder: None,
            reserve_price: new.reserve_price,
            version: 1,
            closing_since: None,
        };
        inner.lots.insert(id, lot.clone());
        Ok(lot)
    }

    async fn get_lot(&self, id: i64) -> Result<Lot> {
        self.inner
            .read()
            .await
            .lots
            .get(&id)
            .cloned()
            .ok_or(AuctionError::LotNotFound(id))
    }

    async fn update_lot(&self, id: i64, expected_version: i64, patch: LotPatch) -> Result<Lot> {
        let mut inner = self.inner.write().await;
        let lot = inner.lots.get_mut(&id).ok_or(AuctionError::LotNotFound(id))?;
        if lot.version != expected_version {
            return Err(AuctionError::VersionConflict {
                entity: "lot",
                id,
                expected: expected_version,
            });
        }
        if let Some(status) = patch.status {
            lot.status = status;
        }
        if let Some(end_time) = patch.lot_end_time {
            lot.lot_end_time = end_time;
        }
        if let Some(closing_since) = patch.closing_since {
            lot.closing_since = closing_since;
        }
        lot.version += 1;
        Ok(lot.clone())
    }

    async fn find_due_lots(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Lot>> {
        let inner = self.inner.read().await;
        let mut due: Vec<Lot> = inner
            .lots
            .values()
            .filter(|l| l.status == LotStatus::Active && l.lot_end_time <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.lot_end_time.cmp(&b.lot_end_time).then(a.id.cmp(&b.id)));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn find_stuck_closing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Lot>> {
        let inner = self.inner.read().await;
        let mut stuck: Vec<Lot> = inner
            .lots
            .values()
            .filter(|l| {
                l.status == LotStatus::Closing
                    && l.closing_since.map_or(true, |since| since <= cutoff)
            })
            .cloned()
            .collect();
        stuck.sort_by_key(|l| l.id);
        Ok(stuck)
    }

    async fn lots_of_listing(&self, listing_id: i64) -> Result<Vec<Lot>> {
        let inner = self.inner.read().await;
        if !inner.listings.contains_key(&listing_id) {
            return Err(AuctionError::ListingNotFound(listing_id));
        }
        let mut lots: Vec<Lot> = inner
            .lots
            .values()
            .filter(|l| l.listing_id == listing_id)
            .cloned()
            .collect();
        lots.sort_by_key(|l| l.seq_index);
        Ok(lots)
    }

    async fn place_bid_if_higher(
        &self,
        lot_id: i64,
        bidder_id: i64,
        amount: i64,
        placed_at: DateTime<Utc>,
        min_increment: i64,
    ) -> Result<BidPlacement> {
        let mut inner = self.inner.write().await;
        let lot = inner
            .lots
            .get(&lot_id)
            .cloned()
            .ok_or(AuctionError::LotNotFound(lot_id))?;
        if lot.status != LotStatus::Active {
            return Err(AuctionError::LotClosed { lot_id });
        }

        // 첫 입찰은 시작가 이상, 이후 입찰은 현재가 + 증가 단위 이상.
        // 동액은 항상 미달 처리되므로 먼저 기록된 입찰이 선두를 지킨다.
        let required = if lot.has_bid() {
            lot.current_price + min_increment
        } else {
            lot.starting_price
        };
        if amount < required {
            return Err(AuctionError::BidTooLow { amount, required });
        }

        let outbid = previous_leader(&inner, &lot);

        let id = inner.alloc_id();
        let bid = Bid {
            id,
            lot_id,
            bidder_id,
            amount,
            placed_at,
        };
        inner.bids.entry(lot_id).or_default().push(bid.clone());

        let lot = inner
            .lots
            .get_mut(&lot_id)
            .ok_or(AuctionError::LotNotFound(lot_id))?;
        lot.current_price = amount;
        lot.current_bidder = Some(bidder_id);
        lot.version += 1;

        Ok(BidPlacement { bid, outbid })
    }

    async fn winning_bid(&self, lot_id: i64) -> Result<Option<Bid>> {
        let inner = self.inner.read().await;
        let lot = inner
            .lots
            .get(&lot_id)
            .ok_or(AuctionError::LotNotFound(lot_id))?;
        Ok(previous_leader(&inner, lot))
    }

    async fn bids_of_lot(&self, lot_id: i64) -> Result<Vec<Bid>> {
        let inner = self.inner.read().await;
        if !inner.lots.contains_key(&lot_id) {
            return Err(AuctionError::LotNotFound(lot_id));
        }
        let mut bids = inner.bids.get(&lot_id).cloned().unwrap_or_default();
        bids.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        Ok(bids)
    }

    async fn insert_promotion(
        &self,
        listing_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<Promotion> {
        let mut inner = self.inner.write().await;
        if !inner.listings.contains_key(&listing_id) {
            return Err(AuctionError::ListingNotFound(listing_id));
        }
        let id = inner.alloc_id();
        let promotion = Promotion {
            id,
            listing_id,
            status: PromotionStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            version: 1,
            created_at,
            updated_at: created_at,
        };
        inner.promotions.insert(id, promotion.clone());
        Ok(promotion)
    }

    async fn get_promotion(&self, id: i64) -> Result<Promotion> {
        self.inner
            .read()
            .await
            .promotions
            .get(&id)
            .cloned()
            .ok_or(AuctionError::PromotionNotFound(id))
    }

    async fn update_promotion(
        &self,
        id: i64,
        expected_version: i64,
        patch: PromotionPatch,
    ) -> Result<Promotion> {
        let mut inner = self.inner.write().await;
        let promotion = inner
            .promotions
            .get_mut(&id)
            .ok_or(AuctionError::PromotionNotFound(id))?;
        if promotion.version != expected_version {
            return Err(AuctionError::VersionConflict {
                entity: "promotion",
                id,
                expected: expected_version,
            });
        }
        if let Some(status) = patch.status {
            promotion.status = status;
        }
        if let Some(payment_status) = patch.payment_status {
            promotion.payment_status = payment_status;
        }
        if let Some(updated_at) = patch.updated_at {
            promotion.updated_at = updated_at;
        }
        promotion.version += 1;
        Ok(promotion.clone())
    }

    async fn find_stale_pending_promotions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Promotion>> {
        let inner = self.inner.read().await;
        let mut stale: Vec<Promotion> = inner
            .promotions
            .values()
            .filter(|p| p.status == PromotionStatus::Pending && p.created_at <= cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.id);
        Ok(stale)
    }

    async fn webhook_event_seen(&self, event_id: &str) -> Result<bool> {
        Ok(self.inner.read().await.webhook_seen.contains(event_id))
    }

    async fn record_webhook_event(&self, event_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.webhook_seen.insert(event_id.to_string()))
    }
}

/// 로트의 현재 선두 입찰을 실제 입찰 기록에서 찾는다.
/// 캐시(current_bidder)가 가리키는 금액과 일치하는 입찰 중 가장 이른 것.
fn previous_leader(inner: &Inner, lot: &Lot) -> Option<Bid> {
    let bidder = lot.current_bidder?;
    inner
        .bids
        .get(&lot.id)?
        .iter()
        .filter(|b| b.bidder_id == bidder && b.amount == lot.current_price)
        .min_by_key(|b| b.placed_at)
        .cloned()
}
// endregion: --- Memory Store

/// 경매 도메인 모델
/// 리스팅(묶음) - 로트(개별 판매 단위) - 입찰 - 프로모션
// region:    --- Imports
use crate::error::AuctionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// endregion: --- Imports

// region:    --- Status Enums
/// 리스팅 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    Draft,
    Active,
    Closing,
    Closed,
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for ListingStatus {
    type Err = AuctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "ACTIVE" => Ok(Self::Active),
            "CLOSING" => Ok(Self::Closing),
            "CLOSED" => Ok(Self::Closed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(AuctionError::MalformedDocument(format!(
                "알 수 없는 리스팅 상태: {other}"
            ))),
        }
    }
}

/// 로트 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotStatus {
    Active,
    Closing,
    Sold,
    Unsold,
    Cancelled,
}

impl LotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Closing => "CLOSING",
            Self::Sold => "SOLD",
            Self::Unsold => "UNSOLD",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// 터미널 상태 여부 (스케줄러가 더 이상 건드리지 않음)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sold | Self::Unsold | Self::Cancelled)
    }
}

impl FromStr for LotStatus {
    type Err = AuctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "CLOSING" => Ok(Self::Closing),
            "SOLD" => Ok(Self::Sold),
            "UNSOLD" => Ok(Self::Unsold),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(AuctionError::MalformedDocument(format!(
                "알 수 없는 로트 상태: {other}"
            ))),
        }
    }
}

/// 프로모션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionStatus {
    Pending,
    Active,
    Expired,
    Failed,
}

impl PromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for PromotionStatus {
    type Err = AuctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACTIVE" => Ok(Self::Active),
            "EXPIRED" => Ok(Self::Expired),
            "FAILED" => Ok(Self::Failed),
            other => Err(AuctionError::MalformedDocument(format!(
                "알 수 없는 프로모션 상태: {other}"
            ))),
        }
    }
}

/// 결제 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "UNPAID",
            Self::Paid => "PAID",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = AuctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNPAID" => Ok(Self::Unpaid),
            "PAID" => Ok(Self::Paid),
            "REFUNDED" => Ok(Self::Refunded),
            other => Err(AuctionError::MalformedDocument(format!(
                "알 수 없는 결제 상태: {other}"
            ))),
        }
    }
}
// endregion: --- Status Enums

// region:    --- Entities
/// 리스팅 모델 (로트 묶음, 경매 종료 기준 시각의 소유자)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    /// 경매 종료 기준 시각. 로트 활성화 전 반드시 설정되어야 한다.
    pub auction_end_date: Option<DateTime<Utc>>,
    pub status: ListingStatus,
    /// 낙관적 동시성 버전
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// 로트 모델 (개별 종료 시각을 가진 판매 단위)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    pub id: i64,
    pub listing_id: i64,
    /// 리스팅 내 0-기반 순번. 생성 후 불변.
    pub seq_index: i32,
    /// 파생 종료 시각: auction_end_date + seq_index * Δ
    pub lot_end_time: DateTime<Utc>,
    pub status: LotStatus,
    pub starting_price: i64,
    /// 현재 최고가 캐시 (입찰 없으면 starting_price)
    pub current_price: i64,
    /// 현재 선두 입찰자 캐시
    pub current_bidder: Option<i64>,
    /// 최저 낙찰가. None이면 제한 없음.
    pub reserve_price: Option<i64>,
    /// 낙관적 동시성 버전
    pub version: i64,
    /// CLOSING 진입 시각 (워치독 판정용)
    pub closing_since: Option<DateTime<Utc>>,
}

impl Lot {
    /// 선두 입찰 존재 여부
    pub fn has_bid(&self) -> bool {
        self.current_bidder.is_some()
    }

    /// reserve 충족 여부 (reserve 미설정이면 항상 충족)
    pub fn reserve_met(&self) -> bool {
        self.reserve_price.map_or(true, |r| self.current_price >= r)
    }
}

/// 입찰 모델
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: i64,
    pub lot_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
}

/// 프로모션 모델 (리스팅 노출 부스트, 결제 확인 후에만 활성화)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub id: i64,
    pub listing_id: i64,
    pub status: PromotionStatus,
    pub payment_status: PaymentStatus,
    /// 낙관적 동시성 버전
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
// endregion: --- Entities

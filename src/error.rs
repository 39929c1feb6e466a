/// 경매 코어 공통 에러 타입
/// 핸들러 응답의 "code" 필드는 각 variant의 code()로 내려간다.
// region:    --- Imports
use thiserror::Error;

// endregion: --- Imports

// region:    --- Error
pub type Result<T> = std::result::Result<T, AuctionError>;

#[derive(Debug, Error)]
pub enum AuctionError {
    /// 리스팅 없음 (터미널, 재시도 금지)
    #[error("리스팅을 찾을 수 없습니다: {0}")]
    ListingNotFound(i64),

    /// 로트 없음 (터미널, 재시도 금지)
    #[error("로트를 찾을 수 없습니다: {0}")]
    LotNotFound(i64),

    /// 프로모션 없음 (터미널, 웹훅은 ACK 후 무시)
    #[error("프로모션을 찾을 수 없습니다: {0}")]
    PromotionNotFound(i64),

    /// 종료된 로트에 대한 입찰
    #[error("로트 {lot_id}의 경매가 이미 종료되었습니다")]
    LotClosed { lot_id: i64 },

    /// 입찰 금액이 현재 가격 이하
    #[error("입찰 금액 {amount}이(가) 요구 최소 금액 {required}보다 낮습니다")]
    BidTooLow { amount: i64, required: i64 },

    /// 경매 종료 시간이 설정되지 않은 리스팅
    #[error("리스팅 {0}에 경매 종료 시간이 설정되지 않았습니다")]
    MissingEndDate(i64),

    /// 낙관적 동시성 버전 충돌 (스케줄러는 다음 스캔에서 재시도)
    #[error("버전 충돌: entity {entity} id {id} expected {expected}")]
    VersionConflict {
        entity: &'static str,
        id: i64,
        expected: i64,
    },

    /// 입찰 재시도 한도 초과
    #[error("최대 재시도 횟수 초과")]
    MaxRetriesExceeded,

    /// 웹훅 서명 검증 실패 (이벤트 단위 터미널)
    #[error("웹훅 서명 검증에 실패했습니다")]
    InvalidSignature,

    /// 저장된 문서의 필드가 유효하지 않음 (기본값 대체 금지, 거부)
    #[error("유효하지 않은 저장 문서: {0}")]
    MalformedDocument(String),

    /// 저장소 일시 장애 (스케줄러 루프가 백오프 후 재시도)
    #[error("저장소 오류: {0}")]
    Store(#[from] sqlx::Error),

    /// 알림 발행 실패
    #[error("알림 발행 실패: {0}")]
    Notification(String),
}

impl AuctionError {
    /// 핸들러 응답용 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            Self::ListingNotFound(_) => "LISTING_NOT_FOUND",
            Self::LotNotFound(_) => "LOT_NOT_FOUND",
            Self::PromotionNotFound(_) => "PROMOTION_NOT_FOUND",
            Self::LotClosed { .. } => "ALREADY_ENDED",
            Self::BidTooLow { .. } => "LOW_BID",
            Self::MissingEndDate(_) => "MISSING_END_DATE",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::MalformedDocument(_) => "MALFORMED_DOCUMENT",
            Self::Store(_) => "STORE_ERROR",
            Self::Notification(_) => "NOTIFICATION_ERROR",
        }
    }

    /// 버전 충돌 여부 (입찰 재시도 루프에서 사용)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
// endregion: --- Error

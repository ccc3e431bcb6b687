//! 에러 타입 정의

use thiserror::Error;

/// Large packet 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("잘못된 {kind} 메시지: {reason}")]
    MalformedMessage {
        kind: &'static str,
        reason: &'static str,
    },

    #[error("데이터그램 전송 실패: {0}")]
    TransportFailure(#[source] std::io::Error),

    #[error("재전송 요청 한도 초과: packet_id={packet_id}, attempts={attempts}")]
    RetryBudgetExhausted { packet_id: u16, attempts: u8 },

    #[error("페이로드가 너무 큼: {len} bytes (최대 {max})")]
    OversizedPayload { len: usize, max: usize },

    #[error("빈 페이로드는 등록할 수 없음")]
    EmptyPayload,

    #[error("유효하지 않은 프래그먼트 수: {count}")]
    InvalidFragmentCount { count: u8 },

    #[error("세션 불일치: expected packet_id={expected}, got {got}")]
    SessionMismatch { expected: u16, got: u16 },

    #[error("이미 전송 중: packet_id={packet_id}")]
    Busy { packet_id: u16 },

    #[error("전송 상대 주소가 정해지지 않음: packet_id={packet_id}")]
    MissingPeer { packet_id: u16 },

    #[error("등록된 송신 페이로드 없음")]
    NothingRegistered,

    #[error("이벤트 채널 닫힘")]
    ChannelClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(kind: &'static str, reason: &'static str) -> Self {
        Self::MalformedMessage { kind, reason }
    }
}

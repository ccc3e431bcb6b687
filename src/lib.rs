//! # Large Packet
//!
//! 제한된 메시 무선 링크 위에서 단일 프레임보다 큰 페이로드를 전송하는
//! 선택적 재전송(selective ARQ) 프로토콜
//!
//! ## 핵심 특징
//! - **분할/조립**: 페이로드를 최대 64개의 330바이트 프래그먼트로 분할
//! - **비트마스크 추적**: 64비트 마스크 하나로 송신 대기/수신 완료 관리
//! - **선택적 재전송**: 타임아웃 시 누락된 프래그먼트만 다시 요청
//! - **고정 페이싱**: 주기당 프래그먼트 하나, 혼잡 제어 없음
//! - **역할당 단일 전송**: 새 전송은 진행 중인 전송을 즉시 취소

pub mod config;
mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod mask;
pub mod message;
mod receiver;
mod sender;
pub mod transfer;
pub mod transport;

pub use config::Config;
pub use endpoint::{Endpoint, Role};
pub use error::{Error, Result};
pub use event::{CompletedTransfer, Event, EventReceiver, RequestEvent, SignalEvent};
pub use mask::{fragment_count_for, full_mask_for, FragmentMask};
pub use message::{FragmentMessage, Message, MessageType, RequestMessage, SignalMessage};
pub use transfer::TransferRecord;
pub use transport::{Transport, UdpTransport};

/// 프래그먼트 하나에 실리는 최대 페이로드 (바이트)
///
/// 무선 프레임 하나보다 클 수 있으며, 이 경우 하위 계층(6LoWPAN)이 다시 나눈다.
pub const FRAGMENT_MAX_BYTES: usize = 330;

/// 전송 하나를 구성하는 최대 프래그먼트 수 (요청 마스크의 비트 폭)
pub const MAX_FRAGMENTS: usize = 64;

/// 등록 가능한 최대 페이로드 크기 (바이트)
pub const MAX_PAYLOAD_BYTES: usize = FRAGMENT_MAX_BYTES * MAX_FRAGMENTS;

/// 메시지 타입 태그 길이
pub const TAG_LEN: usize = 2;

/// 수신자가 Signal을 기다리는 포트
pub const DEFAULT_RX_PORT: u16 = 1520;

/// 수신자가 기본으로 요청하는 프래그먼트 간격 (밀리초)
///
/// 송신 큐가 넘치지 않을 만큼 길어야 한다.
pub const DEFAULT_REQUEST_PERIOD_MS: u16 = 800;

/// 수신 세션당 최대 재전송 요청 횟수
pub const MAX_RETRANSMISSION_REQUESTS: u8 = 4;

/// 수신 타임아웃 = 이 값 × 페이싱 주기
pub const RECEIVE_TIMEOUT_FACTOR: u32 = 10;

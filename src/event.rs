//! 애플리케이션 이벤트
//!
//! 디스패처와 두 상태 머신이 애플리케이션에 알리는 사건들

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::mask::FragmentMask;
use crate::Error;

/// 이벤트 채널 수신기 타입
pub type EventReceiver = mpsc::Receiver<Event>;

/// 수신한 전송 준비 알림
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEvent {
    pub packet_id: u16,
    pub fragment_count: u8,
    /// Signal을 보낸 노드 (요청 목적지)
    pub source: SocketAddr,
}

/// 수신한 (재)전송 요청
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestEvent {
    pub packet_id: u16,
    pub mask: FragmentMask,
    pub period_ms: u16,
    /// 요청한 노드 (프래그먼트 목적지)
    pub source: SocketAddr,
}

/// 조립이 끝난 페이로드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub packet_id: u16,
    pub peer: SocketAddr,
    pub payload: Bytes,
}

/// 애플리케이션 이벤트
#[derive(Debug)]
pub enum Event {
    /// 상대가 보낼 페이로드가 있음을 알림
    SignalReceived(SignalEvent),

    /// 상대가 프래그먼트를 요청함
    RequestReceived(RequestEvent),

    /// 수신 세션이 프래그먼트를 받아들임
    FragmentReceived {
        packet_id: u16,
        index: u8,
        fragment_count: u8,
        source: SocketAddr,
    },

    /// 수신 완료
    TransferComplete(CompletedTransfer),

    /// 수신 세션 중단 (재시도 한도 초과, 세션 불일치)
    ReceiveAborted { packet_id: u16, error: Error },

    /// 요청된 프래그먼트를 모두 보냄
    SendComplete { packet_id: u16 },

    /// 전송 실패로 송신 중단
    SendFailed { packet_id: u16, error: Error },
}

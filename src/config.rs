//! 프로토콜 설정

use std::time::Duration;

use crate::{
    DEFAULT_REQUEST_PERIOD_MS, DEFAULT_RX_PORT, MAX_RETRANSMISSION_REQUESTS,
    RECEIVE_TIMEOUT_FACTOR,
};

/// Large packet 엔드포인트 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 수신자 역할이 바인딩하는 포트 (Signal 목적지 포트)
    pub rx_port: u16,

    /// `start_receive`가 기본으로 요청하는 프래그먼트 간격 (밀리초)
    pub request_period_ms: u16,

    /// 수신 세션당 재전송 요청 횟수
    pub max_retransmission_requests: u8,

    /// 수신 타임아웃 배수 (타임아웃 = 배수 × 페이싱 주기)
    pub receive_timeout_factor: u32,

    /// 결함 주입: 수신 프래그먼트를 버리는 확률 (0 ~ 100 %)
    /// 재전송 경로 테스트용, 0이면 비활성
    pub fault_rate_percent: u8,

    /// 수신 세션을 (packet_id, 송신자 주소) 쌍으로 식별
    /// false면 packet_id만 비교
    pub match_peer_address: bool,

    /// 애플리케이션 이벤트 채널 크기
    pub event_queue_depth: usize,

    /// 디스패처 → 수신 상태 머신 큐 크기
    /// 가득 차면 프래그먼트는 버려지고 재전송 요청으로 복구된다
    pub fragment_queue_depth: usize,

    /// UDP 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rx_port: DEFAULT_RX_PORT,
            request_period_ms: DEFAULT_REQUEST_PERIOD_MS, // 800ms
            max_retransmission_requests: MAX_RETRANSMISSION_REQUESTS,
            receive_timeout_factor: RECEIVE_TIMEOUT_FACTOR,
            fault_rate_percent: 0,
            match_peer_address: false,
            event_queue_depth: 64,
            fragment_queue_depth: 16,
            recv_buffer_size: 1500,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 시도당 수신 타임아웃 계산
    ///
    /// 주기 0은 1ms로 취급한다.
    pub fn receive_timeout(&self, period_ms: u16) -> Duration {
        let period = u64::from(period_ms.max(1));
        Duration::from_millis(period * u64::from(self.receive_timeout_factor.max(1)))
    }

    /// 결함 주입 비율 설정
    pub fn with_fault_injection(mut self, percent: u8) -> Self {
        self.fault_rate_percent = percent.min(100);
        self
    }

    /// 저사양 노드용 설정
    pub fn low_spec() -> Self {
        Self {
            request_period_ms: 1200,
            event_queue_depth: 16,
            fragment_queue_depth: 4,
            recv_buffer_size: 512,
            ..Self::default()
        }
    }

    /// 불안정한 링크용 설정
    pub fn unstable_network() -> Self {
        Self {
            request_period_ms: 1500,
            receive_timeout_factor: 15,
            fragment_queue_depth: 32,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_timeout() {
        let config = Config::default();
        assert_eq!(config.receive_timeout(800), Duration::from_millis(8000));

        // 주기 0이 즉시 타임아웃으로 이어지면 안 됨
        assert_eq!(config.receive_timeout(0), Duration::from_millis(10));
    }

    #[test]
    fn test_fault_injection_clamped() {
        let config = Config::new().with_fault_injection(250);
        assert_eq!(config.fault_rate_percent, 100);
    }

    #[test]
    fn test_presets_keep_protocol_constants() {
        for config in [Config::low_spec(), Config::unstable_network()] {
            assert_eq!(config.rx_port, DEFAULT_RX_PORT);
            assert_eq!(config.max_retransmission_requests, MAX_RETRANSMISSION_REQUESTS);
        }
    }
}

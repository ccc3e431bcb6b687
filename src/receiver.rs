//! 프래그먼트 수신 상태 머신
//!
//! - 프래그먼트 수신 및 조립
//! - 타임아웃 시 누락 프래그먼트만 재전송 요청 (최대 N회)
//! - 완료 또는 중단을 애플리케이션에 보고

use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::event::{CompletedTransfer, Event};
use crate::mask::FragmentMask;
use crate::message::{FragmentMessage, RequestMessage};
use crate::transfer::{TransferRecord, WriteOutcome};
use crate::transport::Transport;
use crate::{Config, Error};

/// 디스패처가 수신 세션에 넘기는 프래그먼트
///
/// 페이로드는 이벤트마다 소유된 버퍼다.
#[derive(Debug, Clone)]
pub(crate) struct InboundFragment {
    pub message: FragmentMessage,
    pub source: SocketAddr,
}

/// 이벤트 하나를 처리한 결과
#[derive(Debug)]
pub(crate) enum Progress {
    /// 상태 변화 없음 (결함 주입, 중복, 다른 주소, 형식 불일치)
    Ignored,
    /// 새 프래그먼트 기록
    Accepted { index: u8 },
    /// 마지막 프래그먼트 기록, 조립 완료
    Complete { index: u8 },
    /// 누락분 재전송 요청
    Requested { mask: FragmentMask },
    /// 세션 중단
    Aborted(Error),
}

/// 수신 상태 머신
pub(crate) struct FragmentReceiver {
    record: TransferRecord,
    peer: SocketAddr,
    retries_remaining: u8,
    transport: Arc<dyn Transport>,
    config: Config,
}

impl FragmentReceiver {
    pub(crate) fn new(
        record: TransferRecord,
        peer: SocketAddr,
        transport: Arc<dyn Transport>,
        config: Config,
    ) -> Self {
        Self {
            record,
            peer,
            retries_remaining: config.max_retransmission_requests,
            transport,
            config,
        }
    }

    /// 결함 주입 (재전송 경로 테스트용)
    fn fault_injected(&self) -> bool {
        self.config.fault_rate_percent > 0
            && rand::thread_rng().gen_range(0..100u8) < self.config.fault_rate_percent
    }

    /// 프래그먼트 도착
    ///
    /// 기록과 완료 판정은 중간에 양보 없이 한 번에 처리한다.
    pub(crate) fn on_fragment(&mut self, inbound: &InboundFragment) -> Progress {
        let fragment = &inbound.message;

        if self.fault_injected() {
            debug!(
                "패킷 손실 시뮬레이션: 프래그먼트 {} 폐기",
                fragment.index
            );
            return Progress::Ignored;
        }

        if self.config.match_peer_address && inbound.source != self.peer {
            trace!(
                "다른 노드의 프래그먼트 무시: from {}, expected {}",
                inbound.source,
                self.peer
            );
            return Progress::Ignored;
        }

        if fragment.packet_id != self.record.packet_id {
            return Progress::Aborted(Error::SessionMismatch {
                expected: self.record.packet_id,
                got: fragment.packet_id,
            });
        }

        match self.record.write_fragment(fragment) {
            WriteOutcome::Accepted if self.record.is_complete() => Progress::Complete {
                index: fragment.index,
            },
            WriteOutcome::Accepted => Progress::Accepted {
                index: fragment.index,
            },
            WriteOutcome::Duplicate => {
                trace!("중복 프래그먼트: index={}", fragment.index);
                Progress::Ignored
            }
            WriteOutcome::Rejected(reason) => {
                debug!(
                    "프래그먼트 무시: packet_id={}, index={}: {}",
                    fragment.packet_id, fragment.index, reason
                );
                Progress::Ignored
            }
        }
    }

    /// 타임아웃
    ///
    /// 남은 재시도가 있으면 누락 마스크로 요청하고, 없으면 중단한다.
    /// 요청 전송이 실패해도 재시도 한 번을 소모한다.
    pub(crate) fn on_timeout(&mut self) -> Progress {
        if self.retries_remaining == 0 {
            return Progress::Aborted(Error::RetryBudgetExhausted {
                packet_id: self.record.packet_id,
                attempts: self.config.max_retransmission_requests,
            });
        }

        let missing = self.record.missing();
        let request = RequestMessage::new(self.record.packet_id, missing, self.record.period_ms);
        if let Err(e) = self.transport.send_datagram(self.peer, &request.to_bytes()) {
            warn!("재전송 요청 실패: packet_id={}: {}", self.record.packet_id, e);
        }
        self.retries_remaining -= 1;

        debug!(
            "재전송 요청: packet_id={}, missing {} ({} 남음)",
            self.record.packet_id, missing, self.retries_remaining
        );
        Progress::Requested { mask: missing }
    }

    /// 완료, 중단, 또는 세션 교체까지 수신
    pub(crate) async fn run(
        mut self,
        mut fragments: mpsc::Receiver<InboundFragment>,
        events: mpsc::Sender<Event>,
    ) {
        let packet_id = self.record.packet_id;
        let fragment_count = self.record.fragment_count();
        let timeout = self.config.receive_timeout(self.record.period_ms);

        info!(
            "수신 세션 시작: packet_id={}, {} fragments from {}, timeout {:?}",
            packet_id, fragment_count, self.peer, timeout
        );

        loop {
            // 매 반복마다 타이머를 다시 건다 (마지막 이벤트 기준)
            let (progress, source) = match tokio::time::timeout(timeout, fragments.recv()).await {
                Ok(Some(inbound)) => (self.on_fragment(&inbound), inbound.source),
                Ok(None) => {
                    debug!("수신 세션 교체됨: packet_id={}", packet_id);
                    return;
                }
                Err(_) => (self.on_timeout(), self.peer),
            };

            match progress {
                Progress::Ignored | Progress::Requested { .. } => {}
                Progress::Accepted { index } => {
                    let _ = events
                        .send(Event::FragmentReceived {
                            packet_id,
                            index,
                            fragment_count,
                            source,
                        })
                        .await;
                }
                Progress::Complete { index } => {
                    let _ = events
                        .send(Event::FragmentReceived {
                            packet_id,
                            index,
                            fragment_count,
                            source,
                        })
                        .await;
                    break;
                }
                Progress::Aborted(error) => {
                    warn!("수신 세션 중단: packet_id={}: {}", packet_id, error);
                    let _ = events
                        .send(Event::ReceiveAborted { packet_id, error })
                        .await;
                    return;
                }
            }
        }

        let peer = self.peer;
        let payload = self.record.into_payload();
        info!(
            "Large packet 수신 완료: packet_id={}, {} bytes",
            packet_id,
            payload.len()
        );
        let _ = events
            .send(Event::TransferComplete(CompletedTransfer {
                packet_id,
                peer,
                payload,
            }))
            .await;
    }
}

//! 프래그먼트 송신 상태 머신
//!
//! - Idle → Sending → Idle
//! - 주기(period_ms)마다 가장 낮은 인덱스의 대기 프래그먼트 하나 전송
//! - 전송 실패 시 재시도 없이 중단하고 애플리케이션에 보고
//! - 새 송신이 시작되면 이전 송신은 즉시 취소됨

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::transfer::TransferRecord;
use crate::transport::Transport;
use crate::Result;

/// 현재 유효한 송신 세대
///
/// 송신을 시작/취소할 때마다 증가한다. 세대가 바뀐 송신 태스크는 더 이상 보내지 않는다.
pub(crate) type SendGate = Arc<Mutex<u64>>;

/// 한 틱의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// 프래그먼트 하나 전송
    Sent(u8),
    /// 보낼 프래그먼트 없음 (성공)
    Done,
    /// 새 송신으로 교체됨
    Superseded,
}

/// 송신 상태 머신
pub(crate) struct FragmentSender {
    record: TransferRecord,
    peer: SocketAddr,
    transport: Arc<dyn Transport>,
    gate: SendGate,
    generation: u64,
}

impl FragmentSender {
    pub(crate) fn new(
        record: TransferRecord,
        peer: SocketAddr,
        transport: Arc<dyn Transport>,
        gate: SendGate,
        generation: u64,
    ) -> Self {
        Self {
            record,
            peer,
            transport,
            gate,
            generation,
        }
    }

    /// 한 틱 처리
    ///
    /// 세대 확인과 전송은 같은 잠금 안에서 이루어지므로,
    /// 교체된 송신이 새 송신 시작 이후에 프래그먼트를 내보내는 일은 없다.
    pub(crate) fn step(&mut self) -> Result<Step> {
        let Some(fragment) = self
            .record
            .next_pending()
            .and_then(|index| self.record.fragment(index))
        else {
            return Ok(Step::Done);
        };
        let index = fragment.index;

        {
            let current = self.gate.lock();
            if *current != self.generation {
                return Ok(Step::Superseded);
            }
            self.transport.send_datagram(self.peer, &fragment.to_bytes())?;
        }

        self.record.pending_mask.clear(index);
        debug!(
            "프래그먼트 전송: packet_id={}, index={}/{}, {} bytes, 남은 마스크 {}",
            self.record.packet_id,
            index,
            self.record.fragment_count(),
            fragment.payload().len(),
            self.record.pending_mask
        );
        Ok(Step::Sent(index))
    }

    /// 마스크가 빌 때까지 주기마다 전송
    pub(crate) async fn run(mut self, events: mpsc::Sender<Event>) {
        let packet_id = self.record.packet_id;
        let period = Duration::from_millis(u64::from(self.record.period_ms));

        info!(
            "Large packet 송신 시작: packet_id={}, to {}, period {}ms, mask {}",
            packet_id, self.peer, self.record.period_ms, self.record.pending_mask
        );

        let event = loop {
            match self.step() {
                Ok(Step::Sent(_)) => {}
                Ok(Step::Done) => {
                    info!("Large packet 송신 완료: packet_id={}", packet_id);
                    break Event::SendComplete { packet_id };
                }
                Ok(Step::Superseded) => {
                    debug!("송신 교체됨: packet_id={}", packet_id);
                    return;
                }
                Err(error) => {
                    warn!("프래그먼트 전송 실패, 송신 중단: packet_id={}: {}", packet_id, error);
                    break Event::SendFailed { packet_id, error };
                }
            }

            // 남은 주기를 채운 뒤 다음 비트 평가
            tokio::time::sleep(period).await;
        };

        let _ = events.send(event).await;
    }
}

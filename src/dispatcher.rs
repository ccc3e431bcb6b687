//! 수신 데이터그램 분배
//!
//! 데이터그램마다 한 번만 디코딩해서
//! - Signal / Request → 애플리케이션 이벤트
//! - Fragment → 활성 수신 세션
//! 으로 넘긴다. 형식이 맞지 않는 데이터그램은 상태를 건드리지 않고 버린다.

use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::event::{Event, RequestEvent, SignalEvent};
use crate::message::{Message, MessageType};
use crate::receiver::InboundFragment;

/// 데이터그램 분배기
pub(crate) struct Dispatcher {
    events: mpsc::Sender<Event>,
    session: Mutex<Option<mpsc::Sender<InboundFragment>>>,
}

impl Dispatcher {
    pub(crate) fn new(events: mpsc::Sender<Event>) -> Self {
        Self {
            events,
            session: Mutex::new(None),
        }
    }

    /// 프래그먼트를 받을 수신 세션 교체
    ///
    /// 이전 세션의 큐는 닫히고, 이후 프래그먼트는 새 세션으로만 간다.
    pub(crate) fn set_session(&self, fragments: mpsc::Sender<InboundFragment>) {
        *self.session.lock() = Some(fragments);
    }

    pub(crate) fn clear_session(&self) {
        self.session.lock().take();
    }

    /// 데이터그램 하나 처리
    ///
    /// 인식한 메시지 타입을 반환한다. 버려진 데이터그램은 None.
    pub(crate) async fn dispatch(&self, data: &[u8], source: SocketAddr) -> Option<MessageType> {
        let message = match Message::decode(data) {
            Ok(message) => message,
            Err(e) => {
                trace!("잘못된 데이터그램 무시: from {}, {} bytes: {}", source, data.len(), e);
                return None;
            }
        };

        match message {
            Message::Signal(signal) => {
                trace!(
                    "Signal 수신: packet_id={}, {} fragments from {}",
                    signal.packet_id,
                    signal.fragment_count,
                    source
                );
                self.emit(Event::SignalReceived(SignalEvent {
                    packet_id: signal.packet_id,
                    fragment_count: signal.fragment_count,
                    source,
                }))
                .await;
                Some(MessageType::Signal)
            }
            Message::Request(request) => {
                trace!(
                    "Request 수신: packet_id={}, mask {}, period {}ms from {}",
                    request.packet_id,
                    request.mask(),
                    request.period_ms,
                    source
                );
                self.emit(Event::RequestReceived(RequestEvent {
                    packet_id: request.packet_id,
                    mask: request.mask(),
                    period_ms: request.period_ms,
                    source,
                }))
                .await;
                Some(MessageType::Request)
            }
            Message::Fragment(message) => {
                self.route_fragment(InboundFragment { message, source });
                Some(MessageType::Fragment)
            }
            Message::Unrecognized => {
                trace!("알 수 없는 데이터그램 무시: from {}, {} bytes", source, data.len());
                None
            }
        }
    }

    fn route_fragment(&self, inbound: InboundFragment) {
        let session = self.session.lock();
        let Some(tx) = session.as_ref() else {
            trace!(
                "수신 세션 없음, 프래그먼트 폐기: packet_id={}, index={}",
                inbound.message.packet_id,
                inbound.message.index
            );
            return;
        };

        match tx.try_send(inbound) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                // 손실로 취급, 재전송 요청으로 복구됨
                debug!(
                    "수신 큐 가득 참, 프래그먼트 폐기: packet_id={}, index={}",
                    dropped.message.packet_id, dropped.message.index
                );
            }
            Err(TrySendError::Closed(dropped)) => {
                trace!(
                    "종료된 수신 세션, 프래그먼트 폐기: packet_id={}, index={}",
                    dropped.message.packet_id,
                    dropped.message.index
                );
            }
        }
    }

    async fn emit(&self, event: Event) {
        if self.events.send(event).await.is_err() {
            trace!("이벤트 수신기 없음, 이벤트 폐기");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use bytes::Bytes;

    use crate::mask::FragmentMask;
    use crate::message::{FragmentMessage, RequestMessage, SignalMessage};

    fn source() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 1520)
    }

    fn dispatcher() -> (Dispatcher, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(8);
        (Dispatcher::new(tx), rx)
    }

    #[tokio::test]
    async fn test_signal_and_request_become_events() {
        let (dispatcher, mut events) = dispatcher();

        let signal = SignalMessage {
            packet_id: 4,
            fragment_count: 3,
        };
        assert_eq!(
            dispatcher.dispatch(&signal.to_bytes(), source()).await,
            Some(MessageType::Signal)
        );
        assert!(matches!(
            events.recv().await,
            Some(Event::SignalReceived(SignalEvent {
                packet_id: 4,
                fragment_count: 3,
                ..
            }))
        ));

        let request = RequestMessage::new(4, FragmentMask::from_bits(0b101), 250);
        assert_eq!(
            dispatcher.dispatch(&request.to_bytes(), source()).await,
            Some(MessageType::Request)
        );
        match events.recv().await {
            Some(Event::RequestReceived(event)) => {
                assert_eq!(event.packet_id, 4);
                assert_eq!(event.mask.bits(), 0b101);
                assert_eq!(event.period_ms, 250);
                assert_eq!(event.source, source());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fragment_routed_to_session() {
        let (dispatcher, mut events) = dispatcher();
        let (tx, mut rx) = mpsc::channel(4);
        dispatcher.set_session(tx);

        let fragment = FragmentMessage::new(4, 0, 1, Bytes::from_static(b"hello")).unwrap();
        assert_eq!(
            dispatcher.dispatch(&fragment.to_bytes(), source()).await,
            Some(MessageType::Fragment)
        );

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.message, fragment);
        assert_eq!(inbound.source, source());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_fragment_dropped() {
        let (dispatcher, mut events) = dispatcher();
        let (tx, mut rx) = mpsc::channel(4);
        dispatcher.set_session(tx);

        // payload_len이 실제보다 한 바이트 큼
        let fragment = FragmentMessage::new(4, 0, 1, Bytes::from_static(b"hello")).unwrap();
        let mut bytes = fragment.to_bytes().to_vec();
        bytes.pop();

        assert_eq!(dispatcher.dispatch(&bytes, source()).await, None);
        assert!(rx.try_recv().is_err());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_foreign_traffic_ignored() {
        let (dispatcher, mut events) = dispatcher();

        assert_eq!(dispatcher.dispatch(b"", source()).await, None);
        assert_eq!(dispatcher.dispatch(b"x", source()).await, None);
        assert_eq!(dispatcher.dispatch(b"GET / HTTP/1.1", source()).await, None);
        // 알려진 태그지만 길이가 틀린 Signal
        assert_eq!(dispatcher.dispatch(&[0x54, 0xAB, 1], source()).await, None);

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fragment_without_session_dropped() {
        let (dispatcher, mut events) = dispatcher();

        let fragment = FragmentMessage::new(4, 0, 1, Bytes::from_static(b"x")).unwrap();
        assert_eq!(
            dispatcher.dispatch(&fragment.to_bytes(), source()).await,
            Some(MessageType::Fragment)
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_fragment() {
        let (dispatcher, _events) = dispatcher();
        let (tx, mut rx) = mpsc::channel(1);
        dispatcher.set_session(tx);

        for index in 0..3u8 {
            let fragment =
                FragmentMessage::new(4, index, 3, Bytes::from(vec![index; 330])).unwrap();
            dispatcher.dispatch(&fragment.to_bytes(), source()).await;
        }

        assert_eq!(rx.recv().await.unwrap().message.index, 0);
        assert!(rx.try_recv().is_err());
    }
}

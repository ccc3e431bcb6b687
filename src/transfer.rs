//! 전송 레코드
//!
//! 역할(송신/수신)마다 하나씩 존재하는 단일 슬롯 전송 상태.
//! - 송신측: 등록 시 페이로드와 길이가 고정되고, 요청이 오면 마스크/상대/주기가 채워짐
//! - 수신측: Signal 수락 시 생성되고, 프래그먼트가 도착할 때마다 페이로드와 길이가 누적됨
//!
//! 새 전송이 시작되면 레코드는 병합 없이 새로 만들어진다.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};

use crate::event::RequestEvent;
use crate::mask::{fragment_count_for, FragmentMask};
use crate::message::FragmentMessage;
use crate::{Error, Result, FRAGMENT_MAX_BYTES, MAX_FRAGMENTS, MAX_PAYLOAD_BYTES};

/// 수신 프래그먼트 기록 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// 새 프래그먼트 기록
    Accepted,
    /// 이미 받은 프래그먼트
    Duplicate,
    /// 세션과 맞지 않아 무시
    Rejected(&'static str),
}

/// 전송 레코드
#[derive(Debug, Clone)]
pub struct TransferRecord {
    /// 페이로드 버퍼 (용량 = FRAGMENT_MAX_BYTES × MAX_FRAGMENTS)
    payload: BytesMut,

    /// 논리 페이로드 길이 (수신측은 지금까지 받은 바이트 수)
    total_len: usize,

    /// 전송 상대 (송신측은 요청을 받기 전까지 None)
    pub peer: Option<SocketAddr>,

    /// 송신자가 정한 패킷 ID
    pub packet_id: u16,

    /// 프래그먼트 전송 간격 / 재시도 기준 주기 (밀리초)
    pub period_ms: u16,

    /// 송신측: 보낼 프래그먼트, 수신측: 받은 프래그먼트
    pub pending_mask: FragmentMask,

    /// 프래그먼트 수 (1 ~ 64)
    fragment_count: u8,
}

impl TransferRecord {
    /// 송신할 페이로드 등록
    ///
    /// 실제 전송은 수신자의 요청이 온 뒤에 시작된다.
    pub fn outbound(packet_id: u16, payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(Error::OversizedPayload {
                len: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let mut buf = BytesMut::with_capacity(MAX_PAYLOAD_BYTES);
        buf.extend_from_slice(payload);

        Ok(Self {
            payload: buf,
            total_len: payload.len(),
            peer: None,
            packet_id,
            period_ms: 0,
            pending_mask: FragmentMask::empty(),
            fragment_count: fragment_count_for(payload.len()),
        })
    }

    /// 수신 세션용 빈 레코드 생성
    pub fn inbound(
        packet_id: u16,
        fragment_count: u8,
        peer: SocketAddr,
        period_ms: u16,
    ) -> Result<Self> {
        if fragment_count == 0 || usize::from(fragment_count) > MAX_FRAGMENTS {
            return Err(Error::InvalidFragmentCount {
                count: fragment_count,
            });
        }

        let mut buf = BytesMut::with_capacity(MAX_PAYLOAD_BYTES);
        buf.resize(MAX_PAYLOAD_BYTES, 0);

        Ok(Self {
            payload: buf,
            total_len: 0,
            peer: Some(peer),
            packet_id,
            period_ms,
            pending_mask: FragmentMask::empty(),
            fragment_count,
        })
    }

    pub fn fragment_count(&self) -> u8 {
        self.fragment_count
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// 요청 내용을 송신 레코드에 반영
    ///
    /// 마스크는 `fragment_count` 비트로 잘라낸다.
    /// 등록된 것과 다른 packet_id의 요청은 거부한다.
    pub fn apply_request(&mut self, request: &RequestEvent) -> Result<()> {
        if request.packet_id != self.packet_id {
            return Err(Error::SessionMismatch {
                expected: self.packet_id,
                got: request.packet_id,
            });
        }

        self.peer = Some(request.source);
        self.period_ms = request.period_ms;
        self.pending_mask = request.mask.bounded(self.fragment_count);
        Ok(())
    }

    /// 프래그먼트 `index`의 길이
    ///
    /// 마지막 프래그먼트는 나머지 길이이며, 정확히 나누어떨어지면 최대 크기다.
    pub fn fragment_len(&self, index: u8) -> usize {
        if usize::from(index) + 1 < usize::from(self.fragment_count) {
            return FRAGMENT_MAX_BYTES;
        }
        match self.total_len % FRAGMENT_MAX_BYTES {
            0 => FRAGMENT_MAX_BYTES,
            rem => rem,
        }
    }

    /// 다음에 보낼 프래그먼트 인덱스 (가장 낮은 비트부터)
    pub fn next_pending(&self) -> Option<u8> {
        self.pending_mask.first(self.fragment_count)
    }

    /// 프래그먼트 메시지 생성
    pub fn fragment(&self, index: u8) -> Option<FragmentMessage> {
        if index >= self.fragment_count {
            return None;
        }
        let offset = usize::from(index) * FRAGMENT_MAX_BYTES;
        let end = offset + self.fragment_len(index);
        let data = self.payload.get(offset..end)?;

        FragmentMessage::new(
            self.packet_id,
            index,
            self.fragment_count,
            Bytes::copy_from_slice(data),
        )
        .ok()
    }

    /// 수신한 프래그먼트를 버퍼에 기록
    ///
    /// 중복은 길이를 다시 더하지 않는다.
    pub fn write_fragment(&mut self, fragment: &FragmentMessage) -> WriteOutcome {
        let index = fragment.index;
        let data = fragment.payload();

        if fragment.fragment_count != self.fragment_count {
            return WriteOutcome::Rejected("fragment_count mismatch");
        }
        if index >= self.fragment_count {
            return WriteOutcome::Rejected("index out of range");
        }
        if data.is_empty() || data.len() > FRAGMENT_MAX_BYTES {
            return WriteOutcome::Rejected("bad payload length");
        }
        // 마지막이 아닌 프래그먼트는 항상 최대 크기
        let is_last = usize::from(index) + 1 == usize::from(self.fragment_count);
        if !is_last && data.len() != FRAGMENT_MAX_BYTES {
            return WriteOutcome::Rejected("short inner fragment");
        }
        if self.pending_mask.contains(index) {
            return WriteOutcome::Duplicate;
        }

        let offset = usize::from(index) * FRAGMENT_MAX_BYTES;
        self.payload[offset..offset + data.len()].copy_from_slice(data);
        self.total_len += data.len();
        self.pending_mask.set(index);
        WriteOutcome::Accepted
    }

    /// 수신 완료 여부 (수신측 마스크 기준)
    pub fn is_complete(&self) -> bool {
        self.pending_mask.is_full(self.fragment_count)
    }

    /// 재전송 요청할 마스크 (수신측)
    pub fn missing(&self) -> FragmentMask {
        self.pending_mask.complement(self.fragment_count)
    }

    /// 완성된 페이로드 추출
    pub fn into_payload(mut self) -> Bytes {
        self.payload.truncate(self.total_len);
        self.payload.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// 송신 레코드를 잘라 수신 레코드에 모두 기록
    fn reassemble(len: usize) -> Bytes {
        let data = pattern(len);
        let mut outbound = TransferRecord::outbound(1, &data).unwrap();
        outbound.apply_request(&RequestEvent {
            packet_id: 1,
            mask: FragmentMask::full(outbound.fragment_count()),
            period_ms: 10,
            source: peer(),
        })
        .unwrap();

        let mut inbound =
            TransferRecord::inbound(1, outbound.fragment_count(), peer(), 10).unwrap();

        while let Some(index) = outbound.next_pending() {
            let fragment = outbound.fragment(index).unwrap();
            assert_eq!(inbound.write_fragment(&fragment), WriteOutcome::Accepted);
            outbound.pending_mask.clear(index);
        }

        assert!(inbound.is_complete());
        assert_eq!(inbound.total_len(), len);
        inbound.into_payload()
    }

    #[test]
    fn test_round_trip_lengths() {
        for len in [1, 2, 329, 330, 331, 660, 661, 330 * 10, 330 * 63 + 1, 330 * 64] {
            assert_eq!(reassemble(len).as_ref(), pattern(len).as_slice(), "len={}", len);
        }
    }

    #[test]
    fn test_registration_limits() {
        assert!(matches!(
            TransferRecord::outbound(1, &[]),
            Err(Error::EmptyPayload)
        ));
        assert!(matches!(
            TransferRecord::outbound(1, &pattern(MAX_PAYLOAD_BYTES + 1)),
            Err(Error::OversizedPayload { len, max }) if len == MAX_PAYLOAD_BYTES + 1 && max == MAX_PAYLOAD_BYTES
        ));

        let max = TransferRecord::outbound(1, &pattern(MAX_PAYLOAD_BYTES)).unwrap();
        assert_eq!(max.fragment_count(), 64);
    }

    #[test]
    fn test_last_fragment_exact_multiple() {
        let record = TransferRecord::outbound(1, &pattern(660)).unwrap();
        assert_eq!(record.fragment_count(), 2);
        assert_eq!(record.fragment_len(0), 330);
        assert_eq!(record.fragment_len(1), 330);
        assert_eq!(record.fragment(1).unwrap().payload().len(), 330);
    }

    #[test]
    fn test_last_fragment_remainder() {
        let record = TransferRecord::outbound(1, &pattern(700)).unwrap();
        assert_eq!(record.fragment_count(), 3);
        assert_eq!(record.fragment_len(2), 40);
        assert!(record.fragment(3).is_none());
    }

    #[test]
    fn test_apply_request_bounds_mask() {
        let mut record = TransferRecord::outbound(7, &pattern(1000)).unwrap();
        record
            .apply_request(&RequestEvent {
                packet_id: 7,
                mask: FragmentMask::from_bits(u64::MAX),
                period_ms: 50,
                source: peer(),
            })
            .unwrap();

        assert_eq!(record.pending_mask.bits(), 0b1111);
        assert_eq!(record.peer, Some(peer()));
        assert_eq!(record.period_ms, 50);
    }

    #[test]
    fn test_apply_request_wrong_packet_id() {
        let mut record = TransferRecord::outbound(7, &pattern(10)).unwrap();
        let result = record.apply_request(&RequestEvent {
            packet_id: 8,
            mask: FragmentMask::full(1),
            period_ms: 50,
            source: peer(),
        });
        assert!(matches!(
            result,
            Err(Error::SessionMismatch { expected: 7, got: 8 })
        ));
        assert!(record.pending_mask.is_empty());
    }

    #[test]
    fn test_inbound_fragment_count_validation() {
        assert!(TransferRecord::inbound(1, 0, peer(), 10).is_err());
        assert!(TransferRecord::inbound(1, 65, peer(), 10).is_err());
        assert!(TransferRecord::inbound(1, 64, peer(), 10).is_ok());
    }

    #[test]
    fn test_duplicate_not_double_counted() {
        let mut inbound = TransferRecord::inbound(1, 2, peer(), 10).unwrap();
        let first = FragmentMessage::new(1, 0, 2, Bytes::from(vec![1u8; 330])).unwrap();

        assert_eq!(inbound.write_fragment(&first), WriteOutcome::Accepted);
        assert_eq!(inbound.write_fragment(&first), WriteOutcome::Duplicate);
        assert_eq!(inbound.total_len(), 330);
        assert!(!inbound.is_complete());
        assert_eq!(inbound.missing().bits(), 0b10);
    }

    #[test]
    fn test_inconsistent_fragments_rejected() {
        let mut inbound = TransferRecord::inbound(1, 2, peer(), 10).unwrap();

        let short_inner = FragmentMessage::new(1, 0, 2, Bytes::from(vec![1u8; 10])).unwrap();
        assert!(matches!(
            inbound.write_fragment(&short_inner),
            WriteOutcome::Rejected(_)
        ));

        let out_of_range = FragmentMessage::new(1, 2, 2, Bytes::from(vec![1u8; 10])).unwrap();
        assert!(matches!(
            inbound.write_fragment(&out_of_range),
            WriteOutcome::Rejected(_)
        ));

        let wrong_count = FragmentMessage::new(1, 1, 3, Bytes::from(vec![1u8; 10])).unwrap();
        assert!(matches!(
            inbound.write_fragment(&wrong_count),
            WriteOutcome::Rejected(_)
        ));

        assert_eq!(inbound.total_len(), 0);
        assert!(inbound.pending_mask.is_empty());
    }
}

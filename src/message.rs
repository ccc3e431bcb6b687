//! 프로토콜 메시지 정의
//!
//! 모든 메시지는 2바이트 타입 태그로 시작하고 이후 필드는 리틀 엔디언 고정 폭이다.
//! 본문은 bincode 기본 설정(fixint, little endian)으로 직렬화하며,
//! 이 설정에서 각 정수는 정확히 자신의 폭만큼 기록된다.
//!
//! ```text
//! Signal   | 54 AB | packet_id:u16 | fragment_count:u8 |
//! Request  | F2 2A | packet_id:u16 | mask:u64 | period_ms:u16 |
//! Fragment | 1F B3 | packet_id:u16 | index:u8 | fragment_count:u8 | payload_len:u16 | payload |
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::mask::FragmentMask;
use crate::{Error, Result, FRAGMENT_MAX_BYTES, TAG_LEN};

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// 전송 준비 알림 (송신자 → 수신자)
    Signal,

    /// 프래그먼트 (재)전송 요청 (수신자 → 송신자)
    Request,

    /// 프래그먼트 전달 (송신자 → 수신자)
    Fragment,
}

impl MessageType {
    /// 디스패처가 비교하는 순서
    pub const ALL: [MessageType; 3] = [Self::Signal, Self::Request, Self::Fragment];

    /// 와이어 태그
    pub const fn tag(self) -> [u8; TAG_LEN] {
        match self {
            Self::Signal => [0x54, 0xab],
            Self::Request => [0xf2, 0x2a],
            Self::Fragment => [0x1f, 0xb3],
        }
    }

    /// 데이터그램 앞 2바이트로 타입 판별. 짧거나 모르는 태그면 None
    pub fn from_tag(data: &[u8]) -> Option<Self> {
        let tag = data.get(..TAG_LEN)?;
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Request => "request",
            Self::Fragment => "fragment",
        }
    }
}

/// 태그 + bincode 본문 (+ 추가 바이트) 조립
fn encode<T: Serialize>(msg_type: MessageType, body: &T, trailer: &[u8]) -> Vec<u8> {
    let body_bytes = bincode::serialize(body).unwrap_or_default();

    let mut buf = Vec::with_capacity(TAG_LEN + body_bytes.len() + trailer.len());
    buf.extend_from_slice(&msg_type.tag());
    buf.extend_from_slice(&body_bytes);
    buf.extend_from_slice(trailer);
    buf
}

/// 태그 검증 후 고정 길이 본문 역직렬화
fn decode_body<T: for<'de> Deserialize<'de>>(
    msg_type: MessageType,
    bytes: &[u8],
    expected_len: usize,
) -> Result<T> {
    let kind = msg_type.name();
    if bytes.len() != expected_len {
        return Err(Error::malformed(kind, "wrong length"));
    }
    if bytes[..TAG_LEN] != msg_type.tag() {
        return Err(Error::malformed(kind, "wrong tag"));
    }
    bincode::deserialize(&bytes[TAG_LEN..]).map_err(|_| Error::malformed(kind, "undecodable body"))
}

/// 전송 준비 알림
///
/// 송신자가 페이로드를 등록한 뒤 수신자의 고정 포트로 보낸다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub packet_id: u16,
    pub fragment_count: u8,
}

impl SignalMessage {
    /// 태그 포함 인코딩 크기
    pub const ENCODED_LEN: usize = TAG_LEN + 3;

    pub fn new(packet_id: u16, fragment_count: u8) -> Self {
        Self {
            packet_id,
            fragment_count,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(MessageType::Signal, self, &[])
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode_body(MessageType::Signal, bytes, Self::ENCODED_LEN)
    }
}

/// 프래그먼트 (재)전송 요청
///
/// `mask`의 비트 i가 1이면 프래그먼트 i를 보내 달라는 뜻이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub packet_id: u16,
    pub mask: u64,
    pub period_ms: u16,
}

impl RequestMessage {
    /// 태그 포함 인코딩 크기
    pub const ENCODED_LEN: usize = TAG_LEN + 12;

    pub fn new(packet_id: u16, mask: FragmentMask, period_ms: u16) -> Self {
        Self {
            packet_id,
            mask: mask.bits(),
            period_ms,
        }
    }

    pub fn mask(&self) -> FragmentMask {
        FragmentMask::from_bits(self.mask)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(MessageType::Request, self, &[])
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode_body(MessageType::Request, bytes, Self::ENCODED_LEN)
    }
}

/// 프래그먼트 헤더 (태그 다음 6바이트)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FragmentHeader {
    packet_id: u16,
    index: u8,
    fragment_count: u8,
    payload_len: u16,
}

/// 프래그먼트 (큰 페이로드의 한 조각)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentMessage {
    pub packet_id: u16,
    pub index: u8,
    pub fragment_count: u8,
    payload: Bytes,
}

impl FragmentMessage {
    /// 태그 포함 헤더 크기
    pub const HEADER_LEN: usize = TAG_LEN + 6;

    /// 새 프래그먼트 생성. 페이로드는 `FRAGMENT_MAX_BYTES` 이하
    pub fn new(packet_id: u16, index: u8, fragment_count: u8, payload: Bytes) -> Result<Self> {
        if payload.len() > FRAGMENT_MAX_BYTES {
            return Err(Error::OversizedPayload {
                len: payload.len(),
                max: FRAGMENT_MAX_BYTES,
            });
        }
        Ok(Self {
            packet_id,
            index,
            fragment_count,
            payload,
        })
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 태그 포함 인코딩 크기
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let header = FragmentHeader {
            packet_id: self.packet_id,
            index: self.index,
            fragment_count: self.fragment_count,
            // new()에서 FRAGMENT_MAX_BYTES 이하로 제한됨
            payload_len: self.payload.len() as u16,
        };
        encode(MessageType::Fragment, &header, &self.payload)
    }

    /// 바이트에서 역직렬화
    ///
    /// 전체 길이가 헤더 + `payload_len`과 정확히 같아야 한다.
    /// 태그가 맞아도 길이가 어긋나면 거부한다.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let kind = MessageType::Fragment.name();
        if bytes.len() < Self::HEADER_LEN {
            return Err(Error::malformed(kind, "shorter than header"));
        }

        let header: FragmentHeader =
            decode_body(MessageType::Fragment, &bytes[..Self::HEADER_LEN], Self::HEADER_LEN)?;

        let payload_len = usize::from(header.payload_len);
        if bytes.len() != Self::HEADER_LEN + payload_len {
            return Err(Error::malformed(kind, "length does not match payload_len"));
        }

        Ok(Self {
            packet_id: header.packet_id,
            index: header.index,
            fragment_count: header.fragment_count,
            payload: Bytes::copy_from_slice(&bytes[Self::HEADER_LEN..]),
        })
    }
}

/// 디스패처가 한 번 디코딩한 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Signal(SignalMessage),
    Request(RequestMessage),
    Fragment(FragmentMessage),
    /// 태그 길이보다 짧거나 알려진 태그가 아님 (다른 트래픽)
    Unrecognized,
}

impl Message {
    /// 데이터그램 디코딩
    ///
    /// 알려진 태그인데 형식이 틀리면 `MalformedMessage`,
    /// 태그를 모르면 `Unrecognized`를 돌려준다.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let message = match MessageType::from_tag(bytes) {
            Some(MessageType::Signal) => Self::Signal(SignalMessage::from_bytes(bytes)?),
            Some(MessageType::Request) => Self::Request(RequestMessage::from_bytes(bytes)?),
            Some(MessageType::Fragment) => Self::Fragment(FragmentMessage::from_bytes(bytes)?),
            None => Self::Unrecognized,
        };
        Ok(message)
    }

    /// 메시지 타입 반환
    pub fn msg_type(&self) -> Option<MessageType> {
        match self {
            Self::Signal(_) => Some(MessageType::Signal),
            Self::Request(_) => Some(MessageType::Request),
            Self::Fragment(_) => Some(MessageType::Fragment),
            Self::Unrecognized => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_wire_format() {
        let bytes = SignalMessage::new(0x1234, 7).to_bytes();
        assert_eq!(bytes, vec![0x54, 0xab, 0x34, 0x12, 0x07]);

        let decoded = SignalMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.packet_id, 0x1234);
        assert_eq!(decoded.fragment_count, 7);
    }

    #[test]
    fn test_request_wire_format() {
        let request = RequestMessage::new(
            0x0102,
            FragmentMask::from_bits(0x0807_0605_0403_0201),
            800,
        );
        let bytes = request.to_bytes();
        assert_eq!(bytes.len(), RequestMessage::ENCODED_LEN);
        assert_eq!(
            bytes,
            vec![
                0xf2, 0x2a, // tag
                0x02, 0x01, // packet_id
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // mask
                0x20, 0x03, // 800
            ]
        );
        assert_eq!(RequestMessage::from_bytes(&bytes).unwrap(), request);
    }

    #[test]
    fn test_fragment_wire_format() {
        let fragment = FragmentMessage::new(5, 2, 3, Bytes::from_static(b"abc")).unwrap();
        let bytes = fragment.to_bytes();
        assert_eq!(
            bytes,
            vec![0x1f, 0xb3, 0x05, 0x00, 0x02, 0x03, 0x03, 0x00, b'a', b'b', b'c']
        );
        assert_eq!(bytes.len(), fragment.encoded_len());

        let decoded = FragmentMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, fragment);
    }

    #[test]
    fn test_fixed_length_messages_reject_wrong_length() {
        let mut signal = SignalMessage::new(1, 1).to_bytes();
        signal.push(0);
        assert!(matches!(
            SignalMessage::from_bytes(&signal),
            Err(Error::MalformedMessage { kind: "signal", .. })
        ));

        let request = RequestMessage::new(1, FragmentMask::full(3), 100).to_bytes();
        assert!(RequestMessage::from_bytes(&request[..request.len() - 1]).is_err());
    }

    #[test]
    fn test_wrong_tag_rejected() {
        let bytes = SignalMessage::new(1, 1).to_bytes();
        assert!(matches!(
            RequestMessage::from_bytes(&bytes),
            Err(Error::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_fragment_one_byte_short_rejected() {
        let fragment = FragmentMessage::new(9, 0, 1, Bytes::from(vec![0xaa; 40])).unwrap();
        let bytes = fragment.to_bytes();

        let short = &bytes[..bytes.len() - 1];
        assert!(matches!(
            Message::decode(short),
            Err(Error::MalformedMessage { kind: "fragment", .. })
        ));

        let mut long = bytes.clone();
        long.push(0);
        assert!(FragmentMessage::from_bytes(&long).is_err());
    }

    #[test]
    fn test_fragment_payload_limit() {
        let oversized = Bytes::from(vec![0u8; FRAGMENT_MAX_BYTES + 1]);
        assert!(matches!(
            FragmentMessage::new(1, 0, 1, oversized),
            Err(Error::OversizedPayload { .. })
        ));

        let full = Bytes::from(vec![0u8; FRAGMENT_MAX_BYTES]);
        assert!(FragmentMessage::new(1, 0, 1, full).is_ok());
    }

    #[test]
    fn test_decode_routes_by_tag() {
        let signal = SignalMessage::new(3, 4);
        assert_eq!(
            Message::decode(&signal.to_bytes()).unwrap(),
            Message::Signal(signal)
        );

        let empty_fragment = FragmentMessage::new(3, 0, 1, Bytes::new()).unwrap();
        let decoded = Message::decode(&empty_fragment.to_bytes()).unwrap();
        assert_eq!(decoded.msg_type(), Some(MessageType::Fragment));
    }

    #[test]
    fn test_unrecognized_traffic() {
        assert_eq!(Message::decode(&[]).unwrap(), Message::Unrecognized);
        assert_eq!(Message::decode(&[0x54]).unwrap(), Message::Unrecognized);
        assert_eq!(
            Message::decode(b"hello world").unwrap(),
            Message::Unrecognized
        );
    }
}

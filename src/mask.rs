//! 프래그먼트 비트마스크
//!
//! 64비트 하나로 전송 하나의 프래그먼트 집합을 표현한다.
//! - 송신측: 비트 i = 1 이면 프래그먼트 i 전송 대기
//! - 수신측: 비트 i = 1 이면 프래그먼트 i 수신 완료
//!
//! `fragment_count` 이상의 비트는 항상 0으로 유지한다.

use std::fmt;

use crate::{FRAGMENT_MAX_BYTES, MAX_FRAGMENTS};

/// 페이로드 길이에 필요한 프래그먼트 수 (올림)
///
/// u8 범위를 넘는 길이는 `u8::MAX`로 포화된다. 등록 단계에서 64개 한도로 걸러진다.
pub fn fragment_count_for(len: usize) -> u8 {
    let count = len.div_ceil(FRAGMENT_MAX_BYTES);
    u8::try_from(count).unwrap_or(u8::MAX)
}

/// 프래그먼트 `fragment_count`개 전체를 요청하는 마스크
///
/// 64개일 때 `1 << 64`는 정의되지 않으므로 전체 폭 값으로 분기한다.
pub fn full_mask_for(fragment_count: u8) -> u64 {
    if usize::from(fragment_count) >= MAX_FRAGMENTS {
        u64::MAX
    } else {
        (1u64 << fragment_count) - 1
    }
}

/// 64비트 프래그먼트 집합
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FragmentMask(u64);

impl FragmentMask {
    /// 빈 마스크
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// 프래그먼트 전체가 설정된 마스크
    pub fn full(fragment_count: u8) -> Self {
        Self(full_mask_for(fragment_count))
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// 비트 설정. 새로 설정되었으면 true (중복이면 false)
    #[inline]
    pub fn set(&mut self, index: u8) -> bool {
        if usize::from(index) >= MAX_FRAGMENTS {
            return false;
        }
        let bit = 1u64 << index;
        if self.0 & bit != 0 {
            return false;
        }
        self.0 |= bit;
        true
    }

    #[inline]
    pub fn clear(&mut self, index: u8) {
        if usize::from(index) < MAX_FRAGMENTS {
            self.0 &= !(1u64 << index);
        }
    }

    #[inline]
    pub fn contains(self, index: u8) -> bool {
        usize::from(index) < MAX_FRAGMENTS && self.0 & (1u64 << index) != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `fragment_count`개가 모두 설정되었는지
    #[inline]
    pub fn is_full(self, fragment_count: u8) -> bool {
        fragment_count > 0 && self.0 == full_mask_for(fragment_count)
    }

    /// `fragment_count` 범위 밖의 비트 제거
    pub fn bounded(self, fragment_count: u8) -> Self {
        Self(self.0 & full_mask_for(fragment_count))
    }

    /// 보수 마스크 (`fragment_count` 비트로 제한)
    ///
    /// 수신 마스크에서 재전송 요청 마스크를 만들 때 사용한다.
    pub fn complement(self, fragment_count: u8) -> Self {
        Self(!self.0 & full_mask_for(fragment_count))
    }

    /// 설정된 비트 중 가장 낮은 인덱스 (`fragment_count` 미만만)
    pub fn first(self, fragment_count: u8) -> Option<u8> {
        let bits = self.bounded(fragment_count).0;
        if bits == 0 {
            None
        } else {
            // trailing_zeros < 64 이므로 u8에 들어감
            Some(bits.trailing_zeros() as u8)
        }
    }

    /// 설정된 비트 수
    #[inline]
    pub fn len(self) -> u32 {
        self.0.count_ones()
    }
}

impl From<u64> for FragmentMask {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl From<FragmentMask> for u64 {
    fn from(mask: FragmentMask) -> Self {
        mask.0
    }
}

impl fmt::Debug for FragmentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentMask({:#018x})", self.0)
    }
}

impl fmt::Display for FragmentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

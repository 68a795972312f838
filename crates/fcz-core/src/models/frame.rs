//! 캡처 프레임 모델.
//!
//! 대상 창의 한 시점 스냅샷. 너비/높이가 모두 양수인 경우에만 생성된다.

use chrono::{DateTime, Utc};
use image::RgbaImage;

/// 캡처된 창 스냅샷
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// RGBA 픽셀 버퍼 (창 클라이언트 좌표)
    image: RgbaImage,
    /// 캡처 시각
    captured_at: DateTime<Utc>,
    /// 캡처 서비스 내 일련번호 (1부터)
    sequence: u64,
}

impl Frame {
    /// 빈 이미지(0 너비/높이)면 `None`
    pub fn new(image: RgbaImage, sequence: u64) -> Option<Self> {
        if image.width() == 0 || image.height() == 0 {
            return None;
        }
        Some(Self {
            image,
            captured_at: Utc::now(),
            sequence,
        })
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// 캡처 이후 경과 시간 (ms, 시계가 뒤로 가면 0)
    pub fn age_ms(&self) -> u64 {
        (Utc::now() - self.captured_at).num_milliseconds().max(0) as u64
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

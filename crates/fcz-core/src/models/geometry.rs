//! 좌표/영역/창 식별 모델.
//!
//! 프레임 좌표계는 대상 창의 클라이언트 영역 기준(좌상단 0,0)이다.

use serde::{Deserialize, Serialize};

/// 2D 좌표
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// 오프셋 평행이동
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// 크기 (너비 x 높이)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// 축 정렬 사각 영역 (프레임 좌표)
///
/// 너비 또는 높이가 0이면 "프레임 전체"를 의미한다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 프레임 전체를 뜻하는 빈 영역인지
    pub fn is_full_frame(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// 영역 중심점
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// 영역을 주어진 프레임 크기에 대해 해석한다.
    ///
    /// 프레임 밖으로 벗어나거나 음수 크기면 `None`.
    /// 반환값: `(x, y, width, height)` (모두 양수, 프레임 내부)
    pub fn resolve(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.is_full_frame() {
            return (frame_width > 0 && frame_height > 0).then_some((
                0,
                0,
                frame_width,
                frame_height,
            ));
        }
        if self.x < 0 || self.y < 0 || self.width < 0 || self.height < 0 {
            return None;
        }
        let (x, y, w, h) = (
            self.x as u64,
            self.y as u64,
            self.width as u64,
            self.height as u64,
        );
        if x + w > frame_width as u64 || y + h > frame_height as u64 {
            return None;
        }
        Some((x as u32, y as u32, w as u32, h as u32))
    }
}

/// 대상 창 식별자 (플랫폼 창 ID)
///
/// 0은 무효 핸들이다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub u32);

impl WindowHandle {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// 창의 현재 화면 좌표 경계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl WindowBounds {
    /// 너비/높이 중 하나라도 0이면 퇴화된 경계
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// 창 좌표 → 화면 좌표
    pub fn to_screen(&self, window_point: Point) -> Point {
        window_point.offset(self.x, self.y)
    }
}

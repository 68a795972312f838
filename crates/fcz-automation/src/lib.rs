//! # fcz-automation
//!
//! 시나리오 실행 크레이트.
//! 스텝 트리를 해석해 이미지 대기/매칭 결과에 따라 마우스/키보드 입력을 보낸다.
//! 실제 입력은 `enigo` feature 활성화 시에만 발생한다.

pub mod engine;
pub mod input_driver;

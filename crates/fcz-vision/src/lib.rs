//! # fcz-vision
//!
//! 대상 창 캡처 루프, 템플릿 캐시, 템플릿 매칭.
//! xcap으로 창을 캡처하고 image crate로 템플릿을 디코딩한다.

pub mod capture;
pub mod matcher;
pub mod strategy;
pub mod template_store;
pub mod window;

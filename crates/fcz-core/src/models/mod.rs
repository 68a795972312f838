//! FCZ 도메인 모델.
//!
//! 시나리오 문서 모델은 `serde` Serialize/Deserialize를 구현하며
//! 필드 키는 lower-camel-case로 직렬화된다.

pub mod frame;
pub mod geometry;
pub mod result;
pub mod scenario;

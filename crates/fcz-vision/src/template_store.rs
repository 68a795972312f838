//! 템플릿 이미지 캐시.
//!
//! 이름 → 디코딩된 템플릿. 첫 조회 시 디스크에서 로드하고, 성공한 로드만 캐시한다.
//! 동시 첫 조회는 직렬화되어 디코딩이 한 번만 일어난다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fcz_core::error::CoreError;
use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

/// 디코딩된 템플릿 (불변, 공유)
#[derive(Debug)]
pub struct Template {
    name: String,
    image: RgbaImage,
}

impl Template {
    pub fn new(name: impl Into<String>, image: RgbaImage) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
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
}

/// 이름 기반 지연 로딩 템플릿 저장소
pub struct TemplateStore {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Template>>>,
    /// 캐시 미스 시 로드 직렬화
    load_lock: Mutex<()>,
}

impl TemplateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cache: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 템플릿 조회 (없거나 디코딩 실패 시 `None`, 실패는 캐시하지 않음)
    pub fn get_template(&self, name: &str) -> Option<Arc<Template>> {
        if let Some(hit) = self.cache.read().get(name) {
            return Some(Arc::clone(hit));
        }

        let _guard = self.load_lock.lock();
        // 대기하는 동안 다른 호출자가 채웠을 수 있다.
        if let Some(hit) = self.cache.read().get(name) {
            return Some(Arc::clone(hit));
        }

        match self.load(name) {
            Ok(template) => {
                let template = Arc::new(template);
                self.cache
                    .write()
                    .insert(name.to_string(), Arc::clone(&template));
                debug!(
                    name,
                    width = template.width(),
                    height = template.height(),
                    "템플릿 로드"
                );
                Some(template)
            }
            Err(e) => {
                warn!(name, error = %e, "템플릿 로드 실패");
                None
            }
        }
    }

    /// 캐시 비우기 (이미 배포된 `Arc`는 유효)
    pub fn clear_cache(&self) {
        let _guard = self.load_lock.lock();
        let removed = std::mem::take(&mut *self.cache.write());
        debug!(count = removed.len(), "템플릿 캐시 비움");
    }

    /// 캐시된 템플릿 수
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.read().contains_key(name)
    }

    fn load(&self, name: &str) -> Result<Template, CoreError> {
        if name.is_empty() {
            return Err(CoreError::InvalidArguments("빈 템플릿 이름".to_string()));
        }
        let path = self.base_dir.join(name);
        if !path.is_file() {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("템플릿 파일 없음: {}", path.display()),
            )));
        }

        let image = image::open(&path)
            .map_err(|e| CoreError::Decode(format!("{}: {e}", path.display())))?
            .to_rgba8();
        if image.width() == 0 || image.height() == 0 {
            return Err(CoreError::Decode(format!("빈 이미지: {}", path.display())));
        }
        Ok(Template::new(name, image))
    }
}

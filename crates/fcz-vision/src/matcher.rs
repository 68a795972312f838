//! 템플릿 매칭.
//!
//! 영역으로 잘라낸 프레임에 대해 템플릿의 제로 평균 정규화 상호상관(ZNCC)을 계산하고
//! 전역 최대 점수와 위치를 반환한다. 비매칭은 예외가 아닌 정상 결과다.

use std::sync::atomic::{AtomicBool, Ordering};

use fcz_core::models::geometry::{Point, Region};
use image::RgbaImage;
use rayon::prelude::*;
use tracing::trace;

/// 채널 수 (RGB, 알파 무시)
const CHANNELS: usize = 3;

/// 분산이 이 값 이하인 창(window)은 상관 계수를 정의할 수 없다.
const MIN_VARIANCE: f64 = 1e-9;

/// 매칭 결과
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// 임계값 이상 매칭 여부
    pub found: bool,
    /// 매칭 좌상단 (전체 프레임 좌표)
    pub location: Point,
    /// 최대 유사도 점수 (-1.0 ~ 1.0, 비매칭이어도 보고)
    pub score: f64,
}

impl MatchResult {
    pub fn not_found() -> Self {
        Self {
            found: false,
            location: Point::default(),
            score: 0.0,
        }
    }
}

/// 템플릿 매처 (상태 없음)
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageMatcher;

impl ImageMatcher {
    pub fn new() -> Self {
        Self
    }

    /// 프레임의 `region` 안에서 `template`을 찾는다.
    ///
    /// 빈 이미지, 프레임을 벗어나는 영역, 영역보다 큰 템플릿은 모두 `found=false`.
    pub fn match_template(
        &self,
        frame: &RgbaImage,
        template: &RgbaImage,
        region: &Region,
        threshold: f64,
    ) -> MatchResult {
        self.match_template_abortable(frame, template, region, threshold, &AtomicBool::new(false))
    }

    /// `match_template`과 같지만 `abort`가 켜지면 탐색을 멈추고 `found=false`를 반환한다.
    pub fn match_template_abortable(
        &self,
        frame: &RgbaImage,
        template: &RgbaImage,
        region: &Region,
        threshold: f64,
        abort: &AtomicBool,
    ) -> MatchResult {
        if frame.width() == 0 || frame.height() == 0 {
            return MatchResult::not_found();
        }
        if template.width() == 0 || template.height() == 0 {
            return MatchResult::not_found();
        }
        let Some((rx, ry, rw, rh)) = region.resolve(frame.width(), frame.height()) else {
            trace!(?region, "영역이 프레임 밖");
            return MatchResult::not_found();
        };
        if template.width() > rw || template.height() > rh {
            return MatchResult::not_found();
        }

        let Some(best) = best_match(frame, (rx, ry, rw, rh), template, abort) else {
            return MatchResult::not_found();
        };

        MatchResult {
            found: best.score >= threshold,
            location: Point::new(best.x as i32 + rx as i32, best.y as i32 + ry as i32),
            score: best.score,
        }
    }
}

/// 전수 탐색 작업량 상한 (탐색 위치 수 x 템플릿 픽셀 수)
///
/// 이 값 이하면 원본 해상도에서 전수 탐색하고, 넘으면 피라미드로 줄여서 탐색한다.
const EXHAUSTIVE_BUDGET: u64 = 20_000_000;

/// 피라미드 최대 축소 단계
const MAX_LEVELS: usize = 4;

/// 축소된 템플릿의 최소 변 길이
const MIN_TEMPLATE_SIDE: usize = 4;

/// 가장 거친 단계에서 정밀화할 후보 수
const CANDIDATES: usize = 16;

/// 한 단계 내려갈 때 후보 주변 탐색 반경 (픽셀)
const REFINE_RADIUS: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Best {
    score: f64,
    x: usize,
    y: usize,
}

impl Best {
    /// 점수가 높고, 같으면 래스터 순서상 앞선 쪽이 이긴다.
    fn beats(&self, other: &Best) -> bool {
        self.score > other.score
            || (self.score == other.score && (self.y, self.x) < (other.y, other.x))
    }
}

/// RGB 평면 (행 우선, 알파 제외)
struct Plane {
    width: usize,
    height: usize,
    data: Vec<[f32; CHANNELS]>,
}

impl Plane {
    fn crop(image: &RgbaImage, (x, y, w, h): (u32, u32, u32, u32)) -> Self {
        let mut data = Vec::with_capacity(w as usize * h as usize);
        for row in y..y + h {
            for col in x..x + w {
                let px = image.get_pixel(col, row).0;
                data.push([px[0] as f32, px[1] as f32, px[2] as f32]);
            }
        }
        Self {
            width: w as usize,
            height: h as usize,
            data,
        }
    }

    /// 2x2 박스 평균으로 절반 축소 (홀수 끝 행/열은 버림)
    fn downsample(&self) -> Self {
        let (width, height) = (self.width / 2, self.height / 2);
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            let top = &self.data[2 * y * self.width..];
            let bottom = &self.data[(2 * y + 1) * self.width..];
            for x in 0..width {
                let (a, b) = (top[2 * x], top[2 * x + 1]);
                let (c, d) = (bottom[2 * x], bottom[2 * x + 1]);
                data.push(std::array::from_fn(|ch| (a[ch] + b[ch] + c[ch] + d[ch]) * 0.25));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    fn row(&self, x: usize, y: usize, len: usize) -> &[[f32; CHANNELS]] {
        let start = y * self.width + x;
        &self.data[start..start + len]
    }
}

/// 제로 평균 템플릿 (채널 인터리브) + 노름
struct PreparedTemplate {
    width: usize,
    height: usize,
    values: Vec<f64>,
    norm: f64,
}

impl PreparedTemplate {
    /// 단색 템플릿은 상관 계수가 정의되지 않으므로 `None`
    fn new(plane: &Plane) -> Option<Self> {
        let n = plane.data.len() as f64;

        let mut means = [0.0f64; CHANNELS];
        for px in &plane.data {
            for c in 0..CHANNELS {
                means[c] += px[c] as f64;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut values = Vec::with_capacity(plane.data.len() * CHANNELS);
        let mut sum_sq = 0.0;
        for px in &plane.data {
            for c in 0..CHANNELS {
                let v = px[c] as f64 - means[c];
                sum_sq += v * v;
                values.push(v);
            }
        }

        if sum_sq <= MIN_VARIANCE {
            return None;
        }

        Some(Self {
            width: plane.width,
            height: plane.height,
            values,
            norm: sum_sq.sqrt(),
        })
    }

    fn pixel_count(&self) -> f64 {
        (self.width * self.height) as f64
    }

    /// 템플릿과 (u, v) 창의 내적. 템플릿이 제로 평균이므로 창 평균을 빼지 않아도 같다.
    fn dot(&self, plane: &Plane, u: usize, v: usize) -> f64 {
        let mut numerator = 0.0;
        let mut t = self.values.iter();
        for j in 0..self.height {
            for px in plane.row(u, v + j, self.width) {
                for value in px {
                    numerator += t.next().copied().unwrap_or(0.0) * *value as f64;
                }
            }
        }
        numerator
    }

    /// 적분 영상 없이 (u, v) 위치 점수를 직접 계산
    fn score_at(&self, plane: &Plane, u: usize, v: usize) -> f64 {
        let mut s = [0.0f64; CHANNELS];
        let mut sq = [0.0f64; CHANNELS];
        for j in 0..self.height {
            for px in plane.row(u, v + j, self.width) {
                for c in 0..CHANNELS {
                    let f = px[c] as f64;
                    s[c] += f;
                    sq[c] += f * f;
                }
            }
        }
        let variance = window_variance(&s, &sq, self.pixel_count());
        if variance <= MIN_VARIANCE {
            return 0.0;
        }
        correlation(self.dot(plane, u, v), self.norm, variance)
    }
}

/// 채널별 합 / 제곱합 적분 영상 (크기 (w+1) x (h+1))
struct Integral {
    stride: usize,
    sum: Vec<[f64; CHANNELS]>,
    sum_sq: Vec<[f64; CHANNELS]>,
}

impl Integral {
    fn new(plane: &Plane) -> Self {
        let stride = plane.width + 1;
        let mut sum = vec![[0.0; CHANNELS]; stride * (plane.height + 1)];
        let mut sum_sq = vec![[0.0; CHANNELS]; stride * (plane.height + 1)];
        for y in 0..plane.height {
            let mut row = [0.0; CHANNELS];
            let mut row_sq = [0.0; CHANNELS];
            for x in 0..plane.width {
                let px = plane.data[y * plane.width + x];
                let above = y * stride + (x + 1);
                let here = (y + 1) * stride + (x + 1);
                for c in 0..CHANNELS {
                    let f = px[c] as f64;
                    row[c] += f;
                    row_sq[c] += f * f;
                    sum[here][c] = sum[above][c] + row[c];
                    sum_sq[here][c] = sum_sq[above][c] + row_sq[c];
                }
            }
        }
        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    /// (x, y)에서 시작하는 w x h 창의 채널별 (합, 제곱합)
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> ([f64; CHANNELS], [f64; CHANNELS]) {
        let (a, b) = (y * self.stride + x, y * self.stride + x + w);
        let (c, d) = ((y + h) * self.stride + x, (y + h) * self.stride + x + w);
        let mut s = [0.0; CHANNELS];
        let mut sq = [0.0; CHANNELS];
        for ch in 0..CHANNELS {
            s[ch] = self.sum[d][ch] - self.sum[b][ch] - self.sum[c][ch] + self.sum[a][ch];
            sq[ch] =
                self.sum_sq[d][ch] - self.sum_sq[b][ch] - self.sum_sq[c][ch] + self.sum_sq[a][ch];
        }
        (s, sq)
    }
}

fn window_variance(s: &[f64; CHANNELS], sq: &[f64; CHANNELS], n: f64) -> f64 {
    (0..CHANNELS).map(|c| sq[c] - s[c] * s[c] / n).sum()
}

fn correlation(numerator: f64, template_norm: f64, variance: f64) -> f64 {
    let score = (numerator / (template_norm * variance.sqrt())).clamp(-1.0, 1.0);
    if score.is_finite() {
        score
    } else {
        f64::NEG_INFINITY
    }
}

fn search_cost(plane: &Plane, tpl: &PreparedTemplate) -> u64 {
    let positions = (plane.width - tpl.width + 1) * (plane.height - tpl.height + 1);
    positions as u64 * (tpl.width * tpl.height) as u64
}

/// 모든 위치의 점수 (행 단위 병렬). 중단되면 `None`.
fn score_map(plane: &Plane, tpl: &PreparedTemplate, abort: &AtomicBool) -> Option<Vec<f64>> {
    let integral = Integral::new(plane);
    let cols = plane.width - tpl.width + 1;
    let rows = plane.height - tpl.height + 1;
    let n = tpl.pixel_count();

    let mut scores = vec![0.0; cols * rows];
    scores
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(v, row)| {
            if abort.load(Ordering::Relaxed) {
                return;
            }
            for (u, slot) in row.iter_mut().enumerate() {
                let (s, sq) = integral.window(u, v, tpl.width, tpl.height);
                let variance = window_variance(&s, &sq, n);
                *slot = if variance <= MIN_VARIANCE {
                    0.0
                } else {
                    correlation(tpl.dot(plane, u, v), tpl.norm, variance)
                };
            }
        });
    (!abort.load(Ordering::Relaxed)).then_some(scores)
}

/// 래스터 순서상 첫 번째 최대값
fn first_max(scores: &[f64], cols: usize) -> Option<Best> {
    let mut best: Option<Best> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score == f64::NEG_INFINITY {
            continue;
        }
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(Best {
                score,
                x: i % cols,
                y: i / cols,
            });
        }
    }
    best
}

/// 점수 상위 후보 (서로 `radius`보다 가까운 후보는 하나만 남김)
fn top_candidates(scores: &[f64], cols: usize, limit: usize, radius: usize) -> Vec<Best> {
    let mut order: Vec<usize> = (0..scores.len())
        .filter(|&i| scores[i] != f64::NEG_INFINITY)
        .collect();
    order.sort_unstable_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    let mut picked: Vec<Best> = Vec::with_capacity(limit);
    for i in order {
        let (x, y) = (i % cols, i / cols);
        let isolated = picked
            .iter()
            .all(|p| p.x.abs_diff(x) > radius || p.y.abs_diff(y) > radius);
        if isolated {
            picked.push(Best {
                score: scores[i],
                x,
                y,
            });
            if picked.len() == limit {
                break;
            }
        }
    }
    picked
}

/// 한 단계 위 후보 (cx, cy)의 확대 위치 주변에서 최고점 탐색
fn refine(plane: &Plane, tpl: &PreparedTemplate, cx: usize, cy: usize) -> Option<Best> {
    let (max_x, max_y) = (plane.width - tpl.width, plane.height - tpl.height);
    let (cx, cy) = (cx.min(max_x), cy.min(max_y));

    let mut best: Option<Best> = None;
    for y in cy.saturating_sub(REFINE_RADIUS)..=(cy + REFINE_RADIUS).min(max_y) {
        for x in cx.saturating_sub(REFINE_RADIUS)..=(cx + REFINE_RADIUS).min(max_x) {
            let candidate = Best {
                score: tpl.score_at(plane, x, y),
                x,
                y,
            };
            if candidate.score == f64::NEG_INFINITY {
                continue;
            }
            if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                best = Some(candidate);
            }
        }
    }
    best
}

fn best_match(
    frame: &RgbaImage,
    roi: (u32, u32, u32, u32),
    template: &RgbaImage,
    abort: &AtomicBool,
) -> Option<Best> {
    let mut template_plane = Plane::crop(template, (0, 0, template.width(), template.height()));
    let mut frames = vec![Plane::crop(frame, roi)];
    let mut templates = vec![PreparedTemplate::new(&template_plane)?];

    // 작업량이 상한 이하가 될 때까지 프레임과 템플릿을 함께 축소한다.
    // 축소한 템플릿이 단색이 되면 그 단계는 쓸 수 없다.
    loop {
        let level = frames.len() - 1;
        if level == MAX_LEVELS
            || search_cost(&frames[level], &templates[level]) <= EXHAUSTIVE_BUDGET
            || template_plane.width / 2 < MIN_TEMPLATE_SIDE
            || template_plane.height / 2 < MIN_TEMPLATE_SIDE
        {
            break;
        }
        let smaller = template_plane.downsample();
        let Some(prepared) = PreparedTemplate::new(&smaller) else {
            break;
        };
        let next = frames[level].downsample();
        frames.push(next);
        templates.push(prepared);
        template_plane = smaller;
    }

    let top = frames.len() - 1;
    let cols = frames[top].width - templates[top].width + 1;
    let scores = score_map(&frames[top], &templates[top], abort)?;
    if top == 0 {
        return first_max(&scores, cols);
    }

    let radius = REFINE_RADIUS.max(templates[top].width.max(templates[top].height) / 4);
    let mut candidates = top_candidates(&scores, cols, CANDIDATES, radius);
    trace!(levels = top, candidates = candidates.len(), "피라미드 탐색");
    for level in (0..top).rev() {
        if abort.load(Ordering::Relaxed) {
            return None;
        }
        candidates = candidates
            .iter()
            .filter_map(|c| refine(&frames[level], &templates[level], c.x * 2, c.y * 2))
            .collect();
    }

    candidates
        .into_iter()
        .fold(None, |best: Option<Best>, c| match best {
            Some(b) if !c.beats(&b) => Some(b),
            _ => Some(c),
        })
}

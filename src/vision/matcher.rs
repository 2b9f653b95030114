//! Template matching
//!
//! Scores every aligned window of a frame against a reference image with
//! zero-mean normalized cross-correlation and reports the best window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use image::{ImageBuffer, Luma};
use imageproc::template_matching::find_extremes;
use ndarray::{s, Array2, Array3};
use rayon::prelude::*;
use serde::Serialize;

use super::frame::Frame;
use super::VisionError;
use crate::android::Point;
use crate::game::SharedState;

/// Score map produced by `correlation_map`
pub type ScoreMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Outcome of a single match call
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    /// Best score exceeded the threshold
    pub matched: bool,
    /// Center of the best-scoring window in frame pixels
    pub location: Option<Point>,
    /// Best correlation score, 0 when nothing was computed
    pub score: f32,
}

impl MatchResult {
    /// No match and no location
    pub fn none() -> Self {
        Self {
            matched: false,
            location: None,
            score: 0.0,
        }
    }

    /// Location, only when matched
    pub fn hit(&self) -> Option<Point> {
        if self.matched {
            self.location
        } else {
            None
        }
    }
}

/// A named reference image
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub image: Frame,
}

/// Where templates come from
pub trait TemplateSource: Send + Sync {
    /// Load the template registered under `name`
    fn load(&self, name: &str) -> Result<Arc<Template>, VisionError>;
}

/// Templates stored as `<dir>/<name>.png`, cached after the first load
pub struct TemplateDir {
    root: PathBuf,
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl TemplateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Path a template name resolves to
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.png", name))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of templates currently cached
    pub fn cached(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl TemplateSource for TemplateDir {
    fn load(&self, name: &str) -> Result<Arc<Template>, VisionError> {
        if let Some(template) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(template.clone());
        }

        let path = self.path_for(name);
        let image = image::open(&path).map_err(|e| VisionError::TemplateLoad {
            name: name.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })?;

        let template = Arc::new(Template {
            name: name.to_string(),
            image: Frame::from_rgb_image(&image.to_rgb8()),
        });
        log::debug!(
            "Loaded template {} ({}x{})",
            name,
            template.image.width(),
            template.image.height()
        );

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), template.clone());
        Ok(template)
    }
}

/// Matches named templates against frames
pub struct TemplateMatcher {
    source: Arc<dyn TemplateSource>,
    state: Arc<SharedState>,
    /// Score a match must exceed
    threshold: f32,
}

impl TemplateMatcher {
    /// Create a matcher with the default 0.8 threshold
    pub fn new(source: Arc<dyn TemplateSource>, state: Arc<SharedState>) -> Self {
        Self {
            source,
            state,
            threshold: 0.8,
        }
    }

    /// Set the match threshold
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Match the template called `name` against `frame`
    ///
    /// Never fails: errors are logged and reported as no match. While the
    /// stop flag is set nothing is loaded or computed.
    pub fn match_template(&self, frame: &Frame, name: &str) -> MatchResult {
        if self.state.is_stopped() {
            return MatchResult::none();
        }

        let started = Instant::now();
        match self.compute(frame, name) {
            Ok(result) => {
                log::debug!(
                    "match {} score {:.3} matched {} in {:.2?}",
                    name,
                    result.score,
                    result.matched,
                    started.elapsed()
                );
                result
            }
            Err(e) => {
                log::warn!("match {} failed, continuing: {}", name, e);
                MatchResult::none()
            }
        }
    }

    /// True when `name` matches `frame`
    pub fn matches(&self, frame: &Frame, name: &str) -> bool {
        self.match_template(frame, name).matched
    }

    /// First template of `names`, in order, that matches
    pub fn find_first<'a>(&self, frame: &Frame, names: &'a [String]) -> Option<(&'a str, Point)> {
        names.iter().find_map(|name| {
            self.match_template(frame, name)
                .hit()
                .map(|point| (name.as_str(), point))
        })
    }

    fn compute(&self, frame: &Frame, name: &str) -> Result<MatchResult, VisionError> {
        let template = self.source.load(name)?;
        let best = locate(frame, &template.image)?;

        let location = Point::new(
            (best.x + template.image.width() / 2) as i32,
            (best.y + template.image.height() / 2) as i32,
        );

        Ok(MatchResult {
            matched: best.score > self.threshold,
            location: Some(location),
            score: best.score,
        })
    }
}

/// Shortest template side allowed at the coarse search level
const MIN_COARSE_SIDE: u32 = 8;
/// Deepest pyramid level (downscale by 8)
const MAX_LEVEL: u32 = 3;

/// Top-left corner and score of the best window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestWindow {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// Number of halvings applied to frame and template before the coarse pass
fn pyramid_level(template_width: u32, template_height: u32) -> u32 {
    let shortest = template_width.min(template_height);
    (1..=MAX_LEVEL)
        .rev()
        .find(|&level| shortest >> level >= MIN_COARSE_SIDE)
        .unwrap_or(0)
}

/// Best window of `template` over `frame`
///
/// Templates big enough to survive downscaling are searched coarse to fine:
/// the whole score map is computed on a reduced copy of both images, then
/// full resolution scores are computed only around the coarse winner. Small
/// templates get the exhaustive map directly.
pub fn locate(frame: &Frame, template: &Frame) -> Result<BestWindow, VisionError> {
    let full = Correlator::new(frame, template)?;
    let level = pyramid_level(template.width(), template.height());
    if level == 0 {
        return Ok(best_of(&full.map()?, 0, 0));
    }

    let factor = 1u32 << level;
    let coarse = Correlator::new(&frame.downscale(factor)?, &template.downscale(factor)?)?;
    let seed = best_of(&coarse.map()?, 0, 0);

    let radius = 2 * factor;
    let (last_x, last_y) = (full.cols as u32 - 1, full.rows as u32 - 1);
    let x0 = (seed.x * factor).saturating_sub(radius).min(last_x);
    let y0 = (seed.y * factor).saturating_sub(radius).min(last_y);
    let x1 = (seed.x * factor + radius).min(last_x);
    let y1 = (seed.y * factor + radius).min(last_y);

    let refined = full.region(
        x0 as usize,
        y0 as usize,
        (x1 - x0 + 1) as usize,
        (y1 - y0 + 1) as usize,
    )?;
    let best = best_of(&refined, x0, y0);
    log::trace!(
        "coarse level {} seed ({}, {}) refined to ({}, {})",
        level,
        seed.x,
        seed.y,
        best.x,
        best.y
    );
    Ok(best)
}

fn best_of(scores: &ScoreMap, offset_x: u32, offset_y: u32) -> BestWindow {
    let extremes = find_extremes(scores);
    let (x, y) = extremes.max_value_location;
    BestWindow {
        x: x + offset_x,
        y: y + offset_y,
        score: extremes.max_value,
    }
}

/// Zero-mean normalized cross-correlation of `template` over `frame`
///
/// Equivalent to OpenCV's `TM_CCOEFF_NORMED` with the three channels pooled.
/// The map has one entry per window position: `(W - w + 1) x (H - h + 1)`.
pub fn correlation_map(frame: &Frame, template: &Frame) -> Result<ScoreMap, VisionError> {
    Correlator::new(frame, template)?.map()
}

/// Precomputed state for scoring windows of one frame against one template
struct Correlator {
    frame: Array3<f32>,
    /// Template with its mean removed
    template: Array3<f32>,
    sums: Array2<f64>,
    squares: Array2<f64>,
    template_energy: f64,
    template_mean: f64,
    samples: f64,
    width: usize,
    height: usize,
    /// Window positions per row
    cols: usize,
    /// Window positions per column
    rows: usize,
}

impl Correlator {
    fn new(frame: &Frame, template: &Frame) -> Result<Self, VisionError> {
        let (fw, fh) = (frame.width() as usize, frame.height() as usize);
        let (tw, th) = (template.width() as usize, template.height() as usize);

        if tw == 0 || th == 0 {
            return Err(VisionError::EmptyTemplate);
        }
        if tw > fw || th > fh {
            return Err(VisionError::SizeMismatch {
                template: (tw as u32, th as u32),
                frame: (fw as u32, fh as u32),
            });
        }

        let samples = (tw * th * 3) as f64;
        let template_px = template.pixels().mapv(f64::from);
        let template_mean = template_px.sum() / samples;
        let centered = template_px.mapv(|v| (v - template_mean) as f32);
        let template_energy: f64 = centered.iter().map(|&v| (v as f64) * (v as f64)).sum();
        let (sums, squares) = integral_tables(frame.pixels());

        Ok(Self {
            frame: frame.pixels().mapv(f32::from),
            template: centered,
            sums,
            squares,
            template_energy,
            template_mean,
            samples,
            width: tw,
            height: th,
            cols: fw - tw + 1,
            rows: fh - th + 1,
        })
    }

    /// Full score map
    fn map(&self) -> Result<ScoreMap, VisionError> {
        self.region(0, 0, self.cols, self.rows)
    }

    /// Scores of the `cols x rows` window positions starting at `(x0, y0)`
    fn region(
        &self,
        x0: usize,
        y0: usize,
        cols: usize,
        rows: usize,
    ) -> Result<ScoreMap, VisionError> {
        let mut scores = vec![0.0f32; cols * rows];
        scores
            .par_chunks_mut(cols)
            .enumerate()
            .for_each(|(row, out)| {
                for (col, score) in out.iter_mut().enumerate() {
                    *score = self.score(x0 + col, y0 + row);
                }
            });

        ImageBuffer::from_raw(cols as u32, rows as u32, scores)
            .ok_or(VisionError::InvalidFrameData)
    }

    fn score(&self, x: usize, y: usize) -> f32 {
        let n = self.samples;
        let window_sum = box_sum(&self.sums, x, y, self.width, self.height);
        let window_energy =
            box_sum(&self.squares, x, y, self.width, self.height) - window_sum * window_sum / n;

        let score = if self.template_energy <= f64::EPSILON || window_energy <= 1e-6 {
            flat_score(
                self.template_energy,
                window_energy,
                self.template_mean,
                window_sum / n,
            )
        } else {
            let cross = self.window_dot(x, y) as f64;
            (cross / (window_energy * self.template_energy).sqrt()).clamp(-1.0, 1.0)
        };
        score as f32
    }

    /// Sum of `frame * template` over the window whose top-left is `(x, y)`
    fn window_dot(&self, x: usize, y: usize) -> f32 {
        let mut acc = 0.0f32;
        for row in 0..self.height {
            let frame_row = self.frame.slice(s![y + row, x..x + self.width, ..]);
            let template_row = self.template.slice(s![row, .., ..]);
            acc += match (frame_row.as_slice(), template_row.as_slice()) {
                (Some(a), Some(b)) => a.iter().zip(b).map(|(a, b)| a * b).sum::<f32>(),
                _ => frame_row
                    .iter()
                    .zip(template_row.iter())
                    .map(|(a, b)| a * b)
                    .sum::<f32>(),
            };
        }
        acc
    }
}

/// Score when either side has no variance
fn flat_score(template_energy: f64, window_energy: f64, template_mean: f64, window_mean: f64) -> f64 {
    let both_flat = template_energy <= f64::EPSILON && window_energy <= 1e-6;
    if both_flat && (template_mean - window_mean).abs() < 0.5 {
        1.0
    } else {
        0.0
    }
}

/// Summed-area tables of channel sums and squared channel sums
fn integral_tables(pixels: &Array3<u8>) -> (Array2<f64>, Array2<f64>) {
    let (h, w, channels) = pixels.dim();
    let mut sums = Array2::<f64>::zeros((h + 1, w + 1));
    let mut squares = Array2::<f64>::zeros((h + 1, w + 1));

    for y in 0..h {
        let mut row_sum = 0.0;
        let mut row_sq = 0.0;
        for x in 0..w {
            for c in 0..channels {
                let v = pixels[[y, x, c]] as f64;
                row_sum += v;
                row_sq += v * v;
            }
            sums[[y + 1, x + 1]] = sums[[y, x + 1]] + row_sum;
            squares[[y + 1, x + 1]] = squares[[y, x + 1]] + row_sq;
        }
    }

    (sums, squares)
}

fn box_sum(table: &Array2<f64>, x: usize, y: usize, w: usize, h: usize) -> f64 {
    table[[y + h, x + w]] - table[[y, x + w]] - table[[y + h, x]] + table[[y, x]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::noise;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn paste(frame: &mut RgbImage, template: &RgbImage, at_x: u32, at_y: u32) {
        image::imageops::replace(frame, template, at_x as i64, at_y as i64);
    }

    struct MemoryTemplates {
        templates: HashMap<String, Arc<Template>>,
        loads: AtomicUsize,
    }

    impl MemoryTemplates {
        fn new(entries: &[(&str, &RgbImage)]) -> Self {
            let templates = entries
                .iter()
                .map(|(name, image)| {
                    let template = Template {
                        name: name.to_string(),
                        image: Frame::from_rgb_image(image),
                    };
                    (name.to_string(), Arc::new(template))
                })
                .collect();
            Self {
                templates,
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl TemplateSource for MemoryTemplates {
        fn load(&self, name: &str) -> Result<Arc<Template>, VisionError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.templates
                .get(name)
                .cloned()
                .ok_or_else(|| VisionError::TemplateLoad {
                    name: name.to_string(),
                    reason: "not registered".to_string(),
                })
        }
    }

    fn matcher_with(source: Arc<MemoryTemplates>) -> (TemplateMatcher, Arc<SharedState>) {
        let state = Arc::new(SharedState::new());
        (TemplateMatcher::new(source, state.clone()), state)
    }

    #[test]
    fn test_exact_copy_found_at_center() {
        let template = noise(12, 8, 1);
        let mut canvas = noise(60, 40, 2);
        paste(&mut canvas, &template, 23, 17);

        let source = Arc::new(MemoryTemplates::new(&[("button", &template)]));
        let (matcher, _) = matcher_with(source);
        let result = matcher.match_template(&Frame::from_rgb_image(&canvas), "button");

        assert!(result.matched);
        assert!(result.score > 0.99);
        let location = result.location.unwrap();
        assert!((location.x - (23 + 6)).abs() <= 1);
        assert!((location.y - (17 + 4)).abs() <= 1);
    }

    #[test]
    fn test_unrelated_template_not_matched() {
        let template = noise(12, 8, 99);
        let canvas = noise(60, 40, 2);

        let source = Arc::new(MemoryTemplates::new(&[("button", &template)]));
        let (matcher, _) = matcher_with(source);
        let result = matcher.match_template(&Frame::from_rgb_image(&canvas), "button");

        assert!(!result.matched);
        assert_eq!(result.hit(), None);
    }

    #[test]
    fn test_flat_template_on_flat_frame() {
        let template = RgbImage::from_pixel(4, 4, Rgb([50, 50, 50]));
        let frame = RgbImage::from_pixel(10, 10, Rgb([50, 50, 50]));
        let scores =
            correlation_map(&Frame::from_rgb_image(&frame), &Frame::from_rgb_image(&template))
                .unwrap();
        assert_eq!(scores.dimensions(), (7, 7));
        assert_eq!(scores.get_pixel(0, 0)[0], 1.0);

        let other = RgbImage::from_pixel(10, 10, Rgb([200, 200, 200]));
        let scores =
            correlation_map(&Frame::from_rgb_image(&other), &Frame::from_rgb_image(&template))
                .unwrap();
        assert_eq!(scores.get_pixel(3, 3)[0], 0.0);
    }

    #[test]
    fn test_template_larger_than_frame_fails_soft() {
        let template = noise(30, 30, 1);
        let frame = noise(10, 10, 2);

        let err = correlation_map(&Frame::from_rgb_image(&frame), &Frame::from_rgb_image(&template))
            .unwrap_err();
        assert!(matches!(err, VisionError::SizeMismatch { .. }));

        let source = Arc::new(MemoryTemplates::new(&[("big", &template)]));
        let (matcher, _) = matcher_with(source);
        assert_eq!(
            matcher.match_template(&Frame::from_rgb_image(&frame), "big"),
            MatchResult::none()
        );
    }

    #[test]
    fn test_missing_template_fails_soft() {
        let source = Arc::new(MemoryTemplates::new(&[]));
        let (matcher, _) = matcher_with(source);
        let frame = Frame::from_rgb_image(&noise(20, 20, 3));

        assert_eq!(matcher.match_template(&frame, "nope"), MatchResult::none());
    }

    #[test]
    fn test_stop_flag_skips_load() {
        let template = noise(8, 8, 1);
        let source = Arc::new(MemoryTemplates::new(&[("button", &template)]));
        let (matcher, state) = matcher_with(source.clone());
        let frame = Frame::from_rgb_image(&noise(20, 20, 3));

        state.set_stopped(true);
        assert_eq!(matcher.match_template(&frame, "button"), MatchResult::none());
        assert_eq!(source.loads.load(Ordering::SeqCst), 0);

        state.set_stopped(false);
        matcher.match_template(&frame, "button");
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_find_first_respects_order() {
        let a = noise(10, 10, 5);
        let b = noise(10, 10, 6);
        let mut canvas = noise(80, 50, 7);
        paste(&mut canvas, &a, 5, 5);
        paste(&mut canvas, &b, 50, 30);

        let source = Arc::new(MemoryTemplates::new(&[("a", &a), ("b", &b)]));
        let (matcher, _) = matcher_with(source);
        let frame = Frame::from_rgb_image(&canvas);

        let names = vec!["missing".to_string(), "b".to_string(), "a".to_string()];
        let (name, point) = matcher.find_first(&frame, &names).unwrap();
        assert_eq!(name, "b");
        assert_eq!(point, Point::new(55, 35));
    }

    #[test]
    fn test_pyramid_level_keeps_small_templates_exact() {
        assert_eq!(pyramid_level(16, 12), 0);
        assert_eq!(pyramid_level(16, 16), 1);
        assert_eq!(pyramid_level(120, 48), 2);
        assert_eq!(pyramid_level(400, 300), MAX_LEVEL);
    }

    #[test]
    fn test_large_frame_search_is_bounded() {
        let template = noise(120, 48, 21);
        let mut canvas = noise(1280, 720, 22);
        paste(&mut canvas, &template, 600, 300);
        let frame = Frame::from_rgb_image(&canvas);
        let template = Frame::from_rgb_image(&template);

        let started = Instant::now();
        let best = locate(&frame, &template).unwrap();
        let elapsed = started.elapsed();

        assert_eq!((best.x, best.y), (600, 300));
        assert!(best.score > 0.99);
        let budget = if cfg!(debug_assertions) {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(2)
        };
        assert!(elapsed < budget, "720p search took {:?}", elapsed);
    }

    #[test]
    fn test_coarse_search_agrees_with_exhaustive_map() {
        let template = noise(40, 32, 31);
        let mut canvas = noise(200, 120, 32);
        paste(&mut canvas, &template, 84, 44);
        let frame = Frame::from_rgb_image(&canvas);
        let template = Frame::from_rgb_image(&template);

        let exhaustive = find_extremes(&correlation_map(&frame, &template).unwrap());
        let best = locate(&frame, &template).unwrap();
        assert_eq!((best.x, best.y), exhaustive.max_value_location);
        assert_eq!(best.score, exhaustive.max_value);
    }

    #[test]
    fn test_template_dir_loads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let template = noise(6, 6, 11);
        template.save(dir.path().join("confirm.png")).unwrap();

        let templates = TemplateDir::new(dir.path());
        let first = templates.load("confirm").unwrap();
        assert_eq!(first.image, Frame::from_rgb_image(&template));
        assert_eq!(templates.cached(), 1);

        // Served from cache even after the file is gone
        std::fs::remove_file(dir.path().join("confirm.png")).unwrap();
        assert!(templates.load("confirm").is_ok());
        assert!(matches!(
            templates.load("absent"),
            Err(VisionError::TemplateLoad { .. })
        ));
    }

    #[test]
    fn test_malformed_template_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

        let templates = TemplateDir::new(dir.path());
        assert!(templates.load("broken").is_err());
    }
}

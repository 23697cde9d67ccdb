//! Human-behavior timing and movement model
//!
//! Pure timing/path utilities plus a click routine that drives them
//! through a CDP session. The goal is DOM interaction that is
//! statistically indistinguishable from manual use: log-normal pauses
//! (many short, occasional long), curved pointer paths with micro-jitter,
//! and Fitts-style movement durations.

use std::time::Duration;

use rand::Rng;
use smallvec::SmallVec;
use tokio::time::sleep;

use crate::cdp::{MouseButton, MouseEventType, Session};
use crate::error::Result;

/// 2D point
pub type Point = (f64, f64);

/// Stack-allocated storage for typical pointer paths
pub type PointVec = SmallVec<[Point; 64]>;

/// Uniform random pause in `[min_ms, max_ms]`
pub async fn random_delay(min_ms: u64, max_ms: u64) {
    let delay = rand::thread_rng().gen_range(min_ms..=max_ms.max(min_ms + 1));
    sleep(Duration::from_millis(delay)).await;
}

/// Human-like pause around `base_ms`.
///
/// Samples a log-normal distribution (right-skewed: mostly short
/// hesitations, the occasional long one), clamped to
/// `[100ms, 3 * base_ms]`.
pub async fn human_delay(base_ms: u64, variance: f64) {
    sleep(sample_human_delay(base_ms, variance)).await;
}

/// The sampling half of [`human_delay`], separated so the distribution
/// bounds are testable without sleeping.
pub fn sample_human_delay(base_ms: u64, variance: f64) -> Duration {
    let mut rng = rand::thread_rng();

    // Box-Muller: two uniforms into one standard normal
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

    let delay_ms = ((base_ms as f64).ln() + variance * z).exp();
    let clamped = delay_ms.clamp(100.0, base_ms as f64 * 3.0);
    Duration::from_millis(clamped as u64)
}

/// Cubic bezier path between two points.
///
/// Control points deviate from the straight line proportionally to the
/// travel distance; every sample carries sub-pixel micro-jitter.
pub fn bezier_path(start: Point, end: Point, num_points: usize, deviation: f64) -> PointVec {
    let mut rng = rand::thread_rng();
    let num_points = num_points.max(2);

    let dx = end.0 - start.0;
    let dy = end.1 - start.1;

    let ctrl1 = (
        start.0 + dx * 0.25 + rng.gen_range(-deviation..=deviation) * dx.abs(),
        start.1 + dy * 0.25 + rng.gen_range(-deviation..=deviation) * dy.abs(),
    );
    let ctrl2 = (
        start.0 + dx * 0.75 + rng.gen_range(-deviation..=deviation) * dx.abs(),
        start.1 + dy * 0.75 + rng.gen_range(-deviation..=deviation) * dy.abs(),
    );

    let mut path = PointVec::new();
    for i in 0..=num_points {
        let t = i as f64 / num_points as f64;
        let mt = 1.0 - t;
        let x = mt.powi(3) * start.0
            + 3.0 * mt.powi(2) * t * ctrl1.0
            + 3.0 * mt * t.powi(2) * ctrl2.0
            + t.powi(3) * end.0;
        let y = mt.powi(3) * start.1
            + 3.0 * mt.powi(2) * t * ctrl1.1
            + 3.0 * mt * t.powi(2) * ctrl2.1
            + t.powi(3) * end.1;

        path.push((
            x + rng.gen_range(-0.5..0.5),
            y + rng.gen_range(-0.5..0.5),
        ));
    }

    path
}

/// Movement duration from distance: fixed base plus per-pixel cost,
/// with +/-20% variance. A Fitts's-law approximation.
pub fn movement_duration(distance: f64) -> Duration {
    let base_ms = 100.0;
    let per_pixel_ms = 0.8;
    let variance = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis(((base_ms + distance * per_pixel_ms) * variance) as u64)
}

/// Humanized pointer driving one CDP session
pub struct Human<'a> {
    session: &'a Session,
}

impl<'a> Human<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Move along a bezier path and click inside the target box.
    ///
    /// The click lands off-center (within 20% of each dimension), the
    /// pointer travels at a Fitts-style pace, and the button is held
    /// briefly before release.
    pub async fn click(&self, center_x: f64, center_y: f64, width: f64, height: f64) -> Result<()> {
        let (start, target) = {
            let mut rng = rand::thread_rng();
            let start = (rng.gen_range(100.0..600.0), rng.gen_range(100.0..500.0));
            let target = (
                center_x + rng.gen_range(-0.2..0.2) * width.max(1.0),
                center_y + rng.gen_range(-0.2..0.2) * height.max(1.0),
            );
            (start, target)
        };

        let distance =
            ((target.0 - start.0).powi(2) + (target.1 - start.1).powi(2)).sqrt();
        let path = bezier_path(start, target, 20, 0.3);
        let step = movement_duration(distance).div_f64(path.len() as f64);

        for (x, y) in &path {
            self.session
                .dispatch_mouse_event(MouseEventType::MouseMoved, *x, *y, None, None)
                .await?;
            sleep(step).await;
        }

        random_delay(50, 150).await;

        self.session
            .dispatch_mouse_event(
                MouseEventType::MousePressed,
                target.0,
                target.1,
                Some(MouseButton::Left),
                Some(1),
            )
            .await?;
        random_delay(50, 100).await;
        self.session
            .dispatch_mouse_event(
                MouseEventType::MouseReleased,
                target.0,
                target.1,
                Some(MouseButton::Left),
                Some(1),
            )
            .await?;

        human_delay(800, 0.4).await;
        Ok(())
    }

    /// Scroll in a few uneven chunks with reading pauses
    pub async fn scroll(&self, delta_y: f64) -> Result<()> {
        let chunks = rand::thread_rng().gen_range(3..=6);
        let per_chunk = delta_y / chunks as f64;

        for _ in 0..chunks {
            let (x, y, jitter) = {
                let mut rng = rand::thread_rng();
                (
                    rng.gen_range(300.0..900.0),
                    rng.gen_range(200.0..600.0),
                    rng.gen_range(-20.0..20.0),
                )
            };
            self.session
                .dispatch_mouse_wheel(x, y, 0.0, per_chunk + jitter)
                .await?;
            random_delay(100, 300).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bezier_path_hits_endpoints() {
        let start = (50.0, 75.0);
        let end = (400.0, 300.0);
        let path = bezier_path(start, end, 20, 0.3);

        // Endpoints carry only micro-jitter
        let first = path.first().unwrap();
        assert!((first.0 - start.0).abs() < 1.0);
        assert!((first.1 - start.1).abs() < 1.0);
        let last = path.last().unwrap();
        assert!((last.0 - end.0).abs() < 1.0);
        assert!((last.1 - end.1).abs() < 1.0);

        assert_eq!(path.len(), 21);
    }

    #[test]
    fn test_bezier_path_minimum_points() {
        let path = bezier_path((0.0, 0.0), (10.0, 10.0), 0, 0.3);
        assert!(path.len() >= 3);
    }

    #[test]
    fn test_human_delay_clamped() {
        for _ in 0..200 {
            let d = sample_human_delay(1000, 0.3).as_millis();
            assert!((100..=3000).contains(&d), "delay {} outside clamp", d);
        }
    }

    #[test]
    fn test_human_delay_skews_short() {
        // Log-normal around the base: the median should sit near base,
        // well under the 3x clamp.
        let mut under = 0;
        for _ in 0..300 {
            if sample_human_delay(1000, 0.3).as_millis() < 1500 {
                under += 1;
            }
        }
        assert!(under > 200, "distribution not right-skewed: {}/300", under);
    }

    #[test]
    fn test_movement_duration_scales_with_distance() {
        for _ in 0..50 {
            let near = movement_duration(10.0).as_millis();
            let far = movement_duration(2000.0).as_millis();
            // 100 + 10*0.8 = 108ms +/-20% vs 100 + 1600 = 1700ms +/-20%
            assert!((86..=130).contains(&near), "near {}", near);
            assert!((1360..=2040).contains(&far), "far {}", far);
        }
    }
}

use serde::{Deserialize, Serialize};

/// CSS pixels.
pub type Px = f64;

/// Minimum travel between consecutive placements.
pub const MIN_DISTANCE: Px = 80.0;
/// Unforced placements inside this window are dropped.
pub const COOLDOWN_MS: f64 = 250.0;
pub const OFFSCREEN_RETURN_MIN_MS: f64 = 1_000.0;
pub const OFFSCREEN_RETURN_MAX_MS: f64 = 1_500.0;
/// Candidate samples per placement before falling back.
pub const PLACEMENT_ATTEMPTS: usize = 12;
/// Resamples when rotating to a label different from the last one.
pub const LABEL_ATTEMPTS: usize = 8;

/// Uniform source in `[0, 1)`. The wasm host wires this to
/// `Math.random`; tests feed fixed sequences.
pub trait RandomSource {
    fn next_unit(&mut self) -> f64;
}

pub fn random_in_range(rng: &mut dyn RandomSource, min: f64, max: f64) -> f64 {
    rng.next_unit() * (max - min) + min
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: Px,
    pub y: Px,
}

impl Point {
    pub fn distance_to(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Evading element size, queried live from layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: Px,
    pub height: Px,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: Px,
    pub height: Px,
}

/// Sampling rectangle for placements. `min <= max` on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: Px,
    pub max_x: Px,
    pub min_y: Px,
    pub max_y: Px,
}

impl Bounds {
    pub fn clamp(&self, p: Point) -> Point {
        Point {
            x: p.x.clamp(self.min_x, self.max_x),
            y: p.y.clamp(self.min_y, self.max_y),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn sample(&self, rng: &mut dyn RandomSource) -> Point {
        Point {
            x: random_in_range(rng, self.min_x, self.max_x),
            y: random_in_range(rng, self.min_y, self.max_y),
        }
    }
}

/// Where the element's top-left corner may land. When off-screen
/// placement is allowed the rectangle is padded outward by 60% of the
/// element's smaller side, so at most a sliver stays grabbable.
pub fn placement_bounds(viewport: Viewport, elem: Size, allow_offscreen: bool) -> Bounds {
    let pad = if allow_offscreen {
        (elem.width.min(elem.height) * 0.6).round()
    } else {
        0.0
    };
    let min_x = -pad;
    let min_y = -pad;
    Bounds {
        min_x,
        max_x: (viewport.width - elem.width + pad).max(min_x),
        min_y,
        max_y: (viewport.height - elem.height + pad).max(min_y),
    }
}

/// True when any edge of the element pokes outside the viewport.
pub fn is_offscreen(pos: Point, viewport: Viewport, elem: Size) -> bool {
    pos.x < 0.0
        || pos.y < 0.0
        || pos.x + elem.width > viewport.width
        || pos.y + elem.height > viewport.height
}

/// Delay before an off-screen jump is forced back on-screen.
pub fn return_delay_ms(rng: &mut dyn RandomSource) -> f64 {
    random_in_range(rng, OFFSCREEN_RETURN_MIN_MS, OFFSCREEN_RETURN_MAX_MS)
}

/// Centered-plus-offset starting spot for the evading element, before
/// the on-screen clamp.
pub fn initial_position(viewport: Viewport, elem: Size) -> Point {
    Point {
        x: (viewport.width - elem.width) / 2.0 + 120.0,
        y: (viewport.height - elem.height - 40.0).min(viewport.height * 0.6),
    }
}

/// Picks minimum-distance random placements relative to wherever the
/// element last landed. The caller records landings via
/// [`EvasionPlanner::set_position`] so clamps and picks share one
/// notion of "last".
#[derive(Debug, Clone, Default)]
pub struct EvasionPlanner {
    last: Option<Point>,
}

impl EvasionPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_position(&self) -> Option<Point> {
        self.last
    }

    pub fn set_position(&mut self, pos: Point) {
        self.last = Some(pos);
    }

    /// Sample up to [`PLACEMENT_ATTEMPTS`] candidates and return the
    /// first one at least [`MIN_DISTANCE`] away from the last landing.
    /// With no prior landing the first candidate wins; when every
    /// attempt stays too close, the last sampled candidate is the
    /// fallback.
    pub fn pick(&self, bounds: Bounds, rng: &mut dyn RandomSource) -> Point {
        let mut candidate = bounds.sample(rng);
        if let Some(prev) = self.last {
            for _ in 1..PLACEMENT_ATTEMPTS {
                if prev.distance_to(candidate) >= MIN_DISTANCE {
                    break;
                }
                candidate = bounds.sample(rng);
            }
        }
        candidate
    }

    /// Last landing clamped into `bounds` (bounds origin when nothing
    /// has landed yet). Used by the forced return and by resize.
    pub fn clamped(&self, bounds: Bounds) -> Point {
        let p = self.last.unwrap_or(Point {
            x: bounds.min_x,
            y: bounds.min_y,
        });
        bounds.clamp(p)
    }
}

/// Placement rate limit. Forced moves bypass `ready` and call `arm`
/// directly.
#[derive(Debug, Clone, Copy)]
pub struct Cooldown {
    window_ms: f64,
    last_at: Option<f64>,
}

impl Cooldown {
    pub fn new(window_ms: f64) -> Self {
        Self {
            window_ms,
            last_at: None,
        }
    }

    pub fn ready(&self, now_ms: f64) -> bool {
        self.last_at.map_or(true, |t| now_ms - t >= self.window_ms)
    }

    pub fn arm(&mut self, now_ms: f64) {
        self.last_at = Some(now_ms);
    }
}

/// Rotates the evading element's label, avoiding an immediate repeat
/// where the list allows one.
#[derive(Debug, Clone)]
pub struct LabelRotation {
    labels: Vec<String>,
    last: Option<usize>,
}

impl LabelRotation {
    pub fn new(labels: Vec<String>) -> Result<Self, String> {
        if labels.is_empty() {
            return Err("label set must not be empty".to_string());
        }
        Ok(Self { labels, last: None })
    }

    /// Resample up to [`LABEL_ATTEMPTS`] times for an index different
    /// from the previous one; repetition is tolerated for a one-entry
    /// list or when sampling fails to diverge.
    pub fn next(&mut self, rng: &mut dyn RandomSource) -> &str {
        if self.labels.len() == 1 {
            self.last = Some(0);
            return &self.labels[0];
        }

        let n = self.labels.len();
        let mut idx = 0;
        for _ in 0..LABEL_ATTEMPTS {
            idx = ((rng.next_unit() * n as f64).floor() as usize).min(n - 1);
            if Some(idx) != self.last {
                break;
            }
        }
        self.last = Some(idx);
        &self.labels[idx]
    }
}

/// Confirmation lifecycle: one in-flight send at a time, locked shut
/// after a success, reopened by a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmState {
    #[default]
    Idle,
    Sending,
    Sent,
}

impl ConfirmState {
    pub fn can_submit(&self) -> bool {
        matches!(self, ConfirmState::Idle)
    }

    /// Claim the in-flight slot. Returns false when a send is already
    /// pending or done.
    pub fn begin(&mut self) -> bool {
        if self.can_submit() {
            *self = ConfirmState::Sending;
            true
        } else {
            false
        }
    }

    pub fn complete(&mut self, ok: bool) {
        *self = if ok {
            ConfirmState::Sent
        } else {
            ConfirmState::Idle
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cycles through a fixed sequence of units.
    struct SeqRandom {
        vals: Vec<f64>,
        i: usize,
    }

    impl SeqRandom {
        fn new(vals: Vec<f64>) -> Self {
            Self { vals, i: 0 }
        }
    }

    impl RandomSource for SeqRandom {
        fn next_unit(&mut self) -> f64 {
            let v = self.vals[self.i % self.vals.len()];
            self.i += 1;
            v
        }
    }

    fn viewport() -> Viewport {
        Viewport {
            width: 800.0,
            height: 600.0,
        }
    }

    fn button() -> Size {
        Size {
            width: 100.0,
            height: 40.0,
        }
    }

    #[test]
    fn bounds_pad_outward_when_offscreen_allowed() {
        let onscreen = placement_bounds(viewport(), button(), false);
        assert_eq!(onscreen.min_x, 0.0);
        assert_eq!(onscreen.max_x, 700.0);
        assert_eq!(onscreen.max_y, 560.0);

        // pad = round(min(100, 40) * 0.6) = 24
        let padded = placement_bounds(viewport(), button(), true);
        assert_eq!(padded.min_x, -24.0);
        assert_eq!(padded.max_x, 724.0);
        assert_eq!(padded.min_y, -24.0);
        assert_eq!(padded.max_y, 584.0);
    }

    #[test]
    fn bounds_stay_well_formed_in_tiny_viewports() {
        let tiny = Viewport {
            width: 50.0,
            height: 20.0,
        };
        let b = placement_bounds(tiny, button(), false);
        assert!(b.max_x >= b.min_x);
        assert!(b.max_y >= b.min_y);
        // clamp must not panic even though the button cannot fit
        let p = b.clamp(Point { x: 500.0, y: 500.0 });
        assert!(b.contains(p));
    }

    #[test]
    fn first_pick_accepts_first_candidate() {
        let planner = EvasionPlanner::new();
        let bounds = placement_bounds(viewport(), button(), false);
        let mut rng = SeqRandom::new(vec![0.5, 0.5]);
        let p = planner.pick(bounds, &mut rng);
        assert_eq!(p, Point { x: 350.0, y: 280.0 });
        assert_eq!(rng.i, 2); // one candidate, two draws
    }

    #[test]
    fn pick_skips_candidates_closer_than_min_distance() {
        let mut planner = EvasionPlanner::new();
        planner.set_position(Point { x: 0.0, y: 0.0 });
        let bounds = placement_bounds(viewport(), button(), false);
        // first candidate lands ~14px away, second far into the corner
        let mut rng = SeqRandom::new(vec![0.02, 0.0, 0.9, 0.9]);
        let p = planner.pick(bounds, &mut rng);
        assert!(p.x > 600.0);
        assert!(
            Point { x: 0.0, y: 0.0 }.distance_to(p) >= MIN_DISTANCE,
            "accepted candidate too close"
        );
    }

    #[test]
    fn pick_falls_back_to_last_sample_when_nothing_diverges() {
        let mut planner = EvasionPlanner::new();
        planner.set_position(Point { x: 350.0, y: 280.0 });
        let bounds = placement_bounds(viewport(), button(), false);
        // every candidate collapses onto the previous position
        let mut rng = SeqRandom::new(vec![0.5]);
        let p = planner.pick(bounds, &mut rng);
        assert_eq!(p, Point { x: 350.0, y: 280.0 });
        assert_eq!(rng.i, PLACEMENT_ATTEMPTS * 2);
    }

    #[test]
    fn picks_never_leave_padded_bounds() {
        let mut planner = EvasionPlanner::new();
        let bounds = placement_bounds(viewport(), button(), true);
        let mut rng = SeqRandom::new(vec![0.0, 1.0 - f64::EPSILON, 0.13, 0.77, 0.99, 0.01]);
        for _ in 0..50 {
            let p = planner.pick(bounds, &mut rng);
            assert!(bounds.contains(p), "{p:?} escaped {bounds:?}");
            planner.set_position(p);
        }
    }

    #[test]
    fn forced_return_settles_inside_viewport() {
        let mut planner = EvasionPlanner::new();
        planner.set_position(Point { x: -24.0, y: 590.0 });
        assert!(is_offscreen(
            planner.last_position().unwrap(),
            viewport(),
            button()
        ));

        let onscreen = placement_bounds(viewport(), button(), false);
        let p = planner.clamped(onscreen);
        planner.set_position(p);
        assert!(!is_offscreen(p, viewport(), button()));
    }

    #[test]
    fn return_delay_stays_in_window() {
        let mut rng = SeqRandom::new(vec![0.0, 0.999, 0.5]);
        for _ in 0..3 {
            let d = return_delay_ms(&mut rng);
            assert!((OFFSCREEN_RETURN_MIN_MS..OFFSCREEN_RETURN_MAX_MS).contains(&d));
        }
    }

    #[test]
    fn initial_position_matches_layout_rule() {
        let p = initial_position(viewport(), button());
        assert_eq!(p.x, 470.0);
        // min(600 - 40 - 40, 360) = 360
        assert_eq!(p.y, 360.0);
    }

    #[test]
    fn cooldown_drops_rapid_unforced_moves() {
        let mut cd = Cooldown::new(COOLDOWN_MS);
        assert!(cd.ready(1_000.0));
        cd.arm(1_000.0);
        assert!(!cd.ready(1_100.0));
        assert!(cd.ready(1_250.0));
    }

    #[test]
    fn labels_never_repeat_when_list_allows() {
        let mut rot = LabelRotation::new(vec!["No".into(), "Nope".into(), "Still no".into()])
            .expect("labels");
        let mut rng = SeqRandom::new(vec![0.1, 0.4, 0.7, 0.9, 0.2, 0.5, 0.8, 0.3]);
        let mut prev = rot.next(&mut rng).to_string();
        for _ in 0..20 {
            let next = rot.next(&mut rng).to_string();
            assert_ne!(next, prev);
            prev = next;
        }
    }

    #[test]
    fn single_label_repeats() {
        let mut rot = LabelRotation::new(vec!["No".into()]).expect("labels");
        let mut rng = SeqRandom::new(vec![0.9]);
        assert_eq!(rot.next(&mut rng), "No");
        assert_eq!(rot.next(&mut rng), "No");
    }

    #[test]
    fn exhausted_resampling_tolerates_a_repeat() {
        let mut rot = LabelRotation::new(vec!["No".into(), "Nope".into()]).expect("labels");
        let mut rng = SeqRandom::new(vec![0.1]);
        assert_eq!(rot.next(&mut rng), "No");
        // every resample hits index 0 again; after LABEL_ATTEMPTS we keep it
        assert_eq!(rot.next(&mut rng), "No");
    }

    #[test]
    fn empty_label_set_is_rejected() {
        assert!(LabelRotation::new(Vec::new()).is_err());
    }

    #[test]
    fn confirm_success_locks_further_submission() {
        let mut state = ConfirmState::default();
        assert!(state.begin());
        assert!(!state.begin(), "in-flight send must block clicks");
        state.complete(true);
        assert_eq!(state, ConfirmState::Sent);
        assert!(!state.begin());
    }

    #[test]
    fn confirm_failure_allows_retry() {
        let mut state = ConfirmState::default();
        assert!(state.begin());
        state.complete(false);
        assert!(state.begin());
    }
}

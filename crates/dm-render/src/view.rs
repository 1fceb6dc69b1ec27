//! Viewer navigation state: time offset, zoom, paging and drags.

/// Smallest horizontal zoom (whole window visible).
pub const MIN_SCALE_X: f64 = 1.0;
/// Smallest vertical gain.
pub const MIN_SCALE_Y: f64 = 0.05;
/// Exponent applied per wheel notch when zooming.
const ZOOM_STEP: f64 = 2.5 * 0.05;

/// Mouse button driving a drag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragButton {
    /// Pan through time.
    Left,
    /// Rescale both axes.
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct DragAnchor {
    offset: u64,
    scale_x: f64,
    scale_y: f64,
}

/// Position and zoom of the channel viewer.
///
/// `window` is the number of samples held per channel; `scale_x` zooms into
/// its beginning so that `window / scale_x` samples are visible.
///
/// # Example
/// ```
/// use dm_render::view::Viewport;
/// let mut view = Viewport::new(30_000, 300_000, 30);
/// view.scroll(1);
/// assert_eq!(view.offset(), 3_000);
/// view.set_scale(2.0, 1.0, None, None);
/// assert_eq!(view.visible_samples(), 15_000);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Viewport {
    offset: u64,
    total: u64,
    window: usize,
    fps: u32,
    scale_x: f64,
    scale_y: f64,
    /// Advance through the recording on every tick.
    pub running: bool,
    first_channel: usize,
    drag: Option<DragAnchor>,
}

impl Viewport {
    /// Viewport over a recording of `total` samples showing `window` samples,
    /// advanced `fps` times per second while running.
    #[must_use]
    pub fn new(window: usize, total: u64, fps: u32) -> Self {
        Self {
            offset: 0,
            total,
            window: window.max(1),
            fps: fps.max(1),
            scale_x: MIN_SCALE_X,
            scale_y: 1.0,
            running: false,
            first_channel: 0,
            drag: None,
        }
    }

    /// First visible sample.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Horizontal zoom, `>= 1`.
    #[must_use]
    pub fn scale_x(&self) -> f64 {
        self.scale_x
    }

    /// Vertical gain, `>= 0.05`.
    #[must_use]
    pub fn scale_y(&self) -> f64 {
        self.scale_y
    }

    /// Samples per channel loaded for display.
    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }

    /// Source channel drawn in the first cell.
    #[must_use]
    pub fn first_channel(&self) -> usize {
        self.first_channel
    }

    /// Number of samples currently shown per channel.
    #[must_use]
    pub fn visible_samples(&self) -> usize {
        ((self.window as f64 / self.scale_x).round() as usize).clamp(1, self.window)
    }

    /// Scale both axes. Factors multiply the current scale, or the absolute
    /// value when given, as in `scale = abs.unwrap_or(current) * factor`.
    pub fn set_scale(&mut self, factor_x: f64, factor_y: f64, abs_x: Option<f64>, abs_y: Option<f64>) {
        let x = abs_x.unwrap_or(self.scale_x) * factor_x;
        let y = abs_y.unwrap_or(self.scale_y) * factor_y;
        self.scale_x = if x.is_finite() { x.max(MIN_SCALE_X) } else { MIN_SCALE_X };
        self.scale_y = if y.is_finite() { y.max(MIN_SCALE_Y) } else { MIN_SCALE_Y };
        self.offset = self.clamp_offset(self.offset as f64);
    }

    fn max_offset(&self) -> u64 {
        self.total.saturating_sub(self.visible_samples() as u64)
    }

    fn clamp_offset(&self, offset: f64) -> u64 {
        if offset.is_nan() || offset <= 0.0 {
            0
        } else {
            (offset as u64).min(self.max_offset())
        }
    }

    /// Move by `relative` samples, clamped to the recording.
    pub fn shift(&mut self, relative: i64) {
        self.offset = self.clamp_offset(self.offset as f64 + relative as f64);
    }

    /// Jump to `absolute`, clamped to the recording.
    pub fn seek(&mut self, absolute: u64) {
        self.offset = self.clamp_offset(absolute as f64);
    }

    /// Wheel scroll by `notches` (positive = forward in time). The step grows
    /// with the square of the notch count and with the visible span.
    pub fn scroll(&mut self, notches: i32) {
        let step = (self.visible_samples() / 10).max(1) as i64;
        let n = i64::from(notches);
        self.shift(n.signum() * step * n * n);
        self.running = false;
    }

    /// Step one tenth of the visible span, stopping playback.
    pub fn step(&mut self, forward: bool) {
        let step = (self.visible_samples() / 10).max(1) as i64;
        self.shift(if forward { step } else { -step });
        self.running = false;
    }

    /// Zoom time by wheel notches (positive = zoom in).
    pub fn zoom_x(&mut self, notches: i32) {
        self.set_scale((ZOOM_STEP * f64::from(notches)).exp(), 1.0, None, None);
    }

    /// Change gain by wheel notches (positive = larger traces).
    pub fn zoom_y(&mut self, notches: i32) {
        self.set_scale(1.0, (ZOOM_STEP * f64::from(notches)).exp(), None, None);
    }

    /// Remember the state at button press.
    pub fn drag_begin(&mut self) {
        self.drag = Some(DragAnchor {
            offset: self.offset,
            scale_x: self.scale_x,
            scale_y: self.scale_y,
        });
    }

    /// Apply a drag of `dx_frac` cell widths and `dy_frac` cell heights since
    /// the press. Left pans, right rescales relative to the press scale.
    pub fn drag_to(&mut self, dx_frac: f64, dy_frac: f64, button: DragButton) {
        let Some(anchor) = self.drag else {
            return;
        };
        match button {
            DragButton::Left => {
                let shift = dx_frac * self.visible_samples() as f64;
                self.offset = self.clamp_offset(anchor.offset as f64 - shift);
                self.running = false;
            }
            DragButton::Right => {
                self.set_scale(
                    dx_frac.exp(),
                    dy_frac.exp(),
                    Some(anchor.scale_x),
                    Some(anchor.scale_y),
                );
            }
        }
    }

    /// Forget the press state.
    pub fn drag_end(&mut self) {
        self.drag = None;
    }

    /// Frames per second assumed by `tick`.
    pub fn set_fps(&mut self, fps: u32) {
        self.fps = fps.max(1);
    }

    /// Advance one frame while running; stops at the end of the recording.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }
        let advance = (self.visible_samples() / self.fps as usize).max(1) as i64;
        self.shift(advance);
        if self.offset >= self.max_offset() {
            self.running = false;
        }
    }

    /// Page through channels in steps of `page`, within `n_channels`.
    pub fn page_channels(&mut self, forward: bool, page: usize, n_channels: usize) {
        let page = page.max(1);
        self.first_channel = if forward {
            let next = self.first_channel + page;
            if next < n_channels { next } else { self.first_channel }
        } else {
            self.first_channel.saturating_sub(page)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_clamped_to_recording() {
        let mut v = Viewport::new(1000, 5000, 30);
        v.shift(-10);
        assert_eq!(v.offset(), 0);
        v.seek(10_000);
        assert_eq!(v.offset(), 4000);
        v.set_scale(1.0, 1.0, Some(4.0), None);
        v.seek(10_000);
        assert_eq!(v.offset(), 4750);
    }

    #[test]
    fn short_recording_never_moves() {
        let mut v = Viewport::new(1000, 200, 30);
        v.scroll(3);
        assert_eq!(v.offset(), 0);
    }

    #[test]
    fn scroll_scales_with_visible_span() {
        let mut v = Viewport::new(1000, 1_000_000, 30);
        v.scroll(1);
        assert_eq!(v.offset(), 100);
        v.scroll(2);
        assert_eq!(v.offset(), 500);
        v.scroll(-1);
        assert_eq!(v.offset(), 400);

        v.set_scale(10.0, 1.0, None, None);
        assert_eq!(v.visible_samples(), 100);
        v.scroll(1);
        assert_eq!(v.offset(), 410);
    }

    #[test]
    fn scales_have_floors() {
        let mut v = Viewport::new(1000, 10_000, 30);
        v.set_scale(0.1, 0.001, None, None);
        assert!((v.scale_x() - MIN_SCALE_X).abs() < f64::EPSILON);
        assert!((v.scale_y() - MIN_SCALE_Y).abs() < f64::EPSILON);
        v.zoom_x(1);
        assert!(v.scale_x() > 1.0);
    }

    #[test]
    fn left_drag_pans_from_press_offset() {
        let mut v = Viewport::new(1000, 100_000, 30);
        v.seek(5000);
        v.running = true;
        v.drag_begin();
        v.drag_to(0.5, 0.0, DragButton::Left);
        assert_eq!(v.offset(), 4500);
        v.drag_to(-1.0, 0.0, DragButton::Left);
        assert_eq!(v.offset(), 6000);
        assert!(!v.running);
    }

    #[test]
    fn right_drag_is_relative_to_press_scale() {
        let mut v = Viewport::new(1000, 100_000, 30);
        v.set_scale(1.0, 1.0, Some(2.0), Some(3.0));
        v.drag_begin();
        v.drag_to(0.5, 0.0, DragButton::Right);
        v.drag_to(1.0, 0.0, DragButton::Right);
        assert!((v.scale_x() - 2.0 * 1f64.exp()).abs() < 1e-9);
        assert!((v.scale_y() - 3.0).abs() < 1e-9);
        v.drag_end();
        v.drag_to(5.0, 5.0, DragButton::Right);
        assert!((v.scale_x() - 2.0 * 1f64.exp()).abs() < 1e-9);
    }

    #[test]
    fn tick_advances_and_stops_at_end() {
        let mut v = Viewport::new(300, 1000, 30);
        v.tick();
        assert_eq!(v.offset(), 0);
        v.running = true;
        v.tick();
        assert_eq!(v.offset(), 10);
        for _ in 0..200 {
            v.tick();
        }
        assert_eq!(v.offset(), 700);
        assert!(!v.running);
    }

    #[test]
    fn tick_follows_fps_changes() {
        let mut v = Viewport::new(300, 100_000, 30);
        v.running = true;
        v.set_fps(10);
        v.tick();
        assert_eq!(v.offset(), 30);
        v.set_fps(0);
        v.tick();
        assert_eq!(v.offset(), 330);
    }

    #[test]
    fn channel_paging_stays_in_range() {
        let mut v = Viewport::new(100, 100, 30);
        v.page_channels(true, 64, 128);
        assert_eq!(v.first_channel(), 64);
        v.page_channels(true, 64, 128);
        assert_eq!(v.first_channel(), 64);
        v.page_channels(false, 64, 128);
        v.page_channels(false, 64, 128);
        assert_eq!(v.first_channel(), 0);
    }
}

//! Multichannel trace grid drawn with braille dots straight into the
//! terminal buffer.

use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};

/// Braille base codepoint (U+2800).
const BRAILLE_BASE: u32 = 0x2800;

/// Bit of the braille dot at `(x, y)` within a 2x4 cell.
const DOT_BITS: [[u8; 4]; 2] = [[0x01, 0x02, 0x04, 0x40], [0x08, 0x10, 0x20, 0x80]];

/// Fraction of the cell height used by a full-scale trace.
const TRACE_HEIGHT: f32 = 0.9;

/// Dot raster of `width x height` terminal cells (2x4 dots each).
pub struct BrailleCanvas {
    width: u16,
    height: u16,
    cells: Vec<u8>,
}

impl BrailleCanvas {
    /// Empty canvas covering `width x height` cells.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            cells: vec![0; usize::from(width) * usize::from(height)],
        }
    }

    /// Width in dots.
    #[must_use]
    pub fn dot_width(&self) -> usize {
        usize::from(self.width) * 2
    }

    /// Height in dots.
    #[must_use]
    pub fn dot_height(&self) -> usize {
        usize::from(self.height) * 4
    }

    /// Light the dot at `(x, y)`; out of range dots are ignored.
    pub fn set(&mut self, x: usize, y: usize) {
        if x >= self.dot_width() || y >= self.dot_height() {
            return;
        }
        let idx = (y / 4) * usize::from(self.width) + x / 2;
        self.cells[idx] |= DOT_BITS[x % 2][y % 4];
    }

    /// Light the vertical run of dots between `y0` and `y1` inclusive.
    pub fn vspan(&mut self, x: usize, y0: usize, y1: usize) {
        for y in y0.min(y1)..=y0.max(y1) {
            self.set(x, y);
        }
    }

    /// Braille character of cell `(cx, cy)`.
    #[must_use]
    pub fn char_at(&self, cx: u16, cy: u16) -> char {
        let bits = self.cells[usize::from(cy) * usize::from(self.width) + usize::from(cx)];
        char::from_u32(BRAILLE_BASE + u32::from(bits)).unwrap_or(' ')
    }

    /// Write the non-empty cells into `buf` at `area`, in `color`.
    pub fn render(&self, buf: &mut Buffer, area: Rect, color: Color) {
        for cy in 0..self.height.min(area.height) {
            for cx in 0..self.width.min(area.width) {
                if self.cells[usize::from(cy) * usize::from(self.width) + usize::from(cx)] == 0 {
                    continue;
                }
                if let Some(cell) = buf.cell_mut((area.x + cx, area.y + cy)) {
                    cell.set_char(self.char_at(cx, cy)).set_fg(color);
                }
            }
        }
    }
}

/// Min and max of `samples` in each of `columns` equal buckets.
///
/// # Example
/// ```
/// use dm_render::plot::decimate;
/// assert_eq!(decimate(&[1.0, 5.0, -2.0, 0.0], 2), vec![(1.0, 5.0), (-2.0, 0.0)]);
/// ```
#[must_use]
pub fn decimate(samples: &[f32], columns: usize) -> Vec<(f32, f32)> {
    if samples.is_empty() || columns == 0 {
        return Vec::new();
    }
    (0..columns)
        .map(|c| {
            let start = c * samples.len() / columns;
            let end = ((c + 1) * samples.len() / columns).max(start + 1).min(samples.len());
            samples[start.min(samples.len() - 1)..end]
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
        })
        .collect()
}

/// Grid position `(column, row)` of the channel drawn in slot `slot`.
///
/// Slots fill columns top to bottom.
#[must_use]
pub fn cell_of(slot: usize, n_rows: usize) -> (usize, usize) {
    (slot / n_rows.max(1), slot % n_rows.max(1))
}

/// Rectangle of grid cell `(col, row)` inside `area`.
#[must_use]
pub fn cell_rect(area: Rect, n_rows: usize, n_cols: usize, col: usize, row: usize) -> Rect {
    let split = |total: u16, n: usize, i: usize| {
        let n = n.max(1) as u32;
        let a = (u32::from(total) * i as u32 / n) as u16;
        let b = (u32::from(total) * (i as u32 + 1) / n) as u16;
        (a, b - a)
    };
    let (x, w) = split(area.width, n_cols, col);
    let (y, h) = split(area.height, n_rows, row);
    Rect::new(area.x + x, area.y + y, w, h)
}

/// Trace colour of grid row `row`, the same on every frame.
#[must_use]
pub fn row_color(row: usize) -> Color {
    // golden-ratio hue walk, pastel range
    let hue = (row as f32 * 0.618_034).fract() * 6.0;
    let f = hue.fract();
    let (lo, hi) = (0.35, 0.9);
    let up = lo + (hi - lo) * f;
    let down = hi - (hi - lo) * f;
    let (r, g, b) = match hue as u32 {
        0 => (hi, up, lo),
        1 => (down, hi, lo),
        2 => (lo, hi, up),
        3 => (lo, down, hi),
        4 => (up, lo, hi),
        _ => (hi, lo, down),
    };
    Color::Rgb((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}

/// Dot row of `value` in a cell `dot_height` dots tall, clipped to the cell.
fn dot_row(value: f32, gain: f32, dot_height: usize) -> usize {
    let y = (value * gain).clamp(-1.0, 1.0) * TRACE_HEIGHT;
    let top = (dot_height.max(1) - 1) as f32;
    ((1.0 - y) * 0.5 * top).round() as usize
}

/// Draw one trace into `canvas`, one dot column per bucket of samples.
pub fn draw_trace(canvas: &mut BrailleCanvas, samples: &[f32], gain: f32) {
    let h = canvas.dot_height();
    let mut prev: Option<usize> = None;
    for (x, (lo, hi)) in decimate(samples, canvas.dot_width()).into_iter().enumerate() {
        let top = dot_row(hi, gain, h);
        let bottom = dot_row(lo, gain, h);
        canvas.vspan(x, top, bottom);
        if let Some(p) = prev {
            canvas.vspan(x, p, (top + bottom) / 2);
        }
        prev = Some((top + bottom) / 2);
    }
}

/// Channel-major samples to lay out on the grid.
#[derive(Clone, Copy, Debug)]
pub struct PlotData<'a> {
    /// `n_rows * n_cols` channels of `window` samples each.
    pub samples: &'a [f32],
    /// Samples stored per channel.
    pub window: usize,
    /// Leading samples of each channel to draw.
    pub visible: usize,
    /// Grid rows.
    pub n_rows: usize,
    /// Grid columns.
    pub n_cols: usize,
    /// Source index of the first channel, for labels.
    pub first_channel: usize,
}

/// Draw every channel of `data` into its grid cell.
///
/// `gain` maps microvolts to the cell half-height (`scale_y / full_scale`).
pub fn render_grid(buf: &mut Buffer, area: Rect, data: &PlotData<'_>, gain: f32) {
    let visible = data.visible.min(data.window);
    let slots = data.n_rows * data.n_cols;
    for (slot, channel) in data.samples.chunks_exact(data.window.max(1)).take(slots).enumerate() {
        let (col, row) = cell_of(slot, data.n_rows);
        let rect = cell_rect(area, data.n_rows, data.n_cols, col, row);
        if rect.width == 0 || rect.height == 0 {
            continue;
        }
        let color = row_color(row);
        let mut canvas = BrailleCanvas::new(rect.width, rect.height);
        draw_trace(&mut canvas, &channel[..visible], gain);
        canvas.render(buf, rect, color);

        let label = format!("{}", data.first_channel + slot);
        buf.set_string(rect.x, rect.y, label, Style::default().fg(Color::DarkGray));
    }
}

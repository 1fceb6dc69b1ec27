use dm_core::dataset::format_duration;
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use crate::plot::{self, PlotData};
use crate::view::Viewport;

/// Recording facts shown in the sidebar.
#[derive(Clone, Debug)]
pub struct StatusInfo<'a> {
    /// Target as given on the command line.
    pub target: &'a str,
    /// Format label.
    pub format: &'a str,
    /// Channels in the recording.
    pub n_channels: usize,
    /// Sampling rate in Hz.
    pub sample_rate: f64,
    /// Samples per channel.
    pub total: u64,
    /// Streamer thread running.
    pub streaming: bool,
    /// Buffer holds the window at the current offset.
    pub loaded: bool,
}

/// Draw options taken from the live config.
#[derive(Clone, Copy, Debug)]
pub struct DrawOptions {
    /// Microvolts mapped to a half cell at unit gain.
    pub full_scale_uv: f32,
    /// Show the sidebar.
    pub show_sidebar: bool,
    /// Show the help overlay.
    pub show_help: bool,
}

/// Position in seconds as `m:ss.mmm`.
///
/// # Example
/// ```
/// use dm_render::ui::format_position;
/// assert_eq!(format_position(75.25), "1:15.250");
/// assert_eq!(format_position(0.5), "0:00.500");
/// ```
#[must_use]
pub fn format_position(secs: f64) -> String {
    let secs = secs.max(0.0);
    let minutes = (secs / 60.0).floor();
    format!("{minutes:.0}:{:06.3}", secs - minutes * 60.0)
}

/// Draw the full viewer: trace grid plus optional sidebar and help.
pub fn draw(frame: &mut Frame, view: &Viewport, data: &PlotData<'_>, status: &StatusInfo<'_>, opts: DrawOptions) {
    let area = frame.area();
    let plot_area = if opts.show_sidebar {
        let chunks = Layout::horizontal([Constraint::Min(20), Constraint::Length(24)]).split(area);
        draw_sidebar(frame, chunks[1], view, status);
        chunks[0]
    } else {
        area
    };

    let gain = view.scale_y() as f32 / opts.full_scale_uv.max(f32::EPSILON);
    plot::render_grid(frame.buffer_mut(), plot_area, data, gain);

    if opts.show_help {
        draw_help_overlay(frame, area);
    }
}

fn draw_sidebar(frame: &mut Frame, area: Rect, view: &Viewport, status: &StatusInfo<'_>) {
    let rate = status.sample_rate.max(f64::EPSILON);
    let position = view.offset() as f64 / rate;
    let span = view.visible_samples() as f64 / rate;
    let (state, state_color) = if !status.streaming {
        ("x STOPPED", Color::Red)
    } else if view.running {
        ("> RUN", Color::Green)
    } else {
        ("|| PAUSE", Color::Yellow)
    };
    let heading = |s: &'static str| Line::from(Span::styled(s, Style::default().fg(Color::Yellow)));

    let lines = vec![
        Line::from(Span::styled(state, Style::default().fg(state_color))),
        Line::from(""),
        heading("- Data ----------"),
        Line::from(format!(" {}", status.target)),
        Line::from(format!(" {} ch, {}", status.n_channels, status.format)),
        Line::from(format!(" Fs {:.1} kHz", status.sample_rate / 1e3)),
        Line::from(format!(
            " Len {}",
            format_duration(status.total as f64 / rate)
        )),
        Line::from(""),
        heading("- View ----------"),
        Line::from(format!(" T {}", format_position(position))),
        Line::from(format!(" Span {span:.3}s")),
        Line::from(format!(" Sample {}", view.offset())),
        Line::from(format!(" From ch {}", view.first_channel())),
        Line::from(format!(" X x{:.2}", view.scale_x())),
        Line::from(format!(" Y x{:.2}", view.scale_y())),
        Line::from(if status.loaded { " buffer ok" } else { " loading..." }),
        Line::from(""),
        Line::from(Span::styled(" ? = help", Style::default().fg(Color::DarkGray))),
    ];

    let sidebar = Paragraph::new(lines).block(Block::default().borders(Borders::LEFT).title(" dm vis "));
    frame.render_widget(sidebar, area);
}

fn draw_help_overlay(frame: &mut Frame, area: Rect) {
    let help_text = vec![
        Line::from(Span::styled(" dm vis: controls ", Style::default().fg(Color::Yellow))),
        Line::from(""),
        Line::from(" q/Esc       Quit"),
        Line::from(" Space       Play/Pause"),
        Line::from(" Left/Right  Step back/forward"),
        Line::from(" +/-         Amplitude"),
        Line::from(" PgUp/PgDn   Channel page"),
        Line::from(" Home        Start of recording"),
        Line::from(" Wheel       Scroll time"),
        Line::from(" Shift+Wheel Time zoom"),
        Line::from(" Ctrl+Wheel  Amplitude"),
        Line::from(" L-drag      Pan"),
        Line::from(" R-drag      Rescale"),
        Line::from(" s           Toggle sidebar"),
        Line::from(" ?           Toggle help"),
        Line::from(""),
        Line::from(Span::styled(" Press ? or Esc to close ", Style::default().fg(Color::DarkGray))),
    ];

    let help_width = 34u16.min(area.width);
    let help_height = (help_text.len() as u16 + 2).min(area.height);
    let x = area.x + area.width.saturating_sub(help_width) / 2;
    let y = area.y + area.height.saturating_sub(help_height) / 2;
    let help_area = Rect::new(x, y, help_width, help_height);

    let help = Paragraph::new(help_text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Help ")
            .style(Style::default().bg(Color::Black).fg(Color::White)),
    );
    frame.render_widget(Clear, help_area);
    frame.render_widget(help, help_area);
}

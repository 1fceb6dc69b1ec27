//! `dm vis`: terminal channel viewer.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers,
    MouseButton, MouseEvent, MouseEventKind,
};
use dm_core::buffer::SampleBuffer;
use dm_core::config::DmConfig;
use dm_core::dataset::DatasetMeta;
use dm_formats::streamer::{Cursor, StreamerHandle, spawn_streamer};
use dm_formats::target::{describe, metadata_from_target, open_source};
use dm_render::plot::PlotData;
use dm_render::ui::{self, DrawOptions, StatusInfo};
use dm_render::view::{DragButton, Viewport};
use ratatui::layout::Rect;
use ratatui::{DefaultTerminal, Frame};

use crate::cli::VisArgs;
use crate::hotreload;

/// Width of the sidebar drawn by `dm_render::ui`.
const SIDEBAR_WIDTH: u16 = 24;

struct Drag {
    button: DragButton,
    column: u16,
    row: u16,
}

/// Viewer state driven by the event loop.
pub struct App {
    config: Arc<ArcSwap<DmConfig>>,
    meta: DatasetMeta,
    target: String,
    n_rows: usize,
    n_cols: usize,
    view: Viewport,
    buffer: SampleBuffer<f32>,
    streamer: StreamerHandle,
    samples: Vec<f32>,
    requested: Option<Cursor>,
    drag: Option<Drag>,
    plot_area: Rect,
    show_sidebar: bool,
    show_help: bool,
    quit: bool,
}

impl App {
    /// Viewer over `meta` with a `n_rows x n_cols` grid, streaming from a
    /// background thread.
    ///
    /// # Errors
    /// Returns an error if the recording cannot be opened or the streamer
    /// thread cannot start.
    pub fn new(meta: DatasetMeta, config: Arc<ArcSwap<DmConfig>>, n_rows: usize, n_cols: usize) -> Result<Self> {
        let vis = config.load().vis.clone();
        let (n_rows, n_cols) = (n_rows.max(1), n_cols.max(1));
        let window = vis.window_samples.min(meta.n_samples.max(1) as usize);

        let buffer = SampleBuffer::<f32>::new(n_rows * n_cols, window)?;
        let source = open_source(meta.clone())?;
        let streamer = spawn_streamer(source, buffer.share())?;
        log::info!("{}: {}", meta.path.display(), describe(&meta));

        Ok(Self {
            target: meta
                .path
                .file_name()
                .map_or_else(|| meta.path.display().to_string(), |n| n.to_string_lossy().into_owned()),
            view: Viewport::new(window, meta.n_samples, vis.target_fps),
            config,
            meta,
            n_rows,
            n_cols,
            buffer,
            streamer,
            samples: Vec::with_capacity(n_rows * n_cols * window),
            requested: None,
            drag: None,
            plot_area: Rect::default(),
            show_sidebar: vis.show_sidebar,
            show_help: false,
            quit: false,
        })
    }

    fn page(&self) -> usize {
        self.n_rows * self.n_cols
    }

    fn cursor(&self) -> Cursor {
        Cursor {
            sample: self.view.offset(),
            first_channel: self.view.first_channel(),
        }
    }

    /// Event loop until `q` or `Esc`.
    ///
    /// # Errors
    /// Returns an error if terminal operations fail.
    pub fn run(&mut self, mut terminal: DefaultTerminal) -> Result<()> {
        let mut last_frame = Instant::now();
        while !self.quit {
            let fps = self.config.load().vis.target_fps.max(1);
            let frame_duration = Duration::from_secs_f64(1.0 / f64::from(fps));

            let elapsed = last_frame.elapsed();
            if elapsed < frame_duration {
                if event::poll(frame_duration - elapsed)? {
                    self.handle_event(&event::read()?);
                }
                continue;
            }
            last_frame = Instant::now();

            while event::poll(Duration::ZERO)? {
                self.handle_event(&event::read()?);
            }

            self.update();
            terminal.draw(|frame| self.render(frame))?;
        }
        Ok(())
    }

    /// Advance playback, request the current window and copy the buffer.
    fn update(&mut self) {
        self.view.set_fps(self.config.load().vis.target_fps);
        self.view.tick();
        let cursor = self.cursor();
        if self.requested != Some(cursor) {
            self.streamer.request(cursor);
            self.requested = Some(cursor);
        }
        if let Err(e) = self.buffer.get_data(0, self.view.window(), &mut self.samples) {
            log::warn!("display buffer: {e}");
        }
    }

    fn render(&mut self, frame: &mut Frame) {
        let full_scale_uv = self.config.load().vis.full_scale_uv;
        let area = frame.area();
        self.plot_area = if self.show_sidebar {
            Rect {
                width: area.width.saturating_sub(SIDEBAR_WIDTH),
                ..area
            }
        } else {
            area
        };

        let window = self.view.window();
        let shown = self
            .meta
            .n_channels
            .saturating_sub(self.view.first_channel())
            .min(self.page());
        let samples = &self.samples[..(shown * window).min(self.samples.len())];
        let data = PlotData {
            samples,
            window,
            visible: self.view.visible_samples(),
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            first_channel: self.view.first_channel(),
        };
        let status = StatusInfo {
            target: &self.target,
            format: self.meta.format.label(),
            n_channels: self.meta.n_channels,
            sample_rate: self.meta.sample_rate,
            total: self.meta.n_samples,
            streaming: self.streamer.is_alive(),
            loaded: self.streamer.loaded() == self.cursor(),
        };
        let opts = DrawOptions {
            full_scale_uv,
            show_sidebar: self.show_sidebar,
            show_help: self.show_help,
        };
        ui::draw(frame, &self.view, &data, &status, opts);
    }

    fn handle_event(&mut self, event: &Event) {
        match *event {
            Event::Key(KeyEvent {
                code,
                kind: KeyEventKind::Press,
                ..
            }) => self.handle_key(code),
            Event::Mouse(mouse) => self.handle_mouse(mouse),
            _ => {}
        }
    }

    fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc if self.show_help => self.show_help = false,
            KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
            KeyCode::Char('?') => self.show_help = !self.show_help,
            KeyCode::Char(' ') => self.view.running = !self.view.running,
            KeyCode::Char('s') => self.show_sidebar = !self.show_sidebar,
            KeyCode::Left => self.view.step(false),
            KeyCode::Right => self.view.step(true),
            KeyCode::Char('+' | '=') => self.view.zoom_y(1),
            KeyCode::Char('-') => self.view.zoom_y(-1),
            KeyCode::PageDown => self.view.page_channels(true, self.page(), self.meta.n_channels),
            KeyCode::PageUp => self.view.page_channels(false, self.page(), self.meta.n_channels),
            KeyCode::Home => self.view.seek(0),
            _ => {}
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        let notches = match mouse.kind {
            MouseEventKind::ScrollDown => 1,
            MouseEventKind::ScrollUp => -1,
            MouseEventKind::Down(button) => {
                let button = match button {
                    MouseButton::Right => DragButton::Right,
                    _ => DragButton::Left,
                };
                self.view.drag_begin();
                self.drag = Some(Drag {
                    button,
                    column: mouse.column,
                    row: mouse.row,
                });
                return;
            }
            MouseEventKind::Drag(_) => {
                if let Some(drag) = &self.drag {
                    let cell_w = f64::from(self.plot_area.width.max(1)) / self.n_cols as f64;
                    let cell_h = f64::from(self.plot_area.height.max(1)) / self.n_rows as f64;
                    let dx = (f64::from(mouse.column) - f64::from(drag.column)) / cell_w;
                    let dy = (f64::from(drag.row) - f64::from(mouse.row)) / cell_h;
                    self.view.drag_to(dx, dy, drag.button);
                }
                return;
            }
            MouseEventKind::Up(_) => {
                self.view.drag_end();
                self.drag = None;
                return;
            }
            _ => return,
        };

        if mouse.modifiers.contains(KeyModifiers::SHIFT) {
            self.view.zoom_x(-notches);
        } else if mouse.modifiers.contains(KeyModifiers::CONTROL) {
            self.view.zoom_y(-notches);
        } else {
            self.view.scroll(notches);
        }
    }

    /// Stop the streamer thread.
    fn shutdown(&mut self) {
        if let Err(e) = self.streamer.stop() {
            log::warn!("{e}");
        }
    }
}

/// Run `dm vis`: open the target, start streaming and hot reload, drive the
/// terminal until the user quits.
///
/// # Errors
/// Returns an error if the target cannot be opened or terminal I/O fails.
pub fn run(args: &VisArgs, config: DmConfig, config_path: &Path, debug: bool) -> Result<()> {
    let meta = metadata_from_target(&args.target, args.channels, &config.dataset)
        .with_context(|| format!("cannot open {}", args.target.display()))?;
    let n_rows = args.rows.unwrap_or(config.vis.n_rows);
    let n_cols = args.cols.unwrap_or(config.vis.n_cols);

    let config = Arc::new(ArcSwap::from_pointee(config));
    let _watcher = if config_path.exists() {
        Some(hotreload::spawn_config_watcher(config_path, &config)?)
    } else {
        None
    };

    let mut app = App::new(meta, config, n_rows, n_cols)?;

    // stderr logging would draw over the viewer
    let level = log::max_level();
    if !debug {
        log::set_max_level(level.min(log::LevelFilter::Error));
    }

    let terminal = ratatui::init();
    let result = crossterm::execute!(std::io::stdout(), EnableMouseCapture)
        .map_err(anyhow::Error::from)
        .and_then(|()| app.run(terminal));
    let _ = crossterm::execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();

    log::set_max_level(level);
    app.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    use super::*;
    use crate::tests::write_dat_file;

    fn dat_app(n_channels: usize, rows: usize, grid: (usize, usize)) -> (tempfile::TempDir, App) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rec.dat");
        write_dat_file(&file, n_channels, rows);
        let mut config = DmConfig::default();
        config.vis.window_samples = 100;
        let meta = metadata_from_target(&file, Some(n_channels), &config.dataset).unwrap();
        let app = App::new(meta, Arc::new(ArcSwap::from_pointee(config)), grid.0, grid.1).unwrap();
        (dir, app)
    }

    fn key(app: &mut App, code: KeyCode) {
        app.handle_event(&Event::Key(KeyEvent::new(code, KeyModifiers::NONE)));
    }

    fn mouse(app: &mut App, kind: MouseEventKind, column: u16, row: u16, modifiers: KeyModifiers) {
        app.handle_event(&Event::Mouse(MouseEvent {
            kind,
            column,
            row,
            modifiers,
        }));
    }

    fn wait_loaded(app: &mut App) {
        let deadline = Instant::now() + Duration::from_secs(5);
        app.update();
        while app.streamer.loaded() != app.cursor() || app.streamer.generation() == 0 {
            assert!(Instant::now() < deadline, "streamer did not load the window");
            std::thread::sleep(Duration::from_millis(5));
        }
        app.update();
    }

    #[test]
    fn playback_speed_follows_reloaded_fps() {
        let (_dir, mut app) = dat_app(4, 1000, (2, 1));
        app.view.running = true;
        app.update();
        assert_eq!(app.view.offset(), 3);

        let mut config = (**app.config.load()).clone();
        config.vis.target_fps = 10;
        app.config.store(Arc::new(config));
        app.update();
        assert_eq!(app.view.offset(), 13);
    }

    #[test]
    fn keys_drive_the_viewport() {
        let (_dir, mut app) = dat_app(4, 1000, (2, 1));
        key(&mut app, KeyCode::Right);
        assert_eq!(app.view.offset(), 10);
        key(&mut app, KeyCode::Home);
        assert_eq!(app.view.offset(), 0);

        key(&mut app, KeyCode::Char(' '));
        assert!(app.view.running);
        key(&mut app, KeyCode::PageDown);
        assert_eq!(app.view.first_channel(), 2);
        key(&mut app, KeyCode::PageDown);
        assert_eq!(app.view.first_channel(), 2);

        key(&mut app, KeyCode::Char('?'));
        key(&mut app, KeyCode::Esc);
        assert!(!app.show_help && !app.quit);
        key(&mut app, KeyCode::Char('q'));
        assert!(app.quit);
    }

    #[test]
    fn wheel_and_drag() {
        let (_dir, mut app) = dat_app(2, 1000, (2, 1));
        app.plot_area = Rect::new(0, 0, 40, 10);

        mouse(&mut app, MouseEventKind::ScrollDown, 5, 5, KeyModifiers::NONE);
        assert_eq!(app.view.offset(), 10);
        mouse(&mut app, MouseEventKind::ScrollUp, 5, 5, KeyModifiers::SHIFT);
        assert!(app.view.scale_x() > 1.0);
        let y = app.view.scale_y();
        mouse(&mut app, MouseEventKind::ScrollUp, 5, 5, KeyModifiers::CONTROL);
        assert!(app.view.scale_y() > y);

        // dragging left by half a cell moves forward by half the visible span
        app.view.set_scale(1.0, 1.0, Some(1.0), None);
        mouse(&mut app, MouseEventKind::Down(MouseButton::Left), 20, 5, KeyModifiers::NONE);
        mouse(&mut app, MouseEventKind::Drag(MouseButton::Left), 0, 5, KeyModifiers::NONE);
        assert_eq!(app.view.offset(), 60);
        mouse(&mut app, MouseEventKind::Up(MouseButton::Left), 0, 5, KeyModifiers::NONE);

        let x = app.view.scale_x();
        mouse(&mut app, MouseEventKind::Down(MouseButton::Right), 10, 5, KeyModifiers::NONE);
        mouse(&mut app, MouseEventKind::Drag(MouseButton::Right), 30, 5, KeyModifiers::NONE);
        mouse(&mut app, MouseEventKind::Drag(MouseButton::Right), 50, 5, KeyModifiers::NONE);
        assert!((app.view.scale_x() - x * std::f64::consts::E).abs() < 1e-9);
    }

    #[test]
    fn streams_and_draws_the_window() {
        let (_dir, mut app) = dat_app(3, 500, (2, 1));
        wait_loaded(&mut app);
        // two rows of 100 samples; sample (0, ch) is ch * 0.195 uV
        assert_eq!(app.samples.len(), 200);
        assert!((app.samples[100] - 0.195).abs() < 1e-6);

        let mut terminal = Terminal::new(TestBackend::new(60, 24)).unwrap();
        terminal.draw(|f| app.render(f)).unwrap();
        assert_eq!(app.plot_area.width, 60 - SIDEBAR_WIDTH);
        let buf = terminal.backend().buffer();
        let text: String = buf.content().iter().map(ratatui::buffer::Cell::symbol).collect();
        assert!(text.contains("rec.dat"));
        assert!(text.contains("buffer ok"));

        key(&mut app, KeyCode::PageDown);
        wait_loaded(&mut app);
        assert!((app.samples[0] - 2.0 * 0.195).abs() < 1e-6);
        app.shutdown();
        assert!(!app.streamer.is_alive());
    }
}

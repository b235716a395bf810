/// Display surface ownership and the free-running render loop
use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossterm::{cursor, terminal};
use ratatui::backend::{Backend, CrosstermBackend, TestBackend};
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Paragraph};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::shutdown::Release;
use crate::core::signal::{CancellationSignal, ShutdownReason};

/// Smallest surface the board is drawn on
pub const MIN_WIDTH: u16 = 150;
pub const MIN_HEIGHT: u16 = 60;

/// Board outline, anchored at the top-left corner of the surface
pub const BOARD_WIDTH: u16 = 111;
pub const BOARD_HEIGHT: u16 = 41;

const CONTROLS_HINT: &str = "↑/↓ move paddle  ·  Esc quit";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("surface too small: {width}x{height}, need at least {MIN_WIDTH}x{MIN_HEIGHT}")]
    SurfaceTooSmall { width: u16, height: u16 },

    #[error("display backend failed: {0}")]
    Backend(String),
}

fn backend_error(err: impl std::fmt::Display) -> RenderError {
    RenderError::Backend(err.to_string())
}

/// Backend-specific teardown run when the surface is finalized
pub trait SurfaceBackend: Backend + Send + 'static {
    fn finalize(&mut self) -> io::Result<()>;
}

impl SurfaceBackend for CrosstermBackend<Stdout> {
    fn finalize(&mut self) -> io::Result<()> {
        // Try both steps; report the first failure
        let raw = terminal::disable_raw_mode();
        let screen = crossterm::execute!(io::stdout(), terminal::LeaveAlternateScreen, cursor::Show);
        raw.and(screen)
    }
}

impl SurfaceBackend for TestBackend {
    fn finalize(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The terminal, owned by whoever renders. Finalized exactly once.
pub struct DisplaySurface<B: SurfaceBackend> {
    terminal: Terminal<B>,
    finalized: bool,
}

impl DisplaySurface<CrosstermBackend<Stdout>> {
    /// Enter raw mode and the alternate screen on stdout
    pub fn init() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(err) = crossterm::execute!(io::stdout(), terminal::EnterAlternateScreen, cursor::Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(err);
        }
        match Terminal::new(CrosstermBackend::new(io::stdout())) {
            Ok(terminal) => Ok(Self { terminal, finalized: false }),
            Err(err) => {
                let mut backend = CrosstermBackend::new(io::stdout());
                let _ = backend.finalize();
                Err(err)
            }
        }
    }
}

impl<B: SurfaceBackend> DisplaySurface<B> {
    pub fn new(backend: B) -> Result<Self, RenderError> {
        let terminal = Terminal::new(backend).map_err(backend_error)?;
        Ok(Self { terminal, finalized: false })
    }

    pub fn terminal(&self) -> &Terminal<B> {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut Terminal<B> {
        &mut self.terminal
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn finalize(&mut self) -> io::Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        self.terminal.backend_mut().finalize()
    }
}

impl<B: SurfaceBackend> Drop for DisplaySurface<B> {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

impl<B: SurfaceBackend> Release for DisplaySurface<B> {
    const NAME: &'static str = "display surface";

    fn release(mut self) -> io::Result<()> {
        self.finalize()
    }
}

/// Raised by input capture on resize, consumed by the render loop
#[derive(Debug, Clone, Default)]
pub struct ResyncFlag(Arc<AtomicBool>);

impl ResyncFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clears the request, returning whether one was pending
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Draw the board outline and the controls line.
///
/// Fails without drawing the board when the surface is under the minimum
/// playable size; a short notice is shown instead.
pub fn draw_border(frame: &mut Frame) -> Result<(), RenderError> {
    let area = frame.area();
    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        let notice = format!("Window too small: need {MIN_WIDTH}x{MIN_HEIGHT}");
        frame.render_widget(Paragraph::new(notice), area);
        return Err(RenderError::SurfaceTooSmall {
            width: area.width,
            height: area.height,
        });
    }

    let style = Style::default().fg(Color::White);
    let board = Rect::new(0, 0, BOARD_WIDTH, BOARD_HEIGHT);
    frame.render_widget(Block::bordered().title(" pong ").style(style), board);

    let hint = Rect::new(0, BOARD_HEIGHT, BOARD_WIDTH, 1);
    frame.render_widget(
        Paragraph::new(CONTROLS_HINT)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Gray)),
        hint,
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameResult {
    Drawn,
    TooSmall { width: u16, height: u16 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames: u64,
    pub too_small_frames: u64,
}

pub struct RenderLoop<B: SurfaceBackend> {
    surface: DisplaySurface<B>,
    signal: CancellationSignal,
    resync: ResyncFlag,
    stats: RenderStats,
    too_small: bool,
}

impl<B: SurfaceBackend> RenderLoop<B> {
    pub fn new(surface: DisplaySurface<B>, signal: CancellationSignal, resync: ResyncFlag) -> Self {
        Self {
            surface,
            signal,
            resync,
            stats: RenderStats::default(),
            too_small: false,
        }
    }

    pub fn surface(&self) -> &DisplaySurface<B> {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut DisplaySurface<B> {
        &mut self.surface
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// One clear-draw-flip cycle. Only backend failures are errors.
    pub fn step(&mut self) -> Result<FrameResult, RenderError> {
        let terminal = self.surface.terminal_mut();
        if self.resync.take() {
            debug!("resync requested, repainting whole surface");
            terminal.clear().map_err(backend_error)?;
        }

        // Each draw starts from a blank buffer; the flip happens inside `draw`
        let mut outcome = Ok(());
        terminal
            .draw(|frame| outcome = draw_border(frame))
            .map_err(backend_error)?;
        self.stats.frames += 1;

        match outcome {
            Ok(()) => {
                if self.too_small {
                    info!("surface large enough again, drawing board");
                    self.too_small = false;
                }
                Ok(FrameResult::Drawn)
            }
            Err(RenderError::SurfaceTooSmall { width, height }) => {
                self.stats.too_small_frames += 1;
                if !self.too_small {
                    warn!(width, height, "surface too small to draw the board");
                    self.too_small = true;
                }
                Ok(FrameResult::TooSmall { width, height })
            }
            Err(err) => Err(err),
        }
    }

    /// Draw until the signal is set, checking it after every frame.
    ///
    /// Never waits on input or network. Hands the surface back for teardown.
    pub fn run(mut self) -> (DisplaySurface<B>, Result<RenderStats, RenderError>) {
        loop {
            if let Err(err) = self.step() {
                error!(error = %err, "render loop failed");
                self.signal.cancel(ShutdownReason::RenderFailed);
                return (self.surface, Err(err));
            }
            if self.signal.is_cancelled() {
                break;
            }
            std::thread::yield_now();
        }
        info!(frames = self.stats.frames, "render loop stopped");
        (self.surface, Ok(self.stats))
    }
}

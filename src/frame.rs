//! Frame production for the origin endpoint.
//!
//! - `Frame`: one RGB raster plus its presentation timestamp.
//! - `FrameClock`: paces ticks against an absolute schedule.
//! - `BallProducer`: steps the simulator once per tick and rasterizes it.
//!
//! Timestamps use the 90 kHz media clock. Deadlines are derived from the
//! start instant and the tick count, never from the previous deadline, so
//! per-tick jitter does not accumulate into rate drift.

use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use std::time::{Duration, Instant};

use crate::sim::Ball;

/// Media clock rate for frame timestamps (ticks per second).
pub const PTS_CLOCK_RATE: u64 = 90_000;

/// Default raster size.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Default production rate.
pub const DEFAULT_FPS: u32 = 30;

/// Bytes per pixel (packed RGB).
pub const CHANNELS: usize = 3;

const BALL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A packed RGB raster tagged with a 90 kHz presentation timestamp.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts: u64,
}

impl Frame {
    /// Wrap raw pixels. Returns `None` if the buffer does not match the dimensions.
    pub fn from_pixels(data: Vec<u8>, width: u32, height: u32, pts: u64) -> Option<Self> {
        if data.len() != width as usize * height as usize * CHANNELS {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            pts,
        })
    }

    /// All-black frame.
    pub fn blank(width: u32, height: u32, pts: u64) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * CHANNELS],
            width,
            height,
            pts,
        }
    }

    fn from_image(image: RgbImage, pts: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            pts,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Borrowed image view over the raster, for the vision pipeline.
    ///
    /// `None` if `width`/`height` were changed to disagree with the buffer.
    pub fn as_image(&self) -> Option<ImageBuffer<Rgb<u8>, &[u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
    }

    /// Owned copy as an `RgbImage` (snapshots, debugging).
    pub fn to_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Capture time in seconds relative to the start of the stream.
    pub fn time_secs(&self) -> f64 {
        self.pts as f64 / PTS_CLOCK_RATE as f64
    }
}

// Debug prints the buffer length, not the pixels.
impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Draw a filled ball on a black background.
pub fn render_ball(width: u32, height: u32, center: (i32, i32), radius: i32, pts: u64) -> Frame {
    let mut image = RgbImage::new(width, height);
    draw_filled_circle_mut(&mut image, center, radius, BALL_COLOR);
    Frame::from_image(image, pts)
}

// ----------------------------------------------------------------------------
// FrameClock
// ----------------------------------------------------------------------------

/// Fixed-rate tick source on an absolute schedule.
///
/// The schedule starts at the first call to `tick`; tick `n` is due at
/// `start + n / fps` and carries pts `n * 90000 / fps`, both computed from
/// `n` so a rate that does not divide the media clock still averages out
/// exactly. Late ticks return immediately, so frames are delayed but never
/// skipped.
#[derive(Debug)]
pub struct FrameClock {
    start: Option<Instant>,
    ticks: u64,
    fps: u64,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        Self {
            start: None,
            ticks: 0,
            fps: u64::from(fps.max(1)),
        }
    }

    /// Nominal pts step, rounded down.
    pub fn pts_per_tick(&self) -> u64 {
        PTS_CLOCK_RATE / self.fps
    }

    /// Ticks issued so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Presentation timestamp of tick `n`.
    pub fn pts_at(&self, n: u64) -> u64 {
        let pts = u128::from(n) * u128::from(PTS_CLOCK_RATE) / u128::from(self.fps);
        pts as u64
    }

    /// Offset from the schedule start at which tick `n` is due.
    pub fn due_at(&self, n: u64) -> Duration {
        let nanos = u128::from(n) * 1_000_000_000 / u128::from(self.fps);
        Duration::from_nanos(nanos as u64)
    }

    /// Offset from the schedule start at which `pts` is due.
    pub fn offset_for(pts: u64) -> Duration {
        let nanos = u128::from(pts) * 1_000_000_000 / u128::from(PTS_CLOCK_RATE);
        Duration::from_nanos(nanos as u64)
    }

    /// Advance one tick, sleeping until it is due. Returns the tick's pts.
    pub fn tick(&mut self) -> u64 {
        let start = *self.start.get_or_insert_with(Instant::now);
        self.ticks += 1;
        let deadline = start + self.due_at(self.ticks);
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else if now - deadline > self.due_at(1) {
            log::debug!(
                "frame clock running late by {:?} at tick {}",
                now - deadline,
                self.ticks
            );
        }
        self.pts_at(self.ticks)
    }
}

// ----------------------------------------------------------------------------
// BallProducer
// ----------------------------------------------------------------------------

/// Produces one rasterized simulator state per clock tick.
pub struct BallProducer {
    ball: Ball,
    clock: FrameClock,
    width: u32,
    height: u32,
}

impl BallProducer {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            ball: Ball::new(width as i32, height as i32),
            clock: FrameClock::new(fps),
            width,
            height,
        }
    }

    pub fn with_ball(ball: Ball, fps: u32) -> Self {
        let (width, height) = (ball.width as u32, ball.height as u32);
        Self {
            ball,
            clock: FrameClock::new(fps),
            width,
            height,
        }
    }

    /// Wait for the next tick, step the ball and render it.
    pub fn next_frame(&mut self) -> Frame {
        let pts = self.clock.tick();
        self.ball.step();
        render_ball(
            self.width,
            self.height,
            self.ball.position(),
            self.ball.radius,
            pts,
        )
    }

    /// Ground-truth position of the ball in the most recent frame.
    pub fn position(&self) -> (i32, i32) {
        self.ball.position()
    }

    pub fn frames_produced(&self) -> u64 {
        self.clock.ticks()
    }
}

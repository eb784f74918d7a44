use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::coords::DEFAULT_REPORT_INTERVAL;
use crate::frame::{DEFAULT_FPS, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::sim::DEFAULT_RADIUS;

const DEFAULT_SIGNALING_HOST: &str = "127.0.0.1";
const DEFAULT_SIGNALING_PORT: u16 = 1234;
const DEFAULT_LINK_HOST: &str = "127.0.0.1";
const DEFAULT_LINK_PORT: u16 = 0;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
const MAX_FPS: u32 = 240;

#[derive(Debug, Deserialize, Default)]
struct TrackConfigFile {
    video: Option<VideoConfigFile>,
    signaling: Option<EndpointConfigFile>,
    link: Option<EndpointConfigFile>,
    tracker: Option<TrackerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    radius: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
struct EndpointConfigFile {
    host: Option<String>,
    port: Option<u16>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    report_interval_ms: Option<u64>,
    max_backlog: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct TrackConfig {
    pub video: VideoSettings,
    pub signaling: EndpointSettings,
    pub link: EndpointSettings,
    pub report_interval: Duration,
    /// `None` keeps the detection queue unbounded.
    pub max_backlog: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub radius: i32,
}

#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self::from_file(TrackConfigFile::default())
    }
}

impl TrackConfig {
    /// Defaults, then the JSON file named by `BALL_TRACK_CONFIG`, then
    /// `BALL_TRACK_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BALL_TRACK_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackConfigFile) -> Self {
        let video = file.video.unwrap_or_default();
        let signaling = file.signaling.unwrap_or_default();
        let link = file.link.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        Self {
            video: VideoSettings {
                width: video.width.unwrap_or(DEFAULT_WIDTH),
                height: video.height.unwrap_or(DEFAULT_HEIGHT),
                fps: video.fps.unwrap_or(DEFAULT_FPS),
                radius: video.radius.unwrap_or(DEFAULT_RADIUS),
            },
            signaling: EndpointSettings {
                host: signaling
                    .host
                    .unwrap_or_else(|| DEFAULT_SIGNALING_HOST.to_string()),
                port: signaling.port.unwrap_or(DEFAULT_SIGNALING_PORT),
                connect_timeout: Duration::from_millis(
                    signaling
                        .connect_timeout_ms
                        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
                ),
            },
            link: EndpointSettings {
                host: link.host.unwrap_or_else(|| DEFAULT_LINK_HOST.to_string()),
                port: link.port.unwrap_or(DEFAULT_LINK_PORT),
                connect_timeout: Duration::from_millis(
                    link.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
                ),
            },
            report_interval: tracker
                .report_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REPORT_INTERVAL),
            max_backlog: tracker.max_backlog,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(fps) = std::env::var("BALL_TRACK_FPS") {
            self.video.fps = fps
                .parse()
                .map_err(|_| anyhow!("BALL_TRACK_FPS must be an integer frame rate"))?;
        }
        if let Ok(host) = std::env::var("BALL_TRACK_SIGNALING_HOST") {
            if !host.trim().is_empty() {
                self.signaling.host = host;
            }
        }
        if let Ok(port) = std::env::var("BALL_TRACK_SIGNALING_PORT") {
            self.signaling.port = port
                .parse()
                .map_err(|_| anyhow!("BALL_TRACK_SIGNALING_PORT must be a port number"))?;
        }
        if let Ok(port) = std::env::var("BALL_TRACK_LINK_PORT") {
            self.link.port = port
                .parse()
                .map_err(|_| anyhow!("BALL_TRACK_LINK_PORT must be a port number"))?;
        }
        if let Ok(interval) = std::env::var("BALL_TRACK_REPORT_INTERVAL_MS") {
            let millis: u64 = interval.parse().map_err(|_| {
                anyhow!("BALL_TRACK_REPORT_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.report_interval = Duration::from_millis(millis);
        }
        if let Ok(backlog) = std::env::var("BALL_TRACK_MAX_BACKLOG") {
            let backlog = backlog.trim();
            self.max_backlog = if backlog.is_empty() || backlog == "0" {
                None
            } else {
                Some(backlog.parse().map_err(|_| {
                    anyhow!("BALL_TRACK_MAX_BACKLOG must be a frame count (0 for unbounded)")
                })?)
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let video = &self.video;
        if video.width == 0 || video.height == 0 {
            return Err(anyhow!("video dimensions must be non-zero"));
        }
        if video.fps == 0 || video.fps > MAX_FPS {
            return Err(anyhow!("fps must be between 1 and {}", MAX_FPS));
        }
        let min_side = video.width.min(video.height) as i64;
        if video.radius <= 0 || 2 * video.radius as i64 >= min_side {
            return Err(anyhow!(
                "radius {} must be positive and below half of {}x{}",
                video.radius,
                video.width,
                video.height
            ));
        }
        if self.report_interval.is_zero() {
            return Err(anyhow!("report interval must be greater than zero"));
        }
        if self.max_backlog == Some(0) {
            return Err(anyhow!("max_backlog must be at least 1 when set"));
        }
        if self.signaling.host.trim().is_empty() || self.link.host.trim().is_empty() {
            return Err(anyhow!("signaling and link hosts must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TrackConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TrackConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.video.width, 640);
        assert_eq!(cfg.video.height, 480);
        assert_eq!(cfg.video.fps, 30);
        assert_eq!(cfg.signaling.port, 1234);
        assert_eq!(cfg.link.port, 0);
        assert_eq!(cfg.report_interval, Duration::from_millis(33));
        assert_eq!(cfg.max_backlog, None);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = TrackConfig::default();
        cfg.video.radius = 240;
        assert!(cfg.validate().is_err());

        let mut cfg = TrackConfig::default();
        cfg.video.fps = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = TrackConfig::default();
        cfg.report_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = TrackConfig::default();
        cfg.max_backlog = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file: TrackConfigFile =
            serde_json::from_str(r#"{"video": {"fps": 15}, "tracker": {"max_backlog": 4}}"#)
                .unwrap();
        let cfg = TrackConfig::from_file(file);
        assert_eq!(cfg.video.fps, 15);
        assert_eq!(cfg.video.width, 640);
        assert_eq!(cfg.max_backlog, Some(4));
        assert_eq!(cfg.signaling.host, "127.0.0.1");
    }
}

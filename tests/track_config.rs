use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use ball_track::config::TrackConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BALL_TRACK_CONFIG",
        "BALL_TRACK_FPS",
        "BALL_TRACK_SIGNALING_HOST",
        "BALL_TRACK_SIGNALING_PORT",
        "BALL_TRACK_LINK_PORT",
        "BALL_TRACK_REPORT_INTERVAL_MS",
        "BALL_TRACK_MAX_BACKLOG",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "video": {
            "width": 320,
            "height": 240,
            "fps": 25,
            "radius": 12
        },
        "signaling": {
            "host": "10.0.0.2",
            "port": 9000,
            "connect_timeout_ms": 1500
        },
        "link": {
            "port": 9001
        },
        "tracker": {
            "report_interval_ms": 50,
            "max_backlog": 8
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("BALL_TRACK_CONFIG", file.path());
    std::env::set_var("BALL_TRACK_FPS", "15");
    std::env::set_var("BALL_TRACK_SIGNALING_PORT", "9100");
    std::env::set_var("BALL_TRACK_MAX_BACKLOG", "0");

    let cfg = TrackConfig::load().expect("load config");

    assert_eq!(cfg.video.width, 320);
    assert_eq!(cfg.video.height, 240);
    assert_eq!(cfg.video.fps, 15);
    assert_eq!(cfg.video.radius, 12);
    assert_eq!(cfg.signaling.host, "10.0.0.2");
    assert_eq!(cfg.signaling.port, 9100);
    assert_eq!(cfg.signaling.connect_timeout, Duration::from_millis(1500));
    assert_eq!(cfg.link.host, "127.0.0.1");
    assert_eq!(cfg.link.port, 9001);
    assert_eq!(cfg.report_interval, Duration::from_millis(50));
    assert_eq!(cfg.max_backlog, None);

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BALL_TRACK_REPORT_INTERVAL_MS", "20");
    std::env::set_var("BALL_TRACK_MAX_BACKLOG", "4");

    let cfg = TrackConfig::load().expect("load config");
    assert_eq!(cfg.video.width, 640);
    assert_eq!(cfg.video.height, 480);
    assert_eq!(cfg.video.fps, 30);
    assert_eq!(cfg.signaling.port, 1234);
    assert_eq!(cfg.report_interval, Duration::from_millis(20));
    assert_eq!(cfg.max_backlog, Some(4));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BALL_TRACK_FPS", "fast");
    assert!(TrackConfig::load().is_err());
    clear_env();

    std::env::set_var("BALL_TRACK_REPORT_INTERVAL_MS", "0");
    assert!(TrackConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"video": {"radius": 400}}"#).expect("write config");
    std::env::set_var("BALL_TRACK_CONFIG", file.path());
    assert!(TrackConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{not json").expect("write config");
    std::env::set_var("BALL_TRACK_CONFIG", file.path());
    let err = TrackConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));
    clear_env();
}

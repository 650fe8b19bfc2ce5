use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use wildwatch::config::{AlertMode, DeviceConfig};
use wildwatch::error::config_error;
use wildwatch::ConfigError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "WILDWATCH_CONFIG",
        "WILDWATCH_GPS_PORT",
        "WILDWATCH_MODEM_PORT",
        "WILDWATCH_ALERT_NUMBER",
        "WILDWATCH_TARGET_CLASS",
        "WILDWATCH_ALERT_MODE",
        "WILDWATCH_FIX_TIMEOUT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(toml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        target_class = "urs"
        labels = ["urs", "caprioara", "mistret"]

        [gps]
        port = "/dev/ttyUSB1"
        baud = 4800
        fix_timeout_secs = 45

        [modem]
        port = "/dev/ttyS0"
        destination = "+40712345678"
        body_settle_ms = 5000

        [alerts]
        mode = "background"
        message_template = "Atentie! {label} la {location}"

        [display]
        snapshot_path = "/var/lib/wildwatch/capture.png"

        [recording]
        fps = 15

        [frame_rate]
        window = 50
        "#,
    );

    std::env::set_var("WILDWATCH_CONFIG", file.path());
    std::env::set_var("WILDWATCH_ALERT_NUMBER", "+40799999999");
    std::env::set_var("WILDWATCH_FIX_TIMEOUT_SECS", "0");

    let cfg = DeviceConfig::load(None).expect("load config");
    assert_eq!(cfg.target_class, "urs");
    assert_eq!(cfg.labels.name(2), "mistret");
    assert_eq!(cfg.gps.port, "/dev/ttyUSB1");
    assert_eq!(cfg.gps.baud, 4800);
    // Zero from the environment means unbounded.
    assert_eq!(cfg.gps.fix_timeout, None);
    assert_eq!(cfg.modem.port.as_deref(), Some("/dev/ttyS0"));
    assert_eq!(cfg.modem.destination.as_deref(), Some("+40799999999"));
    assert_eq!(cfg.modem.timing.body_settle, Duration::from_secs(5));
    assert_eq!(cfg.modem.timing.probe_settle, Duration::from_secs(1));
    assert_eq!(cfg.alerts.mode, AlertMode::Background);
    assert_eq!(
        cfg.display.snapshot_path,
        PathBuf::from("/var/lib/wildwatch/capture.png")
    );
    assert_eq!(cfg.recording.fps, 15);
    assert_eq!(cfg.recording.path, PathBuf::from("demo1.avi"));
    assert_eq!(cfg.frame_rate_window, 50);

    clear_env();
}

#[test]
fn explicit_path_wins_and_defaults_fill_the_rest() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[modem]\ndry_run = true\n");
    std::env::set_var("WILDWATCH_CONFIG", "/nonexistent/wildwatch.toml");
    std::env::set_var("WILDWATCH_TARGET_CLASS", "wolf");
    std::env::set_var("WILDWATCH_ALERT_MODE", "disabled");

    let cfg = DeviceConfig::load(Some(file.path())).expect("load config");
    assert_eq!(cfg.modem.port, None);
    assert_eq!(cfg.target_class, "wolf");
    assert_eq!(cfg.alerts.mode, AlertMode::Disabled);
    assert_eq!(cfg.gps.port, "/dev/ttyAMA3");
    assert_eq!(cfg.gps.read_timeout, Duration::from_secs(1));
    assert_eq!(cfg.modem.read_timeout, Duration::from_secs(2));

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (toml, needle) in [
        ("target_class = \"  \"\n", "target_class"),
        ("[frame_rate]\nwindow = 0\n", "window"),
        ("[alerts]\nmessage_template = \"bear seen\"\n", "{location}"),
        ("[alerts]\nmode = \"sometimes\"\n", "alert mode"),
        ("[modem]\ndestination = \"112; ATH\"\n", "phone number"),
    ] {
        let file = write_config(toml);
        let err = DeviceConfig::load(Some(file.path())).expect_err(toml);
        assert!(
            matches!(config_error(&err), Some(ConfigError::Invalid(msg)) if msg.contains(needle)),
            "{toml}: {err:#}"
        );
    }

    let broken = write_config("[gps\nport = 1");
    let err = DeviceConfig::load(Some(broken.path())).expect_err("malformed toml");
    assert!(err.to_string().contains("invalid config file"));

    std::env::set_var("WILDWATCH_FIX_TIMEOUT_SECS", "soon");
    let err = DeviceConfig::load(None).expect_err("bad timeout");
    assert!(err.to_string().contains("WILDWATCH_FIX_TIMEOUT_SECS"));

    clear_env();
}

#[test]
fn labels_can_come_from_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let labels = write_config("bear\ndeer\n");
    let file = write_config(&format!(
        "labels_path = \"{}\"\ntarget_class = \"Deer\"\n",
        labels.path().display()
    ));
    let cfg = DeviceConfig::load(Some(file.path())).expect("load config");
    assert!(cfg.labels.is_class(1, &cfg.target_class));

    clear_env();
}

// src/settings.rs
//
// Device profiles loaded from a settings file. TOML by default, JSON when the
// file name ends in `.json`.
//
// Example (TOML):
//
//   log_dir = "/var/log/zlgcan"
//
//   [[devices]]
//   name = "bench"
//   kind = "usb"
//   device_type = "UsbCan2"
//   bitrate = 500000
//
//   [[devices]]
//   name = "gateway"
//   kind = "tcp"
//   ip = "192.168.0.178"
//   port = 4001

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::io::{
    CanDevice, CanError, DeviceType, InitConfig, Result, TcpCanConfig, TcpMode, UsbCanConfig,
};
use crate::runtime::CanRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Usb,
    Tcp,
}

/// One named adapter channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub kind: ProfileKind,
    /// Defaults to UsbCan1 for USB profiles and CanetTcp for TCP profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_index: Option<u32>,
    #[serde(default)]
    pub can_index: u32,

    // USB channel setup. `init` wins over `bitrate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitConfig>,
    #[serde(default)]
    pub listen_only: bool,

    // TCP bridge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_mode: Option<TcpMode>,

    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default)]
    pub wait_time_ms: i32,
    /// 0 disables the error monitor
    #[serde(default = "default_error_polling_interval_ms")]
    pub error_polling_interval_ms: u64,
}

fn default_polling_interval_ms() -> u64 {
    10
}

fn default_error_polling_interval_ms() -> u64 {
    crate::io::events::DEFAULT_ERROR_POLLING_INTERVAL_MS
}

impl DeviceProfile {
    fn error_polling(&self) -> Option<u64> {
        Some(self.error_polling_interval_ms).filter(|ms| *ms > 0)
    }

    /// Channel configuration: explicit `init`, else `bitrate`, else 250 kbit/s.
    pub fn init_config(&self) -> Result<InitConfig> {
        let config = match (&self.init, self.bitrate) {
            (Some(init), _) => *init,
            (None, Some(bitrate)) => InitConfig::for_bitrate(bitrate).ok_or_else(|| {
                CanError::configuration(format!(
                    "profile '{}': unsupported bitrate {}",
                    self.name, bitrate
                ))
            })?,
            (None, None) => InitConfig::default(),
        };
        Ok(if self.listen_only {
            config.with_listen_only(true)
        } else {
            config
        })
    }

    pub fn usb_config(&self) -> Result<UsbCanConfig> {
        if self.kind != ProfileKind::Usb {
            return Err(CanError::configuration(format!(
                "profile '{}' is not a USB profile",
                self.name
            )));
        }
        Ok(UsbCanConfig {
            device_type: self.device_type.unwrap_or(DeviceType::UsbCan1),
            device_index: self.device_index,
            can_index: self.can_index,
            init: self.init_config()?,
            error_polling_interval_ms: self.error_polling(),
        })
    }

    pub fn tcp_config(&self) -> Result<TcpCanConfig> {
        if self.kind != ProfileKind::Tcp {
            return Err(CanError::configuration(format!(
                "profile '{}' is not a TCP profile",
                self.name
            )));
        }
        let ip = self.ip.clone().ok_or_else(|| {
            CanError::configuration(format!("profile '{}': missing ip", self.name))
        })?;
        let port = self.port.ok_or_else(|| {
            CanError::configuration(format!("profile '{}': missing port", self.name))
        })?;
        Ok(TcpCanConfig {
            device_type: self.device_type.unwrap_or(DeviceType::CanetTcp),
            ip,
            port,
            can_index: self.can_index,
            tcp_mode: self.tcp_mode,
            error_polling_interval_ms: self.error_polling(),
        })
    }

    /// Create the (not yet connected) device session this profile describes.
    pub fn build(&self, runtime: &CanRuntime) -> Result<Arc<CanDevice>> {
        match self.kind {
            ProfileKind::Usb => runtime.usb_device(self.usb_config()?),
            ProfileKind::Tcp => runtime.tcp_device(self.tcp_config()?),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory for `logging::init_file_logging`; stderr only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub devices: Vec<DeviceProfile>,
}

impl Settings {
    pub fn profile(&self, name: &str) -> Option<&DeviceProfile> {
        self.devices.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    Toml,
    Json,
}

impl SettingsFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SettingsFormat::Json,
            _ => SettingsFormat::Toml,
        }
    }
}

/// `<config dir>/zlgcan/settings.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("zlgcan").join("settings.toml"))
}

pub fn parse_settings(text: &str, format: SettingsFormat) -> Result<Settings> {
    let settings: Settings = match format {
        SettingsFormat::Toml => toml::from_str(text)
            .map_err(|e| CanError::configuration(format!("invalid settings: {}", e)))?,
        SettingsFormat::Json => serde_json::from_str(text)
            .map_err(|e| CanError::configuration(format!("invalid settings: {}", e)))?,
    };

    let mut names = std::collections::HashSet::new();
    for profile in &settings.devices {
        if !names.insert(profile.name.as_str()) {
            return Err(CanError::configuration(format!(
                "duplicate profile name '{}'",
                profile.name
            )));
        }
    }
    Ok(settings)
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CanError::configuration(format!("failed to read {}: {}", path.display(), e))
    })?;
    let settings = parse_settings(&text, SettingsFormat::from_path(path))?;
    tlog!(
        "[settings] Loaded {} device profile(s) from {}",
        settings.devices.len(),
        path.display()
    );
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    let text = match SettingsFormat::from_path(path) {
        SettingsFormat::Toml => toml::to_string_pretty(settings)
            .map_err(|e| CanError::configuration(format!("failed to encode settings: {}", e)))?,
        SettingsFormat::Json => serde_json::to_string_pretty(settings)
            .map_err(|e| CanError::configuration(format!("failed to encode settings: {}", e)))?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            CanError::configuration(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    std::fs::write(path, text).map_err(|e| {
        CanError::configuration(format!("failed to write {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MockDriver;

    const SAMPLE: &str = r#"
        [[devices]]
        name = "bench"
        kind = "usb"
        device_type = "UsbCan2"
        can_index = 1
        bitrate = 500000
        listen_only = true

        [[devices]]
        name = "gateway"
        kind = "tcp"
        ip = "192.168.0.178"
        port = 4001
        tcp_mode = "client"
        error_polling_interval_ms = 0
    "#;

    #[test]
    fn test_parse_toml_profiles() {
        let settings = parse_settings(SAMPLE, SettingsFormat::Toml).unwrap();
        assert_eq!(settings.devices.len(), 2);

        let bench = settings.profile("bench").unwrap();
        let usb = bench.usb_config().unwrap();
        assert_eq!(usb.device_type, DeviceType::UsbCan2);
        assert_eq!(usb.can_index, 1);
        assert_eq!((usb.init.timing0, usb.init.timing1), (0x00, 0x1C));
        assert_eq!(usb.init.mode, 1);
        assert_eq!(usb.error_polling_interval_ms, Some(500));
        assert_eq!(bench.polling_interval_ms, 10);

        let gateway = settings.profile("gateway").unwrap();
        let tcp = gateway.tcp_config().unwrap();
        assert_eq!(tcp.device_type, DeviceType::CanetTcp);
        assert_eq!(tcp.port, 4001);
        assert_eq!(tcp.tcp_mode, Some(TcpMode::Client));
        assert_eq!(tcp.error_polling_interval_ms, None);
        assert!(gateway.usb_config().is_err());
    }

    #[test]
    fn test_parse_json_profiles() {
        let json = r#"{
            "devices": [
                { "name": "a", "kind": "usb", "init": {
                    "acceptance_code": 0, "acceptance_mask": 4294967295,
                    "filter": 1, "timing0": 0, "timing1": 20, "mode": 0 } }
            ]
        }"#;
        let settings = parse_settings(json, SettingsFormat::Json).unwrap();
        let init = settings.devices[0].init_config().unwrap();
        assert_eq!((init.timing0, init.timing1), (0x00, 0x14));
    }

    #[test]
    fn test_invalid_profiles() {
        let dup = r#"
            [[devices]]
            name = "x"
            kind = "usb"
            [[devices]]
            name = "x"
            kind = "tcp"
        "#;
        assert!(parse_settings(dup, SettingsFormat::Toml).is_err());

        let bad_rate = r#"
            [[devices]]
            name = "x"
            kind = "usb"
            bitrate = 123
        "#;
        let settings = parse_settings(bad_rate, SettingsFormat::Toml).unwrap();
        assert!(settings.devices[0].init_config().is_err());

        let no_port = r#"
            [[devices]]
            name = "x"
            kind = "tcp"
            ip = "10.0.0.1"
        "#;
        let settings = parse_settings(no_port, SettingsFormat::Toml).unwrap();
        assert!(settings.devices[0].tcp_config().is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SettingsFormat::from_path(Path::new("a/settings.json")), SettingsFormat::Json);
        assert_eq!(SettingsFormat::from_path(Path::new("a/settings.JSON")), SettingsFormat::Json);
        assert_eq!(SettingsFormat::from_path(Path::new("a/settings.toml")), SettingsFormat::Toml);
        assert_eq!(SettingsFormat::from_path(Path::new("settings")), SettingsFormat::Toml);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("zlgcan-settings-{}", std::process::id()));
        let settings = parse_settings(SAMPLE, SettingsFormat::Toml).unwrap();

        for file in ["settings.toml", "settings.json"] {
            let path = dir.join(file);
            save_settings(&path, &settings).unwrap();
            assert_eq!(load_settings(&path).unwrap(), settings);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_build_from_profile() {
        let runtime = CanRuntime::new(Arc::new(MockDriver::new()));
        let settings = parse_settings(SAMPLE, SettingsFormat::Toml).unwrap();

        let bench = settings.profile("bench").unwrap().build(&runtime).unwrap();
        assert_eq!(bench.device_type(), DeviceType::UsbCan2);
        assert_eq!(bench.can_index(), 1);

        let gateway = settings.profile("gateway").unwrap().build(&runtime).unwrap();
        assert_eq!(gateway.device_type(), DeviceType::CanetTcp);
        assert_eq!(gateway.error_polling_interval(), None);
    }

    #[test]
    fn test_default_path_is_under_config_dir() {
        if let Some(path) = default_settings_path() {
            assert!(path.ends_with("zlgcan/settings.toml"));
        }
    }
}

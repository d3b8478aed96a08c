use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    // If None, use OS default data directory for the story store
    pub data_override: Option<PathBuf>,
    // If None, server traffic logs go to OS temp dir
    #[serde(default)]
    pub api_log_override: Option<PathBuf>,
    // Identity used by the desktop session
    #[serde(default = "AppSettings::default_user_id")]
    pub user_id: String,
    #[serde(default = "AppSettings::default_user_name")]
    pub user_name: String,
    // Canvas behaviour
    #[serde(default = "AppSettings::default_snap")]
    pub snap_to_grid: bool,
    #[serde(default = "AppSettings::default_grid_size")]
    pub grid_size: f32,
    // API service configuration (actix)
    #[serde(default)]
    pub api_enabled: bool,
    #[serde(default = "AppSettings::default_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "AppSettings::default_port")]
    pub api_port: u16,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            data_override: None,
            api_log_override: None,
            user_id: Self::default_user_id(),
            user_name: Self::default_user_name(),
            snap_to_grid: Self::default_snap(),
            grid_size: Self::default_grid_size(),
            api_enabled: false,
            api_bind_addr: Self::default_bind_addr(),
            api_port: Self::default_port(),
            api_key: None,
        }
    }
}

impl AppSettings {
    fn config_dir() -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            // ~/Library/Application Support/Story-Loom
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("Story-Loom");
        }
        #[cfg(target_os = "windows")]
        {
            // %APPDATA%\Story-Loom
            if let Ok(appdata) = std::env::var("APPDATA") {
                return PathBuf::from(appdata).join("Story-Loom");
            }
            return PathBuf::from("Story-Loom");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_CONFIG_HOME/Story-Loom or ~/.config/Story-Loom
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg).join("Story-Loom");
            }
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join(".config").join("Story-Loom");
        }
    }

    fn data_default_dir() -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("Story-Loom").join("Data");
        }
        #[cfg(target_os = "windows")]
        {
            // %LOCALAPPDATA%\Story-Loom\Data else TEMP
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                return PathBuf::from(local).join("Story-Loom").join("Data");
            }
            if let Ok(temp) = std::env::var("TEMP") {
                return PathBuf::from(temp).join("Story-Loom");
            }
            return PathBuf::from("Story-Loom");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_DATA_HOME/story-loom or ~/.local/share/story-loom, else /tmp/Story-Loom
            if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
                return PathBuf::from(xdg).join("story-loom");
            }
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(".local").join("share").join("story-loom");
            }
            return PathBuf::from("/tmp").join("Story-Loom");
        }
    }

    pub fn load() -> anyhow::Result<Self> {
        let json_path = Self::config_dir().join("settings.json");
        if json_path.exists() {
            let mut f = std::fs::File::open(json_path)?;
            let mut s = String::new();
            f.read_to_string(&mut s)?;
            let v: Self = serde_json::from_str(&s)?;
            return Ok(v);
        }
        Ok(Self::default())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join("settings.json");
        let s = serde_json::to_string_pretty(self)?;
        let mut f = std::fs::File::create(path)?;
        f.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(p) = &self.data_override { return p.clone(); }
        Self::data_default_dir()
    }

    /// The story store state file inside the data directory.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join("stories.ron")
    }

    pub(crate) fn default_user_id() -> String { "local".to_string() }
    pub(crate) fn default_user_name() -> String { "Local Author".to_string() }
    pub(crate) fn default_snap() -> bool { true }
    pub(crate) fn default_grid_size() -> f32 { 15.0 }
    pub(crate) fn default_bind_addr() -> String { "127.0.0.1".to_string() }
    pub(crate) fn default_port() -> u16 { 8787 }

    pub fn api_endpoint(&self) -> String {
        format!("{}:{}", self.api_bind_addr, self.api_port)
    }

    /// Default API log directory when no override is set: OS temporary directory.
    /// Example: {temp_dir}/Story-Loom/api-logs
    pub fn api_log_default_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push("Story-Loom");
        p.push("api-logs");
        p
    }

    pub fn api_log_dir(&self) -> PathBuf {
        if let Some(p) = &self.api_log_override { return p.clone(); }
        Self::api_log_default_dir()
    }

    /// Snap a canvas coordinate to the grid when snapping is on.
    pub fn snap(&self, v: f32) -> f32 {
        if self.snap_to_grid && self.grid_size > 0.0 {
            (v / self.grid_size).round() * self.grid_size
        } else {
            v
        }
    }
}

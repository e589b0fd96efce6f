//! Persisted emulator configuration.
//!
//! A JSON file at the platform configuration directory. Hand-edited
//! configs are common, so loading tolerates `//` line comments and
//! trailing commas; unknown keys are ignored. Saving always emits strict
//! JSON, and `load(save(c)) == c` on the recognised fields.

use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    #[serde(rename = "TOSPath")]
    pub tos_path: Option<String>,
    /// 0 = ST, 1 = Mega ST, 2 = STE (only the ST is emulated).
    #[serde(rename = "STModel")]
    pub st_model: u32,
    /// 0..3 -> 512 K, 1 M, 2 M, 4 M.
    #[serde(rename = "RAMConfiguration")]
    pub ram_configuration: u32,
    #[serde(rename = "MaxSpeed")]
    pub max_speed: bool,
    #[serde(rename = "FloppyImagePath")]
    pub floppy_image_path: Option<String>,
    #[serde(rename = "MouseXSensitivity")]
    pub mouse_x_sensitivity: u32,
    #[serde(rename = "MouseYSensitivity")]
    pub mouse_y_sensitivity: u32,
    #[serde(rename = "SampleRate")]
    pub sample_rate: u32,
    #[serde(rename = "DebugMode")]
    pub debug_mode: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            tos_path: None,
            st_model: 0,
            ram_configuration: 1,
            max_speed: false,
            floppy_image_path: None,
            mouse_x_sensitivity: 2,
            mouse_y_sensitivity: 2,
            sample_rate: 48_000,
            debug_mode: false,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("st-runner").join("config.json");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("st-runner").join("config.json");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("st-runner")
            .join("config.json");
    }

    PathBuf::from("config.json")
}

pub fn load_from_file(path: &Path) -> EmulatorConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return EmulatorConfig::default(),
    };

    match serde_json::from_str::<EmulatorConfig>(&strip_relaxed_json(&text)) {
        Ok(config) => config,
        Err(error) => {
            warn!(
                "failed to parse config {}: {error}; using defaults",
                path.display()
            );
            EmulatorConfig::default()
        }
    }
}

pub fn save_to_file(path: &Path, config: &EmulatorConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(config).unwrap_or_default();
    std::fs::write(path, text)
}

/// Reduce relaxed JSON (line comments, trailing commas) to the strict
/// form `serde_json` accepts. String contents are preserved verbatim.
fn strip_relaxed_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ',' => {
                // Drop the comma if the next significant character closes
                // the container.
                let mut lookahead = chars.clone();
                let mut closes = false;
                while let Some(&next) = lookahead.peek() {
                    if next.is_whitespace() {
                        lookahead.next();
                    } else if next == '/' {
                        // A comment between the comma and the close.
                        lookahead.next();
                        if lookahead.peek() == Some(&'/') {
                            for skipped in lookahead.by_ref() {
                                if skipped == '\n' {
                                    break;
                                }
                            }
                        } else {
                            break;
                        }
                    } else {
                        closes = next == '}' || next == ']';
                        break;
                    }
                }
                if !closes {
                    out.push(',');
                }
            }
            _ => out.push(c),
        }
    }
    out
}

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use serde_json::{json, Value};

/// Environment variable naming a JSON-lines file that receives one record
/// per command.
pub const EVENTS_ENV: &str = "SDIMG_EVENTS";

/// Console output for people, plus an optional machine-readable trail of
/// which command ran against which image and how it ended.
pub struct Logger {
    image: PathBuf,
    events: Option<BufWriter<File>>,
}

impl Logger {
    pub fn from_env(image: &Path) -> Result<Self> {
        let path = std::env::var_os(EVENTS_ENV).map(PathBuf::from);
        Self::open(image, path.as_deref())
    }

    pub fn open(image: &Path, events: Option<&Path>) -> Result<Self> {
        let events = match events {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed to open event log {}", path.display()))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };
        Ok(Self {
            image: image.to_path_buf(),
            events,
        })
    }

    /// Result text for the user.
    pub fn line(&self, text: impl AsRef<str>) {
        println!("{}", text.as_ref());
    }

    pub fn warn(&self, text: impl AsRef<str>) {
        eprintln!("warning: {}", text.as_ref());
    }

    /// Appends the outcome of `op`; `detail` is the command's report on
    /// success and the error chain on failure.
    pub fn record(&mut self, op: &str, ok: bool, detail: Value) {
        let Some(events) = &mut self.events else {
            return;
        };
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        let event = json!({
            "ts_ms": ts_ms,
            "op": op,
            "image": self.image.display().to_string(),
            "ok": ok,
            "detail": detail,
        });
        let _ = writeln!(events, "{event}");
        let _ = events.flush();
    }
}

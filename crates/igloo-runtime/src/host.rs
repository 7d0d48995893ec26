//! Host-side facts the engine consumes: user identity, display server,
//! Xauthority location and timezone.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Safe wrapper around libc::getuid().
#[allow(unsafe_code)]
fn current_uid() -> u32 {
    // SAFETY: getuid() is always safe, returns the real user ID with no side effects.
    unsafe { libc::getuid() }
}

/// Safe wrapper around libc::getgid().
#[allow(unsafe_code)]
fn current_gid() -> u32 {
    // SAFETY: getgid() is always safe, returns the real group ID with no side effects.
    unsafe { libc::getgid() }
}

/// The invoking host user. The guest user mirrors it: same name, uid, gid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    /// Host home directory.
    pub home: PathBuf,
}

impl HostIdentity {
    pub fn current() -> Self {
        let username = std::env::var("USER")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "user".to_owned());
        let home = std::env::var_os("HOME")
            .map_or_else(|| PathBuf::from(format!("/home/{username}")), PathBuf::from);
        Self {
            username,
            uid: current_uid(),
            gid: current_gid(),
            home,
        }
    }

    /// Home directory of the mirrored user inside the guest.
    pub fn guest_home(&self) -> String {
        format!("/home/{}", self.username)
    }
}

/// Host display server, as seen from the environment of the invoking shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DisplayMode {
    None,
    X11 {
        /// Display number without the leading colon or screen suffix.
        display: String,
    },
    Wayland {
        socket: String,
        runtime_dir: String,
        /// XWayland display number when `DISPLAY` is also set.
        xwayland: Option<String>,
    },
}

impl DisplayMode {
    pub fn detect(uid: u32) -> Self {
        let var = |k: &str| std::env::var(k).ok();
        Self::from_vars(
            var("WAYLAND_DISPLAY").as_deref(),
            var("DISPLAY").as_deref(),
            var("XDG_RUNTIME_DIR").as_deref(),
            uid,
        )
    }

    /// Wayland wins over X11 because XWayland sessions set both.
    pub fn from_vars(
        wayland_display: Option<&str>,
        display: Option<&str>,
        xdg_runtime_dir: Option<&str>,
        uid: u32,
    ) -> Self {
        let display = display.filter(|d| !d.is_empty());
        match wayland_display.filter(|w| !w.is_empty()) {
            Some(socket) => Self::Wayland {
                socket: socket.to_owned(),
                runtime_dir: xdg_runtime_dir
                    .filter(|d| !d.is_empty())
                    .map_or_else(|| format!("/run/user/{uid}"), str::to_owned),
                xwayland: display.map(parse_x11_display),
            },
            None => match display {
                Some(d) => Self::X11 {
                    display: parse_x11_display(d),
                },
                None => Self::None,
            },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::X11 { .. } => "X11",
            Self::Wayland { .. } => "Wayland",
        }
    }
}

/// `":1.0"` and `"localhost:1"` both yield `"1"`; empty input yields `"0"`.
pub fn parse_x11_display(display: &str) -> String {
    let after_colon = display.rsplit_once(':').map_or(display, |(_, d)| d);
    let number = after_colon.split('.').next().unwrap_or_default();
    if number.is_empty() {
        "0".to_owned()
    } else {
        number.to_owned()
    }
}

/// `$XAUTHORITY` when set, else `<home>/.Xauthority`.
pub fn xauthority_path(xauthority: Option<&str>, home: &Path) -> PathBuf {
    match xauthority.filter(|x| !x.is_empty()) {
        Some(x) => PathBuf::from(x),
        None => home.join(".Xauthority"),
    }
}

/// Host timezone: `$TZ`, `/etc/timezone`, the `/etc/localtime` link, else `UTC`.
pub fn detect_timezone() -> String {
    let tz = std::env::var("TZ").ok();
    let etc_timezone = std::fs::read_to_string("/etc/timezone").ok();
    let localtime = std::fs::read_link("/etc/localtime").ok();
    timezone_from(tz.as_deref(), etc_timezone.as_deref(), localtime.as_deref())
}

fn timezone_from(tz: Option<&str>, etc_timezone: Option<&str>, localtime: Option<&Path>) -> String {
    if let Some(tz) = tz.map(|t| t.trim_start_matches(':').trim()).filter(|t| !t.is_empty()) {
        return tz.to_owned();
    }
    if let Some(tz) = etc_timezone.map(str::trim).filter(|t| !t.is_empty()) {
        return tz.to_owned();
    }
    if let Some(link) = localtime {
        let link = link.to_string_lossy();
        if let Some((_, zone)) = link.split_once("zoneinfo/") {
            if !zone.is_empty() {
                return zone.to_owned();
            }
        }
    }
    "UTC".to_owned()
}

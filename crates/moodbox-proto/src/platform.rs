use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

pub const CONTROL_TCP_PORT: u16 = 7878;

/// Exit status reported when the watched output device disappears.
/// `EX_TEMPFAIL` from sysexits.h: the supervising unit should relaunch us.
pub const PRESENCE_LOST_EXIT_CODE: i32 = 75;

/// When set, helper binaries are looked up on PATH only, never beside the
/// executable.
static USE_SYSTEM_DEPS: AtomicBool = AtomicBool::new(false);

pub fn set_use_system_deps(use_system: bool) {
    USE_SYSTEM_DEPS.store(use_system, Ordering::Relaxed);
}

pub fn should_use_system_deps() -> bool {
    USE_SYSTEM_DEPS.load(Ordering::Relaxed)
}

const CONTROL_TCP_HOST: &str = "127.0.0.1";

pub fn control_address() -> String {
    format!("{}:{}", CONTROL_TCP_HOST, CONTROL_TCP_PORT)
}

pub fn mpv_socket_name() -> String {
    format!("{}/moodbox-mpv.sock", std::env::temp_dir().display())
}

pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server={}", mpv_socket_name())
}

fn home_or(fallback: &str) -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(fallback))
}

/// `~/.local/share/moodbox`: log file.
pub fn data_dir() -> PathBuf {
    home_or("/tmp").join(".local").join("share").join("moodbox")
}

/// `~/.config/moodbox`: config.toml, stations.toml, streaming auth file.
pub fn config_dir() -> PathBuf {
    home_or(".").join(".config").join("moodbox")
}

/// `~/.cache/moodbox`: rendered announcement clips.
pub fn cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cache")
        .join("moodbox")
}

fn find_beside_exe(name: &str) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    [dir.join(name), dir.join("external").join(name)]
        .into_iter()
        .find(|p| p.exists())
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    path.split(':')
        .map(|dir| PathBuf::from(dir).join(name))
        .find(|p| p.exists())
}

/// Locate a helper binary. An absolute or relative path containing a `/` is
/// taken as-is; a bare name is searched beside the executable (unless
/// system deps are forced) and then on PATH.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let p = PathBuf::from(name);
        return p.exists().then_some(p);
    }
    if !should_use_system_deps() {
        if let Some(p) = find_beside_exe(name) {
            return Some(p);
        }
    }
    find_on_path(name)
}

pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    find_binary("mpv")
}

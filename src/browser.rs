use std::process::Command;
use tracing::debug;

/// Try to open `url` in the default browser. Best-effort: a failure is the
/// operator's problem to work around (the URL is printed either way).
pub fn open(url: &str) -> std::io::Result<()> {
    debug!(url, "Launching browser");
    launcher(url).spawn().map(|_| ())
}

#[cfg(target_os = "macos")]
fn launcher(url: &str) -> Command {
    let mut command = Command::new("open");
    command.arg(url);
    command
}

#[cfg(target_os = "windows")]
fn launcher(url: &str) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", url]);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn launcher(url: &str) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    command
}

use std::process::Command;

use log::debug;

/// Report the machine architecture the way `uname -m` does (`armv7l`,
/// `mipsel`, `x86_64`, ...).
///
/// Falls back to the architecture this binary was compiled for when `uname`
/// is unavailable or prints nothing useful.
#[must_use]
pub fn detect_host_arch() -> String {
    match Command::new("uname").arg("-m").output() {
        Ok(output) if output.status.success() => {
            if let Some(arch) = parse_uname_output(&String::from_utf8_lossy(&output.stdout)) {
                debug!("Detected host architecture via uname: {arch}");
                return arch;
            }
        }
        Ok(output) => debug!("uname -m exited with {}", output.status),
        Err(error) => debug!("Failed to run uname -m: {error}"),
    }

    std::env::consts::ARCH.to_string()
}

#[must_use]
pub fn parse_uname_output(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(ToString::to_string)
}

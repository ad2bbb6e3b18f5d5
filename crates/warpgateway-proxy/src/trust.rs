//! Installing the root CA into the operating system trust store.
//!
//! Clients that use the system store (Warp among them) only accept the
//! intercepted TLS connections once `warpgateway-ca.crt` is trusted there.
//! Every operation shells out to the platform tool and needs elevated
//! privileges on Linux and macOS:
//!
//! ```text
//! platform   install                         check / remove
//! ────────   ─────────────────────────────   ───────────────────────────
//! Windows    certutil -addstore -user Root   certutil -store / -delstore
//! macOS      security add-trusted-cert       security find/delete-certificate
//! Linux      copy into the distro anchors    anchor file present / rm
//!            dir, then refresh the bundle
//! ```

use std::path::Path;
#[cfg(target_os = "linux")]
use std::path::PathBuf;
#[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
use std::process::{Command, Output};

#[cfg(any(target_os = "windows", target_os = "macos"))]
use crate::ca::CA_COMMON_NAME;

/// Outcome of a trust store operation, reported to the user as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
}

impl TrustResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Adds the certificate at `cert_path` to the system trust store.
///
/// Does nothing if it is already installed.
pub fn install_ca_certificate(cert_path: &Path) -> TrustResult {
    if !cert_path.exists() {
        return TrustResult::failed(format!(
            "CA certificate not found at {}",
            cert_path.display()
        ));
    }
    if is_ca_installed(cert_path) {
        return TrustResult::ok("CA certificate is already installed");
    }

    let result = platform::install(cert_path);
    if result.success {
        tracing::info!("{}", result.message);
    } else {
        tracing::error!("CA certificate installation failed: {}", result.message);
    }
    result
}

/// Removes the gateway's CA from the system trust store.
pub fn uninstall_ca_certificate(cert_path: &Path) -> TrustResult {
    let result = platform::uninstall(cert_path);
    if result.success {
        tracing::info!("{}", result.message);
    } else {
        tracing::warn!("CA certificate removal failed: {}", result.message);
    }
    result
}

/// Returns true if the gateway's CA is in the system trust store.
pub fn is_ca_installed(cert_path: &Path) -> bool {
    platform::is_installed(cert_path)
}

#[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
fn run(program: &str, args: &[&str]) -> std::io::Result<Output> {
    tracing::debug!("Running {} {}", program, args.join(" "));
    Command::new(program).args(args).output()
}

#[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
fn command_result(program: &str, output: std::io::Result<Output>, done: &str) -> TrustResult {
    match output {
        Ok(out) if out.status.success() => TrustResult::ok(done),
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if stderr.contains("dismissed") || stderr.contains("cancelled") {
                TrustResult::failed("Authentication cancelled by user")
            } else {
                TrustResult::failed(format!("{} failed: {}", program, stderr.trim()))
            }
        }
        Err(e) => TrustResult::failed(format!("Failed to run {}: {}", program, e)),
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::*;

    pub(super) fn install(cert_path: &Path) -> TrustResult {
        let path = cert_path.to_string_lossy().into_owned();
        command_result(
            "certutil",
            run("certutil", &["-addstore", "-user", "Root", path.as_str()]),
            "CA certificate installed to the user trust store",
        )
    }

    pub(super) fn uninstall(_cert_path: &Path) -> TrustResult {
        command_result(
            "certutil",
            run("certutil", &["-delstore", "-user", "Root", CA_COMMON_NAME]),
            "CA certificate removed from the user trust store",
        )
    }

    pub(super) fn is_installed(_cert_path: &Path) -> bool {
        [&["-store", "-user", "Root"][..], &["-store", "Root"][..]]
            .iter()
            .filter_map(|args| run("certutil", args).ok())
            .any(|out| String::from_utf8_lossy(&out.stdout).contains(CA_COMMON_NAME))
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::*;

    const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

    pub(super) fn install(cert_path: &Path) -> TrustResult {
        let path = cert_path.to_string_lossy().into_owned();
        command_result(
            "security",
            run(
                "sudo",
                &[
                    "security",
                    "add-trusted-cert",
                    "-d",
                    "-r",
                    "trustRoot",
                    "-k",
                    SYSTEM_KEYCHAIN,
                    path.as_str(),
                ],
            ),
            "CA certificate installed to the system keychain",
        )
    }

    pub(super) fn uninstall(_cert_path: &Path) -> TrustResult {
        command_result(
            "security",
            run(
                "sudo",
                &[
                    "security",
                    "delete-certificate",
                    "-c",
                    CA_COMMON_NAME,
                    SYSTEM_KEYCHAIN,
                ],
            ),
            "CA certificate removed from the system keychain",
        )
    }

    pub(super) fn is_installed(_cert_path: &Path) -> bool {
        run("security", &["find-certificate", "-c", CA_COMMON_NAME])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;

    /// File name the certificate is copied to inside an anchors directory.
    pub(super) const ANCHOR_FILE: &str = "warpgateway-ca.crt";

    /// A distribution family's anchor directory and the command that
    /// rebuilds the trust bundle from it.
    pub(super) struct Anchors {
        pub(super) dir: &'static str,
        pub(super) refresh: &'static [&'static str],
        pub(super) family: &'static str,
    }

    pub(super) const ANCHORS: &[Anchors] = &[
        Anchors {
            dir: "/usr/local/share/ca-certificates",
            refresh: &["update-ca-certificates"],
            family: "Debian/Ubuntu",
        },
        Anchors {
            dir: "/etc/pki/ca-trust/source/anchors",
            refresh: &["update-ca-trust", "extract"],
            family: "Fedora/RHEL",
        },
        Anchors {
            dir: "/etc/ca-certificates/trust-source/anchors",
            refresh: &["trust", "extract-compat"],
            family: "Arch Linux",
        },
    ];

    /// First anchors directory present under `root`.
    pub(super) fn detect(root: &Path) -> Option<&'static Anchors> {
        ANCHORS.iter().find(|a| rooted(root, a.dir).is_dir())
    }

    /// Installed anchor files present under `root`.
    pub(super) fn installed_files(root: &Path) -> Vec<PathBuf> {
        ANCHORS
            .iter()
            .map(|a| rooted(root, a.dir).join(ANCHOR_FILE))
            .filter(|p| p.exists())
            .collect()
    }

    fn rooted(root: &Path, dir: &str) -> PathBuf {
        root.join(dir.trim_start_matches('/'))
    }

    /// `pkexec` for graphical sessions, `sudo` otherwise.
    fn elevation() -> &'static str {
        if std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some() {
            "pkexec"
        } else {
            "sudo"
        }
    }

    fn refresh(anchors: &Anchors) -> std::io::Result<Output> {
        run(elevation(), anchors.refresh)
    }

    pub(super) fn install(cert_path: &Path) -> TrustResult {
        let Some(anchors) = detect(Path::new("/")) else {
            return TrustResult::failed(
                "Unknown Linux distribution. Install the CA certificate manually.",
            );
        };

        let source = cert_path.to_string_lossy().into_owned();
        let dest = Path::new(anchors.dir)
            .join(ANCHOR_FILE)
            .to_string_lossy()
            .into_owned();
        let copied = command_result(
            "cp",
            run(elevation(), &["cp", source.as_str(), dest.as_str()]),
            "copied",
        );
        if !copied.success {
            return copied;
        }

        command_result(
            anchors.refresh[0],
            refresh(anchors),
            &format!("CA certificate installed ({})", anchors.family),
        )
    }

    pub(super) fn uninstall(_cert_path: &Path) -> TrustResult {
        let files = installed_files(Path::new("/"));
        if files.is_empty() {
            return TrustResult::failed("No installed CA certificate found");
        }

        let mut removed = 0;
        for file in &files {
            let file = file.to_string_lossy().into_owned();
            if command_result("rm", run(elevation(), &["rm", file.as_str()]), "removed").success {
                removed += 1;
            }
        }
        for anchors in ANCHORS.iter().filter(|a| Path::new(a.dir).is_dir()) {
            if let Err(e) = refresh(anchors) {
                tracing::warn!("Failed to refresh {} trust bundle: {}", anchors.family, e);
            }
        }

        if removed == files.len() {
            TrustResult::ok("CA certificate removed")
        } else {
            TrustResult::failed(format!(
                "Removed {} of {} installed CA certificate files",
                removed,
                files.len()
            ))
        }
    }

    pub(super) fn is_installed(_cert_path: &Path) -> bool {
        !installed_files(Path::new("/")).is_empty()
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
mod platform {
    use super::*;

    pub(super) fn install(_cert_path: &Path) -> TrustResult {
        TrustResult::failed("Unsupported operating system")
    }

    pub(super) fn uninstall(_cert_path: &Path) -> TrustResult {
        TrustResult::failed("Unsupported operating system")
    }

    pub(super) fn is_installed(_cert_path: &Path) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn install_missing_certificate_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = install_ca_certificate(&temp_dir.path().join("missing.crt"));
        assert!(!result.success);
        assert!(result.message.contains("not found"));
    }

    #[test]
    fn trust_result_constructors() {
        assert!(TrustResult::ok("done").success);
        let failed = TrustResult::failed("nope");
        assert!(!failed.success);
        assert_eq!(failed.message, "nope");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn command_result_reports_spawn_failure() {
        let result = command_result(
            "wg-no-such-tool",
            run("wg-no-such-tool", &[]),
            "unreachable",
        );
        assert!(!result.success);
        assert!(result.message.contains("wg-no-such-tool"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_detects_first_present_anchor_dir() {
        let root = TempDir::new().unwrap();
        assert!(platform::detect(root.path()).is_none());

        std::fs::create_dir_all(root.path().join("etc/pki/ca-trust/source/anchors")).unwrap();
        let anchors = platform::detect(root.path()).unwrap();
        assert_eq!(anchors.family, "Fedora/RHEL");
        assert_eq!(anchors.refresh, &["update-ca-trust", "extract"]);

        std::fs::create_dir_all(root.path().join("usr/local/share/ca-certificates")).unwrap();
        assert_eq!(platform::detect(root.path()).unwrap().family, "Debian/Ubuntu");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_installed_files_lists_anchor_copies() {
        let root = TempDir::new().unwrap();
        assert!(platform::installed_files(root.path()).is_empty());

        let dir = root.path().join("etc/ca-certificates/trust-source/anchors");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(platform::ANCHOR_FILE), "pem").unwrap();

        assert_eq!(
            platform::installed_files(root.path()),
            vec![dir.join("warpgateway-ca.crt")]
        );
    }
}

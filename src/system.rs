//! OS collaborators: package inventory, per-package introspection and the
//! archive-inspection tool. Each call returns raw text; parsing lives with
//! the component that consumes it.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error_codes::IconError;

pub trait PackageShell: Send + Sync {
    /// Newline-delimited installed package identifiers (`pm list packages`).
    fn list_packages(&self) -> Result<String, IconError>;

    /// Unprivileged per-package dump (`pm dump <package>`).
    fn dump_package(&self, package: &str) -> Result<String, IconError>;

    /// Archive paths for a package, base first (`pm path <package>`).
    fn package_paths(&self, package: &str) -> Result<String, IconError>;

    /// Resource dump through the privileged bridge. Fails with
    /// `ExternalToolFailure` when the bridge is not installed.
    fn privileged_dump(&self, package: &str) -> Result<String, IconError>;

    /// `aapt2 dump badging <archive>`.
    fn badging(&self, archive: &Path) -> Result<String, IconError>;
}

/// Runs the real Android tooling available inside Termux.
#[derive(Debug, Clone)]
pub struct AndroidShell {
    rish: Option<PathBuf>,
}

impl AndroidShell {
    pub fn new() -> Self {
        Self {
            rish: home_dir().map(|home| home.join(".rish").join("rish")),
        }
    }

    pub fn with_rish(rish: Option<PathBuf>) -> Self {
        Self { rish }
    }
}

impl Default for AndroidShell {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageShell for AndroidShell {
    fn list_packages(&self) -> Result<String, IconError> {
        run_tool("pm", &["list", "packages"])
    }

    fn dump_package(&self, package: &str) -> Result<String, IconError> {
        run_tool("pm", &["dump", package])
    }

    fn package_paths(&self, package: &str) -> Result<String, IconError> {
        run_tool("pm", &["path", package])
    }

    fn privileged_dump(&self, package: &str) -> Result<String, IconError> {
        let rish = self
            .rish
            .as_deref()
            .filter(|path| path.is_file())
            .ok_or_else(|| IconError::tool("rish", "bridge not installed"))?;
        let script = format!("pm dump {package}");
        run_tool(&rish.to_string_lossy(), &["-c", &script])
    }

    fn badging(&self, archive: &Path) -> Result<String, IconError> {
        let archive = archive.to_string_lossy();
        run_tool("aapt2", &["dump", "badging", &archive])
    }
}

fn run_tool(program: &str, args: &[&str]) -> Result<String, IconError> {
    debug!(program, ?args, "running external tool");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|error| IconError::tool(program, error.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IconError::tool(
            program,
            format!("{}: {}", output.status, stderr.trim()),
        ));
    }
    String::from_utf8(output.stdout)
        .map_err(|_| IconError::tool(program, "output is not valid UTF-8"))
}

/// Trims each line, drops an optional `package:` prefix and skips blanks.
pub fn parse_package_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| {
            let line = line.trim();
            line.strip_prefix("package:").unwrap_or(line).trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_lines_strip_prefix_and_blanks() {
        let output = "package:com.android.chrome\n\n  package:org.fdroid.fdroid  \nplain.id\n";
        assert_eq!(
            parse_package_lines(output),
            vec!["com.android.chrome", "org.fdroid.fdroid", "plain.id"]
        );
    }

    #[test]
    fn missing_bridge_is_a_tool_failure() {
        let shell = AndroidShell::with_rish(Some(PathBuf::from("/nonexistent/.rish/rish")));
        let error = shell
            .privileged_dump("org.example")
            .expect_err("missing bridge should fail");
        assert_eq!(error.code(), "EXTERNAL_TOOL_FAILURE");
    }
}

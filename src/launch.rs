use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::config::AppConfig;

/// Arguments for `am start`: an explicit component when the entry point is
/// known, otherwise the package's default.
pub fn intent_args(package: &str, activity: Option<&str>) -> Vec<String> {
    match activity.filter(|activity| !activity.is_empty()) {
        Some(activity) => vec![
            "start".to_owned(),
            "-n".to_owned(),
            format!("{package}/{activity}"),
        ],
        None => vec!["start".to_owned(), package.to_owned()],
    }
}

/// `am` exits zero on many failures and reports them on stderr instead.
pub fn stderr_reports_failure(stderr: &str) -> bool {
    stderr.contains("Error")
}

/// What a tracked child was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// User shell command, left running at exit.
    Command,
    /// `am start` call. Its stderr is checked once it exits.
    Intent,
}

#[derive(Debug)]
struct Task {
    label: String,
    kind: TaskKind,
    child: Child,
}

/// Spawned children, kept so finished ones can be reaped and intent
/// launches can be checked for failure.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<Vec<Task>>,
    failures: AtomicUsize,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, kind: TaskKind, label: impl Into<String>, child: Child) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(Task {
            label: label.into(),
            kind,
            child,
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Intent launches that exited non-zero or reported an error.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Collects exited children and returns how many are still running.
    pub fn reap(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain_mut(|task| match task.child.try_wait() {
            Ok(Some(status)) => {
                self.finish(task, status);
                false
            }
            Ok(None) => true,
            Err(error) => {
                warn!(task = %task.label, %error, "could not poll child");
                false
            }
        });
        tasks.len()
    }

    /// Waits for pending intent launches, then reaps. Commands still running
    /// are left detached.
    pub fn shutdown(&self) {
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.retain_mut(|task| {
                if task.kind != TaskKind::Intent {
                    return true;
                }
                match task.child.wait() {
                    Ok(status) => self.finish(task, status),
                    Err(error) => warn!(task = %task.label, %error, "could not wait for am"),
                }
                false
            });
        }
        let running = self.reap();
        if running > 0 {
            info!(running, "leaving background commands running");
        }
    }

    fn finish(&self, task: &mut Task, status: ExitStatus) {
        if task.kind == TaskKind::Command {
            debug!(command = %task.label, %status, "command exited");
            return;
        }

        let mut stderr = String::new();
        if let Some(mut pipe) = task.child.stderr.take() {
            if let Err(error) = pipe.read_to_string(&mut stderr) {
                debug!(%error, "could not read am stderr");
            }
        }
        if !status.success() || stderr_reports_failure(&stderr) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(component = %task.label, %status, stderr = stderr.trim(), "am start failed");
        } else {
            info!(component = %task.label, "launched");
        }
    }
}

#[derive(Debug, Default)]
pub struct Launcher {
    tasks: TaskRegistry,
}

impl Launcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Commands win over packages. Returns once the child is spawned.
    pub fn launch(&self, app: &AppConfig) -> Result<()> {
        if let Some(command) = app.command.as_deref().filter(|_| app.is_command()) {
            return self.run_command(command);
        }
        match app.package() {
            Some(package) => self.start_package(package, app.activity()),
            None => bail!("app '{}' has neither a command nor a package", app.name),
        }
    }

    pub fn run_command(&self, command: &str) -> Result<()> {
        self.tasks.reap();
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn `{command}`"))?;
        info!(command, pid = child.id(), "spawned command");
        self.tasks.track(TaskKind::Command, command, child);
        Ok(())
    }

    /// `am start` blocks until the activity is up, so it runs as a tracked
    /// child and its outcome is checked when reaped.
    pub fn start_package(&self, package: &str, activity: Option<&str>) -> Result<()> {
        self.tasks.reap();
        let args = intent_args(package, activity);
        debug!(?args, "starting activity");
        let child = Command::new("am")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to run am")?;
        let label = match activity.filter(|activity| !activity.is_empty()) {
            Some(activity) => format!("{package}/{activity}"),
            None => package.to_owned(),
        };
        self.tasks.track(TaskKind::Intent, label, child);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn intent_args_prefer_explicit_component() {
        assert_eq!(
            intent_args("com.termux", Some("com.termux.app.TermuxActivity")),
            vec!["start", "-n", "com.termux/com.termux.app.TermuxActivity"]
        );
        assert_eq!(intent_args("com.termux", None), vec!["start", "com.termux"]);
        assert_eq!(intent_args("com.termux", Some("")), vec!["start", "com.termux"]);
    }

    #[test]
    fn stderr_error_marker_is_a_failure() {
        assert!(stderr_reports_failure(
            "Error type 3\nError: Activity class {x/y} does not exist."
        ));
        assert!(!stderr_reports_failure("Starting: Intent { cmp=x/y }"));
    }

    #[test]
    fn spawned_commands_are_tracked_and_reaped() {
        let launcher = Launcher::new();
        let app = AppConfig {
            name: "noop".into(),
            command: Some("true".into()),
            package: Some("ignored.because.command".into()),
            ..AppConfig::default()
        };
        launcher.launch(&app).expect("command should spawn");
        assert_eq!(launcher.tasks().len(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while launcher.tasks().reap() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(launcher.tasks().is_empty());
    }

    fn spawn_sh(script: &str, stderr: Stdio) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .expect("sh should spawn")
    }

    #[test]
    fn shutdown_waits_for_intents_and_checks_stderr() {
        let tasks = TaskRegistry::new();
        tasks.track(
            TaskKind::Intent,
            "com.example/.Missing",
            spawn_sh("sleep 0.1; echo 'Error: no such activity' >&2", Stdio::piped()),
        );
        tasks.track(
            TaskKind::Intent,
            "com.example/.Main",
            spawn_sh("echo 'Starting: Intent' >&2", Stdio::piped()),
        );
        tasks.track(TaskKind::Command, "sleep 2", spawn_sh("sleep 2", Stdio::null()));

        tasks.shutdown();
        assert_eq!(tasks.failures(), 1);
        assert_eq!(tasks.len(), 1, "only the long command stays detached");
    }

    #[test]
    fn app_without_target_is_rejected() {
        let app = AppConfig {
            name: "empty".into(),
            ..AppConfig::default()
        };
        assert!(Launcher::new().launch(&app).is_err());
    }
}

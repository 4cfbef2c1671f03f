//! Adapters for the external formatter, syntax checker and import checker
//!
//! Each tool is a subprocess with the target path appended to its configured command.
//! Executables are resolved with `which` first so a missing tool is reported as
//! [`ToolOutcome::Unavailable`] instead of a spawn error. Every call is bounded by the
//! tool's `timeout_secs`; a process that overruns is killed and reaped.
//!
//! What an outcome means (fatal or advisory) is decided by the caller.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::config::ToolSettings;

const FORMATTER_DEFAULT: &[&str] = &["black", "--quiet"];
const SYNTAX_CHECKER_DEFAULT: &[&str] = &["python3", "-m", "py_compile"];
const IMPORT_CHECKER_DEFAULT: &[&str] = &["python3", "-c"];

/// Loads a module file or a package directory given as the first argument
pub const IMPORT_CHECK_SCRIPT: &str = r#"import importlib, importlib.util, os, sys
target = os.path.abspath(sys.argv[1])
sys.path.insert(0, os.path.dirname(target))
if os.path.isdir(target):
    importlib.import_module(os.path.basename(target))
else:
    spec = importlib.util.spec_from_file_location("_classforge_import_check", target)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)
"#;

/// Result of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    Failed { code: Option<i32>, stderr: String },
    TimedOut { after: Duration },
    Unavailable { program: String },
    Disabled,
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success)
    }
}

impl fmt::Display for ToolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOutcome::Success => write!(f, "ok"),
            ToolOutcome::Failed { code, stderr } => {
                let code = code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into());
                write!(f, "exit {}: {}", code, stderr.trim())
            }
            ToolOutcome::TimedOut { after } => write!(f, "timed out after {:?}", after),
            ToolOutcome::Unavailable { program } => write!(f, "'{}' not found on PATH", program),
            ToolOutcome::Disabled => write!(f, "disabled"),
        }
    }
}

/// Runs one configured tool
pub struct ToolRunner<'a> {
    name: &'static str,
    settings: &'a ToolSettings,
    fallback: &'static [&'static str],
}

impl<'a> ToolRunner<'a> {
    pub fn formatter(settings: &'a ToolSettings) -> Self {
        Self {
            name: "formatter",
            settings,
            fallback: FORMATTER_DEFAULT,
        }
    }

    pub fn syntax_checker(settings: &'a ToolSettings) -> Self {
        Self {
            name: "syntax checker",
            settings,
            fallback: SYNTAX_CHECKER_DEFAULT,
        }
    }

    pub fn import_checker(settings: &'a ToolSettings) -> Self {
        Self {
            name: "import checker",
            settings,
            fallback: IMPORT_CHECKER_DEFAULT,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn required(&self) -> bool {
        self.settings.required
    }

    /// Run the tool with `args` appended to its command line
    pub fn run(&self, args: &[&str]) -> ToolOutcome {
        if !self.settings.enabled {
            return ToolOutcome::Disabled;
        }
        let command = self.settings.command_line(self.fallback);
        let Some((program, leading)) = command.split_first() else {
            return ToolOutcome::Unavailable {
                program: String::new(),
            };
        };
        let resolved: PathBuf = match which::which(program) {
            Ok(path) => path,
            Err(_) => {
                return ToolOutcome::Unavailable {
                    program: program.clone(),
                }
            }
        };

        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let start = Instant::now();
        debug!("running {}: {} {:?} {:?}", self.name, program, leading, args);

        let mut cmd = Command::new(&resolved);
        cmd.args(leading)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("{} could not be started: {}", self.name, e);
                return ToolOutcome::Unavailable {
                    program: program.clone(),
                };
            }
        };

        match child.wait_timeout(timeout) {
            Ok(Some(status)) => {
                let stderr = child
                    .stderr
                    .take()
                    .map(|mut s| {
                        let mut buf = Vec::new();
                        s.read_to_end(&mut buf).ok();
                        buf
                    })
                    .unwrap_or_default();
                if status.success() {
                    ToolOutcome::Success
                } else {
                    ToolOutcome::Failed {
                        code: status.code(),
                        stderr: String::from_utf8_lossy(&stderr).to_string(),
                    }
                }
            }
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                let after = start.elapsed();
                warn!("{} timed out after {:?}", self.name, after);
                ToolOutcome::TimedOut { after }
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                ToolOutcome::Failed {
                    code: None,
                    stderr: e.to_string(),
                }
            }
        }
    }

    pub fn run_on(&self, path: &Path) -> ToolOutcome {
        let path = path.to_string_lossy();
        self.run(&[path.as_ref()])
    }
}

/// Format a file in place; the outcome is advisory
pub fn format_file(settings: &ToolSettings, path: &Path) -> ToolOutcome {
    ToolRunner::formatter(settings).run_on(path)
}

/// Run the external syntax checker on a written file
pub fn check_syntax_external(settings: &ToolSettings, path: &Path) -> ToolOutcome {
    ToolRunner::syntax_checker(settings).run_on(path)
}

/// Try to import a module file or package directory
pub fn check_import(settings: &ToolSettings, target: &Path) -> ToolOutcome {
    let runner = ToolRunner::import_checker(settings);
    let command = settings.command_line(IMPORT_CHECKER_DEFAULT);
    if command.last().is_some_and(|arg| arg == "-c") {
        let target = target.to_string_lossy();
        runner.run(&[IMPORT_CHECK_SCRIPT, target.as_ref()])
    } else {
        runner.run_on(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(command: &[&str]) -> ToolSettings {
        ToolSettings {
            enabled: true,
            required: false,
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_disabled_tool_never_runs() {
        let mut tool = settings(&["definitely-not-a-real-tool"]);
        tool.enabled = false;
        assert_eq!(format_file(&tool, Path::new("x.py")), ToolOutcome::Disabled);
    }

    #[test]
    fn test_missing_executable_is_unavailable() {
        let tool = settings(&["definitely-not-a-real-tool-4821"]);
        match check_syntax_external(&tool, Path::new("x.py")) {
            ToolOutcome::Unavailable { program } => {
                assert_eq!(program, "definitely-not-a-real-tool-4821")
            }
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_is_reported() {
        assert!(ToolRunner::formatter(&settings(&["true"])).run(&[]).is_success());
        match ToolRunner::formatter(&settings(&["false"])).run(&[]) {
            ToolOutcome::Failed { code, .. } => assert_eq!(code, Some(1)),
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_the_process() {
        let mut tool = settings(&["sleep"]);
        tool.timeout_secs = 1;
        match ToolRunner::syntax_checker(&tool).run(&["5"]) {
            ToolOutcome::TimedOut { after } => assert!(after < Duration::from_secs(5)),
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[test]
    fn test_outcome_display() {
        let failed = ToolOutcome::Failed {
            code: Some(2),
            stderr: "bad indent\n".into(),
        };
        assert_eq!(failed.to_string(), "exit 2: bad indent");
    }
}

//! Launch commands
//!
//! A [`LaunchCommand`] is the fully-formed external invocation for a job:
//! program, arguments, working directory and extra environment. Which engine
//! or solver the program runs is up to the caller.
//!
//! [`LaunchCommand::with_plan`] binds a validated plan into the command.
//! Arguments may carry the placeholders `{id}`, `{start_index}`,
//! `{step_count}` and `{interval}`; the same values are also exported as
//! `SIMCTL_*` environment variables.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::types::{JobId, ValidatedPlan};

/// Environment variable carrying the job id
pub const ENV_JOB_ID: &str = "SIMCTL_JOB_ID";
/// Environment variable carrying the 1-based start index
pub const ENV_START_INDEX: &str = "SIMCTL_START_INDEX";
/// Environment variable carrying the number of intervals
pub const ENV_STEP_COUNT: &str = "SIMCTL_STEP_COUNT";
/// Environment variable carrying the steps per interval
pub const ENV_INTERVAL: &str = "SIMCTL_INTERVAL";

/// External command to run for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Substitute plan placeholders in the arguments and export the plan
    /// through the environment.
    pub fn with_plan(mut self, id: JobId, plan: &ValidatedPlan) -> Self {
        let values = [
            ("{id}", id.to_string()),
            ("{start_index}", plan.start_index.to_string()),
            ("{step_count}", plan.step_count.to_string()),
            ("{interval}", plan.interval.to_string()),
        ];
        for arg in &mut self.args {
            for (placeholder, value) in &values {
                if arg.contains(placeholder) {
                    *arg = arg.replace(placeholder, value);
                }
            }
        }
        self.env(ENV_JOB_ID, id.to_string())
            .env(ENV_START_INDEX, plan.start_index.to_string())
            .env(ENV_STEP_COUNT, plan.step_count.to_string())
            .env(ENV_INTERVAL, plan.interval.to_string())
    }

    /// Command line as a single string, for logs and display.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build the process command: stdin closed, stdout and stderr piped, and
    /// on unix a fresh process group so signals aimed at the launcher do not
    /// reach the job.
    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_plan_substitutes_placeholders() {
        let plan = ValidatedPlan {
            start_index: 25,
            step_count: 2,
            interval: 12,
        };
        let cmd = LaunchCommand::new("engine")
            .args(["--start={start_index}", "--n", "{step_count}", "--int", "{interval}"])
            .arg("scenario_{id}")
            .with_plan(JobId(1234), &plan);

        assert_eq!(
            cmd.args,
            vec!["--start=25", "--n", "2", "--int", "12", "scenario_1234"]
        );
        assert!(cmd
            .env
            .contains(&(ENV_START_INDEX.to_string(), "25".to_string())));
        assert!(cmd.env.contains(&(ENV_JOB_ID.to_string(), "1234".to_string())));
    }

    #[test]
    fn test_display() {
        let cmd = LaunchCommand::new("sh").args(["-c", "echo hi"]);
        assert_eq!(cmd.display(), "sh -c echo hi");
    }
}

//! Launch arguments for a subprocess
//!
//! [`LaunchArgs`] is immutable once built. It is `Clone` and serde-enabled so a
//! launch description can be kept in a config file and reused for many spawns.

use async_process::Command as AsyncCommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Everything needed to launch one native process
///
/// When `environment` is present it replaces the inherited environment
/// entirely; nothing from the parent is merged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLaunchArgs")]
pub struct LaunchArgs {
    /// Program followed by its arguments
    command: Vec<String>,
    /// Replacement environment, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<BTreeMap<String, String>>,
    /// Working directory for the process
    #[serde(skip_serializing_if = "Option::is_none")]
    working_directory: Option<PathBuf>,
    /// Route stderr into the stdout pipe
    merge_error_into_output: bool,
}

#[derive(Deserialize)]
struct RawLaunchArgs {
    command: Vec<String>,
    #[serde(default)]
    environment: Option<BTreeMap<String, String>>,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    merge_error_into_output: bool,
}

impl TryFrom<RawLaunchArgs> for LaunchArgs {
    type Error = Error;

    fn try_from(raw: RawLaunchArgs) -> Result<Self> {
        let args = LaunchArgs {
            command: raw.command,
            environment: raw.environment,
            working_directory: raw.working_directory,
            merge_error_into_output: raw.merge_error_into_output,
        };
        args.validate()?;
        Ok(args)
    }
}

impl LaunchArgs {
    /// Create launch arguments from a full command line (program + args)
    pub fn new<I, S>(command: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = Self {
            command: command.into_iter().map(Into::into).collect(),
            environment: None,
            working_directory: None,
            merge_error_into_output: false,
        };
        args.validate()?;
        Ok(args)
    }

    /// Start building launch arguments for the given program
    pub fn builder(program: impl Into<String>) -> LaunchArgsBuilder {
        LaunchArgsBuilder {
            command: vec![program.into()],
            environment: None,
            working_directory: None,
            merge_error_into_output: false,
        }
    }

    fn validate(&self) -> Result<()> {
        match self.command.first() {
            None => Err(Error::invalid_args("command must not be empty")),
            Some(program) if program.is_empty() => {
                Err(Error::invalid_args("program name must not be empty"))
            }
            Some(_) => Ok(()),
        }
    }

    /// The program to execute
    pub fn program(&self) -> &str {
        &self.command[0]
    }

    /// The arguments passed to the program
    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }

    /// The full command line
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// The replacement environment, if one was given
    pub fn environment(&self) -> Option<&BTreeMap<String, String>> {
        self.environment.as_ref()
    }

    /// The working directory, if one was given
    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Whether stderr is merged into stdout
    pub fn merges_error_into_output(&self) -> bool {
        self.merge_error_into_output
    }

    /// Convert into an `async_process::Command` with no stdio configured
    pub fn prepare(&self) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(self.program());
        cmd.args(self.args());

        if let Some(environment) = &self.environment {
            cmd.env_clear();
            cmd.envs(environment);
        }

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }

        cmd
    }
}

/// Builder for [`LaunchArgs`]
#[derive(Debug, Clone)]
pub struct LaunchArgsBuilder {
    command: Vec<String>,
    environment: Option<BTreeMap<String, String>>,
    working_directory: Option<PathBuf>,
    merge_error_into_output: bool,
}

impl LaunchArgsBuilder {
    /// Add an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one variable of the replacement environment
    ///
    /// The first call switches the process from the inherited environment to
    /// an explicit one.
    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.environment
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), val.into());
        self
    }

    /// Replace the whole environment
    pub fn environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set the working directory
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_directory = Some(dir.as_ref().to_owned());
        self
    }

    /// Merge stderr into stdout
    pub fn merge_error_into_output(mut self, merge: bool) -> Self {
        self.merge_error_into_output = merge;
        self
    }

    /// Validate and build the launch arguments
    pub fn build(self) -> Result<LaunchArgs> {
        let args = LaunchArgs {
            command: self.command,
            environment: self.environment,
            working_directory: self.working_directory,
            merge_error_into_output: self.merge_error_into_output,
        };
        args.validate()?;
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_creation() {
        let args = LaunchArgs::new(["echo"]).unwrap();
        assert_eq!(args.program(), "echo");
        assert!(args.args().is_empty());
        assert!(args.environment().is_none());
        assert!(!args.merges_error_into_output());
    }

    #[test]
    fn test_empty_command_rejected() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            LaunchArgs::new(empty),
            Err(Error::InvalidArgs { .. })
        ));
        assert!(LaunchArgs::builder("").build().is_err());
    }

    #[test]
    fn test_args_builder() {
        let args = LaunchArgs::builder("ls")
            .arg("-la")
            .args(["/tmp", "/var"])
            .env("TEST_VAR", "test_value")
            .current_dir("/tmp")
            .merge_error_into_output(true)
            .build()
            .unwrap();

        assert_eq!(args.command(), ["ls", "-la", "/tmp", "/var"]);
        assert_eq!(args.args(), ["-la", "/tmp", "/var"]);
        assert_eq!(
            args.environment().and_then(|env| env.get("TEST_VAR")),
            Some(&"test_value".to_string())
        );
        assert_eq!(args.working_directory(), Some(Path::new("/tmp")));
        assert!(args.merges_error_into_output());
    }

    #[test]
    fn test_environment_replaces_previous_vars() {
        let args = LaunchArgs::builder("env")
            .env("A", "1")
            .environment([("X", "1")])
            .build()
            .unwrap();

        let env = args.environment().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("X").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_deserialize_from_config() {
        let args: LaunchArgs = serde_json::from_str(
            r#"{"command": ["sh", "-c", "exit 0"], "environment": {"X": "1"}}"#,
        )
        .unwrap();

        assert_eq!(args.program(), "sh");
        assert_eq!(args.args(), ["-c", "exit 0"]);
        assert!(!args.merges_error_into_output());
        assert!(args.working_directory().is_none());
    }

    #[test]
    fn test_deserialize_rejects_empty_command() {
        let result = serde_json::from_str::<LaunchArgs>(r#"{"command": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_args_clone() {
        let args1 = LaunchArgs::builder("test")
            .arg("arg1")
            .env("KEY", "VALUE")
            .build()
            .unwrap();

        let args2 = args1.clone();
        assert_eq!(args1, args2);
    }
}

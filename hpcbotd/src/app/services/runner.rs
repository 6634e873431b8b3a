// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

use regex::Regex;
use serde::Deserialize;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};

/// Token replaced by the quoted input file name.
pub const PLACEHOLDER: &str = "{}";

/// Runner definition as written in configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RunnerSpec {
    pub program: String,
    #[serde(default)]
    pub allowed_args: Vec<String>,
    #[serde(default)]
    pub default_args: Vec<String>,
    #[serde(default)]
    pub associations: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// One executable on a cluster together with the argument shapes it accepts.
#[derive(Debug, Clone)]
pub struct Runner {
    program: String,
    allowed_args: Vec<String>,
    allowed: Vec<Regex>,
    default_args: Vec<String>,
    associations: Vec<String>,
    description: String,
}

impl Runner {
    /// Compiles the allowed patterns and checks the default arguments.
    /// A runner without defaults that allows the bare placeholder defaults
    /// to running on the input file.
    pub fn new(spec: RunnerSpec) -> AppResult<Self> {
        if spec.program.trim().is_empty() {
            return Err(invalid_config("runner program must not be empty"));
        }
        let allowed = spec
            .allowed_args
            .iter()
            .map(|pattern| {
                // `{}` is not a valid regex on its own; the placeholder is always literal.
                let source = if pattern == PLACEHOLDER {
                    regex::escape(pattern)
                } else {
                    pattern.clone()
                };
                Regex::new(&format!("^(?:{source})$")).map_err(|err| {
                    invalid_config(format!(
                        "runner {}: invalid argument pattern {pattern:?}: {err}",
                        spec.program
                    ))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let mut runner = Self {
            program: spec.program,
            allowed_args: spec.allowed_args,
            allowed,
            default_args: Vec::new(),
            associations: spec
                .associations
                .iter()
                .map(|ext| normalize_extension(ext))
                .collect(),
            description: spec.description,
        };

        if spec.default_args.is_empty() {
            if runner.allowed_args.iter().any(|a| a == PLACEHOLDER) {
                runner.default_args = vec![PLACEHOLDER.to_string()];
            }
        } else {
            runner.validate_args(&spec.default_args).map_err(|err| {
                invalid_config(format!(
                    "runner {}: default arguments rejected: {}",
                    runner.program,
                    err.message()
                ))
            })?;
            runner.default_args = spec.default_args;
        }
        Ok(runner)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn allowed_args(&self) -> &[String] {
        &self.allowed_args
    }

    pub fn default_args(&self) -> &[String] {
        &self.default_args
    }

    pub fn associations(&self) -> &[String] {
        &self.associations
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Every argument must fully match at least one allowed pattern.
    pub fn validate_args<S: AsRef<str>>(&self, args: &[S]) -> AppResult<()> {
        for arg in args {
            let arg = arg.as_ref();
            if !self.allowed.iter().any(|re| re.is_match(arg)) {
                return Err(AppError::with_message(
                    AppErrorKind::Validation,
                    codes::INVALID_ARGUMENT,
                    format!("argument {arg:?} is not allowed for {}", self.program),
                ));
            }
        }
        Ok(())
    }

    /// Parses a shell-style command line meant for this runner and returns
    /// its validated arguments.
    pub fn split_command(&self, command: &str) -> AppResult<Vec<String>> {
        let tokens = shlex::split(command).ok_or_else(|| {
            AppError::validation(format!("cannot tokenize command {command:?}"))
        })?;
        let Some((program, args)) = tokens.split_first() else {
            return Err(AppError::validation("empty command"));
        };
        if program != &self.program {
            return Err(AppError::with_message(
                AppErrorKind::Validation,
                codes::PROGRAM_MISMATCH,
                format!("program must be {}, got {program}", self.program),
            ));
        }
        self.validate_args(args)?;
        Ok(args.to_vec())
    }

    /// Command line with the placeholder left in, as persisted for a
    /// calculation before its file name is bound.
    pub fn command_line(&self, args: Option<&[String]>) -> AppResult<String> {
        let args = self.resolve_args(args)?;
        join_tokens(std::iter::once(self.program.as_str()).chain(args.iter().map(String::as_str)))
    }

    /// Full command line for execution. A placeholder without a file name is
    /// rejected rather than replaced by an empty argument.
    pub fn build_command(&self, args: Option<&[String]>, filename: Option<&str>) -> AppResult<String> {
        let args = self.resolve_args(args)?;
        let filename = filename.filter(|f| !f.is_empty());
        let mut tokens = Vec::with_capacity(args.len() + 1);
        tokens.push(self.program.as_str());
        for arg in &args {
            if arg == PLACEHOLDER {
                let Some(name) = filename else {
                    return Err(AppError::validation(format!(
                        "{} expects a file name but none was given",
                        self.program
                    )));
                };
                tokens.push(name);
            } else {
                tokens.push(arg.as_str());
            }
        }
        join_tokens(tokens.into_iter())
    }

    fn resolve_args(&self, args: Option<&[String]>) -> AppResult<Vec<String>> {
        match args {
            Some(args) => {
                self.validate_args(args)?;
                Ok(args.to_vec())
            }
            None => Ok(self.default_args.clone()),
        }
    }
}

impl fmt::Display for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = if self.description.is_empty() {
            "no description"
        } else {
            self.description.as_str()
        };
        write!(
            f,
            "{}: {}; allowed arguments: {}; default arguments: {}; extensions: {}",
            self.program,
            description,
            list_or_dash(&self.allowed_args),
            list_or_dash(&self.default_args),
            list_or_dash(&self.associations),
        )
    }
}

/// Extensions are compared with a leading dot, `inp` and `.inp` are the same.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim();
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    }
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn join_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> AppResult<String> {
    shlex::try_join(tokens).map_err(|err| AppError::validation(format!("cannot quote command: {err}")))
}

fn invalid_config(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::InvalidConfig, codes::INVALID_CONFIG, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(program: &str, allowed: &[&str], defaults: &[&str]) -> RunnerSpec {
        RunnerSpec {
            program: program.to_string(),
            allowed_args: allowed.iter().map(|s| s.to_string()).collect(),
            default_args: defaults.iter().map(|s| s.to_string()).collect(),
            associations: vec!["inp".to_string()],
            description: String::new(),
        }
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn placeholder_becomes_default_when_no_defaults_given() {
        let runner = Runner::new(spec("g16", &["{}", "-p=\\d+"], &[])).unwrap();
        assert_eq!(runner.default_args(), ["{}"]);
        assert_eq!(runner.associations(), [".inp"]);
    }

    #[test]
    fn invalid_default_args_are_a_config_error() {
        let err = Runner::new(spec("g16", &["-v"], &["-x"])).unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidConfig);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = Runner::new(spec("g16", &["("], &[])).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_CONFIG);
    }

    #[test]
    fn validate_args_requires_full_match() {
        let runner = Runner::new(spec("orca", &["-n\\d"], &[])).unwrap();
        assert!(runner.validate_args(&["-n4"]).is_ok());
        let err = runner.validate_args(&["-n42"]).unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Validation);
        assert!(err.message().contains("-n42"));
    }

    #[test]
    fn split_command_checks_program_and_args() {
        let runner = Runner::new(spec("orca", &["{}", "--fast"], &[])).unwrap();
        assert_eq!(
            runner.split_command("orca --fast {}").unwrap(),
            args(&["--fast", "{}"])
        );
        let err = runner.split_command("g16 {}").unwrap_err();
        assert_eq!(err.code(), codes::PROGRAM_MISMATCH);
        let err = runner.split_command("orca --slow").unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARGUMENT);
        assert!(runner.split_command("   ").is_err());
        assert!(runner.split_command("orca 'unterminated").is_err());
    }

    #[test]
    fn build_command_quotes_file_name() {
        let runner = Runner::new(spec("g16", &["{}"], &[])).unwrap();
        let cmd = runner.build_command(None, Some("my input.inp")).unwrap();
        assert_eq!(shlex::split(&cmd).unwrap(), vec!["g16", "my input.inp"]);
        assert_ne!(cmd, "g16 my input.inp");
    }

    #[test]
    fn build_command_rejects_missing_file_name() {
        let runner = Runner::new(spec("g16", &["{}"], &[])).unwrap();
        assert!(runner.build_command(None, None).is_err());
        assert!(runner.build_command(None, Some("")).is_err());
        let plain = Runner::new(spec("hostname", &[], &[])).unwrap();
        assert_eq!(plain.build_command(None, None).unwrap(), "hostname");
    }

    #[test]
    fn build_then_split_recovers_arguments() {
        let runner = Runner::new(spec("orca", &["{}", "--mem=\\d+", "-o", "%.* %.*"], &[])).unwrap();
        let given = args(&["-o", "%.15i %.5t", "--mem=512", "{}"]);
        let built = runner.build_command(Some(&given), Some("job file.inp")).unwrap();
        let tokens = shlex::split(&built).unwrap();
        let expected: Vec<String> = std::iter::once("orca".to_string())
            .chain(given.iter().map(|a| {
                if a == PLACEHOLDER {
                    "job file.inp".to_string()
                } else {
                    a.clone()
                }
            }))
            .collect();
        assert_eq!(tokens, expected);

        let line = runner.command_line(Some(&given)).unwrap();
        assert_eq!(runner.split_command(&line).unwrap(), given);
    }

    #[test]
    fn display_lists_fields_with_dash_for_empty() {
        let runner = Runner::new(RunnerSpec {
            program: "g16".into(),
            allowed_args: vec![],
            default_args: vec![],
            associations: vec![],
            description: "Gaussian".into(),
        })
        .unwrap();
        assert_eq!(
            runner.to_string(),
            "g16: Gaussian; allowed arguments: -; default arguments: -; extensions: -"
        );
    }
}

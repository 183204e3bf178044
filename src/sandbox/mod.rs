// src/sandbox/mod.rs

//! Restricted hook-script interpreter
//!
//! Packages ship small hook scripts (pre/post install/remove). They run in a
//! deliberately tiny line-oriented language with no filesystem, subprocess,
//! or network facilities; the only host capabilities are the logging entry
//! points. Every script receives exactly one input, the absolute target-root
//! path, exposed as `${root}`.
//!
//! Grammar, one statement per line:
//!
//! ```text
//! # comment
//! set GREETING configuring under ${root}
//! info ${GREETING}
//! warn something looks off
//! print plain output
//! fail this aborts the hook
//! ```
//!
//! A hook succeeds iff it compiles and runs to completion without `fail`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Hook script errors
#[derive(Debug, Error)]
pub enum HookError {
    #[error("cannot read hook script {0}")]
    ScriptNotFound(PathBuf),

    #[error("compile error at line {line}: unknown directive '{directive}'")]
    UnknownDirective { line: usize, directive: String },

    #[error("compile error at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("runtime error at line {line}: undefined variable '{name}'")]
    UndefinedVariable { line: usize, name: String },

    #[error("hook aborted: {0}")]
    Aborted(String),
}

/// A compiled statement
#[derive(Debug, Clone)]
enum Statement {
    Info(String),
    Warn(String),
    Print(String),
    Set { name: String, value: String },
    Fail(String),
}

/// Expand `${name}` references against the variable table
fn expand(template: &str, vars: &HashMap<String, String>, line: usize) -> Result<String, HookError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(HookError::Malformed {
                line,
                message: "unterminated '${' expansion".to_string(),
            });
        };
        let name = &after[..end];
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => {
                return Err(HookError::UndefinedVariable {
                    line,
                    name: name.to_string(),
                })
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Compile a script into statements, validating every line up front
fn compile(content: &str) -> Result<Vec<(usize, Statement)>, HookError> {
    let mut program = Vec::new();

    for (idx, raw_line) in content.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (directive, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((d, r)) => (d, r.trim_start()),
            None => (trimmed, ""),
        };

        let statement = match directive {
            "info" => Statement::Info(rest.to_string()),
            "warn" => Statement::Warn(rest.to_string()),
            "print" => Statement::Print(rest.to_string()),
            "fail" => Statement::Fail(rest.to_string()),
            "set" => {
                let Some((name, value)) = rest.split_once(char::is_whitespace) else {
                    return Err(HookError::Malformed {
                        line,
                        message: "set requires a name and a value".to_string(),
                    });
                };
                Statement::Set {
                    name: name.to_string(),
                    value: value.trim_start().to_string(),
                }
            }
            other => {
                return Err(HookError::UnknownDirective {
                    line,
                    directive: other.to_string(),
                })
            }
        };
        program.push((line, statement));
    }

    Ok(program)
}

/// Executes hook scripts against a fixed target root
pub struct HookSandbox {
    root: PathBuf,
}

impl HookSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Compile and run a script from a string
    pub fn run_script(&self, content: &str) -> Result<(), HookError> {
        let program = compile(content)?;

        let mut vars: HashMap<String, String> = HashMap::new();
        vars.insert("root".to_string(), self.root.to_string_lossy().into_owned());

        for (line, statement) in &program {
            match statement {
                Statement::Info(t) => info!(target: "hook", "{}", expand(t, &vars, *line)?),
                Statement::Warn(t) => warn!(target: "hook", "{}", expand(t, &vars, *line)?),
                Statement::Print(t) => println!("{}", expand(t, &vars, *line)?),
                Statement::Set { name, value } => {
                    let expanded = expand(value, &vars, *line)?;
                    vars.insert(name.clone(), expanded);
                }
                Statement::Fail(t) => {
                    let message = if t.is_empty() {
                        "hook requested abort".to_string()
                    } else {
                        expand(t, &vars, *line)?
                    };
                    return Err(HookError::Aborted(message));
                }
            }
        }

        Ok(())
    }

    /// Compile and run a script from a file
    pub fn run_script_from_file(&self, path: &Path) -> Result<(), HookError> {
        let content =
            fs::read_to_string(path).map_err(|_| HookError::ScriptNotFound(path.to_path_buf()))?;
        self.run_script(&content)
    }
}

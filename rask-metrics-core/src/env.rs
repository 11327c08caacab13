//! Environment overlay helpers shared by the agent and server configuration.
//!
//! Every helper takes the lookup function explicitly so resolution can be
//! exercised in tests without touching the process environment. Unset and
//! empty variables leave the target untouched.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {name}: {reason}")]
pub struct EnvError {
    pub name: String,
    pub reason: String,
}

impl EnvError {
    fn new(name: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn lookup<F>(env: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(name).filter(|value| !value.trim().is_empty())
}

/// Parses `name` into `target` when it is set.
pub fn load_env_var<T, F>(env: &F, name: &str, target: &mut T) -> Result<(), EnvError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(env, name) {
        *target = value
            .trim()
            .parse()
            .map_err(|e| EnvError::new(name, e))?;
    }
    Ok(())
}

/// Like [`load_env_var`] for optional settings.
pub fn load_env_opt<T, F>(env: &F, name: &str, target: &mut Option<T>) -> Result<(), EnvError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(env, name) {
        *target = Some(
            value
                .trim()
                .parse()
                .map_err(|e| EnvError::new(name, e))?,
        );
    }
    Ok(())
}

pub fn load_env_string<F>(env: &F, name: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(env, name) {
        *target = value;
    }
}

pub fn load_env_path_opt<F>(env: &F, name: &str, target: &mut Option<PathBuf>)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(env, name) {
        *target = Some(PathBuf::from(value));
    }
}

/// Reads a whole number of seconds.
pub fn load_env_secs<F>(env: &F, name: &str, target: &mut Duration) -> Result<(), EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut secs = target.as_secs();
    load_env_var(env, name, &mut secs)?;
    *target = Duration::from_secs(secs);
    Ok(())
}

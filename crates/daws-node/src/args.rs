//! Command-line arguments.
//!
//! ```text
//! daws-node <controller|worker> <city|traffic> [config-path]
//! ```
//!
//! `DAWS_ROLE` and `DAWS_DOMAIN` stand in for missing positional
//! arguments so container images can be configured through the
//! environment alone.

use std::path::PathBuf;
use std::str::FromStr;

use daws_types::{Domain, UnknownDomain};

/// Usage line printed on argument errors.
pub const USAGE: &str = "usage: daws-node <controller|worker> <city|traffic> [config-path]";

/// What this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// One domain controller.
    Controller,
    /// A pool of workers.
    Worker,
}

impl FromStr for Role {
    type Err = ArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "controller" => Ok(Self::Controller),
            "worker" | "workers" => Ok(Self::Worker),
            other => Err(ArgsError::UnknownRole(other.to_owned())),
        }
    }
}

/// Argument errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArgsError {
    /// No role given.
    #[error("missing role")]
    MissingRole,
    /// No domain given.
    #[error("missing domain")]
    MissingDomain,
    /// The role is not `controller` or `worker`.
    #[error("unknown role: {0}")]
    UnknownRole(String),
    /// The domain is not known.
    #[error(transparent)]
    UnknownDomain(#[from] UnknownDomain),
}

/// Parsed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeArgs {
    /// Role to run.
    pub role: Role,
    /// Domain served.
    pub domain: Domain,
    /// Configuration file.
    pub config: PathBuf,
}

impl NodeArgs {
    /// Parse positional arguments (without the program name), falling back
    /// to `env` for the role and domain.
    pub fn parse<I, F>(args: I, env: F) -> Result<Self, ArgsError>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut args = args.into_iter();
        let role = args
            .next()
            .or_else(|| env("DAWS_ROLE"))
            .ok_or(ArgsError::MissingRole)?
            .parse()?;
        let domain = args
            .next()
            .or_else(|| env("DAWS_DOMAIN"))
            .ok_or(ArgsError::MissingDomain)?
            .parse()?;
        let config = args
            .next()
            .or_else(|| env("DAWS_CONFIG"))
            .map_or_else(|| PathBuf::from("daws-config.yaml"), PathBuf::from);
        Ok(Self {
            role,
            domain,
            config,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn positional_arguments() {
        let parsed = NodeArgs::parse(args(&["worker", "traffic", "/etc/daws.yaml"]), |_| None)
            .unwrap();
        assert_eq!(parsed.role, Role::Worker);
        assert_eq!(parsed.domain, Domain::Traffic);
        assert_eq!(parsed.config, PathBuf::from("/etc/daws.yaml"));
    }

    #[test]
    fn environment_fills_missing_arguments() {
        let parsed = NodeArgs::parse(Vec::new(), |key| match key {
            "DAWS_ROLE" => Some(String::from("controller")),
            "DAWS_DOMAIN" => Some(String::from("city")),
            _ => None,
        })
        .unwrap();
        assert_eq!(parsed.role, Role::Controller);
        assert_eq!(parsed.domain, Domain::City);
        assert_eq!(parsed.config, PathBuf::from("daws-config.yaml"));
    }

    #[test]
    fn bad_arguments_are_named() {
        assert_eq!(
            NodeArgs::parse(Vec::new(), |_| None),
            Err(ArgsError::MissingRole)
        );
        assert_eq!(
            NodeArgs::parse(args(&["controller"]), |_| None),
            Err(ArgsError::MissingDomain)
        );
        assert_eq!(
            NodeArgs::parse(args(&["manager", "city"]), |_| None),
            Err(ArgsError::UnknownRole(String::from("manager")))
        );
        assert!(matches!(
            NodeArgs::parse(args(&["worker", "harbour"]), |_| None),
            Err(ArgsError::UnknownDomain(_))
        ));
    }
}

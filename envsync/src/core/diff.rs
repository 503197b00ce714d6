//! Meaningful-change detection between two rendered configs.
//!
//! Generated files get a fresh name on every render, so anything that may
//! embed a generated path is compared through a caller-supplied normalizer
//! that replaces such paths with a fingerprint of their content.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::types::Config;

/// What changed between the current and the candidate config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// Env files whose content changed and that require a restart.
    pub restart_files: Vec<PathBuf>,
    /// Env files whose content changed but are hot-reloaded by the child.
    pub reload_files: Vec<PathBuf>,
    pub os_env_vars: bool,
    pub args: bool,
}

impl ConfigDiff {
    pub fn needs_restart(&self) -> bool {
        !self.restart_files.is_empty() || self.os_env_vars || self.args
    }
}

/// Compare `next` against `current`.
///
/// A missing `current` (nothing applied yet) is always a change.
pub fn diff_configs<N>(current: Option<&Config>, next: &Config, normalize: N) -> ConfigDiff
where
    N: Fn(&str) -> String,
{
    let Some(current) = current else {
        return ConfigDiff {
            args: true,
            ..ConfigDiff::default()
        };
    };

    let mut diff = ConfigDiff {
        args: !lists_equal(&current.args, &next.args, &normalize),
        os_env_vars: !lists_equal(&current.os_env_vars, &next.os_env_vars, &normalize),
        ..ConfigDiff::default()
    };

    let previous: HashMap<_, _> = current
        .env_files
        .iter()
        .map(|file| (&file.path, file))
        .collect();
    for file in &next.env_files {
        let changed = match previous.get(&file.path) {
            Some(old) => !texts_equal(&old.content, &file.content, &normalize),
            None => true,
        };
        if !changed {
            continue;
        }
        if file.need_restart {
            diff.restart_files.push(file.path.clone());
        } else {
            diff.reload_files.push(file.path.clone());
        }
    }
    // A template that disappeared changes what the child sees on its next start.
    for old in &current.env_files {
        if old.need_restart && !next.env_files.iter().any(|file| file.path == old.path) {
            diff.restart_files.push(old.path.clone());
        }
    }
    diff
}

fn lists_equal<N: Fn(&str) -> String>(a: &[String], b: &[String], normalize: &N) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(left, right)| texts_equal(left, right, normalize))
}

fn texts_equal<N: Fn(&str) -> String>(a: &str, b: &str, normalize: &N) -> bool {
    a == b || normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EnvFile;

    fn identity(text: &str) -> String {
        text.to_string()
    }

    fn config(args: &[&str], env: &[&str], files: &[(&str, &str, bool)]) -> Config {
        Config {
            args: args.iter().map(|s| s.to_string()).collect(),
            os_env_vars: env.iter().map(|s| s.to_string()).collect(),
            env_files: files
                .iter()
                .map(|(path, content, need_restart)| EnvFile {
                    path: PathBuf::from(path),
                    content: content.to_string(),
                    need_restart: *need_restart,
                })
                .collect(),
            generated: Vec::new(),
        }
    }

    #[test]
    fn first_config_is_a_change() {
        let next = config(&["app"], &[], &[]);
        assert!(diff_configs(None, &next, identity).needs_restart());
    }

    #[test]
    fn identical_configs_do_not_restart() {
        let a = config(&["app", "-v"], &["A=1"], &[("/etc/app.env", "X=1\n", true)]);
        let b = a.clone();
        let diff = diff_configs(Some(&a), &b, identity);
        assert_eq!(diff, ConfigDiff::default());
        assert!(!diff.needs_restart());
    }

    #[test]
    fn one_byte_in_restart_file_restarts() {
        let a = config(&["app"], &[], &[("/etc/app.env", "X=1\n", true)]);
        let b = config(&["app"], &[], &[("/etc/app.env", "X=2\n", true)]);
        let diff = diff_configs(Some(&a), &b, identity);
        assert_eq!(diff.restart_files, vec![PathBuf::from("/etc/app.env")]);
        assert!(diff.needs_restart());
    }

    #[test]
    fn hot_reload_file_change_does_not_restart() {
        let a = config(&["app"], &[], &[("/etc/app.env", "X=1\n", false)]);
        let b = config(&["app"], &[], &[("/etc/app.env", "X=2\n", false)]);
        let diff = diff_configs(Some(&a), &b, identity);
        assert_eq!(diff.reload_files, vec![PathBuf::from("/etc/app.env")]);
        assert!(!diff.needs_restart());
    }

    #[test]
    fn new_and_removed_restart_files_restart() {
        let a = config(&["app"], &[], &[("/a.env", "A", true)]);
        let b = config(&["app"], &[], &[("/b.env", "B", true)]);
        let diff = diff_configs(Some(&a), &b, identity);
        assert_eq!(
            diff.restart_files,
            vec![PathBuf::from("/b.env"), PathBuf::from("/a.env")]
        );
    }

    #[test]
    fn env_and_arg_changes_are_detected() {
        let a = config(&["app", "-v"], &["A=1"], &[]);
        assert!(diff_configs(Some(&a), &config(&["app", "-v"], &["A=2"], &[]), identity).os_env_vars);
        assert!(diff_configs(Some(&a), &config(&["app"], &["A=1"], &[]), identity).args);
        assert!(diff_configs(Some(&a), &config(&["app", "-q"], &["A=1"], &[]), identity).args);
    }

    #[test]
    fn normalized_args_compare_equal() {
        let a = config(&["app", "--cert=/tmp/gen-1"], &["CERT=/tmp/gen-1"], &[]);
        let b = config(&["app", "--cert=/tmp/gen-2"], &["CERT=/tmp/gen-2"], &[]);
        let by_content = |text: &str| text.replace("/tmp/gen-1", "H").replace("/tmp/gen-2", "H");
        assert!(!diff_configs(Some(&a), &b, by_content).needs_restart());
        assert!(diff_configs(Some(&a), &b, identity).needs_restart());
    }
}

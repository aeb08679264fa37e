//! Host aliases from the OpenSSH client configuration.
//!
//! Follows `Include` directives (relative to the including file, `~`
//! expanded, glob patterns allowed) and visits each file at most once.
//! `Host` patterns containing wildcards or negations are not concrete
//! destinations and are skipped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::util::expand_tilde;

/// One concrete `Host` alias with the settings most useful for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshHost {
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
}

/// All concrete host aliases reachable from `config_path`, in file order.
/// A missing or unreadable file contributes nothing.
pub fn load_hosts(config_path: &Path) -> Vec<SshHost> {
    let mut hosts = Vec::new();
    let mut visited = HashSet::new();
    collect(config_path, &mut hosts, &mut visited);

    let mut seen = HashSet::new();
    hosts.retain(|h| seen.insert(h.alias.clone()));
    hosts
}

fn collect(path: &Path, hosts: &mut Vec<SshHost>, visited: &mut HashSet<PathBuf>) {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical.clone()) {
        return;
    }
    let content = match std::fs::read_to_string(&canonical) {
        Ok(c) => c,
        Err(e) => {
            debug!("Skipping ssh config {}: {e}", path.display());
            return;
        }
    };
    let base_dir = canonical.parent().unwrap_or_else(|| Path::new("/")).to_path_buf();

    // Hosts of the current block; empty inside wildcard or Match blocks.
    let mut current: Vec<SshHost> = Vec::new();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((keyword, value)) = split_directive(line) else {
            continue;
        };

        match keyword.to_ascii_lowercase().as_str() {
            "include" => {
                for pattern in value.split_whitespace() {
                    for included in resolve_include(&base_dir, pattern) {
                        collect(&included, hosts, visited);
                    }
                }
            }
            "host" => {
                hosts.append(&mut current);
                current = value
                    .split_whitespace()
                    .filter(|alias| !is_pattern(alias))
                    .map(|alias| SshHost {
                        alias: alias.to_string(),
                        ..SshHost::default()
                    })
                    .collect();
            }
            "match" => hosts.append(&mut current),
            key => {
                for host in &mut current {
                    apply(host, key, value);
                }
            }
        }
    }
    hosts.append(&mut current);
}

/// `Keyword value` or `Keyword=value`.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let end = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let (keyword, rest) = line.split_at(end);
    let value = rest
        .trim_start()
        .strip_prefix('=')
        .unwrap_or(rest)
        .trim();
    Some((keyword, value))
}

fn is_pattern(alias: &str) -> bool {
    alias.contains(['*', '?', '!'])
}

fn apply(host: &mut SshHost, key: &str, value: &str) {
    let value = value.trim_matches('"');
    match key {
        "hostname" => host.host_name = Some(value.to_string()),
        "user" => host.user = Some(value.to_string()),
        "port" => host.port = value.parse().ok(),
        "identityfile" if host.identity_file.is_none() => {
            host.identity_file = Some(value.to_string());
        }
        _ => {}
    }
}

fn resolve_include(base_dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let expanded = expand_tilde(pattern);
    let mut path = PathBuf::from(expanded.as_ref());
    if path.is_relative() {
        path = base_dir.join(path);
    }
    if !pattern.contains(['*', '?', '[']) {
        return vec![path];
    }

    let pattern = path.to_string_lossy();
    match glob::glob(&pattern) {
        Ok(paths) => {
            let mut matched: Vec<PathBuf> = paths.filter_map(std::result::Result::ok).collect();
            matched.sort();
            matched
        }
        Err(e) => {
            warn!("Invalid Include pattern {pattern}: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn aliases(hosts: &[SshHost]) -> Vec<&str> {
        hosts.iter().map(|h| h.alias.as_str()).collect()
    }

    #[test]
    fn test_basic_hosts_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        fs::write(
            &config,
            "# comment\nHost bastion\n  HostName 10.0.0.1\n  User ops\n  Port 2222\n  IdentityFile ~/.ssh/id_a\n  IdentityFile ~/.ssh/id_b\n\nHost db\n  HostName=db.internal\n",
        )
        .unwrap();

        let hosts = load_hosts(&config);
        assert_eq!(aliases(&hosts), vec!["bastion", "db"]);
        assert_eq!(hosts[0].host_name.as_deref(), Some("10.0.0.1"));
        assert_eq!(hosts[0].user.as_deref(), Some("ops"));
        assert_eq!(hosts[0].port, Some(2222));
        assert_eq!(hosts[0].identity_file.as_deref(), Some("~/.ssh/id_a"));
        assert_eq!(hosts[1].host_name.as_deref(), Some("db.internal"));
    }

    #[test]
    fn test_wildcards_and_match_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        fs::write(
            &config,
            "Host *\n  User everyone\nHost web-? !web-0 app\n  User app\nMatch host foo\n  User nobody\nHost last\n",
        )
        .unwrap();

        let hosts = load_hosts(&config);
        assert_eq!(aliases(&hosts), vec!["app", "last"]);
        assert_eq!(hosts[0].user.as_deref(), Some("app"));
        assert_eq!(hosts[1].user, None);
    }

    #[test]
    fn test_nested_includes_with_glob() {
        let dir = tempfile::tempdir().unwrap();
        let conf_d = dir.path().join("config.d");
        fs::create_dir(&conf_d).unwrap();
        fs::write(conf_d.join("10-work"), "Host work\nInclude ../deeper\n").unwrap();
        fs::write(conf_d.join("20-home"), "Host home\n").unwrap();
        fs::write(dir.path().join("deeper"), "Host deep\n").unwrap();

        let config = dir.path().join("config");
        fs::write(&config, "Include config.d/*\nHost main\n").unwrap();

        assert_eq!(
            aliases(&load_hosts(&config)),
            vec!["deep", "work", "home", "main"]
        );
    }

    #[test]
    fn test_include_cycle_visited_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "Host from-a\nInclude b\n").unwrap();
        fs::write(&b, "Host from-b\nInclude a\n").unwrap();

        assert_eq!(aliases(&load_hosts(&a)), vec!["from-b", "from-a"]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        assert!(load_hosts(Path::new("/nonexistent/ssh/config")).is_empty());
    }

    #[test]
    fn test_duplicate_alias_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        fs::write(&config, "Host x\n  User first\nHost x\n  User second\n").unwrap();
        let hosts = load_hosts(&config);
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].user.as_deref(), Some("first"));
    }
}

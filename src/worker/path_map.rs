// src/worker/path_map.rs

//! Path translation between the orchestrator and a worker's view.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

/// One `[[worker.<id>.path_mapping]]` rule: a host directory mounted into the
/// container at `container`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PathMapping {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl PathMapping {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }
}

/// Host ↔ container translation. The longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct PathMap {
    rules: Vec<PathMapping>,
}

impl PathMap {
    pub fn new(mut rules: Vec<PathMapping>) -> Self {
        rules.sort_by_key(|r| std::cmp::Reverse(r.host.components().count()));
        Self { rules }
    }

    /// Host-side roots of every rule.
    pub fn host_roots(&self) -> impl Iterator<Item = &Path> {
        self.rules.iter().map(|r| r.host.as_path())
    }

    /// `None` when no rule covers the path, including paths that climb out
    /// of a mapped root through `..`.
    pub fn to_container(&self, host_path: &Path) -> Option<PathBuf> {
        let host_path = normalize(host_path)?;
        self.rules.iter().find_map(|r| {
            let rest = host_path.strip_prefix(&r.host).ok()?;
            Some(join_relative(&r.container, rest))
        })
    }

    pub fn to_host(&self, container_path: &Path) -> Option<PathBuf> {
        let container_path = normalize(container_path)?;
        let mut by_container: Vec<&PathMapping> = self.rules.iter().collect();
        by_container.sort_by_key(|r| std::cmp::Reverse(r.container.components().count()));
        by_container.into_iter().find_map(|r| {
            let rest = container_path.strip_prefix(&r.container).ok()?;
            Some(join_relative(&r.host, rest))
        })
    }
}

/// Resolve `.` and `..` lexically. `None` if `..` climbs above the start of
/// the path.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => return None,
            },
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

fn join_relative(base: &Path, rest: &Path) -> PathBuf {
    if rest.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}

/// A network share: mounted locally at `local`, known to the remote host as
/// `remote` (which may use `\` separators, e.g. `\\nas\cases` or `Z:\cases`).
#[derive(Debug, Clone)]
pub struct ShareMap {
    local: PathBuf,
    remote: String,
    separator: char,
}

impl ShareMap {
    pub fn new(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        let remote = remote.into();
        let separator = if remote.contains('\\') || looks_like_drive(&remote) {
            '\\'
        } else {
            '/'
        };
        let remote = remote.trim_end_matches(['/', '\\']).to_string();
        Self {
            local: local.into(),
            remote,
            separator,
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local
    }

    pub fn contains(&self, local_path: &Path) -> bool {
        normalize(local_path).is_some_and(|p| p.starts_with(&self.local))
    }

    /// Remote spelling of a path under the local mount point.
    pub fn to_remote(&self, local_path: &Path) -> Option<String> {
        let local_path = normalize(local_path)?;
        let rest = local_path.strip_prefix(&self.local).ok()?;
        let mut out = self.remote.clone();
        for comp in rest.components() {
            if let Component::Normal(part) = comp {
                out.push(self.separator);
                out.push_str(&part.to_string_lossy());
            }
        }
        Some(out)
    }
}

fn looks_like_drive(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let map = PathMap::new(vec![
            PathMapping::new("/data", "/mnt/data"),
            PathMapping::new("/data/cases", "/cases"),
        ]);
        assert_eq!(
            map.to_container(Path::new("/data/cases/1/in.dat")),
            Some(PathBuf::from("/cases/1/in.dat"))
        );
        assert_eq!(
            map.to_container(Path::new("/data/other")),
            Some(PathBuf::from("/mnt/data/other"))
        );
        assert_eq!(map.to_container(Path::new("/elsewhere")), None);
        assert_eq!(
            map.to_host(Path::new("/cases/1")),
            Some(PathBuf::from("/data/cases/1"))
        );
    }

    #[test]
    fn parent_components_cannot_escape_a_mapping() {
        let map = PathMap::new(vec![PathMapping::new("/data/cases", "/cases")]);
        assert_eq!(map.to_container(Path::new("/data/cases/../../etc/passwd")), None);
        assert_eq!(map.to_container(Path::new("/data/cases/../secrets")), None);
        assert_eq!(
            map.to_container(Path::new("/data/cases/1/./../2/in.dat")),
            Some(PathBuf::from("/cases/2/in.dat"))
        );
        assert_eq!(map.to_host(Path::new("/cases/../root")), None);
        assert_eq!(map.to_container(Path::new("/..")), None);

        let share = ShareMap::new("/mnt/nas", "/export");
        assert!(!share.contains(Path::new("/mnt/nas/../etc")));
        assert!(share.to_remote(Path::new("/mnt/nas/../etc")).is_none());
        assert!(share.contains(Path::new("/mnt/nas/a/../b")));
    }

    #[test]
    fn share_uses_remote_separator() {
        let share = ShareMap::new("/mnt/nas", r"\\nas\cases\");
        assert_eq!(
            share.to_remote(Path::new("/mnt/nas/run1/in.dat")).as_deref(),
            Some(r"\\nas\cases\run1\in.dat")
        );
        assert_eq!(share.to_remote(Path::new("/mnt/nas")).as_deref(), Some(r"\\nas\cases"));
        assert!(share.to_remote(Path::new("/tmp/x")).is_none());

        let drive = ShareMap::new("/mnt/z", "Z:");
        assert_eq!(drive.to_remote(Path::new("/mnt/z/a")).as_deref(), Some(r"Z:\a"));

        let posix = ShareMap::new("/mnt/nfs", "/export/jobs/");
        assert_eq!(
            posix.to_remote(Path::new("/mnt/nfs/a/b")).as_deref(),
            Some("/export/jobs/a/b")
        );
    }
}

//! Readonly-Mount Lowering
//!
//! Mount and secret targets must exist before the container starts, even
//! when the backing filesystem is mounted readonly. Before emitting a `run`
//! exec, the mount options are scanned from last to first: any later mount
//! or secret whose target lies under an earlier readonly mount causes that
//! mount's source state to be rewritten with the missing directory (and an
//! empty file, for secrets). The rewrite is idempotent: a directory created
//! once in the scan is not created again.

use std::collections::HashSet;

use crate::llb::MountType;
use crate::value::Filesystem;

/// One `mount` option, in llb-ready form.
#[derive(Debug, Clone)]
pub(crate) struct MountEntry {
    pub source: Filesystem,
    pub dest: String,
    pub readonly: bool,
    pub mount_type: MountType,
    pub selector: Option<String>,
}

/// A mount or secret target in original option order. `mount_index` points
/// into the mounts slice for mount entries.
#[derive(Debug, Clone)]
pub(crate) struct TargetRef {
    pub mount_index: Option<usize>,
    pub dest: String,
}

pub(crate) fn lower_readonly_mounts(mounts: &mut [MountEntry], order: &[TargetRef]) {
    let mut created: HashSet<(usize, String)> = HashSet::new();

    for pos in (0..order.len()).rev() {
        let target = &order[pos];
        let owner = (0..pos).rev().find_map(|prev| {
            let mi = order[prev].mount_index?;
            (mounts[mi].readonly && is_path_prefix(&mounts[mi].dest, &target.dest)).then_some(mi)
        });
        let Some(mi) = owner else { continue };
        let rel = relative_path(&mounts[mi].dest, &target.dest);
        if rel.is_empty() {
            continue;
        }

        let mut state = std::mem::take(&mut mounts[mi].source.state);
        if target.mount_index.is_none() {
            // Secret file: ensure its directory, then an empty placeholder.
            if let Some((dir, _)) = rel.rsplit_once('/') {
                if created.insert((mi, dir.to_string())) {
                    state = state.mkdir(dir, 0o755, true);
                }
            }
            state = state.mkfile(rel, 0o644, "");
        } else if created.insert((mi, rel.clone())) {
            state = state.mkdir(rel, 0o755, true);
        }
        mounts[mi].source.state = state;
    }
}

/// Whether `base` is a strict path-prefix of `path`, by component.
fn is_path_prefix(base: &str, path: &str) -> bool {
    let base: Vec<&str> = base.split('/').filter(|c| !c.is_empty()).collect();
    let path: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    path.len() > base.len() && path[..base.len()] == base[..]
}

/// The path of `path` relative to `base`, assuming the prefix holds.
fn relative_path(base: &str, path: &str) -> String {
    let skip = base.split('/').filter(|c| !c.is_empty()).count();
    path.split('/').filter(|c| !c.is_empty()).skip(skip).collect::<Vec<_>>().join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llb::{FileAction, State};

    fn mount(dest: &str, readonly: bool) -> MountEntry {
        MountEntry {
            source: Filesystem::from_state(State::local("src")),
            dest: dest.to_string(),
            readonly,
            mount_type: MountType::Bind,
            selector: None,
        }
    }

    #[test]
    fn test_path_prefix() {
        assert!(is_path_prefix("/foo", "/foo/bar"));
        assert!(is_path_prefix("/foo", "/foo/a/b"));
        assert!(!is_path_prefix("/foo", "/foobar"));
        assert!(!is_path_prefix("/foo", "/foo"));
        assert_eq!(relative_path("/foo", "/foo/secret/f"), "secret/f");
    }

    #[test]
    fn test_nested_mount_and_secret_rewrite() {
        let mut mounts = vec![mount("/foo", true), mount("/foo/bar", false)];
        let order = vec![
            TargetRef { mount_index: Some(0), dest: "/foo".into() },
            TargetRef { mount_index: Some(1), dest: "/foo/bar".into() },
            TargetRef { mount_index: None, dest: "/foo/secret/codegen_test.hlb".into() },
        ];
        lower_readonly_mounts(&mut mounts, &order);

        let actions = mounts[0].source.state.file_actions();
        assert_eq!(actions.len(), 3);
        assert!(
            matches!(actions[0], FileAction::Mkdir { path, mode, make_parents, .. }
                if path == "secret" && *mode == 0o755 && *make_parents)
        );
        assert!(matches!(actions[1], FileAction::Mkfile { path, mode, data, .. }
            if path == "secret/codegen_test.hlb" && *mode == 0o644 && data.is_empty()));
        assert!(matches!(actions[2], FileAction::Mkdir { path, .. } if path == "bar"));

        // The non-readonly mount is untouched.
        assert!(mounts[1].source.state.file_actions().is_empty());
    }

    #[test]
    fn test_rewrite_is_idempotent_per_directory() {
        let mut mounts = vec![mount("/data", true)];
        let order = vec![
            TargetRef { mount_index: Some(0), dest: "/data".into() },
            TargetRef { mount_index: None, dest: "/data/keys/a".into() },
            TargetRef { mount_index: None, dest: "/data/keys/b".into() },
        ];
        lower_readonly_mounts(&mut mounts, &order);

        let actions = mounts[0].source.state.file_actions();
        let mkdirs = actions.iter().filter(|a| matches!(a, FileAction::Mkdir { .. })).count();
        let mkfiles = actions.iter().filter(|a| matches!(a, FileAction::Mkfile { .. })).count();
        assert_eq!(mkdirs, 1);
        assert_eq!(mkfiles, 2);
    }

    #[test]
    fn test_writable_mounts_are_not_rewritten() {
        let mut mounts = vec![mount("/foo", false), mount("/foo/bar", false)];
        let order = vec![
            TargetRef { mount_index: Some(0), dest: "/foo".into() },
            TargetRef { mount_index: Some(1), dest: "/foo/bar".into() },
        ];
        lower_readonly_mounts(&mut mounts, &order);
        assert!(mounts[0].source.state.file_actions().is_empty());
    }
}

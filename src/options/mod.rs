//! Option Records
//!
//! The heterogeneous ordered sequence an `option` value carries. Each record
//! belongs to a closed family keyed to the builtin call it configures; the
//! downstream consumer pattern-matches on the family. Order is insertion
//! order and is preserved all the way to the consumer: option lists are
//! append-only during a call, and reordering across calls is forbidden.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::ast::OptionFamily;
use crate::llb::{CacheSharingMode, Digest, MountType, NetworkMode, SecurityMode, SshMount};
use crate::value::Filesystem;

/// One opaque configuration record in an option sequence.
#[derive(Debug, Clone)]
pub enum OptionItem {
    Image(ImageOption),
    Http(HttpOption),
    Git(GitOption),
    Local(LocalOption),
    Frontend(FrontendOption),
    Run(RunOption),
    Mount(MountOption),
    Copy(CopyOption),
    Mkdir(MkdirOption),
    Mkfile(MkfileOption),
    Rm(RmOption),
    Secret(SecretOption),
    Ssh(SshOption),
    Template(TemplateOption),
}

impl OptionItem {
    pub fn family(&self) -> OptionFamily {
        match self {
            OptionItem::Image(_) => OptionFamily::Image,
            OptionItem::Http(_) => OptionFamily::Http,
            OptionItem::Git(_) => OptionFamily::Git,
            OptionItem::Local(_) => OptionFamily::Local,
            OptionItem::Frontend(_) => OptionFamily::Frontend,
            OptionItem::Run(_) => OptionFamily::Run,
            OptionItem::Mount(_) => OptionFamily::Mount,
            OptionItem::Copy(_) => OptionFamily::Copy,
            OptionItem::Mkdir(_) => OptionFamily::Mkdir,
            OptionItem::Mkfile(_) => OptionFamily::Mkfile,
            OptionItem::Rm(_) => OptionFamily::Rm,
            OptionItem::Secret(_) => OptionFamily::Secret,
            OptionItem::Ssh(_) => OptionFamily::Ssh,
            OptionItem::Template(_) => OptionFamily::Template,
        }
    }
}

/// Extract the run-family records from an option sequence, in order.
pub fn run_options(items: &[OptionItem]) -> impl Iterator<Item = &RunOption> {
    items.iter().filter_map(|item| match item {
        OptionItem::Run(opt) => Some(opt),
        _ => None,
    })
}

#[derive(Debug, Clone)]
pub enum ImageOption {
    /// Resolve the image config and pin its digest at compile time.
    Resolve,
    /// Resolve for an explicit (os, arch) instead of the default platform.
    Platform { os: String, arch: String },
}

#[derive(Debug, Clone)]
pub enum HttpOption {
    Checksum(Digest),
    Chmod(u32),
    Filename(String),
}

#[derive(Debug, Clone)]
pub enum GitOption {
    KeepGitDir,
}

#[derive(Debug, Clone)]
pub enum LocalOption {
    IncludePatterns(Vec<String>),
    ExcludePatterns(Vec<String>),
    FollowPaths(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum FrontendOption {
    Input { key: String, value: Filesystem },
    Opt { key: String, value: String },
}

#[derive(Debug, Clone)]
pub enum RunOption {
    ReadonlyRootfs,
    Env { name: String, value: String },
    Dir(String),
    User(String),
    IgnoreCache,
    Network(NetworkMode),
    Security(SecurityMode),
    /// Split a single command string into argv with shell lexing rules.
    Shlex,
    Host { host: String, ip: IpAddr },
    Ssh { mount: SshMount, local_paths: Vec<String> },
    Secret { source: String, id: String, dest: String, uid: u32, gid: u32, mode: u32 },
    Mount { source: Filesystem, dest: String, readonly: bool, mount_type: MountType, selector: Option<String> },
    Forward { src: String, dest: String },
}

#[derive(Debug, Clone)]
pub enum MountOption {
    Readonly,
    Tmpfs,
    SourcePath(String),
    Cache { id: String, sharing: CacheSharingMode },
}

#[derive(Debug, Clone)]
pub enum CopyOption {
    FollowSymlinks,
    ContentsOnly,
    Unpack,
    CreateDestPath,
    AllowWildcard,
    AllowEmptyWildcard,
    Chown(String),
    Chmod(u32),
    CreatedTime(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub enum MkdirOption {
    CreateParents,
    Chown(String),
    CreatedTime(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub enum MkfileOption {
    Chown(String),
    CreatedTime(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub enum RmOption {
    AllowNotFound,
    AllowWildcard,
}

#[derive(Debug, Clone)]
pub enum SecretOption {
    Uid(u32),
    Gid(u32),
    Mode(u32),
}

#[derive(Debug, Clone)]
pub enum SshOption {
    Target(String),
    Uid(u32),
    Gid(u32),
    Mode(u32),
    LocalPaths(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum TemplateOption {
    StringField { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_tags() {
        let item = OptionItem::Run(RunOption::IgnoreCache);
        assert_eq!(item.family(), OptionFamily::Run);
        assert_eq!(item.family().to_string(), "option::run");
    }

    #[test]
    fn test_run_options_preserves_order() {
        let items = vec![
            OptionItem::Run(RunOption::Dir("/a".into())),
            OptionItem::Mount(MountOption::Readonly),
            OptionItem::Run(RunOption::User("root".into())),
        ];
        let runs: Vec<_> = run_options(&items).collect();
        assert_eq!(runs.len(), 2);
        assert!(matches!(runs[0], RunOption::Dir(d) if d == "/a"));
        assert!(matches!(runs[1], RunOption::User(u) if u == "root"));
    }
}

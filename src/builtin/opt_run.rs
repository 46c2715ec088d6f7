//! Run Option Builtins
//!
//! `option::run` and its nested families: `option::mount`,
//! `option::secret`, and `option::ssh`. Mode strings are validated here so
//! bad user input surfaces as the typed errors with the offending value
//! attached.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ast::{Kind, OptionFamily};
use crate::codegen::CodegenError;
use crate::llb::{CacheSharingMode, Digest, MountType, NetworkMode, SecurityMode, SshMount};
use crate::options::{MountOption, OptionItem, RunOption, SecretOption, SshOption};
use crate::value::Value;

use super::{CallContext, Callable, OptionFn, ParamKind, Signature};

pub(crate) fn all() -> Vec<Arc<dyn Callable>> {
    vec![
        Arc::new(OptionFn {
            name: "readonlyRootfs",
            family: OptionFamily::Run,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Run(RunOption::ReadonlyRootfs)),
        }),
        Arc::new(OptionFn {
            name: "env",
            family: OptionFamily::Run,
            params: &[ParamKind::String, ParamKind::String],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Run(RunOption::Env {
                    name: args[0].string()?,
                    value: args[1].string()?,
                }))
            },
        }),
        Arc::new(OptionFn {
            name: "dir",
            family: OptionFamily::Run,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Run(RunOption::Dir(args[0].string()?))),
        }),
        Arc::new(OptionFn {
            name: "user",
            family: OptionFamily::Run,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Run(RunOption::User(args[0].string()?))),
        }),
        Arc::new(OptionFn {
            name: "ignoreCache",
            family: OptionFamily::Run,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Run(RunOption::IgnoreCache)),
        }),
        Arc::new(OptionFn {
            name: "shlex",
            family: OptionFamily::Run,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Run(RunOption::Shlex)),
        }),
        Arc::new(OptionFn {
            name: "network",
            family: OptionFamily::Run,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| {
                let mode = args[0].string()?;
                let parsed: NetworkMode = mode
                    .parse()
                    .map_err(|_| CodegenError::InvalidNetworkMode { mode })?;
                Ok(OptionItem::Run(RunOption::Network(parsed)))
            },
        }),
        Arc::new(OptionFn {
            name: "security",
            family: OptionFamily::Run,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| {
                let mode = args[0].string()?;
                let parsed: SecurityMode = mode
                    .parse()
                    .map_err(|_| CodegenError::InvalidSecurityMode { mode })?;
                Ok(OptionItem::Run(RunOption::Security(parsed)))
            },
        }),
        Arc::new(OptionFn {
            name: "host",
            family: OptionFamily::Run,
            params: &[ParamKind::String, ParamKind::Ip],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Run(RunOption::Host {
                    host: args[0].string()?,
                    ip: args[1].ip()?,
                }))
            },
        }),
        Arc::new(OptionFn {
            name: "forward",
            family: OptionFamily::Run,
            params: &[ParamKind::String, ParamKind::String],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Run(RunOption::Forward {
                    src: args[0].string()?,
                    dest: args[1].string()?,
                }))
            },
        }),
        Arc::new(Ssh),
        Arc::new(Secret),
        Arc::new(MountFn),
        // option::mount
        Arc::new(OptionFn {
            name: "readonly",
            family: OptionFamily::Mount,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Mount(MountOption::Readonly)),
        }),
        Arc::new(OptionFn {
            name: "tmpfs",
            family: OptionFamily::Mount,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Mount(MountOption::Tmpfs)),
        }),
        Arc::new(OptionFn {
            name: "sourcePath",
            family: OptionFamily::Mount,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Mount(MountOption::SourcePath(args[0].string()?))),
        }),
        Arc::new(OptionFn {
            name: "cache",
            family: OptionFamily::Mount,
            params: &[ParamKind::String, ParamKind::String],
            variadic: None,
            build: |_ctx, args| {
                let id = args[0].string()?;
                let mode = args[1].string()?;
                let sharing: CacheSharingMode = mode
                    .parse()
                    .map_err(|_| CodegenError::InvalidSharingMode { mode })?;
                Ok(OptionItem::Mount(MountOption::Cache { id, sharing }))
            },
        }),
        // option::secret
        Arc::new(OptionFn {
            name: "uid",
            family: OptionFamily::Secret,
            params: &[ParamKind::Int],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Secret(SecretOption::Uid(args[0].int()? as u32))),
        }),
        Arc::new(OptionFn {
            name: "gid",
            family: OptionFamily::Secret,
            params: &[ParamKind::Int],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Secret(SecretOption::Gid(args[0].int()? as u32))),
        }),
        Arc::new(OptionFn {
            name: "mode",
            family: OptionFamily::Secret,
            params: &[ParamKind::FileMode],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Secret(SecretOption::Mode(args[0].file_mode()?)))
            },
        }),
        // option::ssh
        Arc::new(OptionFn {
            name: "target",
            family: OptionFamily::Ssh,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Ssh(SshOption::Target(args[0].string()?))),
        }),
        Arc::new(OptionFn {
            name: "uid",
            family: OptionFamily::Ssh,
            params: &[ParamKind::Int],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Ssh(SshOption::Uid(args[0].int()? as u32))),
        }),
        Arc::new(OptionFn {
            name: "gid",
            family: OptionFamily::Ssh,
            params: &[ParamKind::Int],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Ssh(SshOption::Gid(args[0].int()? as u32))),
        }),
        Arc::new(OptionFn {
            name: "mode",
            family: OptionFamily::Ssh,
            params: &[ParamKind::FileMode],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Ssh(SshOption::Mode(args[0].file_mode()?))),
        }),
        Arc::new(OptionFn {
            name: "localPaths",
            family: OptionFamily::Ssh,
            params: &[],
            variadic: Some(ParamKind::String),
            build: |_ctx, args| {
                let paths: Result<Vec<String>, _> = args.iter().map(|a| a.string()).collect();
                Ok(OptionItem::Ssh(SshOption::LocalPaths(paths?)))
            },
        }),
    ]
}

/// `ssh` - forward the local SSH agent into the exec. Sub-options refine
/// the in-container socket and the local key sources.
struct Ssh;

#[async_trait]
impl Callable for Ssh {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Option(Some(OptionFamily::Run)), &[])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        _args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut items = ctx.register.option()?;
        let mut mount = SshMount::default();
        let mut local_paths = vec![];
        for item in &ctx.options {
            if let OptionItem::Ssh(opt) = item {
                match opt {
                    SshOption::Target(dest) => mount.dest = dest.clone(),
                    SshOption::Uid(uid) => mount.uid = *uid,
                    SshOption::Gid(gid) => mount.gid = *gid,
                    SshOption::Mode(mode) => mount.mode = *mode,
                    SshOption::LocalPaths(paths) => local_paths.extend(paths.iter().cloned()),
                }
            }
        }
        items.push(OptionItem::Run(RunOption::Ssh { mount, local_paths }));
        Ok(Value::Option(items))
    }
}

/// `secret <local-path> <dest>` - mount a secret file into the exec. The
/// session id is derived from the source path so identical secrets share
/// one provider.
struct Secret;

#[async_trait]
impl Callable for Secret {
    fn name(&self) -> &'static str {
        "secret"
    }

    fn signature(&self) -> Signature {
        Signature::new(
            Kind::Option(Some(OptionFamily::Run)),
            &[ParamKind::String, ParamKind::String],
        )
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut items = ctx.register.option()?;
        let source = args[0].string()?;
        let dest = args[1].string()?;
        let mut uid = 0;
        let mut gid = 0;
        let mut mode = 0o400;
        for item in &ctx.options {
            if let OptionItem::Secret(opt) = item {
                match opt {
                    SecretOption::Uid(u) => uid = *u,
                    SecretOption::Gid(g) => gid = *g,
                    SecretOption::Mode(m) => mode = *m,
                }
            }
        }
        let id = Digest::sha256(source.as_bytes()).to_string();
        items.push(OptionItem::Run(RunOption::Secret { source, id, dest, uid, gid, mode }));
        Ok(Value::Option(items))
    }
}

/// `mount <fs> <dest>` - mount a filesystem into the exec. Cache mounts
/// cannot carry an `as` clause; their contents are not addressable.
struct MountFn;

#[async_trait]
impl Callable for MountFn {
    fn name(&self) -> &'static str {
        "mount"
    }

    fn signature(&self) -> Signature {
        Signature::new(
            Kind::Option(Some(OptionFamily::Run)),
            &[ParamKind::Filesystem, ParamKind::String],
        )
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut items = ctx.register.option()?;
        let source = args[0].filesystem()?;
        let dest = args[1].string()?;

        let mut readonly = false;
        let mut mount_type = MountType::Bind;
        let mut selector = None;
        for item in &ctx.options {
            if let OptionItem::Mount(opt) = item {
                match opt {
                    MountOption::Readonly => readonly = true,
                    MountOption::Tmpfs => mount_type = MountType::Tmpfs,
                    MountOption::SourcePath(path) => selector = Some(path.clone()),
                    MountOption::Cache { id, sharing } => {
                        mount_type = MountType::Cache { id: id.clone(), sharing: *sharing }
                    }
                }
            }
        }

        if ctx.has_binding && matches!(mount_type, MountType::Cache { .. }) {
            return Err(CodegenError::BindCacheMount { span: ctx.span });
        }

        items.push(OptionItem::Run(RunOption::Mount {
            source,
            dest,
            readonly,
            mount_type,
            selector,
        }));
        Ok(Value::Option(items))
    }
}

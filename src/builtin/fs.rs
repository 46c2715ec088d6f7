//! Filesystem Builtins
//!
//! Sources begin a chain by replacing the zero filesystem; mutations
//! receive the current accumulator and return the updated composite. The
//! `run` builtin is the workhorse: it assembles the exec op from the image
//! config, the run options, and the lowered mount set.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ast::Kind;
use crate::codegen::lowering::{lower_readonly_mounts, MountEntry, TargetRef};
use crate::codegen::CodegenError;
use crate::image::ImageSpec;
use crate::llb::{
    Digest, ExecMeta, FileAction, Mount, Op, Platform, SecretMount, SshMount, State,
};
use crate::options::{
    CopyOption, FrontendOption, GitOption, HttpOption, ImageOption, LocalOption, MkdirOption,
    MkfileOption, OptionItem, RmOption, RunOption,
};
use crate::session::{validate_patterns, ForwardProxy, SessionOption};
use crate::value::{Filesystem, Value};

use super::{shlex_split, CallContext, Callable, ParamKind, Signature};

lazy_static::lazy_static! {
    static ref IMAGE_REF: regex_lite::Regex = regex_lite::Regex::new(
        r"^[a-z0-9][a-zA-Z0-9._/-]*(:[a-zA-Z0-9._-]+)?(@sha256:[a-f0-9]{64})?$"
    ).expect("image reference pattern");
}

/// Validate a normalized image reference.
pub(crate) fn check_image_ref(reference: &str) -> Result<(), CodegenError> {
    if !IMAGE_REF.is_match(reference) {
        return Err(CodegenError::InvalidImageRef { reference: reference.to_string() });
    }
    Ok(())
}

// =============================================================================
// SOURCES
// =============================================================================

pub struct Scratch;

#[async_trait]
impl Callable for Scratch {
    fn name(&self) -> &'static str {
        "scratch"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[])
    }

    async fn call(
        &self,
        _ctx: &mut CallContext<'_>,
        _args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        Ok(Value::Filesystem(Filesystem::default()))
    }
}

pub struct Image;

#[async_trait]
impl Callable for Image {
    fn name(&self) -> &'static str {
        "image"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let reference = args[0].string()?;
        check_image_ref(&reference)?;

        let mut fs = Filesystem::default();
        let mut resolve = false;
        let mut platform = None;
        for item in &ctx.options {
            if let OptionItem::Image(opt) = item {
                match opt {
                    ImageOption::Resolve => resolve = true,
                    ImageOption::Platform { os, arch } => {
                        platform = Some(Platform { os: os.clone(), arch: arch.clone() })
                    }
                }
            }
        }
        let mut digest = None;
        if resolve {
            let (resolved, config) =
                ctx.cg.resolver()?.resolve(&reference, platform.as_ref()).await?;
            fs.image = ImageSpec { config, history: vec![], digest: Some(resolved.clone()) };
            digest = Some(resolved);
        }
        fs.state = State::from_op(Op::Image { reference, platform, digest });
        Ok(Value::Filesystem(fs))
    }
}

pub struct Http;

#[async_trait]
impl Callable for Http {
    fn name(&self) -> &'static str {
        "http"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::Url])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let url = args[0].url()?;
        let mut checksum = None;
        let mut chmod = None;
        let mut filename = None;
        for item in &ctx.options {
            if let OptionItem::Http(opt) = item {
                match opt {
                    HttpOption::Checksum(digest) => checksum = Some(digest.clone()),
                    HttpOption::Chmod(mode) => chmod = Some(*mode),
                    HttpOption::Filename(name) => filename = Some(name.clone()),
                }
            }
        }
        let mut fs = Filesystem::default();
        fs.state = State::from_op(Op::Http { url, checksum, chmod, filename });
        Ok(Value::Filesystem(fs))
    }
}

pub struct Git;

#[async_trait]
impl Callable for Git {
    fn name(&self) -> &'static str {
        "git"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String, ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let remote = args[0].string()?;
        let reference = args[1].string()?;
        let keep_git_dir = ctx
            .options
            .iter()
            .any(|o| matches!(o, OptionItem::Git(GitOption::KeepGitDir)));
        let mut fs = Filesystem::default();
        fs.state = State::from_op(Op::Git { remote, reference, keep_git_dir });
        Ok(Value::Filesystem(fs))
    }
}

pub struct Local;

#[async_trait]
impl Callable for Local {
    fn name(&self) -> &'static str {
        "local"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let path = args[0].string()?;
        let mut include_patterns = vec![];
        let mut exclude_patterns = vec![];
        let mut follow_paths = vec![];
        for item in &ctx.options {
            if let OptionItem::Local(opt) = item {
                match opt {
                    LocalOption::IncludePatterns(p) => include_patterns.extend(p.iter().cloned()),
                    LocalOption::ExcludePatterns(p) => exclude_patterns.extend(p.iter().cloned()),
                    LocalOption::FollowPaths(p) => follow_paths.extend(p.iter().cloned()),
                }
            }
        }
        validate_patterns(&include_patterns)?;
        validate_patterns(&exclude_patterns)?;

        // The session id keys the sync source; stable per path so identical
        // locals share one transfer.
        let id = Digest::sha256(path.as_bytes()).to_string();
        let mut fs = Filesystem::default();
        fs.state = State::from_op(Op::Local {
            name: id.clone(),
            include_patterns: include_patterns.clone(),
            exclude_patterns: exclude_patterns.clone(),
            follow_paths: follow_paths.clone(),
        });
        fs.session_opts.push(SessionOption::LocalDir {
            id,
            path,
            include_patterns,
            exclude_patterns,
            follow_paths,
        });
        Ok(Value::Filesystem(fs))
    }
}

pub struct Frontend;

#[async_trait]
impl Callable for Frontend {
    fn name(&self) -> &'static str {
        "frontend"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let source = args[0].string()?;
        check_image_ref(&source)?;
        let mut fs = Filesystem::default();
        let mut inputs = vec![];
        let mut opts = vec![];
        for item in &ctx.options {
            if let OptionItem::Frontend(opt) = item {
                match opt {
                    FrontendOption::Input { key, value } => {
                        fs.absorb(value);
                        inputs.push((key.clone(), value.state.clone()));
                    }
                    FrontendOption::Opt { key, value } => opts.push((key.clone(), value.clone())),
                }
            }
        }
        fs.state = State::from_op(Op::Frontend { source, inputs, opts });
        Ok(Value::Filesystem(fs))
    }
}

// =============================================================================
// RUN
// =============================================================================

pub struct Run;

#[async_trait]
impl Callable for Run {
    fn name(&self) -> &'static str {
        "run"
    }

    fn signature(&self) -> Signature {
        Signature::variadic(Kind::Filesystem, &[], ParamKind::String)
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut fs = ctx.register.filesystem()?;
        let parts: Vec<String> = args.iter().map(|a| a.string()).collect::<Result<_, _>>()?;
        let shlex = ctx
            .options
            .iter()
            .any(|o| matches!(o, OptionItem::Run(RunOption::Shlex)));
        let argv = run_argv(&parts, shlex)?;

        let mut meta = ExecMeta {
            args: argv.clone(),
            env: fs.image.config.env.clone(),
            cwd: default_cwd(&fs.image.config.working_dir),
            user: fs.image.config.user.clone(),
            ..Default::default()
        };

        let mut readonly_rootfs = false;
        let mut mounts: Vec<MountEntry> = vec![];
        let mut order: Vec<TargetRef> = vec![];
        let mut secrets: Vec<SecretMount> = vec![];
        let mut ssh: Vec<SshMount> = vec![];

        for item in &ctx.options {
            let opt = match item {
                OptionItem::Run(opt) => opt,
                _ => continue,
            };
            match opt {
                RunOption::ReadonlyRootfs => readonly_rootfs = true,
                RunOption::Env { name, value } => meta.env.push(format!("{}={}", name, value)),
                RunOption::Dir(path) => meta.cwd = path.clone(),
                RunOption::User(user) => meta.user = user.clone(),
                RunOption::IgnoreCache => meta.ignore_cache = true,
                RunOption::Network(mode) => meta.network = *mode,
                RunOption::Security(mode) => meta.security = *mode,
                RunOption::Shlex => {}
                RunOption::Host { host, ip } => {
                    meta.hosts.push(crate::llb::HostIp { host: host.clone(), ip: *ip })
                }
                RunOption::Ssh { mount, local_paths } => {
                    fs.session_opts.push(SessionOption::SshAgent {
                        id: mount.id.clone(),
                        paths: local_paths.clone(),
                    });
                    ssh.push(mount.clone());
                }
                RunOption::Secret { source, id, dest, uid, gid, mode } => {
                    fs.session_opts.push(SessionOption::SecretFile {
                        id: id.clone(),
                        path: source.clone(),
                    });
                    secrets.push(SecretMount {
                        id: id.clone(),
                        dest: dest.clone(),
                        uid: *uid,
                        gid: *gid,
                        mode: *mode,
                    });
                    order.push(TargetRef { mount_index: None, dest: dest.clone() });
                }
                RunOption::Mount { source, dest, readonly, mount_type, selector } => {
                    order.push(TargetRef { mount_index: Some(mounts.len()), dest: dest.clone() });
                    mounts.push(MountEntry {
                        source: source.clone(),
                        dest: dest.clone(),
                        readonly: *readonly,
                        mount_type: mount_type.clone(),
                        selector: selector.clone(),
                    });
                }
                RunOption::Forward { src, dest } => {
                    let proxy = Arc::new(ForwardProxy::new(src)?);
                    fs.session_opts.push(SessionOption::Forward {
                        id: proxy.id.clone(),
                        socket_path: proxy.socket_path.display().to_string(),
                    });
                    ssh.push(SshMount {
                        id: proxy.id.clone(),
                        dest: dest.clone(),
                        ..Default::default()
                    });
                    fs.proxies.push(proxy);
                }
            }
        }

        lower_readonly_mounts(&mut mounts, &order);

        let mut llb_mounts = vec![Mount {
            input: fs.state.clone(),
            dest: "/".to_string(),
            selector: None,
            readonly: readonly_rootfs,
            mount_type: crate::llb::MountType::Bind,
        }];
        for entry in mounts {
            fs.absorb(&entry.source);
            llb_mounts.push(Mount {
                input: entry.source.state,
                dest: entry.dest,
                selector: entry.selector,
                readonly: entry.readonly,
                mount_type: entry.mount_type,
            });
        }

        fs.state = State::exec(meta, llb_mounts, secrets, ssh);
        fs.image.record_run(&argv);
        Ok(Value::Filesystem(fs))
    }
}

/// Compute an exec argv. A single command string runs through the shell
/// unless `shlex` asked for word splitting.
fn run_argv(parts: &[String], shlex: bool) -> Result<Vec<String>, CodegenError> {
    match parts {
        [] => Err(CodegenError::InvalidArg { message: "run requires a command".to_string() }),
        [single] if shlex => shlex_split(single),
        [single] => Ok(vec!["/bin/sh".to_string(), "-c".to_string(), single.clone()]),
        many => Ok(many.to_vec()),
    }
}

fn default_cwd(working_dir: &str) -> String {
    if working_dir.is_empty() {
        "/".to_string()
    } else {
        working_dir.to_string()
    }
}

// =============================================================================
// IMAGE CONFIG MUTATIONS
// =============================================================================

macro_rules! image_mutation {
    ($struct_name:ident, $name:literal, $params:expr, $variadic:expr, $body:expr) => {
        pub struct $struct_name;

        #[async_trait]
        impl Callable for $struct_name {
            fn name(&self) -> &'static str {
                $name
            }

            fn signature(&self) -> Signature {
                Signature { kind: Kind::Filesystem, params: $params, variadic: $variadic }
            }

            async fn call(
                &self,
                ctx: &mut CallContext<'_>,
                args: Vec<Value>,
            ) -> Result<Value, CodegenError> {
                let mut fs = ctx.register.filesystem()?;
                let apply: fn(&mut Filesystem, Vec<Value>) -> Result<(), CodegenError> = $body;
                apply(&mut fs, args)?;
                Ok(Value::Filesystem(fs))
            }
        }
    };
}

image_mutation!(Env, "env", &[ParamKind::String, ParamKind::String], None, |fs, args| {
    let name = args[0].string()?;
    let value = args[1].string()?;
    fs.image.config.set_env(&name, &value);
    Ok(())
});

image_mutation!(Dir, "dir", &[ParamKind::String], None, |fs, args| {
    fs.image.set_working_dir(&args[0].string()?);
    Ok(())
});

image_mutation!(User, "user", &[ParamKind::String], None, |fs, args| {
    fs.image.set_user(&args[0].string()?);
    Ok(())
});

image_mutation!(Entrypoint, "entrypoint", &[], Some(ParamKind::String), |fs, args| {
    let argv: Vec<String> = args.iter().map(|a| a.string()).collect::<Result<_, _>>()?;
    fs.image.set_entrypoint(&argv);
    Ok(())
});

image_mutation!(Cmd, "cmd", &[], Some(ParamKind::String), |fs, args| {
    fs.image.config.cmd = args.iter().map(|a| a.string()).collect::<Result<_, _>>()?;
    Ok(())
});

image_mutation!(Label, "label", &[ParamKind::String, ParamKind::String], None, |fs, args| {
    fs.image.add_label(&args[0].string()?, &args[1].string()?);
    Ok(())
});

image_mutation!(Expose, "expose", &[], Some(ParamKind::String), |fs, args| {
    for arg in &args {
        let port = arg.string()?;
        let number = port.split_once('/').map(|(n, _)| n).unwrap_or(&port);
        if number.parse::<u16>().is_err() {
            return Err(CodegenError::InvalidArg {
                message: format!("invalid exposed port '{}'", port),
            });
        }
        fs.image.config.exposed_ports.push(port);
    }
    Ok(())
});

image_mutation!(Volumes, "volumes", &[], Some(ParamKind::String), |fs, args| {
    for arg in &args {
        fs.image.config.volumes.push(arg.string()?);
    }
    Ok(())
});

image_mutation!(StopSignal, "stopSignal", &[ParamKind::String], None, |fs, args| {
    fs.image.config.stop_signal = Some(args[0].string()?);
    Ok(())
});

// =============================================================================
// FILE OPERATIONS
// =============================================================================

pub struct Mkdir;

#[async_trait]
impl Callable for Mkdir {
    fn name(&self) -> &'static str {
        "mkdir"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String, ParamKind::FileMode])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut fs = ctx.register.filesystem()?;
        let path = args[0].string()?;
        let mode = args[1].file_mode()?;
        let mut make_parents = false;
        let mut chown = None;
        let mut created = None;
        for item in &ctx.options {
            if let OptionItem::Mkdir(opt) = item {
                match opt {
                    MkdirOption::CreateParents => make_parents = true,
                    MkdirOption::Chown(owner) => chown = Some(owner.clone()),
                    MkdirOption::CreatedTime(time) => created = Some(*time),
                }
            }
        }
        fs.state = fs.state.file(FileAction::Mkdir { path, mode, make_parents, chown, created });
        Ok(Value::Filesystem(fs))
    }
}

pub struct Mkfile;

#[async_trait]
impl Callable for Mkfile {
    fn name(&self) -> &'static str {
        "mkfile"
    }

    fn signature(&self) -> Signature {
        Signature::new(
            Kind::Filesystem,
            &[ParamKind::String, ParamKind::FileMode, ParamKind::String],
        )
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut fs = ctx.register.filesystem()?;
        let path = args[0].string()?;
        let mode = args[1].file_mode()?;
        let data = args[2].string()?;
        let mut chown = None;
        let mut created = None;
        for item in &ctx.options {
            if let OptionItem::Mkfile(opt) = item {
                match opt {
                    MkfileOption::Chown(owner) => chown = Some(owner.clone()),
                    MkfileOption::CreatedTime(time) => created = Some(*time),
                }
            }
        }
        fs.state = fs.state.file(FileAction::Mkfile { path, mode, data, chown, created });
        Ok(Value::Filesystem(fs))
    }
}

pub struct Rm;

#[async_trait]
impl Callable for Rm {
    fn name(&self) -> &'static str {
        "rm"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut fs = ctx.register.filesystem()?;
        let path = args[0].string()?;
        let mut allow_not_found = false;
        let mut allow_wildcard = false;
        for item in &ctx.options {
            if let OptionItem::Rm(opt) = item {
                match opt {
                    RmOption::AllowNotFound => allow_not_found = true,
                    RmOption::AllowWildcard => allow_wildcard = true,
                }
            }
        }
        fs.state = fs.state.file(FileAction::Rm { path, allow_not_found, allow_wildcard });
        Ok(Value::Filesystem(fs))
    }
}

pub struct Copy;

#[async_trait]
impl Callable for Copy {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn signature(&self) -> Signature {
        Signature::new(
            Kind::Filesystem,
            &[ParamKind::Filesystem, ParamKind::String, ParamKind::String],
        )
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut fs = ctx.register.filesystem()?;
        let src = args[0].filesystem()?;
        let src_path = args[1].string()?;
        let dest_path = args[2].string()?;

        let mut info = crate::llb::CopyInfo::default();
        for item in &ctx.options {
            if let OptionItem::Copy(opt) = item {
                match opt {
                    CopyOption::FollowSymlinks => info.follow_symlinks = true,
                    CopyOption::ContentsOnly => info.contents_only = true,
                    CopyOption::Unpack => info.unpack = true,
                    CopyOption::CreateDestPath => info.create_dest_path = true,
                    CopyOption::AllowWildcard => info.allow_wildcard = true,
                    CopyOption::AllowEmptyWildcard => info.allow_empty_wildcard = true,
                    CopyOption::Chown(owner) => info.chown = Some(owner.clone()),
                    CopyOption::Chmod(mode) => info.chmod = Some(*mode),
                    CopyOption::CreatedTime(time) => info.created = Some(*time),
                }
            }
        }

        fs.absorb(&src);
        fs.state = fs.state.file(FileAction::Copy {
            src: src.state,
            src_path: src_path.clone(),
            dest_path: dest_path.clone(),
            info,
        });
        fs.image.record_copy(&src_path, &dest_path);
        Ok(Value::Filesystem(fs))
    }
}

pub struct Merge;

#[async_trait]
impl Callable for Merge {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn signature(&self) -> Signature {
        Signature::variadic(Kind::Filesystem, &[], ParamKind::Filesystem)
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut fs = ctx.register.filesystem()?;
        let mut inputs = vec![fs.state.clone()];
        for arg in &args {
            let other = arg.filesystem()?;
            fs.absorb(&other);
            inputs.push(other.state);
        }
        fs.state = State::merge(inputs);
        fs.image.record_merge();
        Ok(Value::Filesystem(fs))
    }
}

pub struct Diff;

#[async_trait]
impl Callable for Diff {
    fn name(&self) -> &'static str {
        "diff"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::Filesystem])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut fs = ctx.register.filesystem()?;
        let lower = args[0].filesystem()?;
        fs.absorb(&lower);
        fs.state = State::diff(lower.state, fs.state.clone());
        fs.image.record_diff();
        Ok(Value::Filesystem(fs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_validation() {
        assert!(check_image_ref("alpine").is_ok());
        assert!(check_image_ref("library/alpine:3.18").is_ok());
        assert!(check_image_ref("registry.io/team/app:v1").is_ok());
        assert!(check_image_ref(&format!("alpine@sha256:{}", "a".repeat(64))).is_ok());
        assert!(check_image_ref("").is_err());
        assert!(check_image_ref("UPPER CASE").is_err());
    }

    #[test]
    fn test_run_argv_forms() {
        let single = run_argv(&["echo hi".to_string()], false).unwrap();
        assert_eq!(single, vec!["/bin/sh", "-c", "echo hi"]);

        let shlexed = run_argv(&["echo hi".to_string()], true).unwrap();
        assert_eq!(shlexed, vec!["echo", "hi"]);

        let multi = run_argv(&["echo".to_string(), "hi".to_string()], false).unwrap();
        assert_eq!(multi, vec!["echo", "hi"]);

        assert!(run_argv(&[], false).is_err());
    }
}

//! Source Option Builtins
//!
//! Option families for the source builtins: `option::image`,
//! `option::http`, `option::git`, `option::local`, and `option::frontend`.

use std::sync::Arc;

use crate::ast::OptionFamily;
use crate::options::{
    FrontendOption, GitOption, HttpOption, ImageOption, LocalOption, OptionItem,
};

use super::{Callable, OptionFn, ParamKind};

pub(crate) fn all() -> Vec<Arc<dyn Callable>> {
    vec![
        Arc::new(OptionFn {
            name: "resolve",
            family: OptionFamily::Image,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Image(ImageOption::Resolve)),
        }),
        Arc::new(OptionFn {
            name: "platform",
            family: OptionFamily::Image,
            params: &[ParamKind::String, ParamKind::String],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Image(ImageOption::Platform {
                    os: args[0].string()?,
                    arch: args[1].string()?,
                }))
            },
        }),
        Arc::new(OptionFn {
            name: "checksum",
            family: OptionFamily::Http,
            params: &[ParamKind::Digest],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Http(HttpOption::Checksum(args[0].digest()?))),
        }),
        Arc::new(OptionFn {
            name: "chmod",
            family: OptionFamily::Http,
            params: &[ParamKind::FileMode],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Http(HttpOption::Chmod(args[0].file_mode()?))),
        }),
        Arc::new(OptionFn {
            name: "filename",
            family: OptionFamily::Http,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Http(HttpOption::Filename(args[0].string()?))),
        }),
        Arc::new(OptionFn {
            name: "keepGitDir",
            family: OptionFamily::Git,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Git(GitOption::KeepGitDir)),
        }),
        Arc::new(OptionFn {
            name: "includePatterns",
            family: OptionFamily::Local,
            params: &[],
            variadic: Some(ParamKind::String),
            build: |_ctx, args| {
                Ok(OptionItem::Local(LocalOption::IncludePatterns(strings(args)?)))
            },
        }),
        Arc::new(OptionFn {
            name: "excludePatterns",
            family: OptionFamily::Local,
            params: &[],
            variadic: Some(ParamKind::String),
            build: |_ctx, args| {
                Ok(OptionItem::Local(LocalOption::ExcludePatterns(strings(args)?)))
            },
        }),
        Arc::new(OptionFn {
            name: "followPaths",
            family: OptionFamily::Local,
            params: &[],
            variadic: Some(ParamKind::String),
            build: |_ctx, args| Ok(OptionItem::Local(LocalOption::FollowPaths(strings(args)?))),
        }),
        Arc::new(OptionFn {
            name: "input",
            family: OptionFamily::Frontend,
            params: &[ParamKind::String, ParamKind::Filesystem],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Frontend(FrontendOption::Input {
                    key: args[0].string()?,
                    value: args[1].filesystem()?,
                }))
            },
        }),
        Arc::new(OptionFn {
            name: "opt",
            family: OptionFamily::Frontend,
            params: &[ParamKind::String, ParamKind::String],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Frontend(FrontendOption::Opt {
                    key: args[0].string()?,
                    value: args[1].string()?,
                }))
            },
        }),
    ]
}

fn strings(args: &[crate::value::Value]) -> Result<Vec<String>, crate::codegen::CodegenError> {
    args.iter().map(|a| a.string()).collect()
}

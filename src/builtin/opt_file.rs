//! File-Operation Option Builtins
//!
//! `option::copy`, `option::mkdir`, `option::mkfile`, and `option::rm`.

use std::sync::Arc;

use crate::ast::OptionFamily;
use crate::options::{CopyOption, MkdirOption, MkfileOption, OptionItem, RmOption};

use super::{Callable, OptionFn, ParamKind};

pub(crate) fn all() -> Vec<Arc<dyn Callable>> {
    vec![
        // option::copy
        Arc::new(OptionFn {
            name: "followSymlinks",
            family: OptionFamily::Copy,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Copy(CopyOption::FollowSymlinks)),
        }),
        Arc::new(OptionFn {
            name: "contentsOnly",
            family: OptionFamily::Copy,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Copy(CopyOption::ContentsOnly)),
        }),
        Arc::new(OptionFn {
            name: "unpack",
            family: OptionFamily::Copy,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Copy(CopyOption::Unpack)),
        }),
        Arc::new(OptionFn {
            name: "createDestPath",
            family: OptionFamily::Copy,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Copy(CopyOption::CreateDestPath)),
        }),
        Arc::new(OptionFn {
            name: "allowWildcard",
            family: OptionFamily::Copy,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Copy(CopyOption::AllowWildcard)),
        }),
        Arc::new(OptionFn {
            name: "allowEmptyWildcard",
            family: OptionFamily::Copy,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Copy(CopyOption::AllowEmptyWildcard)),
        }),
        Arc::new(OptionFn {
            name: "chown",
            family: OptionFamily::Copy,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Copy(CopyOption::Chown(args[0].string()?))),
        }),
        Arc::new(OptionFn {
            name: "chmod",
            family: OptionFamily::Copy,
            params: &[ParamKind::FileMode],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Copy(CopyOption::Chmod(args[0].file_mode()?))),
        }),
        Arc::new(OptionFn {
            name: "createdTime",
            family: OptionFamily::Copy,
            params: &[ParamKind::Timestamp],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Copy(CopyOption::CreatedTime(args[0].timestamp()?)))
            },
        }),
        // option::mkdir
        Arc::new(OptionFn {
            name: "createParents",
            family: OptionFamily::Mkdir,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Mkdir(MkdirOption::CreateParents)),
        }),
        Arc::new(OptionFn {
            name: "chown",
            family: OptionFamily::Mkdir,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Mkdir(MkdirOption::Chown(args[0].string()?))),
        }),
        Arc::new(OptionFn {
            name: "createdTime",
            family: OptionFamily::Mkdir,
            params: &[ParamKind::Timestamp],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Mkdir(MkdirOption::CreatedTime(args[0].timestamp()?)))
            },
        }),
        // option::mkfile
        Arc::new(OptionFn {
            name: "chown",
            family: OptionFamily::Mkfile,
            params: &[ParamKind::String],
            variadic: None,
            build: |_ctx, args| Ok(OptionItem::Mkfile(MkfileOption::Chown(args[0].string()?))),
        }),
        Arc::new(OptionFn {
            name: "createdTime",
            family: OptionFamily::Mkfile,
            params: &[ParamKind::Timestamp],
            variadic: None,
            build: |_ctx, args| {
                Ok(OptionItem::Mkfile(MkfileOption::CreatedTime(args[0].timestamp()?)))
            },
        }),
        // option::rm
        Arc::new(OptionFn {
            name: "allowNotFound",
            family: OptionFamily::Rm,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Rm(RmOption::AllowNotFound)),
        }),
        Arc::new(OptionFn {
            name: "allowWildcard",
            family: OptionFamily::Rm,
            params: &[],
            variadic: None,
            build: |_ctx, _args| Ok(OptionItem::Rm(RmOption::AllowWildcard)),
        }),
    ]
}

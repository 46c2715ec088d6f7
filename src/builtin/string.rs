//! String Builtins
//!
//! String chains produce values directly: formatting, template expansion,
//! registry manifests, and probes of the local host (`localEnv`,
//! `localRun`, `localArch`, `localOs`, `localCwd`).

use std::sync::Arc;

use async_trait::async_trait;

use crate::ast::{Kind, OptionFamily};
use crate::codegen::CodegenError;
use crate::options::{OptionItem, RunOption, TemplateOption};
use crate::value::Value;

use super::{shlex_split, CallContext, Callable, OptionFn, ParamKind, Signature};

pub(crate) fn option_fns() -> Vec<Arc<dyn Callable>> {
    vec![Arc::new(OptionFn {
        name: "stringField",
        family: OptionFamily::Template,
        params: &[ParamKind::String, ParamKind::String],
        variadic: None,
        build: |_ctx, args| {
            Ok(OptionItem::Template(TemplateOption::StringField {
                name: args[0].string()?,
                value: args[1].string()?,
            }))
        },
    })]
}

pub struct Format;

#[async_trait]
impl Callable for Format {
    fn name(&self) -> &'static str {
        "format"
    }

    fn signature(&self) -> Signature {
        Signature::variadic(Kind::String, &[ParamKind::String], ParamKind::String)
    }

    async fn call(
        &self,
        _ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let pattern = args[0].string()?;
        let values: Vec<String> = args[1..].iter().map(|a| a.string()).collect::<Result<_, _>>()?;
        Ok(Value::String(format_pattern(&pattern, &values)?))
    }
}

/// Substitute `%s`/`%d`/`%v` verbs in order; `%%` is a literal percent.
fn format_pattern(pattern: &str, values: &[String]) -> Result<String, CodegenError> {
    let mut out = String::with_capacity(pattern.len());
    let mut values = values.iter();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') | Some('d') | Some('v') => match values.next() {
                Some(value) => out.push_str(value),
                None => {
                    return Err(CodegenError::InvalidArg {
                        message: format!("format '{}' has more verbs than arguments", pattern),
                    })
                }
            },
            Some(other) => {
                return Err(CodegenError::InvalidArg {
                    message: format!("unsupported format verb '%{}'", other),
                })
            }
            None => {
                return Err(CodegenError::InvalidArg {
                    message: format!("format '{}' ends with a bare %", pattern),
                })
            }
        }
    }
    if values.next().is_some() {
        return Err(CodegenError::InvalidArg {
            message: format!("format '{}' has fewer verbs than arguments", pattern),
        });
    }
    Ok(out)
}

pub struct Template;

#[async_trait]
impl Callable for Template {
    fn name(&self) -> &'static str {
        "template"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::String, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let text = args[0].string()?;
        let mut fields: Vec<(String, String)> = vec![];
        for item in &ctx.options {
            if let OptionItem::Template(TemplateOption::StringField { name, value }) = item {
                fields.push((name.clone(), value.clone()));
            }
        }
        Ok(Value::String(render_template(&text, &fields)?))
    }
}

/// Expand `{{.field}}` references against the declared string fields.
fn render_template(text: &str, fields: &[(String, String)]) -> Result<String, CodegenError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 2..];
        let close = tail.find("}}").ok_or_else(|| CodegenError::InvalidArg {
            message: format!("unclosed template action in '{}'", text),
        })?;
        let action = tail[..close].trim();
        let field = action.strip_prefix('.').ok_or_else(|| CodegenError::InvalidArg {
            message: format!("unsupported template action '{{{{{}}}}}'", action),
        })?;
        let value = fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
            .ok_or_else(|| CodegenError::InvalidArg {
                message: format!("template references undefined field '{}'", field),
            })?;
        out.push_str(value);
        rest = &tail[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

pub struct Manifest;

#[async_trait]
impl Callable for Manifest {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::String, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let reference = args[0].string()?;
        super::fs::check_image_ref(&reference)?;
        let mut platform = None;
        for item in &ctx.options {
            if let OptionItem::Image(crate::options::ImageOption::Platform { os, arch }) = item {
                platform =
                    Some(crate::llb::Platform { os: os.clone(), arch: arch.clone() });
            }
        }
        let (digest, config) =
            ctx.cg.resolver()?.resolve(&reference, platform.as_ref()).await?;
        let manifest = serde_json::json!({
            "digest": digest.as_str(),
            "config": config,
        });
        Ok(Value::String(manifest.to_string()))
    }
}

pub struct LocalArch;

#[async_trait]
impl Callable for LocalArch {
    fn name(&self) -> &'static str {
        "localArch"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::String, &[])
    }

    async fn call(
        &self,
        _ctx: &mut CallContext<'_>,
        _args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Ok(Value::String(arch.to_string()))
    }
}

pub struct LocalOs;

#[async_trait]
impl Callable for LocalOs {
    fn name(&self) -> &'static str {
        "localOs"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::String, &[])
    }

    async fn call(
        &self,
        _ctx: &mut CallContext<'_>,
        _args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        Ok(Value::String(std::env::consts::OS.to_string()))
    }
}

pub struct LocalCwd;

#[async_trait]
impl Callable for LocalCwd {
    fn name(&self) -> &'static str {
        "localCwd"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::String, &[])
    }

    async fn call(
        &self,
        _ctx: &mut CallContext<'_>,
        _args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let cwd = std::env::current_dir()?;
        Ok(Value::String(cwd.display().to_string()))
    }
}

pub struct LocalEnv;

#[async_trait]
impl Callable for LocalEnv {
    fn name(&self) -> &'static str {
        "localEnv"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::String, &[ParamKind::String])
    }

    async fn call(
        &self,
        _ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let name = args[0].string()?;
        Ok(Value::String(std::env::var(&name).unwrap_or_default()))
    }
}

pub struct LocalRun;

#[async_trait]
impl Callable for LocalRun {
    fn name(&self) -> &'static str {
        "localRun"
    }

    fn signature(&self) -> Signature {
        Signature::variadic(Kind::String, &[ParamKind::String], ParamKind::String)
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let parts: Vec<String> = args.iter().map(|a| a.string()).collect::<Result<_, _>>()?;
        let shlex = ctx
            .options
            .iter()
            .any(|o| matches!(o, OptionItem::Run(RunOption::Shlex)));
        let argv = if parts.len() == 1 && shlex {
            shlex_split(&parts[0])?
        } else if parts.len() == 1 {
            vec!["/bin/sh".to_string(), "-c".to_string(), parts[0].clone()]
        } else {
            parts
        };
        let (program, rest) = argv.split_first().ok_or_else(|| CodegenError::InvalidArg {
            message: "localRun requires a command".to_string(),
        })?;

        let output = tokio::process::Command::new(program).args(rest).output().await?;
        if !output.status.success() {
            return Err(CodegenError::InvalidArg {
                message: format!(
                    "localRun '{}' exited with status {}",
                    program,
                    output.status.code().unwrap_or(-1)
                ),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Value::String(stdout.trim_end_matches('\n').to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pattern() {
        let values = vec!["alpine".to_string(), "3.18".to_string()];
        assert_eq!(format_pattern("%s:%s", &values).unwrap(), "alpine:3.18");
        assert_eq!(format_pattern("100%%", &[]).unwrap(), "100%");
        assert!(format_pattern("%s %s %s", &values).is_err());
        assert!(format_pattern("%s", &values).is_err());
        assert!(format_pattern("%q", &values[..1].to_vec()).is_err());
    }

    #[test]
    fn test_render_template() {
        let fields = vec![("user".to_string(), "builder".to_string())];
        assert_eq!(render_template("echo hi {{.user}}", &fields).unwrap(), "echo hi builder");
        assert_eq!(render_template("{{ .user }}!", &fields).unwrap(), "builder!");
        assert!(render_template("{{.missing}}", &fields).is_err());
        assert!(render_template("{{.user", &fields).is_err());
        assert!(render_template("{{user}}", &fields).is_err());
    }
}

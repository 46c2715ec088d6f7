//! Builtins
//!
//! The builtin callables and their dispatch protocol. Each builtin declares
//! a signature against the canonical prototype - context, register, options,
//! then typed positional arguments with an optional variadic tail - and
//! receives its arguments as already-evaluated values. The adapter layer in
//! each `call` body marshals values to typed parameters; signature
//! compliance is validated once at registry bootstrap.

pub mod export;
pub mod fs;
pub mod opt_file;
pub mod opt_run;
pub mod opt_source;
pub mod pipeline;
pub mod registry;
pub mod string;

use async_trait::async_trait;

use crate::ast::{Kind, OptionFamily, Span};
use crate::codegen::binding::BindingCell;
use crate::codegen::{CodeGen, CodegenError};
use crate::options::OptionItem;
use crate::value::Value;

pub use registry::{registry, BuiltinRegistry};

/// Reflect-supported parameter types. Every positional argument of a
/// builtin must be one of these; the derived kinds are materialised from
/// the base kinds at the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    String,
    Filesystem,
    Pipeline,
    Option(Option<OptionFamily>),
    /// An octal file mode, from the int form.
    FileMode,
    /// A content digest, from the string form.
    Digest,
    /// An RFC-3339 timestamp, from the string form.
    Timestamp,
    /// An IP address, from the string form.
    Ip,
    /// A URL, from the string form.
    Url,
}

impl ParamKind {
    /// The expression kind the checker annotates arguments of this
    /// parameter with.
    pub fn expr_kind(&self) -> Kind {
        match self {
            ParamKind::Bool => Kind::Bool,
            ParamKind::Int | ParamKind::FileMode => Kind::Int,
            ParamKind::String | ParamKind::Digest | ParamKind::Timestamp | ParamKind::Ip
            | ParamKind::Url => Kind::String,
            ParamKind::Filesystem => Kind::Filesystem,
            ParamKind::Pipeline => Kind::Pipeline,
            ParamKind::Option(family) => Kind::Option(*family),
        }
    }
}

/// A builtin's declared signature.
#[derive(Debug, Clone)]
pub struct Signature {
    /// The chain kind the builtin registers under and returns.
    pub kind: Kind,
    pub params: &'static [ParamKind],
    pub variadic: Option<ParamKind>,
}

impl Signature {
    pub const fn new(kind: Kind, params: &'static [ParamKind]) -> Self {
        Self { kind, params, variadic: None }
    }

    pub const fn variadic(kind: Kind, params: &'static [ParamKind], tail: ParamKind) -> Self {
        Self { kind, params, variadic: Some(tail) }
    }

    /// Check an argument count against the declared arity.
    pub fn check_arity(&self, name: &str, actual: usize) -> Result<(), CodegenError> {
        let min = self.params.len();
        if actual < min || (self.variadic.is_none() && actual > min) {
            return Err(CodegenError::WrongArity { name: name.to_string(), expected: min, actual });
        }
        Ok(())
    }
}

/// The write end of a binding consumed by a builtin with a named
/// side-output (exports binding `digest`).
#[derive(Debug, Clone)]
pub struct BindingHandle {
    pub target: String,
    pub cell: BindingCell,
}

/// Evaluation context handed to a builtin: the engine, the call site, the
/// current register value, and the options accumulated from the `with`
/// clause.
pub struct CallContext<'a> {
    pub cg: &'a mut CodeGen,
    pub span: Span,
    pub register: Value,
    pub options: Vec<OptionItem>,
    /// Set when the statement binds this builtin's named side-output; the
    /// builtin writes the cell itself.
    pub binding: Option<BindingHandle>,
    /// Whether the statement carries any `as` clause at all.
    pub has_binding: bool,
}

/// A registered callable: a builtin, uniform under the dispatch protocol.
#[async_trait]
pub trait Callable: Send + Sync {
    fn name(&self) -> &'static str;

    fn signature(&self) -> Signature;

    /// The named side-output an `as` clause on this builtin binds, if any.
    fn bind_output(&self) -> Option<&'static str> {
        None
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError>;
}

/// A declaratively-defined option builtin: appends one record of its family
/// to the option register. The `build` adapter marshals the evaluated
/// arguments (and the call's own sub-options) into the record.
pub struct OptionFn {
    pub name: &'static str,
    pub family: OptionFamily,
    pub params: &'static [ParamKind],
    pub variadic: Option<ParamKind>,
    pub build: fn(&mut CallContext<'_>, &[Value]) -> Result<OptionItem, CodegenError>,
}

#[async_trait]
impl Callable for OptionFn {
    fn name(&self) -> &'static str {
        self.name
    }

    fn signature(&self) -> Signature {
        Signature {
            kind: Kind::Option(Some(self.family)),
            params: self.params,
            variadic: self.variadic,
        }
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let mut items = ctx.register.option()?;
        let item = (self.build)(ctx, &args)?;
        items.push(item);
        Ok(Value::Option(items))
    }
}

/// Split a command string into argv with shell lexing rules: whitespace
/// separates words; single quotes are literal; double quotes allow `\"` and
/// `\\` escapes; a bare backslash escapes the next character.
pub fn shlex_split(input: &str) -> Result<Vec<String>, CodegenError> {
    let mut words = vec![];
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\n' => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => {
                            return Err(CodegenError::InvalidArg {
                                message: format!("unterminated single quote in '{}'", input),
                            })
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(e @ ('"' | '\\' | '$')) => word.push(e),
                            Some(e) => {
                                word.push('\\');
                                word.push(e);
                            }
                            None => {
                                return Err(CodegenError::InvalidArg {
                                    message: format!("unterminated double quote in '{}'", input),
                                })
                            }
                        },
                        Some(c) => word.push(c),
                        None => {
                            return Err(CodegenError::InvalidArg {
                                message: format!("unterminated double quote in '{}'", input),
                            })
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(e) => word.push(e),
                    None => {
                        return Err(CodegenError::InvalidArg {
                            message: format!("trailing backslash in '{}'", input),
                        })
                    }
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shlex_basic_split() {
        assert_eq!(shlex_split("echo hi").unwrap(), vec!["echo", "hi"]);
        assert_eq!(shlex_split("  a   b  ").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_shlex_quotes() {
        assert_eq!(shlex_split("echo 'a b' c").unwrap(), vec!["echo", "a b", "c"]);
        assert_eq!(shlex_split(r#"echo "a \"b\"""#).unwrap(), vec!["echo", "a \"b\""]);
        assert_eq!(shlex_split("echo ''").unwrap(), vec!["echo", ""]);
    }

    #[test]
    fn test_shlex_escapes() {
        assert_eq!(shlex_split(r"echo a\ b").unwrap(), vec!["echo", "a b"]);
        assert!(shlex_split("echo 'open").is_err());
        assert!(shlex_split("echo \\").is_err());
    }

    #[test]
    fn test_arity_check() {
        let sig = Signature::new(Kind::Filesystem, &[ParamKind::String]);
        assert!(sig.check_arity("image", 1).is_ok());
        assert!(sig.check_arity("image", 0).is_err());
        assert!(sig.check_arity("image", 2).is_err());

        let var = Signature::variadic(Kind::Filesystem, &[], ParamKind::String);
        assert!(var.check_arity("run", 0).is_ok());
        assert!(var.check_arity("run", 5).is_ok());
    }
}

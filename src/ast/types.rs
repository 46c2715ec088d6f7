//! AST Types for HLB
//!
//! This module defines the AST structure for HLB modules as the codegen
//! engine consumes it. Nodes arrive from the parser already annotated by the
//! type checker: every expression carries a `Kind`, arities are validated,
//! and chains are kind-compatible. Codegen assumes well-typed input.

use std::fmt;
use std::sync::Arc;

// =============================================================================
// BASE TYPES
// =============================================================================

/// Position information for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self { line, column, offset }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Span in source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn point(pos: Position) -> Self {
        Self { start: pos, end: pos }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)
    }
}

/// Option record families; the qualified form of an option kind
/// (`option::run`, `option::copy`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionFamily {
    Image,
    Http,
    Git,
    Local,
    Frontend,
    Run,
    Mount,
    Copy,
    Mkdir,
    Mkfile,
    Rm,
    Secret,
    Ssh,
    Template,
}

impl OptionFamily {
    /// Every family, for ambiguity checks over unqualified option lookups.
    pub const ALL: [OptionFamily; 14] = [
        OptionFamily::Image,
        OptionFamily::Http,
        OptionFamily::Git,
        OptionFamily::Local,
        OptionFamily::Frontend,
        OptionFamily::Run,
        OptionFamily::Mount,
        OptionFamily::Copy,
        OptionFamily::Mkdir,
        OptionFamily::Mkfile,
        OptionFamily::Rm,
        OptionFamily::Secret,
        OptionFamily::Ssh,
        OptionFamily::Template,
    ];

    /// The `<parent-call>` builtin name this family qualifies.
    pub fn parent(&self) -> &'static str {
        match self {
            OptionFamily::Image => "image",
            OptionFamily::Http => "http",
            OptionFamily::Git => "git",
            OptionFamily::Local => "local",
            OptionFamily::Frontend => "frontend",
            OptionFamily::Run => "run",
            OptionFamily::Mount => "mount",
            OptionFamily::Copy => "copy",
            OptionFamily::Mkdir => "mkdir",
            OptionFamily::Mkfile => "mkfile",
            OptionFamily::Rm => "rm",
            OptionFamily::Secret => "secret",
            OptionFamily::Ssh => "ssh",
            OptionFamily::Template => "template",
        }
    }

    /// Look up a family by its parent builtin name.
    pub fn from_parent(name: &str) -> Option<Self> {
        match name {
            "image" | "manifest" => Some(OptionFamily::Image),
            "http" => Some(OptionFamily::Http),
            "git" => Some(OptionFamily::Git),
            "local" => Some(OptionFamily::Local),
            "frontend" => Some(OptionFamily::Frontend),
            "run" | "localRun" => Some(OptionFamily::Run),
            "mount" => Some(OptionFamily::Mount),
            "copy" => Some(OptionFamily::Copy),
            "mkdir" => Some(OptionFamily::Mkdir),
            "mkfile" => Some(OptionFamily::Mkfile),
            "rm" => Some(OptionFamily::Rm),
            "secret" => Some(OptionFamily::Secret),
            "ssh" => Some(OptionFamily::Ssh),
            "template" => Some(OptionFamily::Template),
            _ => None,
        }
    }
}

impl fmt::Display for OptionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "option::{}", self.parent())
    }
}

/// Coarse-grained value type attached to expressions by the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Bool,
    Int,
    String,
    Filesystem,
    Pipeline,
    /// `None` is the generic `option` kind; `Some(family)` is the qualified
    /// `option::<parent>` kind.
    Option(Option<OptionFamily>),
}

impl Kind {
    /// Whether a value of this kind satisfies a parameter declared as `other`.
    /// A qualified option kind satisfies the generic `option`.
    pub fn matches(&self, other: &Kind) -> bool {
        match (self, other) {
            (Kind::Option(_), Kind::Option(None)) => true,
            (Kind::Option(None), Kind::Option(_)) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Bool => write!(f, "bool"),
            Kind::Int => write!(f, "int"),
            Kind::String => write!(f, "string"),
            Kind::Filesystem => write!(f, "fs"),
            Kind::Pipeline => write!(f, "group"),
            Kind::Option(None) => write!(f, "option"),
            Kind::Option(Some(fam)) => write!(f, "{}", fam),
        }
    }
}

// =============================================================================
// MODULE & DECLARATIONS
// =============================================================================

/// Root node: a complete HLB module.
#[derive(Debug, Clone)]
pub struct Module {
    /// Source filename, for diagnostics.
    pub filename: String,
    pub decls: Vec<Decl>,
}

impl Module {
    /// All function declarations in the module.
    pub fn funcs(&self) -> impl Iterator<Item = &Arc<FuncDecl>> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Func(f) => Some(f),
            _ => None,
        })
    }

    /// Find a function declaration by name.
    pub fn func(&self, name: &str) -> Option<&Arc<FuncDecl>> {
        self.funcs().find(|f| f.name.text == name)
    }

    /// All import declarations in the module.
    pub fn imports(&self) -> impl Iterator<Item = &Arc<ImportDecl>> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Import(i) => Some(i),
            _ => None,
        })
    }
}

/// Union of top-level declarations.
#[derive(Debug, Clone)]
pub enum Decl {
    Import(Arc<ImportDecl>),
    Export(ExportDecl),
    Func(Arc<FuncDecl>),
}

/// `import name "path"` - binds a foreign module's exported scope.
#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub name: Ident,
    /// Module URI as written; fetching is the import loader's concern.
    pub path: String,
    pub span: Span,
}

/// `export name` - marks a declaration visible through imports.
#[derive(Debug, Clone)]
pub struct ExportDecl {
    pub name: Ident,
    pub span: Span,
}

/// A function declaration: `fs build(string ref) { ... }`
#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub kind: Kind,
    pub name: Ident,
    pub params: Vec<FieldDecl>,
    pub body: BlockStmt,
    pub span: Span,
}

/// A typed function parameter. The final parameter may be variadic.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub kind: Kind,
    pub name: Ident,
    pub variadic: bool,
    pub span: Span,
}

/// An identifier with its source span.
#[derive(Debug, Clone)]
pub struct Ident {
    pub text: String,
    pub span: Span,
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

// =============================================================================
// STATEMENTS
// =============================================================================

/// A function body: a block of statements sharing the function's kind.
#[derive(Debug, Clone)]
pub struct BlockStmt {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl BlockStmt {
    /// Statements that actually execute, skipping bare semicolons.
    pub fn non_empty_stmts(&self) -> impl Iterator<Item = &CallStmt> {
        self.stmts.iter().filter_map(|s| match s {
            Stmt::Call(c) => Some(c),
            Stmt::Empty(_) => None,
        })
    }
}

/// A statement inside a block.
#[derive(Debug, Clone)]
pub enum Stmt {
    Call(CallStmt),
    /// A bare semicolon.
    Empty(Span),
}

/// One call in a chain: `run "make" with option { dir "/src"; } as built`
#[derive(Debug, Clone)]
pub struct CallStmt {
    pub name: CallName,
    pub args: Vec<Expr>,
    /// Trailing `with <option expr>`.
    pub with: Option<Expr>,
    /// Trailing `as <binding>`.
    pub binding: Option<BindClause>,
    pub span: Span,
}

impl CallStmt {
    /// The unqualified callee name.
    pub fn head(&self) -> &str {
        match &self.name {
            CallName::Ident(i) => &i.text,
            CallName::Selector { field, .. } => &field.text,
        }
    }
}

/// Callee reference: a plain identifier or an import selector.
#[derive(Debug, Clone)]
pub enum CallName {
    Ident(Ident),
    Selector { module: Ident, field: Ident },
}

impl fmt::Display for CallName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallName::Ident(i) => write!(f, "{}", i.text),
            CallName::Selector { module, field } => write!(f, "{}.{}", module.text, field.text),
        }
    }
}

/// `as name` or `as (source target, ...)` - names sub-results of a call so
/// they are addressable from outside the function once computed.
#[derive(Debug, Clone)]
pub struct BindClause {
    pub targets: Vec<BindTarget>,
    pub span: Span,
}

impl BindClause {
    /// The default binding target, for the plain `as name` form.
    pub fn default_target(&self) -> Option<&BindTarget> {
        self.targets.iter().find(|t| t.source.is_none())
    }

    /// The target bound to a named side-output, e.g. `digest` on exports.
    pub fn source_target(&self, source: &str) -> Option<&BindTarget> {
        self.targets
            .iter()
            .find(|t| t.source.as_ref().map(|s| s.text.as_str()) == Some(source))
    }
}

/// One `source -> target` pair inside a bind clause. `source` is `None` for
/// the plain `as name` form, which binds the statement's own value.
#[derive(Debug, Clone)]
pub struct BindTarget {
    pub source: Option<Ident>,
    pub target: Ident,
}

// =============================================================================
// EXPRESSIONS
// =============================================================================

/// Union of all expression types. The checker annotates each with a kind.
#[derive(Debug, Clone)]
pub enum Expr {
    Bool(BoolLit),
    Int(IntLit),
    Str(StringLit),
    Heredoc(Heredoc),
    FuncLit(FuncLit),
    /// A named reference, possibly with arguments: `command`, `build "x"`,
    /// `util.tester`.
    Call(CallExpr),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Bool(e) => e.span,
            Expr::Int(e) => e.span,
            Expr::Str(e) => e.span,
            Expr::Heredoc(e) => e.span,
            Expr::FuncLit(e) => e.span,
            Expr::Call(e) => e.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoolLit {
    pub value: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct IntLit {
    pub value: i64,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StringLit {
    pub value: String,
    pub span: Span,
}

/// An anonymous block expression: `fs { image "alpine"; }` or
/// `option { dir "/src"; }`.
#[derive(Debug, Clone)]
pub struct FuncLit {
    pub kind: Kind,
    pub body: BlockStmt,
    pub span: Span,
}

/// A reference to a declaration, with any call arguments and `with` clause.
#[derive(Debug, Clone)]
pub struct CallExpr {
    pub name: CallName,
    pub args: Vec<Expr>,
    pub with: Option<Box<Expr>>,
    pub span: Span,
}

// =============================================================================
// HERE-DOCS
// =============================================================================

/// Here-doc opening style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeredocStyle {
    /// `<<EOM`: body kept verbatim.
    Plain,
    /// `<<-EOM`: common leading indentation stripped per line.
    Dedent,
    /// `<<~EOM`: indentation stripped and lines folded into one with single
    /// spaces.
    Fold,
}

/// A here-doc string literal. The raw body is kept as written (minus the
/// delimiters); [`Heredoc::value`] applies the style's folding and the
/// escape conventions.
#[derive(Debug, Clone)]
pub struct Heredoc {
    pub style: HeredocStyle,
    pub body: String,
    pub span: Span,
}

impl Heredoc {
    /// Materialize the literal bytes of the here-doc.
    pub fn value(&self) -> String {
        let unescaped = unescape_heredoc(&self.body);
        match self.style {
            HeredocStyle::Plain => unescaped,
            HeredocStyle::Dedent => dedent(&unescaped),
            HeredocStyle::Fold => fold_lines(&dedent(&unescaped)),
        }
    }
}

/// Process here-doc escapes: `\$` yields a literal `$`, `\\` a literal
/// backslash. Everything else is kept as written.
fn unescape_heredoc(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('$') => {
                    out.push('$');
                    chars.next();
                }
                Some('\\') => {
                    out.push('\\');
                    chars.next();
                }
                _ => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Strip the longest common leading whitespace from every non-blank line.
fn dedent(body: &str) -> String {
    let indent = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    body.lines()
        .map(|l| if l.len() >= indent { &l[indent..] } else { l.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Join all lines into one, separating with single spaces. Blank lines are
/// dropped.
fn fold_lines(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn heredoc(style: HeredocStyle, body: &str) -> Heredoc {
        Heredoc { style, body: body.to_string(), span: Span::default() }
    }

    #[test]
    fn test_heredoc_plain_keeps_body() {
        let h = heredoc(HeredocStyle::Plain, "  line one\n  line two");
        assert_eq!(h.value(), "  line one\n  line two");
    }

    #[test]
    fn test_heredoc_dedent_strips_indent() {
        let h = heredoc(HeredocStyle::Dedent, "    a\n      b\n    c");
        assert_eq!(h.value(), "a\n  b\nc");
    }

    #[test]
    fn test_heredoc_fold_joins_lines() {
        let h = heredoc(HeredocStyle::Fold, "  Escape \\${PATH}\n  and more");
        assert_eq!(h.value(), "Escape ${PATH} and more");
    }

    #[test]
    fn test_heredoc_escape_dollar() {
        let h = heredoc(HeredocStyle::Plain, "Escape \\${PATH}");
        assert_eq!(h.value(), "Escape ${PATH}");
    }

    #[test]
    fn test_kind_option_matching() {
        let generic = Kind::Option(None);
        let run = Kind::Option(Some(OptionFamily::Run));
        assert!(run.matches(&generic));
        assert!(generic.matches(&run));
        assert!(!run.matches(&Kind::Option(Some(OptionFamily::Copy))));
        assert!(!Kind::String.matches(&Kind::Int));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(Kind::Filesystem.to_string(), "fs");
        assert_eq!(Kind::Pipeline.to_string(), "group");
        assert_eq!(Kind::Option(Some(OptionFamily::Run)).to_string(), "option::run");
    }

    #[test]
    fn test_non_empty_stmts_skips_empties() {
        let block = BlockStmt {
            stmts: vec![
                Stmt::Empty(Span::default()),
                Stmt::Call(CallStmt {
                    name: CallName::Ident(Ident { text: "scratch".into(), span: Span::default() }),
                    args: vec![],
                    with: None,
                    binding: None,
                    span: Span::default(),
                }),
                Stmt::Empty(Span::default()),
            ],
            span: Span::default(),
        };
        assert_eq!(block.non_empty_stmts().count(), 1);
    }
}

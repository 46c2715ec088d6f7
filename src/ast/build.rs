//! AST construction helpers.
//!
//! Convenience constructors for assembling checked modules by hand. The
//! parser has its own richer builders; these cover what embedding code and
//! tests need without threading spans everywhere.

use std::sync::Arc;

use super::types::*;

pub fn ident(text: &str) -> Ident {
    Ident { text: text.to_string(), span: Span::default() }
}

pub fn ident_at(text: &str, line: usize, column: usize) -> Ident {
    let pos = Position::new(line, column, 0);
    Ident { text: text.to_string(), span: Span::point(pos) }
}

pub fn module(filename: &str, decls: Vec<Decl>) -> Module {
    Module { filename: filename.to_string(), decls }
}

pub fn func(kind: Kind, name: &str, params: Vec<FieldDecl>, stmts: Vec<Stmt>) -> Decl {
    Decl::Func(Arc::new(FuncDecl {
        kind,
        name: ident(name),
        params,
        body: BlockStmt { stmts, span: Span::default() },
        span: Span::default(),
    }))
}

pub fn import(name: &str, path: &str) -> Decl {
    Decl::Import(Arc::new(ImportDecl {
        name: ident(name),
        path: path.to_string(),
        span: Span::default(),
    }))
}

pub fn export(name: &str) -> Decl {
    Decl::Export(ExportDecl { name: ident(name), span: Span::default() })
}

pub fn param(kind: Kind, name: &str) -> FieldDecl {
    FieldDecl { kind, name: ident(name), variadic: false, span: Span::default() }
}

pub fn variadic(kind: Kind, name: &str) -> FieldDecl {
    FieldDecl { kind, name: ident(name), variadic: true, span: Span::default() }
}

pub fn call(name: &str, args: Vec<Expr>) -> Stmt {
    Stmt::Call(call_stmt(name, args))
}

pub fn call_stmt(name: &str, args: Vec<Expr>) -> CallStmt {
    CallStmt {
        name: CallName::Ident(ident(name)),
        args,
        with: None,
        binding: None,
        span: Span::default(),
    }
}

/// A call statement positioned at `line`, for breakpoint tests.
pub fn call_at(name: &str, args: Vec<Expr>, line: usize) -> Stmt {
    let pos = Position::new(line, 1, 0);
    Stmt::Call(CallStmt {
        name: CallName::Ident(ident(name)),
        args,
        with: None,
        binding: None,
        span: Span::point(pos),
    })
}

pub fn call_with(name: &str, args: Vec<Expr>, with: Expr) -> Stmt {
    let mut stmt = call_stmt(name, args);
    stmt.with = Some(with);
    Stmt::Call(stmt)
}

pub fn call_bound(name: &str, args: Vec<Expr>, binding: BindClause) -> Stmt {
    let mut stmt = call_stmt(name, args);
    stmt.binding = Some(binding);
    Stmt::Call(stmt)
}

pub fn selector_call(module: &str, field: &str, args: Vec<Expr>) -> Stmt {
    Stmt::Call(CallStmt {
        name: CallName::Selector { module: ident(module), field: ident(field) },
        args,
        with: None,
        binding: None,
        span: Span::default(),
    })
}

/// `as name`
pub fn bind(name: &str) -> BindClause {
    BindClause {
        targets: vec![BindTarget { source: None, target: ident(name) }],
        span: Span::default(),
    }
}

/// `as (source target)`
pub fn bind_source(source: &str, target: &str) -> BindClause {
    BindClause {
        targets: vec![BindTarget { source: Some(ident(source)), target: ident(target) }],
        span: Span::default(),
    }
}

pub fn s(value: &str) -> Expr {
    Expr::Str(StringLit { value: value.to_string(), span: Span::default() })
}

pub fn i(value: i64) -> Expr {
    Expr::Int(IntLit { value, span: Span::default() })
}

pub fn b(value: bool) -> Expr {
    Expr::Bool(BoolLit { value, span: Span::default() })
}

pub fn heredoc(style: HeredocStyle, body: &str) -> Expr {
    Expr::Heredoc(Heredoc { style, body: body.to_string(), span: Span::default() })
}

pub fn func_lit(kind: Kind, stmts: Vec<Stmt>) -> Expr {
    Expr::FuncLit(FuncLit {
        kind,
        body: BlockStmt { stmts, span: Span::default() },
        span: Span::default(),
    })
}

/// A bare identifier reference used as an argument.
pub fn ref_(name: &str) -> Expr {
    Expr::Call(CallExpr {
        name: CallName::Ident(ident(name)),
        args: vec![],
        with: None,
        span: Span::default(),
    })
}

/// A reference with arguments: `build "x" "y"`.
pub fn ref_args(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        name: CallName::Ident(ident(name)),
        args,
        with: None,
        span: Span::default(),
    })
}

/// An import selector reference: `util.tester`.
pub fn ref_selector(module: &str, field: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        name: CallName::Selector { module: ident(module), field: ident(field) },
        args,
        with: None,
        span: Span::default(),
    })
}

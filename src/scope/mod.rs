//! Scopes
//!
//! Hierarchical identifier resolution. A scope tree roots at a module, with
//! children at import, function, and block levels; lookup walks the parent
//! chain. Imports hold the foreign module's exported scope, so selector
//! resolution is two-step: local lookup finds the import, then the trailing
//! identifier resolves in the foreign scope.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{Decl, FieldDecl, FuncDecl, ImportDecl, Module, Span, Stmt};
use crate::codegen::errors::CodegenError;
use crate::value::Value;

/// Level of a scope in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeLevel {
    Module,
    Import,
    Function,
    Block,
}

/// A binding declared by `... as name` inside a function body. Identity is
/// the bind-clause position.
#[derive(Debug, Clone)]
pub struct BindingRef {
    /// The function whose evaluation computes the binding.
    pub func: Arc<FuncDecl>,
    /// The bound identifier.
    pub target: String,
    pub span: Span,
}

/// What a scope entry points at.
#[derive(Debug, Clone)]
pub enum ObjNode {
    Func(Arc<FuncDecl>),
    Bind(BindingRef),
    Import { decl: Arc<ImportDecl>, scope: Arc<Scope> },
    Field(FieldDecl),
}

/// An entry in a scope: its declaration node and, for fields, the bound
/// argument data.
#[derive(Debug, Clone)]
pub struct Object {
    pub node: ObjNode,
    pub data: Option<Value>,
}

impl Object {
    pub fn func(decl: Arc<FuncDecl>) -> Self {
        Self { node: ObjNode::Func(decl), data: None }
    }

    pub fn binding(binding: BindingRef) -> Self {
        Self { node: ObjNode::Bind(binding), data: None }
    }

    pub fn import(decl: Arc<ImportDecl>, scope: Arc<Scope>) -> Self {
        Self { node: ObjNode::Import { decl, scope }, data: None }
    }

    pub fn field(decl: FieldDecl, data: Value) -> Self {
        Self { node: ObjNode::Field(decl), data: Some(data) }
    }
}

/// One scope in the tree. Scopes are built fully before use and immutable
/// afterwards.
#[derive(Debug, Clone)]
pub struct Scope {
    pub level: ScopeLevel,
    parent: Option<Arc<Scope>>,
    objects: HashMap<String, Object>,
}

impl Scope {
    pub fn root(level: ScopeLevel) -> Self {
        Self { level, parent: None, objects: HashMap::new() }
    }

    pub fn child(parent: Arc<Scope>, level: ScopeLevel) -> Self {
        Self { level, parent: Some(parent), objects: HashMap::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, obj: Object) {
        self.objects.insert(name.into(), obj);
    }

    /// Walk the parent chain for an identifier.
    pub fn lookup(&self, name: &str) -> Option<&Object> {
        match self.objects.get(name) {
            Some(obj) => Some(obj),
            None => self.parent.as_deref().and_then(|p| p.lookup(name)),
        }
    }

    /// Lookup scoped to this level only, without walking parents.
    pub fn lookup_local(&self, name: &str) -> Option<&Object> {
        self.objects.get(name)
    }

    /// The topmost scope in this chain, where module declarations live.
    pub fn module_root(self: &Arc<Self>) -> Arc<Self> {
        let mut cur = self.clone();
        while let Some(parent) = cur.parent.clone() {
            cur = parent;
        }
        cur
    }
}

/// Build a module's scope. `imports` maps import names to the foreign
/// modules' exported scopes; a missing entry is an undefined reference at
/// the import declaration.
pub fn module_scope(
    module: &Module,
    imports: &HashMap<String, Arc<Scope>>,
) -> Result<Arc<Scope>, CodegenError> {
    let mut scope = Scope::root(ScopeLevel::Module);
    for decl in &module.decls {
        match decl {
            Decl::Func(func) => {
                scope.insert(func.name.text.clone(), Object::func(func.clone()));
                insert_bindings(&mut scope, func);
            }
            Decl::Import(import) => {
                let foreign = imports.get(&import.name.text).cloned().ok_or_else(|| {
                    CodegenError::UndefinedReference {
                        name: import.name.text.clone(),
                        span: import.span,
                    }
                })?;
                scope.insert(import.name.text.clone(), Object::import(import.clone(), foreign));
            }
            Decl::Export(_) => {}
        }
    }
    Ok(Arc::new(scope))
}

/// Build the scope a foreign module presents to importers: exported
/// declarations only.
pub fn exported_scope(
    module: &Module,
    imports: &HashMap<String, Arc<Scope>>,
) -> Result<Arc<Scope>, CodegenError> {
    let exported: Vec<&str> = module
        .decls
        .iter()
        .filter_map(|d| match d {
            Decl::Export(e) => Some(e.name.text.as_str()),
            _ => None,
        })
        .collect();

    let full = module_scope(module, imports)?;
    let mut scope = Scope::root(ScopeLevel::Import);
    for name in exported {
        if let Some(obj) = full.lookup(name) {
            scope.insert(name, obj.clone());
        }
    }
    Ok(Arc::new(scope))
}

/// Register the bindings a function's body declares, addressable at module
/// level once computed.
fn insert_bindings(scope: &mut Scope, func: &Arc<FuncDecl>) {
    for stmt in &func.body.stmts {
        let call = match stmt {
            Stmt::Call(call) => call,
            Stmt::Empty(_) => continue,
        };
        if let Some(clause) = &call.binding {
            for target in &clause.targets {
                scope.insert(
                    target.target.text.clone(),
                    Object::binding(BindingRef {
                        func: func.clone(),
                        target: target.target.text.clone(),
                        span: clause.span,
                    }),
                );
            }
        }
    }
}

/// Build a callee scope: a fresh function-level child with each parameter
/// bound to its argument data. Argument identifiers shadow outer
/// declarations only inside the callee.
pub fn function_scope(parent: Arc<Scope>, func: &FuncDecl, args: Vec<Value>) -> Arc<Scope> {
    let mut scope = Scope::child(parent, ScopeLevel::Function);
    for (param, arg) in func.params.iter().zip(args) {
        scope.insert(param.name.text.clone(), Object::field(param.clone(), arg));
    }
    Arc::new(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build;
    use crate::ast::Kind;

    fn sample_module() -> Module {
        build::module(
            "build.hlb",
            vec![
                build::func(Kind::Filesystem, "default", vec![], vec![build::call("scratch", vec![])]),
                build::func(
                    Kind::Filesystem,
                    "pushed",
                    vec![],
                    vec![build::call_bound("dockerPush", vec![build::s("x")], build::bind("ref"))],
                ),
                build::export("default"),
            ],
        )
    }

    #[test]
    fn test_module_scope_holds_funcs_and_bindings() {
        let scope = module_scope(&sample_module(), &HashMap::new()).unwrap();
        assert!(matches!(scope.lookup("default"), Some(Object { node: ObjNode::Func(_), .. })));
        assert!(matches!(scope.lookup("ref"), Some(Object { node: ObjNode::Bind(_), .. })));
        assert!(scope.lookup("missing").is_none());
    }

    #[test]
    fn test_exported_scope_filters() {
        let scope = exported_scope(&sample_module(), &HashMap::new()).unwrap();
        assert!(scope.lookup("default").is_some());
        assert!(scope.lookup("pushed").is_none());
    }

    #[test]
    fn test_missing_import_is_undefined_reference() {
        let module = build::module("build.hlb", vec![build::import("util", "./util.hlb")]);
        let err = module_scope(&module, &HashMap::new()).unwrap_err();
        assert!(matches!(err, CodegenError::UndefinedReference { name, .. } if name == "util"));
    }

    #[test]
    fn test_field_shadows_outer_declaration() {
        let module = sample_module();
        let outer = module_scope(&module, &HashMap::new()).unwrap();
        let func = module.func("default").unwrap().clone();
        let shadowing = FuncDecl {
            params: vec![build::param(Kind::String, "default")],
            ..(*func).clone()
        };
        let scope = function_scope(outer, &shadowing, vec![Value::String("inner".into())]);
        match scope.lookup("default") {
            Some(Object { node: ObjNode::Field(_), data: Some(Value::String(s)) }) => {
                assert_eq!(s, "inner");
            }
            other => panic!("expected shadowing field, got {:?}", other),
        }
    }

    #[test]
    fn test_parent_chain_lookup() {
        let module = sample_module();
        let root = module_scope(&module, &HashMap::new()).unwrap();
        let child = Arc::new(Scope::child(root, ScopeLevel::Block));
        assert!(child.lookup("default").is_some());
        assert!(child.lookup_local("default").is_none());
    }
}

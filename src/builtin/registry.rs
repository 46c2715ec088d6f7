//! Builtin Registry
//!
//! The static dispatch table mapping `(kind, name)` to a callable. Built
//! once at first use and validated as it is built: a duplicate entry or an
//! unqualified option registration is a bootstrap bug and panics. This is
//! the only panic the engine is permitted.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::Kind;

use super::{export, fs, opt_file, opt_run, opt_source, pipeline, string, Callable};

pub struct BuiltinRegistry {
    map: HashMap<(Kind, &'static str), Arc<dyn Callable>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut reg = Self { map: HashMap::new() };

        // fs sources and mutations
        reg.register(Arc::new(fs::Scratch));
        reg.register(Arc::new(fs::Image));
        reg.register(Arc::new(fs::Http));
        reg.register(Arc::new(fs::Git));
        reg.register(Arc::new(fs::Local));
        reg.register(Arc::new(fs::Frontend));
        reg.register(Arc::new(fs::Run));
        reg.register(Arc::new(fs::Env));
        reg.register(Arc::new(fs::Dir));
        reg.register(Arc::new(fs::User));
        reg.register(Arc::new(fs::Entrypoint));
        reg.register(Arc::new(fs::Cmd));
        reg.register(Arc::new(fs::Label));
        reg.register(Arc::new(fs::Expose));
        reg.register(Arc::new(fs::Volumes));
        reg.register(Arc::new(fs::StopSignal));
        reg.register(Arc::new(fs::Mkdir));
        reg.register(Arc::new(fs::Mkfile));
        reg.register(Arc::new(fs::Rm));
        reg.register(Arc::new(fs::Copy));
        reg.register(Arc::new(fs::Merge));
        reg.register(Arc::new(fs::Diff));

        // fs exports
        reg.register(Arc::new(export::DockerPush));
        reg.register(Arc::new(export::DockerLoad));
        reg.register(Arc::new(export::Download));
        reg.register(Arc::new(export::DownloadTarball));
        reg.register(Arc::new(export::DownloadOCITarball));
        reg.register(Arc::new(export::DownloadDockerTarball));

        // string
        reg.register(Arc::new(string::Format));
        reg.register(Arc::new(string::Template));
        reg.register(Arc::new(string::Manifest));
        reg.register(Arc::new(string::LocalArch));
        reg.register(Arc::new(string::LocalOs));
        reg.register(Arc::new(string::LocalCwd));
        reg.register(Arc::new(string::LocalEnv));
        reg.register(Arc::new(string::LocalRun));

        // pipeline
        reg.register(Arc::new(pipeline::Parallel));
        reg.register(Arc::new(pipeline::Stage));

        // option families
        for callable in opt_source::all() {
            reg.register(callable);
        }
        for callable in opt_run::all() {
            reg.register(callable);
        }
        for callable in opt_file::all() {
            reg.register(callable);
        }
        for callable in string::option_fns() {
            reg.register(callable);
        }

        reg
    }

    /// Register one callable, validating its signature against the
    /// canonical prototype. Registration failure is fatal at program start.
    fn register(&mut self, callable: Arc<dyn Callable>) {
        let name = callable.name();
        let sig = callable.signature();
        assert!(!name.is_empty(), "builtin registry: empty name");
        assert!(
            !matches!(sig.kind, Kind::Option(None)),
            "builtin registry: '{}' must register under a qualified option family",
            name,
        );
        let previous = self.map.insert((sig.kind, name), callable);
        assert!(
            previous.is_none(),
            "builtin registry: duplicate registration of {} '{}'",
            sig.kind,
            name,
        );
    }

    /// Resolve a callable from the chain kind and the unqualified name.
    pub fn lookup<'a>(&'a self, kind: Kind, name: &'a str) -> Option<&'a Arc<dyn Callable>> {
        self.map.get(&(kind, name))
    }

    /// Resolve an option builtin without a family qualifier, as happens in
    /// a generic `option` chain. A name present in more than one family is
    /// ambiguous.
    pub fn lookup_unqualified_option<'a>(
        &'a self,
        name: &'a str,
    ) -> Result<Option<&'a Arc<dyn Callable>>, crate::codegen::CodegenError> {
        let mut found = None;
        for family in crate::ast::OptionFamily::ALL {
            if let Some(callable) = self.map.get(&(Kind::Option(Some(family)), name)) {
                if found.is_some() {
                    return Err(crate::codegen::CodegenError::AmbiguousCallable {
                        name: name.to_string(),
                    });
                }
                found = Some(callable);
            }
        }
        Ok(found)
    }

    pub fn contains(&self, kind: Kind, name: &str) -> bool {
        self.lookup(kind, name).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    static ref REGISTRY: BuiltinRegistry = BuiltinRegistry::new();
}

/// The process-wide registry, built once at first use.
pub fn registry() -> &'static BuiltinRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::OptionFamily;

    #[test]
    fn test_registry_builds_and_validates() {
        let reg = registry();
        assert!(!reg.is_empty());
    }

    #[test]
    fn test_lookup_by_kind_and_name() {
        let reg = registry();
        assert!(reg.contains(Kind::Filesystem, "image"));
        assert!(reg.contains(Kind::Filesystem, "dockerPush"));
        assert!(reg.contains(Kind::String, "localEnv"));
        assert!(reg.contains(Kind::Pipeline, "parallel"));
        assert!(!reg.contains(Kind::String, "image"));
    }

    #[test]
    fn test_unqualified_option_lookup() {
        let reg = registry();
        assert!(reg.lookup_unqualified_option("keepGitDir").unwrap().is_some());
        assert!(reg.lookup_unqualified_option("nonesuch").unwrap().is_none());
        // `chown` lives in several families; unqualified use is ambiguous.
        assert!(matches!(
            reg.lookup_unqualified_option("chown"),
            Err(crate::codegen::CodegenError::AmbiguousCallable { .. })
        ));
    }

    #[test]
    fn test_option_namespaces_are_disjoint() {
        let reg = registry();
        assert!(reg.contains(Kind::Option(Some(OptionFamily::Run)), "shlex"));
        assert!(reg.contains(Kind::Option(Some(OptionFamily::Mount)), "readonly"));
        // Same name, different families.
        assert!(reg.contains(Kind::Option(Some(OptionFamily::Copy)), "chown"));
        assert!(reg.contains(Kind::Option(Some(OptionFamily::Mkdir)), "chown"));
        assert!(!reg.contains(Kind::Option(Some(OptionFamily::Run)), "readonly"));
    }
}

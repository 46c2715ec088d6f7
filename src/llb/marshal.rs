//! Definition Marshalling
//!
//! Walks a state graph depth-first and emits a digest-addressed op list.
//! Marshalling is deterministic: payloads are canonical JSON (sorted keys),
//! inputs are replaced by their op digests, and shared subgraphs are
//! emitted once.

use std::collections::HashMap;
use std::fmt;

use serde_json::{json, Value as Json};
use sha2::{Digest as _, Sha256};

use super::state::{FileAction, Op, State, StateError};

/// A content digest in `sha256:<hex>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Digest raw bytes.
    pub fn sha256(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("sha256:{:x}", hasher.finalize()))
    }

    /// Parse a digest that arrived over the wire.
    pub fn parse(value: &str) -> Result<Self, StateError> {
        let hex = value
            .strip_prefix("sha256:")
            .ok_or_else(|| StateError::BadDigest { value: value.to_string() })?;
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StateError::BadDigest { value: value.to_string() });
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Digest::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A marshalled op: its canonical payload and the digest addressing it.
#[derive(Debug, Clone, PartialEq)]
pub struct MarshaledOp {
    pub digest: Digest,
    pub data: Json,
}

/// A marshalled state graph, ready to submit to the build daemon. Ops are in
/// dependency order; the final op is the output vertex.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Definition {
    pub ops: Vec<MarshaledOp>,
    /// Digest of the output vertex; `None` for scratch.
    pub root: Option<Digest>,
}

impl Definition {
    /// Digest of the whole definition, for request identity.
    pub fn digest(&self) -> Digest {
        match &self.root {
            Some(root) => root.clone(),
            None => Digest::sha256(b""),
        }
    }

    /// Look up a marshalled op by digest.
    pub fn op(&self, digest: &Digest) -> Option<&MarshaledOp> {
        self.ops.iter().find(|op| &op.digest == digest)
    }
}

impl State {
    /// Marshal the state graph into a [`Definition`]. Validates first, so a
    /// marshalled definition always has well-formed vertices.
    pub fn marshal(&self) -> Result<Definition, StateError> {
        self.validate()?;
        let mut def = Definition::default();
        let mut memo = HashMap::new();
        def.root = marshal_state(self, &mut def.ops, &mut memo);
        Ok(def)
    }
}

fn marshal_state(
    state: &State,
    ops: &mut Vec<MarshaledOp>,
    memo: &mut HashMap<*const Op, Digest>,
) -> Option<Digest> {
    let op = state.op()?;
    let key = std::sync::Arc::as_ptr(op);
    if let Some(digest) = memo.get(&key) {
        return Some(digest.clone());
    }
    let payload = marshal_op(op, ops, memo);
    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
    let digest = Digest::sha256(&bytes);
    ops.push(MarshaledOp { digest: digest.clone(), data: payload });
    memo.insert(key, digest.clone());
    Some(digest)
}

fn input_ref(
    state: &State,
    ops: &mut Vec<MarshaledOp>,
    memo: &mut HashMap<*const Op, Digest>,
) -> Json {
    match marshal_state(state, ops, memo) {
        Some(digest) => json!(digest.as_str()),
        None => Json::Null,
    }
}

fn marshal_op(op: &Op, ops: &mut Vec<MarshaledOp>, memo: &mut HashMap<*const Op, Digest>) -> Json {
    match op {
        Op::Image { reference, platform, digest } => json!({
            "op": "image",
            "ref": reference,
            "platform": platform.as_ref().map(|p| format!("{}/{}", p.os, p.arch)),
            "digest": digest.as_ref().map(Digest::as_str),
        }),
        Op::Http { url, checksum, chmod, filename } => json!({
            "op": "http",
            "url": url,
            "checksum": checksum.as_ref().map(Digest::as_str),
            "chmod": chmod,
            "filename": filename,
        }),
        Op::Git { remote, reference, keep_git_dir } => json!({
            "op": "git",
            "remote": remote,
            "ref": reference,
            "keepGitDir": keep_git_dir,
        }),
        Op::Local { name, include_patterns, exclude_patterns, follow_paths } => json!({
            "op": "local",
            "name": name,
            "includePatterns": include_patterns,
            "excludePatterns": exclude_patterns,
            "followPaths": follow_paths,
        }),
        Op::Frontend { source, inputs, opts } => {
            let inputs: Vec<Json> = inputs
                .iter()
                .map(|(key, state)| json!({"key": key, "input": input_ref(state, ops, memo)}))
                .collect();
            json!({
                "op": "frontend",
                "source": source,
                "inputs": inputs,
                "opts": opts.iter().map(|(k, v)| json!([k, v])).collect::<Vec<_>>(),
            })
        }
        Op::Exec { meta, mounts, secrets, ssh } => {
            let mounts: Vec<Json> = mounts
                .iter()
                .map(|m| {
                    json!({
                        "input": input_ref(&m.input, ops, memo),
                        "dest": m.dest,
                        "selector": m.selector,
                        "readonly": m.readonly,
                        "type": m.mount_type.payload(),
                    })
                })
                .collect();
            let secrets: Vec<Json> = secrets
                .iter()
                .map(|s| {
                    json!({"id": s.id, "dest": s.dest, "uid": s.uid, "gid": s.gid, "mode": s.mode})
                })
                .collect();
            let ssh: Vec<Json> = ssh
                .iter()
                .map(|s| {
                    json!({"id": s.id, "dest": s.dest, "uid": s.uid, "gid": s.gid, "mode": s.mode})
                })
                .collect();
            json!({
                "op": "exec",
                "meta": meta.payload(),
                "mounts": mounts,
                "secrets": secrets,
                "ssh": ssh,
            })
        }
        Op::File { input, action } => json!({
            "op": "file",
            "input": input_ref(input, ops, memo),
            "action": marshal_action(action, ops, memo),
        }),
        Op::Merge { inputs } => json!({
            "op": "merge",
            "inputs": inputs.iter().map(|s| input_ref(s, ops, memo)).collect::<Vec<_>>(),
        }),
        Op::Diff { lower, upper } => json!({
            "op": "diff",
            "lower": input_ref(lower, ops, memo),
            "upper": input_ref(upper, ops, memo),
        }),
    }
}

fn marshal_action(
    action: &FileAction,
    ops: &mut Vec<MarshaledOp>,
    memo: &mut HashMap<*const Op, Digest>,
) -> Json {
    match action {
        FileAction::Mkdir { path, mode, make_parents, chown, created } => json!({
            "mkdir": {
                "path": path,
                "mode": mode,
                "makeParents": make_parents,
                "chown": chown,
                "created": created.map(|t| t.to_rfc3339()),
            }
        }),
        FileAction::Mkfile { path, mode, data, chown, created } => json!({
            "mkfile": {
                "path": path,
                "mode": mode,
                "data": data,
                "chown": chown,
                "created": created.map(|t| t.to_rfc3339()),
            }
        }),
        FileAction::Rm { path, allow_not_found, allow_wildcard } => json!({
            "rm": {
                "path": path,
                "allowNotFound": allow_not_found,
                "allowWildcard": allow_wildcard,
            }
        }),
        FileAction::Copy { src, src_path, dest_path, info } => json!({
            "copy": {
                "input": input_ref(src, ops, memo),
                "src": src_path,
                "dest": dest_path,
                "followSymlinks": info.follow_symlinks,
                "contentsOnly": info.contents_only,
                "unpack": info.unpack,
                "createDestPath": info.create_dest_path,
                "allowWildcard": info.allow_wildcard,
                "allowEmptyWildcard": info.allow_empty_wildcard,
                "chown": info.chown,
                "chmod": info.chmod,
                "created": info.created.map(|t| t.to_rfc3339()),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llb::exec::{ExecMeta, Mount};

    fn run_state(image: &str, args: &[&str]) -> State {
        let meta =
            ExecMeta { args: args.iter().map(|s| s.to_string()).collect(), ..Default::default() };
        State::exec(meta, vec![Mount::bind(State::image(image), "/")], vec![], vec![])
    }

    #[test]
    fn test_digest_parse() {
        let good = format!("sha256:{}", "a".repeat(64));
        assert!(Digest::parse(&good).is_ok());
        assert!(Digest::parse("sha256:zz").is_err());
        assert!(Digest::parse("md5:abcd").is_err());
    }

    #[test]
    fn test_marshal_is_deterministic() {
        let a = run_state("alpine", &["echo", "hi"]).marshal().unwrap();
        let b = run_state("alpine", &["echo", "hi"]).marshal().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_marshal_distinguishes_args() {
        let a = run_state("alpine", &["echo", "hi"]).marshal().unwrap();
        let b = run_state("alpine", &["echo", "bye"]).marshal().unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_marshal_dedups_shared_inputs() {
        let base = State::image("alpine");
        let merged = State::merge(vec![
            base.clone().mkdir("a", 0o755, true),
            base.clone().mkdir("b", 0o755, true),
        ]);
        let def = merged.marshal().unwrap();
        let image_ops =
            def.ops.iter().filter(|op| op.data.get("op") == Some(&json!("image"))).count();
        assert_eq!(image_ops, 1);
    }

    #[test]
    fn test_marshal_orders_dependencies_first() {
        let def = run_state("alpine", &["true"]).marshal().unwrap();
        assert_eq!(def.ops.len(), 2);
        assert_eq!(def.ops[0].data.get("op"), Some(&json!("image")));
        assert_eq!(def.ops[1].data.get("op"), Some(&json!("exec")));
        assert_eq!(def.root.as_ref(), Some(&def.ops[1].digest));
    }

    #[test]
    fn test_scratch_marshals_empty() {
        let def = State::scratch().marshal().unwrap();
        assert!(def.ops.is_empty());
        assert!(def.root.is_none());
    }
}

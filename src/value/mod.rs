//! Runtime Values
//!
//! The tagged variant folded through chain evaluation. Values are immutable
//! from the caller's view: every mutation returns a new value carrying the
//! updated inner state. Coercion mismatches are typed failures, never
//! panics.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::ast::Kind;
use crate::codegen::errors::CodegenError;
use crate::image::ImageSpec;
use crate::llb::{Digest, State};
use crate::options::OptionItem;
use crate::session::{ForwardProxy, Session, SessionOption};
use crate::solver::{Request, SolveOption};

/// The filesystem composite: an LLB state handle, the image spec, and the
/// solve/session options accumulated so far.
#[derive(Debug, Clone, Default)]
pub struct Filesystem {
    pub state: State,
    pub image: ImageSpec,
    pub solve_opts: Vec<SolveOption>,
    pub session_opts: Vec<SessionOption>,
    /// Live forward proxies that must be served during this filesystem's
    /// solve.
    pub proxies: Vec<Arc<ForwardProxy>>,
}

impl Filesystem {
    pub fn from_state(state: State) -> Self {
        Self { state, ..Default::default() }
    }

    /// Absorb another filesystem's accumulated options, for builtins that
    /// embed one state inside another (copy sources, mounts, merge inputs).
    pub fn absorb(&mut self, other: &Filesystem) {
        self.solve_opts.extend(other.solve_opts.iter().cloned());
        self.session_opts.extend(other.session_opts.iter().cloned());
        self.proxies.extend(other.proxies.iter().cloned());
    }

    /// Marshal into a submittable solve request, concatenating the
    /// accumulated solve and session options.
    pub fn request(&self) -> Result<Request, CodegenError> {
        let def = self.state.marshal()?;
        let session = Session {
            attachables: self.session_opts.clone(),
            proxies: self.proxies.clone(),
            ..Session::new()
        };
        Ok(Request::single(def, self.solve_opts.clone(), session))
    }
}

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Filesystem(Filesystem),
    String(String),
    Int(i64),
    Option(Vec<OptionItem>),
    Pipeline(Request),
}

impl Value {
    /// The zero value for a kind; chains start from it.
    pub fn zero(kind: Kind) -> Self {
        match kind {
            Kind::Bool | Kind::Int => Value::Int(0),
            Kind::String => Value::String(String::new()),
            Kind::Filesystem => Value::Filesystem(Filesystem::default()),
            Kind::Pipeline => Value::Pipeline(Request::empty()),
            Kind::Option(_) => Value::Option(vec![]),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Filesystem(_) => "fs",
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Option(_) => "option",
            Value::Pipeline(_) => "group",
        }
    }

    fn bad_cast(&self, expected: &str) -> CodegenError {
        CodegenError::BadCast { expected: expected.to_string(), actual: self.type_name().to_string() }
    }

    pub fn filesystem(&self) -> Result<Filesystem, CodegenError> {
        match self {
            Value::Filesystem(fs) => Ok(fs.clone()),
            other => Err(other.bad_cast("fs")),
        }
    }

    pub fn string(&self) -> Result<String, CodegenError> {
        match self {
            Value::String(s) => Ok(s.clone()),
            other => Err(other.bad_cast("string")),
        }
    }

    pub fn int(&self) -> Result<i64, CodegenError> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(other.bad_cast("int")),
        }
    }

    /// Bools ride the int form; the checker guarantees `0`/`1`.
    pub fn boolean(&self) -> Result<bool, CodegenError> {
        match self {
            Value::Int(i) => Ok(*i != 0),
            other => Err(other.bad_cast("bool")),
        }
    }

    pub fn option(&self) -> Result<Vec<OptionItem>, CodegenError> {
        match self {
            Value::Option(items) => Ok(items.clone()),
            other => Err(other.bad_cast("option")),
        }
    }

    /// Convert into a submittable request. Filesystems marshal; pipelines
    /// are already requests.
    pub fn request(&self) -> Result<Request, CodegenError> {
        match self {
            Value::Pipeline(req) => Ok(req.clone()),
            Value::Filesystem(fs) => fs.request(),
            other => Err(other.bad_cast("group")),
        }
    }

    // -- Derived extraction, used by the builtin dispatcher --

    /// A file mode from the int form; out-of-range modes are user errors.
    pub fn file_mode(&self) -> Result<u32, CodegenError> {
        let raw = self.int()?;
        if !(0..=0o7777).contains(&raw) {
            return Err(CodegenError::InvalidArg { message: format!("invalid file mode {:o}", raw) });
        }
        Ok(raw as u32)
    }

    /// A content digest from the string form.
    pub fn digest(&self) -> Result<Digest, CodegenError> {
        Ok(Digest::parse(&self.string()?)?)
    }

    /// An RFC-3339 timestamp from the string form.
    pub fn timestamp(&self) -> Result<DateTime<Utc>, CodegenError> {
        let raw = self.string()?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|err| CodegenError::InvalidArg { message: format!("invalid timestamp '{}': {}", raw, err) })
    }

    /// An IP address from the string form.
    pub fn ip(&self) -> Result<IpAddr, CodegenError> {
        let raw = self.string()?;
        raw.parse().map_err(|_| CodegenError::InvalidArg { message: format!("invalid IP address '{}'", raw) })
    }

    /// A URL from the string form. Only the shape is checked here; the
    /// fetcher validates reachability.
    pub fn url(&self) -> Result<String, CodegenError> {
        let raw = self.string()?;
        match raw.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => Ok(raw),
            _ => Err(CodegenError::InvalidArg { message: format!("invalid URL '{}'", raw) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values() {
        assert!(matches!(Value::zero(Kind::String), Value::String(s) if s.is_empty()));
        assert!(matches!(Value::zero(Kind::Int), Value::Int(0)));
        assert!(matches!(Value::zero(Kind::Filesystem), Value::Filesystem(fs) if fs.state.is_scratch()));
        assert!(matches!(Value::zero(Kind::Option(None)), Value::Option(items) if items.is_empty()));
        assert!(matches!(Value::zero(Kind::Pipeline), Value::Pipeline(req) if req.is_empty()));
    }

    #[test]
    fn test_coercion_mismatch_is_bad_cast() {
        let err = Value::Int(3).string().unwrap_err();
        match err {
            CodegenError::BadCast { expected, actual } => {
                assert_eq!(expected, "string");
                assert_eq!(actual, "int");
            }
            other => panic!("expected BadCast, got {:?}", other),
        }
        assert!(Value::String("x".into()).filesystem().is_err());
        assert!(Value::None.option().is_err());
    }

    #[test]
    fn test_boolean_rides_int_form() {
        assert!(!Value::Int(0).boolean().unwrap());
        assert!(Value::Int(1).boolean().unwrap());
        assert!(Value::String("true".into()).boolean().is_err());
    }

    #[test]
    fn test_filesystem_request_marshals_state() {
        let fs = Filesystem::from_state(State::image("alpine"));
        let req = Value::Filesystem(fs).request().unwrap();
        match req {
            Request::Single(single) => assert_eq!(single.def.ops.len(), 1),
            other => panic!("expected single request, got {:?}", other),
        }
    }

    #[test]
    fn test_file_mode_bounds() {
        assert_eq!(Value::Int(0o755).file_mode().unwrap(), 0o755);
        assert!(Value::Int(0o10000).file_mode().is_err());
        assert!(Value::Int(-1).file_mode().is_err());
    }

    #[test]
    fn test_digest_and_timestamp_and_ip_and_url() {
        let digest = format!("sha256:{}", "b".repeat(64));
        assert!(Value::String(digest).digest().is_ok());
        assert!(Value::String("sha256:short".into()).digest().is_err());

        assert!(Value::String("2020-01-01T00:00:00Z".into()).timestamp().is_ok());
        assert!(Value::String("yesterday".into()).timestamp().is_err());

        assert!(Value::String("10.0.0.1".into()).ip().is_ok());
        assert!(Value::String("localhost".into()).ip().is_err());

        assert!(Value::String("https://example.com/x.tar".into()).url().is_ok());
        assert!(Value::String("example.com".into()).url().is_err());
    }
}

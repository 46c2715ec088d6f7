//! Image Specification
//!
//! The image config and history carried alongside an LLB state in a
//! filesystem value. History entries preserve Dockerfile-style provenance;
//! consecutive `LABEL` entries fold into a single history line.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::llb::Digest;

/// Image runtime configuration. Tracks everything the image-mutating
/// builtins touch, plus the immutable content digest once resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct ImageConfig {
    pub user: String,
    pub env: Vec<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub labels: IndexMap<String, String>,
    pub exposed_ports: Vec<String>,
    pub volumes: Vec<String>,
    pub stop_signal: Option<String>,
}

impl ImageConfig {
    /// Look up an environment entry by name.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}=", name);
        self.env.iter().find_map(|e| e.strip_prefix(&prefix))
    }

    /// Set an environment entry, replacing an existing one of the same name.
    pub fn set_env(&mut self, name: &str, value: &str) {
        let prefix = format!("{}=", name);
        let entry = format!("{}={}", name, value);
        match self.env.iter_mut().find(|e| e.starts_with(&prefix)) {
            Some(existing) => *existing = entry,
            None => self.env.push(entry),
        }
    }
}

/// One provenance entry in the image history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub empty_layer: bool,
}

/// The image specification half of a filesystem value: config plus history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub config: ImageConfig,
    pub history: Vec<HistoryEntry>,
    /// Immutable content digest, once resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
}

impl ImageSpec {
    /// Append a history entry with the given `CreatedBy` line.
    pub fn append_history(&mut self, created_by: impl Into<String>, empty_layer: bool) {
        self.history.push(HistoryEntry {
            created: None,
            created_by: created_by.into(),
            comment: None,
            empty_layer,
        });
    }

    /// Record a `RUN` layer. Newlines in arguments become literal `\n` so
    /// the history stays one line per layer.
    pub fn record_run(&mut self, args: &[String]) {
        let joined = args.join(" ").replace('\n', "\\n");
        self.append_history(format!("RUN {}", joined), false);
    }

    /// Record a `COPY` layer.
    pub fn record_copy(&mut self, src: &str, dest: &str) {
        self.append_history(format!("COPY {} {}", src, dest), false);
    }

    /// Record a `MERGE` layer.
    pub fn record_merge(&mut self) {
        self.append_history("MERGE / /", false);
    }

    /// Record a `DIFF` layer.
    pub fn record_diff(&mut self) {
        self.append_history("DIFF / /", false);
    }

    /// Set the working directory and record the `WORKDIR` entry.
    pub fn set_working_dir(&mut self, path: &str) {
        self.config.working_dir = path.to_string();
        self.append_history(format!("WORKDIR {}", path), true);
    }

    /// Set the user and record the `USER` entry.
    pub fn set_user(&mut self, user: &str) {
        self.config.user = user.to_string();
        self.append_history(format!("USER {}", user), true);
    }

    /// Set the entrypoint and record the `ENTRYPOINT` entry with the argv
    /// quoted Go-style.
    pub fn set_entrypoint(&mut self, argv: &[String]) {
        self.config.entrypoint = argv.to_vec();
        self.append_history(format!("ENTRYPOINT {}", quoted_slice(argv)), true);
    }

    /// Add a label. Consecutive `LABEL` history entries fold into one line,
    /// keeping the original `LABEL` prefix.
    pub fn add_label(&mut self, key: &str, value: &str) {
        self.config.labels.insert(key.to_string(), value.to_string());
        let pair = format!("{}={}", key, value);
        match self.history.last_mut() {
            Some(last) if last.created_by.starts_with("LABEL ") => {
                last.created_by.push(' ');
                last.created_by.push_str(&pair);
            }
            _ => self.append_history(format!("LABEL {}", pair), true),
        }
    }
}

/// Quote an argv the way Go's `%q` renders a string slice:
/// `["echo" "hi"]`.
fn quoted_slice(argv: &[String]) -> String {
    let quoted: Vec<String> = argv.iter().map(|a| format!("{:?}", a)).collect();
    format!("[{}]", quoted.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_env_replaces_existing() {
        let mut config = ImageConfig::default();
        config.set_env("PATH", "/bin");
        config.set_env("HOME", "/root");
        config.set_env("PATH", "/usr/bin:/bin");
        assert_eq!(config.env, vec!["PATH=/usr/bin:/bin", "HOME=/root"]);
        assert_eq!(config.env_var("PATH"), Some("/usr/bin:/bin"));
        assert_eq!(config.env_var("MISSING"), None);
    }

    #[test]
    fn test_consecutive_labels_fold() {
        let mut spec = ImageSpec::default();
        spec.add_label("a", "1");
        spec.add_label("b", "2");
        spec.add_label("c", "3");
        assert_eq!(spec.history.len(), 1);
        assert_eq!(spec.history[0].created_by, "LABEL a=1 b=2 c=3");
    }

    #[test]
    fn test_label_folding_breaks_on_intervening_layer() {
        let mut spec = ImageSpec::default();
        spec.add_label("a", "1");
        spec.record_run(&["true".to_string()]);
        spec.add_label("b", "2");
        assert_eq!(spec.history.len(), 3);
        assert_eq!(spec.history[0].created_by, "LABEL a=1");
        assert_eq!(spec.history[2].created_by, "LABEL b=2");
    }

    #[test]
    fn test_run_history_escapes_newlines() {
        let mut spec = ImageSpec::default();
        spec.record_run(&["sh".to_string(), "-c".to_string(), "a\nb".to_string()]);
        assert_eq!(spec.history[0].created_by, "RUN sh -c a\\nb");
    }

    #[test]
    fn test_entrypoint_history_quotes_argv() {
        let mut spec = ImageSpec::default();
        spec.set_entrypoint(&["echo".to_string(), "hi".to_string()]);
        assert_eq!(spec.history[0].created_by, r#"ENTRYPOINT ["echo" "hi"]"#);
        assert!(spec.history[0].empty_layer);
    }

    #[test]
    fn test_workdir_and_user_history() {
        let mut spec = ImageSpec::default();
        spec.set_working_dir("/src");
        spec.set_user("builder");
        assert_eq!(spec.history[0].created_by, "WORKDIR /src");
        assert_eq!(spec.history[1].created_by, "USER builder");
        assert_eq!(spec.config.working_dir, "/src");
        assert_eq!(spec.config.user, "builder");
    }
}

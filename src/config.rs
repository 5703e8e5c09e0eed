//! Flag/JSON5-config surface (§6). `--config_filename` and
//! `--common_instance_config` are each a JSON5 document; `load` merges
//! them (later file wins, key by key) into one [`RuntimeConfig`].
//!
//! JSON5 is accepted as a superset of JSON here: [`strip_json5_comments`]
//! strips `//`/`/* */` comments and trailing commas before handing the
//! text to `serde_json`, the same "lenient wrapper over a strict serde
//! format" shape as the teacher's `PackConfig::string_or_usize`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, SchedulerError};

/// §6 "Scheduler flags (subset)".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerFlags {
    pub repo: Vec<String>,
    pub pool: Vec<String>,
    pub swarming_server: String,
    pub tryjob_bucket: String,
    pub time_window_secs: u64,
    pub commit_window: usize,
    pub score_decay_24hr: f64,
    pub disable_try_jobs: bool,
    pub pubsub_topic: String,
    pub pubsub_subscriber: String,
}

impl Default for SchedulerFlags {
    fn default() -> Self {
        Self {
            repo: Vec::new(),
            pool: Vec::new(),
            swarming_server: String::new(),
            tryjob_bucket: String::new(),
            time_window_secs: 4 * 3600,
            commit_window: 10,
            score_decay_24hr: 1.0,
            disable_try_jobs: false,
            pubsub_topic: String::new(),
            pubsub_subscriber: "task-scheduler".to_string(),
        }
    }
}

impl SchedulerFlags {
    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_secs)
    }
}

/// §6 "`PrimaryBranchConfig`, optional `SecondaryBranchConfig`".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    pub bucket: String,
    pub prefix: String,
}

/// §6 "Ingestor config fields".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestorFlags {
    pub ingestion_files_topic: String,
    pub ingestion_subscription: String,
    pub backup_poll_interval_secs: u64,
    pub backup_poll_scope_secs: u64,
    pub pubsub_fetch_size: usize,
    pub files_processed_in_parallel: usize,
    pub primary_branch_config: BranchConfig,
    pub secondary_branch_config: Option<BranchConfig>,
}

impl Default for IngestorFlags {
    fn default() -> Self {
        Self {
            ingestion_files_topic: String::new(),
            ingestion_subscription: "gold-ingestion".to_string(),
            backup_poll_interval_secs: 3600,
            backup_poll_scope_secs: 4 * 3600,
            pubsub_fetch_size: 10,
            files_processed_in_parallel: 4,
            primary_branch_config: BranchConfig { bucket: String::new(), prefix: String::new() },
            secondary_branch_config: None,
        }
    }
}

impl IngestorFlags {
    pub fn backup_poll_interval(&self) -> Duration {
        Duration::from_secs(self.backup_poll_interval_secs)
    }

    pub fn backup_poll_scope(&self) -> Duration {
        Duration::from_secs(self.backup_poll_scope_secs)
    }

    /// Primary-branch bucket/prefix plus the tuned batch sizes, as
    /// [`crate::ingest::IngestConfig`] expects them.
    pub fn to_ingest_config(&self) -> crate::ingest::IngestConfig {
        crate::ingest::IngestConfig {
            bucket: self.primary_branch_config.bucket.clone(),
            prefix: self.primary_branch_config.prefix.clone(),
            pubsub_fetch_size: self.pubsub_fetch_size,
            files_processed_in_parallel: self.files_processed_in_parallel,
            backup_poll_scope: self.backup_poll_scope(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerFlags,
    pub ingestor: IngestorFlags,
}

impl RuntimeConfig {
    /// §3 Open Question 2: `BackupPollScope` must cover at least one
    /// `BackupPollInterval`, or the backup sweep would have gaps.
    pub fn validate(&self) -> Result<()> {
        if self.ingestor.backup_poll_scope_secs < self.ingestor.backup_poll_interval_secs {
            return Err(SchedulerError::InvalidConfig(format!(
                "ingestor.backup_poll_scope_secs ({}) must be >= backup_poll_interval_secs ({})",
                self.ingestor.backup_poll_scope_secs, self.ingestor.backup_poll_interval_secs
            )));
        }
        Ok(())
    }
}

/// Load and merge `--config_filename` over `--common_instance_config`
/// (the common file is the shared base; the specific config file's
/// keys win), then validate the result.
pub fn load(config_filename: &Path, common_instance_config: Option<&Path>) -> Result<RuntimeConfig> {
    let mut merged = Value::Object(serde_json::Map::new());
    if let Some(common) = common_instance_config {
        merge(&mut merged, read_json5(common)?);
    }
    merge(&mut merged, read_json5(config_filename)?);

    let config: RuntimeConfig = serde_json::from_value(merged)?;
    config.validate()?;
    Ok(config)
}

fn read_json5(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    let stripped = strip_json5_comments(&raw);
    Ok(serde_json::from_str(&stripped)?)
}

/// Deep merge: object keys in `overlay` recurse into matching object
/// keys in `base`; anything else (including array/scalar mismatches)
/// replaces the base value outright.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                merge(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Strip `//` and `/* */` comments and trailing commas before `}`/`]`,
/// outside of string literals. Not a full JSON5 parser — just enough
/// leniency for hand-edited ops config files.
fn strip_json5_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            ',' => {
                let mut lookahead = chars.clone();
                let mut only_whitespace = true;
                let mut next_significant = None;
                for c in lookahead.by_ref() {
                    if c.is_whitespace() {
                        continue;
                    }
                    only_whitespace = false;
                    next_significant = Some(c);
                    break;
                }
                if only_whitespace || matches!(next_significant, Some('}') | Some(']')) {
                    // drop the trailing comma
                } else {
                    out.push(c);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("task-scheduler-config-{}.json5", Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn strips_comments_and_trailing_commas() {
        let input = r#"{
            // a comment
            "a": 1, /* block */
            "b": [1, 2,],
        }"#;
        let stripped = strip_json5_comments(input);
        let value: Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], serde_json::json!([1, 2]));
    }

    #[test]
    fn config_filename_overrides_common_instance_config() {
        let common = write_temp(r#"{"scheduler": {"repo": ["common-repo"], "commit_window": 5}}"#);
        let specific = write_temp(r#"{"scheduler": {"commit_window": 20}}"#);

        let config = load(&specific, Some(&common)).unwrap();
        assert_eq!(config.scheduler.repo, vec!["common-repo".to_string()], "unset keys keep the common base");
        assert_eq!(config.scheduler.commit_window, 20, "the specific file's key wins");

        std::fs::remove_file(common).unwrap();
        std::fs::remove_file(specific).unwrap();
    }

    #[test]
    fn rejects_backup_poll_scope_smaller_than_interval() {
        let path = write_temp(r#"{"ingestor": {"backup_poll_interval_secs": 3600, "backup_poll_scope_secs": 60}}"#);
        let err = load(&path, None).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
        std::fs::remove_file(path).unwrap();
    }
}

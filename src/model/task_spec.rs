//! TaskSpec / JobSpec declarations (§3, §4.3).
//!
//! These are parsed from the versioned `tasks.json` committed to a
//! watched repository at a specific revision by the spec evaluator
//! (C3). `TaskSpec.dependencies` form a DAG validated at parse time;
//! `JobSpec.task_specs` name the DAG's leaves, and a job's full task
//! set is the transitive closure of those leaves over the dependency
//! edges.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SchedulerError};

/// Declaration of a single buildable/testable unit at a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub cmd: Vec<String>,
    #[serde(default)]
    pub dimensions: HashSet<String>,
    #[serde(default)]
    pub dependencies: HashSet<String>,
    /// Parents that are satisfied by reaching *any* terminal state,
    /// not just Success (§4.5 step 2 "Parent satisfaction").
    #[serde(default)]
    pub optional_dependencies: HashSet<String>,
    #[serde(default)]
    pub idempotent: bool,
    pub priority: f64,
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub execution_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub expiration: Duration,
    #[serde(default)]
    pub cipd_packages: Vec<String>,
}

/// Trigger kind that produced a [`JobSpec`] instantiation (§3, C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Commit,
    Periodic,
    Tryjob,
}

/// Declaration of a higher-level job: an ordered set of leaf task
/// specs whose transitive dependency closure is the job's full task
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub task_specs: Vec<String>,
    pub priority: f64,
    #[serde(default = "default_trigger")]
    pub trigger: TriggerKind,
}

fn default_trigger() -> TriggerKind {
    TriggerKind::Commit
}

/// The parsed, validated contents of a `tasks.json` file at one
/// revision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpecGraph {
    pub task_specs: HashMap<String, TaskSpec>,
    pub job_specs: HashMap<String, JobSpec>,
}

impl TaskSpecGraph {
    /// Parse and validate a `tasks.json` document.
    ///
    /// Validates: unique names (guaranteed by the map keys), dependency
    /// names resolvable, acyclic dependency graph, `max_attempts >= 1`,
    /// `priority` in `[0, 1]`, and every `JobSpec.task_specs` entry
    /// resolvable.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let raw: RawTasksJson = serde_json::from_slice(data)?;
        let mut task_specs = HashMap::new();
        for spec in raw.task_specs {
            if task_specs.contains_key(&spec.name) {
                return Err(SchedulerError::InvalidSpec(format!(
                    "duplicate task spec name: {}",
                    spec.name
                )));
            }
            if !(0.0..=1.0).contains(&spec.priority) {
                return Err(SchedulerError::InvalidSpec(format!(
                    "task spec {} has priority {} outside [0, 1]",
                    spec.name, spec.priority
                )));
            }
            if spec.max_attempts < 1 {
                return Err(SchedulerError::InvalidSpec(format!(
                    "task spec {} has max_attempts < 1",
                    spec.name
                )));
            }
            task_specs.insert(spec.name.clone(), spec);
        }

        for spec in task_specs.values() {
            for dep in spec.dependencies.iter().chain(&spec.optional_dependencies) {
                if !task_specs.contains_key(dep) {
                    return Err(SchedulerError::InvalidSpec(format!(
                        "task spec {} depends on unknown task spec {}",
                        spec.name, dep
                    )));
                }
            }
        }
        assert_acyclic(&task_specs)?;

        let mut job_specs = HashMap::new();
        for job in raw.job_specs {
            if job_specs.contains_key(&job.name) {
                return Err(SchedulerError::InvalidSpec(format!(
                    "duplicate job spec name: {}",
                    job.name
                )));
            }
            for leaf in &job.task_specs {
                if !task_specs.contains_key(leaf) {
                    return Err(SchedulerError::InvalidSpec(format!(
                        "job spec {} names unknown task spec {}",
                        job.name, leaf
                    )));
                }
            }
            job_specs.insert(job.name.clone(), job);
        }

        Ok(TaskSpecGraph { task_specs, job_specs })
    }

    /// Transitive dependency closure (task spec names) rooted at the
    /// named job's leaves, plus the dependency edges within that
    /// closure. Errors if `job_name` is unknown.
    pub fn expand(&self, job_name: &str) -> Result<(HashSet<String>, Vec<(String, String)>)> {
        let job = self
            .job_specs
            .get(job_name)
            .ok_or_else(|| SchedulerError::NotFound(format!("job spec {job_name}")))?;

        let mut closure = HashSet::new();
        let mut edges = Vec::new();
        let mut stack: Vec<String> = job.task_specs.clone();
        while let Some(name) = stack.pop() {
            if !closure.insert(name.clone()) {
                continue;
            }
            if let Some(spec) = self.task_specs.get(&name) {
                for dep in spec.dependencies.iter().chain(&spec.optional_dependencies) {
                    edges.push((name.clone(), dep.clone()));
                    stack.push(dep.clone());
                }
            }
        }
        Ok((closure, edges))
    }
}

#[derive(Debug, Deserialize)]
struct RawTasksJson {
    #[serde(default)]
    task_specs: Vec<TaskSpec>,
    #[serde(default)]
    job_specs: Vec<JobSpec>,
}

/// DFS-based cycle detection over the dependency graph.
fn assert_acyclic(specs: &HashMap<String, TaskSpec>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        name: &'a str,
        specs: &'a HashMap<String, TaskSpec>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                path.push(name);
                return Err(SchedulerError::InvalidGraph(format!(
                    "dependency cycle: {}",
                    path.join(" -> ")
                )));
            }
            None => {}
        }
        marks.insert(name, Mark::Visiting);
        path.push(name);
        if let Some(spec) = specs.get(name) {
            for dep in spec.dependencies.iter().chain(&spec.optional_dependencies) {
                visit(dep, specs, marks, path)?;
            }
        }
        path.pop();
        marks.insert(name, Mark::Done);
        Ok(())
    }

    for name in specs.keys() {
        let mut path = Vec::new();
        visit(name, specs, &mut marks, &mut path)?;
    }
    Ok(())
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

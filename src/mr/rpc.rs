//! Wire schema shared by coordinator and worker, plus the filesystem layout
//! and bucket-routing hash that together make up the external contract.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default working root for per-bucket intermediate files.
pub const TEMP_DIR: &str = "./_output/temp";
/// Default root for final reduce output.
pub const OUTPUT_DIR: &str = "./_output";

/// Discriminates what a `Task` reply asks the worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Wait,
    Map,
    Reduce,
    Exit,
}

/// `Coordinator::GetTask` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub worker_id: String,
}

/// `Coordinator::GetTask` reply. Unused fields are left at their default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub coordinator_id: String,
    pub kind: TaskKind,
    /// Map only.
    pub n_reduce: usize,
    /// Map only.
    pub file_name: String,
    /// Reduce only.
    pub bucket_id: usize,
}

impl Task {
    pub fn wait() -> Self {
        Self {
            task_id: String::new(),
            coordinator_id: String::new(),
            kind: TaskKind::Wait,
            n_reduce: 0,
            file_name: String::new(),
            bucket_id: 0,
        }
    }

    pub fn exit() -> Self {
        Self {
            kind: TaskKind::Exit,
            ..Self::wait()
        }
    }
}

/// `Coordinator::Notify` request, reporting completion of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub task_id: String,
    pub worker_id: String,
    pub kind: TaskKind,
    /// Part of the wire contract; unused by the identity check, which
    /// matches on `task_id` + `worker_id` alone.
    pub bucket_id: String,
}

/// One routed `(key, value)` record, encoded as a JSON object per the
/// external contract (`{"Key": ..., "Value": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// FNV-1a, 32-bit, masked to the non-negative range. This must stay fixed:
/// change it and intermediate files written under the old hash stop
/// routing to the bucket a reduce task reads from under the new one.
pub fn fnv1a32(key: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash & 0x7FFF_FFFF
}

/// The reduce bucket a key routes to, for a given fan-out.
pub fn bucket_for_key(key: &str, n_reduce: usize) -> usize {
    (fnv1a32(key) as usize) % n_reduce
}

/// `TEMP_DIR/<coordinator_id>/<bucket_id>/` — the working root for one
/// reduce bucket's intermediate files.
pub fn bucket_dir(temp_dir: &str, coordinator_id: &str, bucket_id: usize) -> PathBuf {
    PathBuf::from(temp_dir)
        .join(coordinator_id)
        .join(bucket_id.to_string())
}

/// `TEMP_DIR/<coordinator_id>/<bucket_id>/mr-<task_id>` — the published
/// name of one map task's intermediate output for that bucket.
pub fn intermediate_path(temp_dir: &str, coordinator_id: &str, bucket_id: usize, task_id: &str) -> PathBuf {
    bucket_dir(temp_dir, coordinator_id, bucket_id).join(format!("mr-{task_id}"))
}

/// Temp name for an in-progress intermediate file, published via rename to
/// [`intermediate_path`].
pub fn intermediate_tmp_path(temp_dir: &str, coordinator_id: &str, bucket_id: usize, task_id: &str) -> PathBuf {
    bucket_dir(temp_dir, coordinator_id, bucket_id).join(format!("mr-tmp-{task_id}"))
}

/// `OUTPUT_DIR/mr-out-<bucket_id>` — the final output of one reduce task.
pub fn output_path(output_dir: &str, bucket_id: usize) -> PathBuf {
    PathBuf::from(output_dir).join(format!("mr-out-{bucket_id}"))
}

/// Temp name for an in-progress reduce output, published via rename to
/// [`output_path`]. Suffixed by both `bucket_id` and `task_id`, so a temp
/// path can never collide with any final `mr-out-<bucket_id>` name.
pub fn output_tmp_path(output_dir: &str, bucket_id: usize, task_id: &str) -> PathBuf {
    PathBuf::from(output_dir).join(format!("mr-out-{bucket_id}.tmp-{task_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_non_negative_and_stable() {
        let h1 = fnv1a32("hello");
        let h2 = fnv1a32("hello");
        assert_eq!(h1, h2);
        assert!(h1 <= 0x7FFF_FFFF);
    }

    #[test]
    fn hash_distinguishes_different_keys() {
        assert_ne!(fnv1a32("a"), fnv1a32("b"));
    }

    #[test]
    fn bucket_for_key_is_in_range() {
        for key in ["a", "b", "word", "another word", ""] {
            let b = bucket_for_key(key, 7);
            assert!(b < 7);
        }
    }

    #[test]
    fn key_value_serializes_with_contract_field_names() {
        let kv = KeyValue::new("a", "1");
        let json = serde_json::to_string(&kv).unwrap();
        assert_eq!(json, r#"{"Key":"a","Value":"1"}"#);
    }
}

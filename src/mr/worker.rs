use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};

use anyhow::Context;

use crate::mr::function::{call_map_func, call_reduce_func, MapFn, ReduceFn};
use crate::mr::rpc::{
    bucket_dir, bucket_for_key, intermediate_path, intermediate_tmp_path, output_path, output_tmp_path, KeyValue,
    Task,
};

/// A stateless filesystem/RPC client: one `Worker` per process, touched by
/// a single thread, carrying no state across tasks. Everything it needs to
/// run a task comes in on that task's assignment.
pub struct Worker {
    temp_dir: String,
    output_dir: String,
}

/// Reads an input split whole into memory. Split out as its own function
/// rather than inlined since it's the one seam where a future input
/// source (remote or virtual filesystem) would plug in.
fn open_file(file_name: &str) -> anyhow::Result<String> {
    fs::read_to_string(file_name).with_context(|| format!("reading input file {file_name}"))
}

impl Worker {
    pub fn new(temp_dir: impl Into<String>, output_dir: impl Into<String>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Runs one map task end to end: read input, invoke `mapf`, route
    /// every record into its bucket by [`bucket_for_key`], and publish
    /// each bucket's file by rename.
    pub async fn execute_map(&self, task: &Task, mapf: &MapFn) -> anyhow::Result<()> {
        let contents = open_file(&task.file_name)?;
        let kvs = call_map_func(mapf, &task.file_name, &contents)?;

        let mut buckets: Vec<Vec<&KeyValue>> = (0..task.n_reduce).map(|_| Vec::new()).collect();
        for kv in &kvs {
            buckets[bucket_for_key(&kv.key, task.n_reduce)].push(kv);
        }

        for (bucket_id, records) in buckets.into_iter().enumerate() {
            let dir = bucket_dir(&self.temp_dir, &task.coordinator_id, bucket_id);
            fs::create_dir_all(&dir).with_context(|| format!("creating bucket dir {}", dir.display()))?;

            let tmp_path = intermediate_tmp_path(&self.temp_dir, &task.coordinator_id, bucket_id, &task.task_id);
            let final_path = intermediate_path(&self.temp_dir, &task.coordinator_id, bucket_id, &task.task_id);

            {
                let file = File::create(&tmp_path)
                    .with_context(|| format!("creating temp intermediate file {}", tmp_path.display()))?;
                let mut writer = BufWriter::new(file);
                for kv in records {
                    serde_json::to_writer(&mut writer, kv)
                        .with_context(|| format!("encoding record {kv:?}"))?;
                }
                writer.flush().context("flushing intermediate writer")?;
            }

            fs::rename(&tmp_path, &final_path)
                .with_context(|| format!("publishing {} -> {}", tmp_path.display(), final_path.display()))?;
        }

        println!("[Map] task {} finished, intermediate files published", task.task_id);
        Ok(())
    }

    /// Runs one reduce task end to end: load every intermediate file for
    /// the bucket, group by key, sort lexicographically, call `reducef`
    /// per key, and publish the output file by rename.
    pub async fn execute_reduce(&self, task: &Task, reducef: &ReduceFn) -> anyhow::Result<()> {
        let dir = bucket_dir(&self.temp_dir, &task.coordinator_id, task.bucket_id);
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();

        let intermediate_files = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("mr-") && !n.starts_with("mr-tmp-"))
                        .unwrap_or(false)
                })
                .collect::<Vec<_>>(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                println!("[Reduce] no intermediate directory for bucket {}, empty output", task.bucket_id);
                Vec::new()
            }
            Err(e) => return Err(e).with_context(|| format!("reading bucket dir {}", dir.display())),
        };

        for path in intermediate_files {
            let file = File::open(&path).with_context(|| format!("opening intermediate file {}", path.display()))?;
            let reader = BufReader::new(file);
            for kv in serde_json::Deserializer::from_reader(reader).into_iter::<KeyValue>() {
                let kv = kv.with_context(|| format!("decoding record from {}", path.display()))?;
                grouped.entry(kv.key).or_default().push(kv.value);
            }
        }

        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating output dir {}", self.output_dir))?;

        let tmp_path = output_tmp_path(&self.output_dir, task.bucket_id, &task.task_id);
        let final_path = output_path(&self.output_dir, task.bucket_id);
        {
            let file = File::create(&tmp_path)
                .with_context(|| format!("creating temp output file {}", tmp_path.display()))?;
            let mut writer = BufWriter::new(file);
            for (key, values) in &grouped {
                let refs: Vec<&str> = values.iter().map(String::as_str).collect();
                let result = call_reduce_func(reducef, key, refs)?;
                writeln!(writer, "{key} {result}").with_context(|| format!("writing key {key}"))?;
            }
            writer.flush().context("flushing output writer")?;
        }

        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("publishing {} -> {}", tmp_path.display(), final_path.display()))?;

        println!("[Reduce] task {} finished, output published to {}", task.task_id, final_path.display());
        Ok(())
    }
}

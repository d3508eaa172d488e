//! User-supplied map/reduce function contracts and a reference
//! application exercising them.
//!
//! Map and reduce functions are supplied to the worker as trait objects
//! rather than dynamically linked. Map takes the source filename as well
//! as its contents, since some applications (e.g. word count per
//! document) need to know which file a pair came from.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::mr::rpc::KeyValue;

pub type MapFn = Box<dyn Fn(&str, &str) -> Vec<KeyValue> + Send + Sync>;
pub type ReduceFn = Box<dyn Fn(&str, Vec<&str>) -> String + Send + Sync>;

/// Runs `mapf`, converting a panic inside it into an `Err` so the worker
/// can treat the whole map task as a failure instead of taking the
/// process down with it.
pub fn call_map_func(mapf: &MapFn, file_name: &str, contents: &str) -> anyhow::Result<Vec<KeyValue>> {
    catch_unwind(AssertUnwindSafe(|| mapf(file_name, contents)))
        .map_err(|_| anyhow::anyhow!("map function panicked on {file_name}"))
}

/// Same as [`call_map_func`], for the reduce side.
pub fn call_reduce_func(reducef: &ReduceFn, key: &str, values: Vec<&str>) -> anyhow::Result<String> {
    catch_unwind(AssertUnwindSafe(|| reducef(key, values)))
        .map_err(|_| anyhow::anyhow!("reduce function panicked on key {key}"))
}

/// Word Count application, used by the end-to-end tests.
pub mod wc {
    use crate::mr::rpc::KeyValue;

    pub fn map(_file_name: &str, contents: &str) -> Vec<KeyValue> {
        contents
            .split_whitespace()
            .map(|word| KeyValue::new(word, "1"))
            .collect()
    }

    pub fn reduce(_key: &str, values: Vec<&str>) -> String {
        values.len().to_string()
    }
}

// TODO: add more reference applications (e.g. inverted index) once a
// second end-to-end scenario needs one.

use anyhow::{anyhow, Result};
use kvstore::KVDb;
use serde_json::{json, Value};

use crate::argsets::{KvsGetArgs, KvsSetArgs};
use crate::interfaces::kvpath;

pub fn kvs_set(args: KvsSetArgs) -> Result<()> {
    let kvs = KVDb::new(kvpath::SQLITE_STORE.as_path())?;
    // Store valid JSON as-is; anything else becomes a JSON string
    match serde_json::from_str::<Value>(&args.value) {
        Ok(value) => kvs.set(&args.key, value)?,
        Err(_) => kvs.set(&args.key, json!(args.value))?,
    }
    Ok(())
}

pub fn kvs_get(args: KvsGetArgs) -> Result<()> {
    let kvs = KVDb::new(kvpath::SQLITE_STORE.as_path())?;
    let value: Value = kvs
        .get(&args.key)?
        .ok_or_else(|| anyhow!("No value set for key '{}'", &args.key))?;
    // If the value contains a single string, just output that
    if let Some(s) = value.as_str() {
        print!("{s}");
    } else {
        print!("{value}");
    }
    Ok(())
}

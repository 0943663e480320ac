use std::{env, path::PathBuf};

use once_cell::sync::Lazy;

use crate::constants::envvars;

pub static ROOT_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(root_dir) = env::var(envvars::ROOT_DIR) {
        return root_dir.into();
    }
    PathBuf::from(".")
});

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(data_dir) = env::var(envvars::DATA_DIR) {
        return data_dir.into();
    }
    ROOT_DIR.join("data")
});

use std::path::PathBuf;

pub struct InitArgs {
    pub config_path: Option<PathBuf>,
}

pub struct KvsGetArgs {
    pub key: String,
}

pub struct KvsSetArgs {
    pub key: String,
    pub value: String,
}

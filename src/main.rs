use anyhow::{anyhow, Result};
use env_logger::Env;

use fieldgate::constants::{defaults, envvars};
use fieldgate::{argsets, command, helpers};

const CMD_INIT: &str = "init";
const CMD_RUN: &str = "run";
const CMD_KVS_GET: &str = "kvs-get";
const CMD_KVS_SET: &str = "kvs-set";

fn main() -> Result<()> {
    helpers::load_dotenv();
    env_logger::Builder::from_env(
        Env::default().filter_or(envvars::LOG_LEVEL, defaults::LOG_LEVEL),
    )
    .init();

    let mut args = pico_args::Arguments::from_env();
    match args.subcommand()?.as_deref() {
        Some(CMD_INIT) => command::init(argsets::InitArgs {
            config_path: args.opt_free_from_str()?,
        }),
        Some(CMD_RUN) => command::run(),
        Some(CMD_KVS_GET) => command::kvs_get(argsets::KvsGetArgs {
            key: args.free_from_str()?,
        }),
        Some(CMD_KVS_SET) => command::kvs_set(argsets::KvsSetArgs {
            key: args.free_from_str()?,
            value: args.free_from_str()?,
        }),
        _ => Err(anyhow!(
            "Subcommand must be one of 'init', 'run', 'kvs-get', 'kvs-set'"
        )),
    }
}

mod init;
mod kvs;
mod run;

pub use init::init;
pub use kvs::{kvs_get, kvs_set};
pub use run::run;

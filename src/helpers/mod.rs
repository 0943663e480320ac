mod load_dotenv;
mod time;

pub use load_dotenv::load_dotenv;
pub use time::now_iso;

pub mod base_path;

use rand::Rng;

pub fn rand_hex(bytes: usize) -> String {
    let mut rand = vec![0u8; bytes];
    rand::thread_rng().fill(&mut rand[..]);
    hex::encode(rand)
}

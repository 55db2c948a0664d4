// Authentication module
// Manages token lifecycle and the bound network context

mod manager;
mod network;
mod refresh;
mod types;

pub use manager::AuthManager;
pub use network::{find_by_id, find_by_name, Network};
pub use types::{Credentials, Token};

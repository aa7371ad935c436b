pub mod run_matching;
pub mod serve;
pub mod sync_clients;

pub use run_matching::handle_run_matching;
pub use serve::handle_serve;
pub use sync_clients::handle_sync_clients;

pub mod cache_flows;
pub mod calculate;
pub mod compare_flows;
pub mod serve;
pub mod worker;

pub use cache_flows::handle_cache_flows;
pub use calculate::handle_calculate;
pub use compare_flows::handle_compare_flows;
pub use serve::handle_serve;
pub use worker::handle_worker;

/*
[INPUT]:  Public API exports for the perpx-maker-farm crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod band;
pub mod config;
pub mod events;
pub mod exchange;
pub mod market_data;
pub mod order_manager;
pub mod price;
pub mod safety;
pub mod stats;
pub mod strategy;
pub mod task;

// Re-export main types for convenience
pub use config::BotConfig;
pub use events::EngineEvent;
pub use market_data::MarketDataHub;
pub use strategy::MakerFarmingStrategy;
pub use task::TaskManager;

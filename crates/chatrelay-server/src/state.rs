//! Shared application state.

use chatrelay_chat::ChainSelector;
use chatrelay_core::RelayConfig;

/// Built once before the listener starts and never mutated afterwards.
pub struct AppState {
    pub config: RelayConfig,
    pub chains: ChainSelector,
}

impl AppState {
    /// Initialize both gateways from configuration.
    pub fn new(config: RelayConfig) -> Self {
        let chains = ChainSelector::from_config(&config);
        Self { config, chains }
    }
}

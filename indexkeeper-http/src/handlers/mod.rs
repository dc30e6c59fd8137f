use indexkeeper::{Connector, LeaseRegistry, ProvisionerConfig, ResourceProvider};

pub mod events;
pub mod health;

pub use events::handle_event;
pub use health::health;

pub struct AppState<K: Connector> {
    pub provider: ResourceProvider<K>,
    pub leases: LeaseRegistry,
    pub config: ProvisionerConfig,
    pub start_time: std::time::Instant,
}

impl<K: Connector> AppState<K> {
    pub fn new(provider: ResourceProvider<K>, config: ProvisionerConfig) -> Self {
        Self {
            provider,
            leases: LeaseRegistry::new(),
            config,
            start_time: std::time::Instant::now(),
        }
    }
}

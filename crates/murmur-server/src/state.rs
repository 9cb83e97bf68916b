use std::sync::Arc;

use murmur_auth::TokenAuthority;
use murmur_bus::DeliveryBus;
use murmur_queue::MessageQueue;
use murmur_store::Store;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub queue: Arc<MessageQueue>,
    pub bus: Arc<DeliveryBus>,
    pub tokens: Arc<TokenAuthority>,
}

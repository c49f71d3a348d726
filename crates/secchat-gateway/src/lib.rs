pub mod auth;
pub mod connection;
pub mod error;
pub mod hub;
pub mod presence;
pub mod session;

use secchat_db::StoreHandle;

use crate::auth::AuthGate;
use crate::hub::Hub;

/// Everything a connection needs, built once at startup and cloned into
/// each socket task.
#[derive(Clone)]
pub struct GatewayContext {
    pub hub: Hub,
    pub store: StoreHandle,
    pub auth: AuthGate,
    pub version: String,
}

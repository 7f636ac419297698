use std::sync::Arc;

use crate::auth::AuthVerifier;
use crate::config::Config;
use crate::hub::Hub;

/// Shared application state passed to every extractor and handler.
///
/// Everything here is cheaply cloneable (`Hub` and `AuthVerifier` are built
/// from `Arc`-backed pieces), so cloning `AppState` per request/connection is
/// inexpensive — matching the teacher's `AppState` contract.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub auth: AuthVerifier,
    pub config: Arc<Config>,
}

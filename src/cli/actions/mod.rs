pub mod server;

use crate::auth::config::AuthConfig;

#[derive(Debug, Clone)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        config: AuthConfig,
    },
}

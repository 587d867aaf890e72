use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Password check for fleet clients. Dispatchers, the map and reporting tools all
/// log in with the `FLEETDAY_PASSWORD` secret; the user name is only recorded.
#[derive(Debug)]
pub struct FleetDayAuthSource {
    secret: Vec<u8>,
}

impl FleetDayAuthSource {
    pub fn new(password: String) -> Self {
        Self {
            secret: password.into_bytes(),
        }
    }
}

#[async_trait]
impl AuthSource for FleetDayAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(
            user = login.user().unwrap_or("<none>"),
            database = login.database().unwrap_or("<none>"),
            "fleet client login"
        );
        Ok(Password::new(None, self.secret.clone()))
    }
}

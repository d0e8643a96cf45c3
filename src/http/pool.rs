use std::time::Duration;

use reqwest::Client;

use crate::error::Result;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(2);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Shared client for RPC traffic. No global request timeout: callers bound
/// each call themselves (confirmation polls outlive any sane fixed timeout).
pub fn create_http_client() -> Result<Client> {
    let client = Client::builder()
        .tcp_nodelay(true)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(10)
        .connect_timeout(CONNECTION_TIMEOUT)
        .build()?;

    Ok(client)
}

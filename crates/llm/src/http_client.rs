use std::{
    sync::{Mutex, OnceLock},
    time::Duration,
};

use reqwest::Client;

/// Common HTTP client to re-use upstream connections across requests.
///
/// One client is cached per connect timeout: as long as the configuration
/// does not change, every request shares the same pool, and a reload that
/// changes `server.connect_timeout` swaps in a freshly built client instead
/// of silently keeping the old setting.
///
/// The pool idle timeout stays short so DNS changes on upstream hosts are
/// picked up without a connection TTL knob, which reqwest does not expose.
pub(crate) fn http_client(connect_timeout: Duration) -> Client {
    static CACHE: OnceLock<Mutex<Option<(Duration, Client)>>> = OnceLock::new();

    let cache = CACHE.get_or_init(|| Mutex::new(None));
    let mut cached = match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if let Some((timeout, client)) = cached.as_ref()
        && *timeout == connect_timeout
    {
        return client.clone();
    }

    let client = Client::builder()
        .connect_timeout(connect_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
        .expect("Failed to build default HTTP client");

    *cached = Some((connect_timeout, client.clone()));

    client
}

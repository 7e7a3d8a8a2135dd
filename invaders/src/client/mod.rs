use lazy_static::lazy_static;
use tracing::{info, warn};

pub mod image_client;
pub mod invader_client;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

lazy_static! {
    pub static ref HTTP_CLIENT: reqwest::Client = http_client();
}

fn http_client() -> reqwest::Client {
    info!("Initializing HTTP client.");
    reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|err| {
            warn!("Falling back to the default HTTP client: {err}");
            reqwest::Client::new()
        })
}

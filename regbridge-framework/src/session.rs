use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{BridgeError, Result};

/// Open a Zenoh session using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    config.validate()?;

    let mut zenoh_config = zenoh::Config::default();

    insert(&mut zenoh_config, "mode", &config.mode)?;

    if !config.connect.is_empty() {
        insert(&mut zenoh_config, "connect/endpoints", &config.connect)?;
    }

    if !config.listen.is_empty() {
        insert(&mut zenoh_config, "listen/endpoints", &config.listen)?;
    }

    if let (Some(user), Some(password)) = (&config.username, &config.password) {
        insert(&mut zenoh_config, "transport/auth/usrpwd/user", user)?;
        insert(&mut zenoh_config, "transport/auth/usrpwd/password", password)?;
    }

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        auth = config.username.is_some(),
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config)
        .await
        .map_err(|e| BridgeError::ZenohConnection(e.to_string()))?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}

fn insert<T: serde::Serialize + ?Sized>(
    zenoh_config: &mut zenoh::Config,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    zenoh_config
        .insert_json5(key, &json)
        .map_err(|e| BridgeError::config(format!("Failed to set Zenoh '{}': {}", key, e)))
}

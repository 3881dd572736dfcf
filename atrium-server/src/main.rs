//! Atrium server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory accounts, default ports (auth 5000, sessions 5001)
//! atrium
//!
//! # Persistent accounts, rooms kept after the last participant leaves
//! atrium --users-db ./data/users --room-policy retain
//! ```

mod config;

use atrium_auth::AuthServer;
use atrium_session::SessionServer;
use clap::Parser;

use crate::config::Args;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    log::info!("Atrium server starting");

    let session = SessionServer::new(args.session_config());
    let auth = AuthServer::new(args.auth_config())?;
    log::info!(
        "Session server on ws://{}, auth API on http://{}",
        session.bind_addr(),
        auth.bind_addr()
    );

    tokio::select! {
        result = session.run() => result?,
        result = auth.run() => result?,
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down"),
    }

    Ok(())
}

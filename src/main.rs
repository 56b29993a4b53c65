use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use registration_server::{app, AppState};

const DEFAULT_PORT: u16 = 8000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u16>()
            .with_context(|| format!("invalid port argument: {arg}"))?,
        None => DEFAULT_PORT,
    };

    let base_dir = std::env::current_dir()?;
    let state = AppState::prepare(&base_dir).await?;
    let app = app(Arc::new(state));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Serving registrations on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

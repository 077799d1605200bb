use anyhow::{Context, Result};
use rtsp_h264_server::config::ServerConfig;
use rtsp_h264_server::rtsp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let config = Arc::new(ServerConfig::default());
    let listener = TcpListener::bind(config.rtsp_addr)
        .await
        .with_context(|| format!("binding RTSP listener on {}", config.rtsp_addr))?;

    log::info!("listening for RTSP connections on {}", config.rtsp_addr);

    let next_session_id = Arc::new(AtomicI64::new(1));

    loop {
        let (conn, client_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("accept failed: {err}");
                continue;
            }
        };

        let config = Arc::clone(&config);
        let id = next_session_id.fetch_add(1, Ordering::Relaxed);

        log::info!("[session {id}] accepted connection from {client_addr}");
        tokio::spawn(async move {
            rtsp::handle_connection(conn, client_addr, id, config).await;
            log::info!("[session {id}] closed");
        });
    }
}

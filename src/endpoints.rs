//! Endpoint server for exposing metrics and health checks

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tron_relayer::Txm;

fn response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Serve `GET /metrics` and `GET /health` for `txm` until the task is dropped
pub async fn endpoint_server(port: u16, txm: Arc<Txm>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "Metrics endpoint listening");

    loop {
        let (mut socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                continue;
            }
        };
        let txm = txm.clone();
        tokio::spawn(async move {
            let mut buf = [0; 1024];
            let n = match socket.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "Failed to read request");
                    return;
                }
            };
            let request = String::from_utf8_lossy(&buf[..n]);
            let path = request.split_whitespace().nth(1).unwrap_or("/");
            let reply = match path {
                "/metrics" => response("200 OK", &txm.metrics().gather_text()),
                "/health" => {
                    let (queued, unconfirmed) = txm.inflight_count();
                    response(
                        "200 OK",
                        &format!(
                            "state={:?} queued={queued} unconfirmed={unconfirmed}\n",
                            txm.state()
                        ),
                    )
                }
                _ => response("404 Not Found", "not found\n"),
            };
            if let Err(e) = socket.write_all(reply.as_bytes()).await {
                tracing::debug!(%peer, error = %e, "Failed to write response");
            }
        });
    }
}

//! Thin stand-in transport.
//!
//! Real ICAP framing and HTTP header parsing are out of scope here,
//! assumed supplied by a content-adaptation runtime. This module speaks
//! just enough of a length-prefixed TCP protocol to drive
//! [`polis_core::hooks::IcapCoreHandler`] end-to-end for local testing and
//! integration harnesses — it is not a substitute for a real ICAP frontend.
//!
//! Wire shape per connection, one request/response pair:
//!   `<verb> <host> <content-encoding-or-dash>\n` followed by a 4-byte
//!   big-endian body length and the body bytes. The response is just the
//!   (possibly rewritten) body, length-prefixed the same way — except a
//!   REQMOD body the DLP inspector blocks, whose response is a small JSON
//!   object standing in for a 403 (`status`, `request_id`, `pattern_name`)
//!   since this stub has no side channel for an HTTP status line.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use polis_core::hooks::IcapCoreHandler;
use polis_core::mint::OsEntropySource;

/// Accept connections on `listener` until the process is asked to shut
/// down, dispatching each to [`serve_one`].
pub async fn serve(listener: TcpListener, handler: Arc<IcapCoreHandler<'static>>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_one(stream, &handler).await {
                tracing::warn!(peer = %peer, error = %e, "icap stub connection error");
            }
        });
    }
}

async fn serve_one(mut stream: TcpStream, handler: &IcapCoreHandler<'static>) -> anyhow::Result<()> {
    let header = read_header_line(&mut stream).await?;
    let mut parts = header.split_whitespace();
    let verb = parts.next().unwrap_or_default().to_ascii_uppercase();
    let host = parts.next().unwrap_or_default().to_string();
    let encoding = parts.next().unwrap_or("-").to_string();

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;

    let out_body = match verb.as_str() {
        "REQMOD" => {
            let text = String::from_utf8_lossy(&body).into_owned();

            match handler
                .handle_dlp(&text, &host, polis_core::dlp::mint_request_id)
                .await
            {
                polis_core::dlp::DlpOutcome::Blocked {
                    request_id,
                    pattern_name,
                } => format!(
                    "{{\"status\":403,\"request_id\":\"{request_id}\",\"pattern_name\":\"{pattern_name}\"}}"
                )
                .into_bytes(),
                polis_core::dlp::DlpOutcome::Allowed => {
                    let mut entropy = OsEntropySource;
                    match handler.handle_reqmod(&text, &host, &mut entropy).await {
                        polis_core::reqmod::RewriteOutcome::Rewritten { body, .. } => {
                            body.into_bytes()
                        }
                        polis_core::reqmod::RewriteOutcome::Unchanged => body,
                    }
                }
            }
        }
        "RESPMOD" => match handler.handle_respmod(&body, &host, &encoding).await {
            polis_core::respmod::ScanOutcome::Modified { body } => body,
            polis_core::respmod::ScanOutcome::Unchanged => body,
        },
        other => {
            anyhow::bail!("unknown verb: {other}");
        }
    };

    stream
        .write_all(&(out_body.len() as u32).to_be_bytes())
        .await?;
    stream.write_all(&out_body).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_header_line(stream: &mut TcpStream) -> anyhow::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            anyhow::bail!("connection closed before header line completed");
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8(line)?)
}

//! Echo server for manual poking: replies to `(kind, payload)` with
//! `(kind + "-reply", ">" + payload + "|")`.

use std::net::SocketAddr;

use futures::FutureExt;
use wirepool::{Config, Connection, Message, Server, server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7878".to_owned())
        .parse()?;

    let bound = Server::new(Config::new(addr)).bind().await?;
    if let Some(addr) = bound.local_addr() {
        println!("echo server listening on {addr}");
    }

    let echo = server::handler(|message: Message, conn: &mut Connection| {
        async move {
            let reply_kind = format!("{}-reply", message.kind());
            let reply = format!(">{}|", String::from_utf8_lossy(message.payload()));
            conn.send(Message::text(reply_kind, reply)).await
        }
        .boxed()
    });

    bound.run(echo).await?;
    Ok(())
}

//! Live headless client: open a route on a server and print the app root
//! every time a batch lands.

use anyhow::{Context, Result};
use jrx_client::{Client, ClientCommand, ClientConfig, ClientUpdate};
use jrx_runtime::Runtime;
use tokio::sync::mpsc;

pub(crate) async fn run(route: &str, config: ClientConfig) -> Result<()> {
    let shell = format!(r#"<div id="{}"></div>"#, config.runtime.app_root);
    let runtime = Runtime::from_html(&shell, config.runtime.clone())?;
    let base_url = config.transport.base_url.clone();
    let mut client = Client::with_reqwest(runtime, config.transport)?;
    let mut updates = client.subscribe();

    client
        .navigate(route)
        .await
        .with_context(|| format!("Failed to open {route} on {base_url}"))?;

    let (commands, rx) = mpsc::channel(8);
    let task = tokio::spawn(client.run(rx));

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(ClientUpdate::Rendered { seq, html }) => {
                    if let Some(seq) = seq {
                        log::debug!("Batch {seq} applied");
                    }
                    println!("{html}");
                }
                Some(ClientUpdate::Connection { mode, open }) => {
                    log::info!("{mode} channel {}", if open { "open" } else { "closed" });
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, closing session");
                let _ = commands.send(ClientCommand::Shutdown).await;
                break;
            }
        }
    }

    task.await.context("Client task panicked")??;
    Ok(())
}

//! `send` and `listen` commands.

use chrono::Local;
use tracing::{debug, info};

use switchboard_protocol::{ChatMessage, ResponseCode};

use crate::config::ClientConfig;
use crate::connection::ChatClient;
use crate::error::{ClientError, ClientResult};

/// Connects with the configured timeouts and logs in.
pub async fn connect_and_login(config: &ClientConfig, username: &str) -> ClientResult<ChatClient> {
    let server = &config.server;
    debug!(address = %server.address, "Connecting to server");
    let client = ChatClient::connect_timeout(server.address.as_str(), server.connect_timeout())
        .await?
        .with_call_timeout(server.call_timeout());

    let code = client.login(username).await?;
    if !code.is_ok() {
        return Err(ClientError::Rejected {
            operation: "login",
            code,
        });
    }
    info!(username, "Logged in");
    Ok(client)
}

/// Sends one message and waits for the server to accept it.
pub async fn send(config: &ClientConfig, username: &str, to: &str, text: &str) -> ClientResult<()> {
    let client = connect_and_login(config, username).await?;
    let code = client.send_message(text, to).await?;
    client.close().await?;

    match code {
        ResponseCode::Ok => {
            println!("Message to {} accepted", to);
            Ok(())
        }
        code => Err(ClientError::Rejected {
            operation: "message",
            code,
        }),
    }
}

/// Prints incoming messages until the connection closes or Ctrl+C.
pub async fn listen(config: &ClientConfig, username: &str, json: bool) -> ClientResult<()> {
    let client = connect_and_login(config, username).await?;
    let mut messages = client
        .messages()
        .ok_or_else(|| ClientError::Connection("message feed already taken".into()))?;

    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(message) => println!("{}", render(&message, json)?),
                None => {
                    info!("Server closed the connection");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                client.close().await?;
                return Ok(());
            }
        }
    }
}

/// Renders one message as a text line or a JSON line.
pub fn render(message: &ChatMessage, json: bool) -> ClientResult<String> {
    if json {
        return serde_json::to_string(message)
            .map_err(|e| ClientError::Config(format!("failed to encode message: {}", e)));
    }
    let sent_at = message.sent_at().with_timezone(&Local);
    Ok(format!(
        "[{}] {}: {}",
        sent_at.format("%Y-%m-%d %H:%M:%S"),
        message.from,
        message.text
    ))
}

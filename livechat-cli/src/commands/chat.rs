//! Interactive chat: sign in, print the transcript, turn stdin lines into
//! session commands.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Args;
use client::{
    ChatApiClient, ChatItem, EventKind, OutboundCommand, Profile, SessionCommand, SessionEvent,
    SessionHandle, SessionManager, WebSocketConnector,
};
use shared::{
    config::Config,
    models::{STICKERS, find_avatar, find_sticker},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::logging;

const DELETE_REASON: &str = "Deleted by moderator";
const KICK_REASON: &str = "Kicked by moderator";

const HELP: &str = "\
Commands:
  <text>                   send a message
  /sticker <name>          send a sticker
  /delete <id> [reason]    delete a message (moderators)
  /kick <userId> [reason]  disconnect a user and remove their messages (moderators)
  /renew                   renew the chat token now
  /reconnect               sign in again after the connection closed
  /quit                    leave the room";

#[derive(Args, Debug)]
#[command(about = "Join the chat room and chat interactively")]
pub struct ChatArgs {
    /// Display name shown to other participants
    #[arg(long, short)]
    pub username: String,

    /// Request moderator capabilities (delete messages, disconnect users)
    #[arg(long)]
    pub moderator: bool,

    /// Avatar name from the built-in set, or an image URL
    #[arg(long, default_value = "bear")]
    pub avatar: String,

    /// Path to the configuration file (yaml or json)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Session duration in minutes (1-180)
    #[arg(long)]
    pub duration: Option<u32>,
}

/// One parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Command(SessionCommand),
    Help,
    Nothing,
}

fn parse_line(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Nothing);
    }
    if !line.starts_with('/') {
        return Ok(Input::Command(SessionCommand::Send(
            OutboundCommand::SendText(line.to_string()),
        )));
    }

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let (target, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    let reason = reason.trim();

    let parsed = match command {
        "/help" => return Ok(Input::Help),
        "/quit" | "/exit" => SessionCommand::Stop,
        "/renew" => SessionCommand::Renew,
        "/reconnect" => SessionCommand::Reconnect,
        "/sticker" => {
            let sticker = find_sticker(rest).ok_or_else(|| {
                let names: Vec<_> = STICKERS.iter().map(|sticker| sticker.name).collect();
                format!("unknown sticker '{rest}'; choose one of: {}", names.join(", "))
            })?;
            SessionCommand::Send(OutboundCommand::SendSticker {
                name: sticker.name.to_string(),
                src: sticker.src.to_string(),
            })
        }
        "/delete" if !target.is_empty() => SessionCommand::Send(OutboundCommand::DeleteMessage {
            id: target.to_string(),
            reason: or_default(reason, DELETE_REASON),
        }),
        "/kick" if !target.is_empty() => SessionCommand::Send(OutboundCommand::DisconnectUser {
            user_id: target.to_string(),
            reason: or_default(reason, KICK_REASON),
        }),
        "/delete" => return Err("usage: /delete <id> [reason]".to_string()),
        "/kick" => return Err("usage: /kick <userId> [reason]".to_string()),
        other => return Err(format!("unknown command {other}; type /help")),
    };
    Ok(Input::Command(parsed))
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn describe_message(item: &ChatItem) -> String {
    let body = match &item.sticker_src {
        Some(src) => format!("[{}] {src}", item.body),
        None => item.render(),
    };
    format!(
        "[{}] {} <{}>: {body}  #{}",
        item.created_at.format("%H:%M:%S"),
        item.author_display_name,
        item.author_user_id,
        item.id
    )
}

/// Transcript line for an event, if it has one.
fn describe(event: &SessionEvent) -> Option<String> {
    let line = match event {
        SessionEvent::Connected => "* Connected to the chat room.".to_string(),
        SessionEvent::Disconnected { reason } => format!("! Connection closed. Reason: {reason}"),
        SessionEvent::MessageReceived(item) | SessionEvent::StickerReceived(item) => {
            describe_message(item)
        }
        SessionEvent::MessageDeleted { id, .. } => format!("* Message #{id} was deleted"),
        SessionEvent::UserMessagesPurged { user_id, removed } => {
            format!("* Removed {removed} message(s) from {user_id}")
        }
        SessionEvent::UserDisconnected { user_id, reason } => {
            format!("* {user_id} was disconnected: {reason}")
        }
        SessionEvent::ServiceError { code, message } => format!("! Error {code}: {message}"),
        SessionEvent::CommandFailed { message } => format!("! {message}"),
        SessionEvent::CredentialIssued {
            user_id,
            token_expires_at,
        } => format!(
            "* Signed in as {user_id} (token valid until {})",
            token_expires_at.format("%H:%M:%S UTC")
        ),
        SessionEvent::StateChanged(_) => return None,
    };
    Some(line)
}

fn subscribe_transcript(manager: &mut SessionManager) {
    for kind in EventKind::ALL {
        manager.subscribe(kind, |event| {
            if let Some(line) = describe(event) {
                println!("{line}");
            }
        });
    }
}

async fn read_input(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed to read input");
                break;
            }
        };

        match parse_line(&line) {
            Ok(Input::Command(command)) => {
                let stop = command == SessionCommand::Stop;
                if handle.dispatch(command).is_err() || stop {
                    return;
                }
            }
            Ok(Input::Help) => println!("{HELP}"),
            Ok(Input::Nothing) => {}
            Err(message) => println!("! {message}"),
        }
    }
    let _ = handle.stop();
}

pub async fn handle_chat(args: ChatArgs) -> Result<()> {
    let config = Config::load_config(args.config, args.duration)
        .context("failed to load configuration")?;
    logging::initialize_tracing(&config);

    let avatar = find_avatar(&args.avatar).map_or(args.avatar.clone(), |avatar| {
        avatar.src.to_string()
    });
    let profile = Profile::new(args.username, args.moderator, avatar)?;

    let api = Arc::new(ChatApiClient::from_config(&config)?);
    let connector = Arc::new(WebSocketConnector::new(config.session.request_timeout()));
    let mut manager = SessionManager::new(
        api.clone(),
        api,
        connector,
        config.chat_endpoint.clone(),
        config.session.renewal_margin(),
    );
    subscribe_transcript(&mut manager);

    info!(room = %config.room_arn, endpoint = %config.chat_endpoint, "joining chat room");
    manager
        .start(profile)
        .await
        .context("failed to join the chat room")?;

    let (handle, commands) = SessionHandle::channel();
    let input = tokio::spawn(read_input(handle));
    manager.run(commands).await;
    input.abort();

    Ok(())
}

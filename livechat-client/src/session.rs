//! The chat session manager.
//!
//! A [`SessionManager`] owns at most one live [`Transport`] and one pending
//! renewal timer. It is an owned value: callers either drive it directly
//! (`start`, `send`, `drain_transport`) or hand it to [`SessionManager::run`]
//! and talk to it through a [`SessionHandle`].
//!
//! Privileged commands are not checked against the credential's
//! capabilities here. The chat service rejects what the token does not
//! allow and the rejection comes back as an `ERROR` frame.

use std::{fmt, sync::Arc, time::Duration};

use chrono::Utc;
use serde::Deserialize;
use shared::models::{
    Attributes, DELETE_BY_USER_EVENT, DELETE_MESSAGE_EVENT, DISCONNECT_USER_EVENT, InboundFrame,
    MESSAGE_TYPE_ATTRIBUTE, MESSAGE_TYPE_STICKER, OutboundFrame, STICKER_SRC_ATTRIBUTE, Sender,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{ChatError, ChatResult},
    events::{Dispatcher, EventKind, SessionEvent, Subscription},
    ids,
    renewal::{RenewalTimer, renewal_delay},
    store::{ChatItem, ChatItemKind, MessageStore},
    text,
    token::{Credential, EventRelay, Profile, TokenProvider},
    transport::{Connector, Transport, TransportEvent},
};

/// Lifecycle of the session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started, or stopped
    Idle,
    /// Waiting for a credential or for the transport to open
    Connecting,
    /// Commands can be sent
    Open,
    /// Deliberate teardown of an open connection (renewal or stop)
    Closing,
    /// The connection ended without being asked to
    Closed,
}

/// A request to the chat room. Carries no identity: the connection is
/// already scoped to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Post a text message
    SendText(String),
    /// Post a sticker
    SendSticker {
        /// Catalog name, shown as the message text
        name: String,
        /// Asset reference
        src: String,
    },
    /// Delete a message for everyone
    DeleteMessage {
        /// Server message id
        id: String,
        /// Reason shown to participants
        reason: String,
    },
    /// Disconnect a user and purge their messages
    DisconnectUser {
        /// Room-scoped user id
        user_id: String,
        /// Reason shown to the user
        reason: String,
    },
}

/// Instruction for a session driven by [`SessionManager::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Send one command over the open connection
    Send(OutboundCommand),
    /// Replace the credential and connection now instead of waiting for the timer
    Renew,
    /// Sign in again after the connection was lost
    Reconnect,
    /// End the session and the loop
    Stop,
}

/// Cloneable sender half for a session driven by [`SessionManager::run`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// A handle and the receiver to pass to [`SessionManager::run`].
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        (Self { commands }, receiver)
    }

    /// Queues `command` for the session loop.
    ///
    /// # Errors
    /// Returns [`ChatError::NotConnected`] once the session loop has ended.
    pub fn dispatch(&self, command: SessionCommand) -> ChatResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ChatError::NotConnected)
    }

    /// Queues one outbound command.
    ///
    /// # Errors
    /// See [`SessionHandle::dispatch`].
    pub fn send(&self, command: OutboundCommand) -> ChatResult<()> {
        self.dispatch(SessionCommand::Send(command))
    }

    /// Asks for an immediate credential renewal.
    ///
    /// # Errors
    /// See [`SessionHandle::dispatch`].
    pub fn renew(&self) -> ChatResult<()> {
        self.dispatch(SessionCommand::Renew)
    }

    /// Asks the session to sign in again.
    ///
    /// # Errors
    /// See [`SessionHandle::dispatch`].
    pub fn reconnect(&self) -> ChatResult<()> {
        self.dispatch(SessionCommand::Reconnect)
    }

    /// Asks the session loop to stop.
    ///
    /// # Errors
    /// See [`SessionHandle::dispatch`].
    pub fn stop(&self) -> ChatResult<()> {
        self.dispatch(SessionCommand::Stop)
    }
}

/// Close reasons are either plain text or a JSON object carrying the message.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StructuredCloseReason {
    error_message: String,
}

/// Human-readable close reason: the embedded `ErrorMessage` when the raw
/// reason is structured, the raw text otherwise, `Unknown` when empty.
#[must_use]
pub fn describe_close_reason(raw: &str) -> String {
    match serde_json::from_str::<StructuredCloseReason>(raw) {
        Ok(structured) => structured.error_message,
        Err(_) if raw.trim().is_empty() => "Unknown".to_string(),
        Err(_) => raw.to_string(),
    }
}

enum Wakeup {
    Transport(TransportEvent),
    Renewal(u64),
    Command(Option<SessionCommand>),
}

/// Owns one chat session: credential, connection, renewal timer, message
/// store and listeners.
pub struct SessionManager {
    tokens: Arc<dyn TokenProvider>,
    relay: Arc<dyn EventRelay>,
    connector: Arc<dyn Connector>,
    endpoint: Url,
    renewal_margin: Duration,
    profile: Option<Profile>,
    credential: Option<Credential>,
    state: ConnectionState,
    transport: Option<Transport>,
    timer: RenewalTimer,
    renewals_tx: mpsc::UnboundedSender<u64>,
    renewals_rx: mpsc::UnboundedReceiver<u64>,
    store: MessageStore,
    dispatcher: Dispatcher,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", &self.endpoint.as_str())
            .field("state", &self.state)
            .field("profile", &self.profile)
            .field("credential", &self.credential)
            .field("timer", &self.timer)
            .field("stored_items", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// An idle session using the given collaborators. `renewal_margin` is how
    /// long before token expiry the credential is replaced.
    #[must_use]
    pub fn new(
        tokens: Arc<dyn TokenProvider>,
        relay: Arc<dyn EventRelay>,
        connector: Arc<dyn Connector>,
        endpoint: Url,
        renewal_margin: Duration,
    ) -> Self {
        let (renewals_tx, renewals_rx) = mpsc::unbounded_channel();
        Self {
            tokens,
            relay,
            connector,
            endpoint,
            renewal_margin,
            profile: None,
            credential: None,
            state: ConnectionState::Idle,
            transport: None,
            timer: RenewalTimer::new(),
            renewals_tx,
            renewals_rx,
            store: MessageStore::new(),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Items shown to the user, in arrival order.
    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Credential of the current connection.
    #[must_use]
    pub const fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Profile the session was started with.
    #[must_use]
    pub const fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Whether a credential renewal is scheduled.
    #[must_use]
    pub fn renewal_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Registers `listener` for events of `kind`.
    pub fn subscribe<F>(&mut self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, listener)
    }

    /// Removes a listener. Returns `false` if it was already removed.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.dispatcher.unsubscribe(subscription)
    }

    fn emit(&self, event: SessionEvent) {
        self.dispatcher.emit(&event);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!(from = ?self.state, to = ?state, "session state changed");
        self.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    /// Stores an error notice for a failure the caller cannot otherwise see.
    fn record_failure(&mut self, message: String) {
        self.store.append(ChatItem::error_notice(message.clone()));
        self.emit(SessionEvent::CommandFailed { message });
    }

    /// Drops the transport, the credential and the renewal timer.
    fn release_connection(&mut self) {
        self.timer.cancel();
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.credential = None;
    }

    /// Signs `profile` in and opens the first connection.
    ///
    /// # Errors
    /// Returns [`ChatError::Auth`] when no credential could be issued and
    /// [`ChatError::Transport`] when the connection could not be opened. Both
    /// are also recorded in the store.
    pub async fn start(&mut self, profile: Profile) -> ChatResult<()> {
        info!(username = %profile.username, moderator = profile.is_moderator, "starting chat session");
        self.profile = Some(profile);
        self.connect().await
    }

    /// Requests a fresh credential and opens a connection with it, closing
    /// any connection still held.
    ///
    /// # Errors
    /// See [`SessionManager::start`].
    pub async fn connect(&mut self) -> ChatResult<()> {
        let profile = self
            .profile
            .clone()
            .ok_or_else(|| ChatError::invalid_input("no profile; start the session first"))?;

        self.release_connection();
        self.set_state(ConnectionState::Connecting);

        let credential = match self.tokens.request_token(&profile).await {
            Ok(credential) => credential,
            Err(err) => {
                warn!(error = %err, "credential request failed");
                self.set_state(ConnectionState::Idle);
                self.record_failure(err.to_string());
                return Err(err);
            }
        };
        self.emit(SessionEvent::CredentialIssued {
            user_id: credential.user_id.clone(),
            token_expires_at: credential.token_expires_at,
        });

        let transport = match self
            .connector
            .connect(&self.endpoint, &credential.token)
            .await
        {
            Ok(transport) => transport,
            Err(err) => {
                warn!(error = %err, "failed to open chat connection");
                self.set_state(ConnectionState::Closed);
                self.record_failure(format!("Unable to connect: {err}"));
                return Err(err);
            }
        };

        let delay = renewal_delay(credential.renewal_deadline(self.renewal_margin), Utc::now());
        self.timer.arm(delay, self.renewals_tx.clone());
        self.credential = Some(credential);
        self.transport = Some(transport);
        Ok(())
    }

    /// Closes the current connection and replaces it using a new credential.
    ///
    /// # Errors
    /// See [`SessionManager::start`].
    pub async fn renew(&mut self) -> ChatResult<()> {
        if self.profile.is_none() {
            return Err(ChatError::invalid_input("no profile; start the session first"));
        }
        info!("renewing chat credential");
        if self.state == ConnectionState::Open {
            self.set_state(ConnectionState::Closing);
        }
        self.connect().await
    }

    /// Ends the session. Calling it on an idle session is a no-op.
    pub fn stop(&mut self) {
        if self.state == ConnectionState::Open {
            self.set_state(ConnectionState::Closing);
        }
        self.release_connection();
        self.profile = None;
        self.set_state(ConnectionState::Idle);
    }

    /// Sends one command over the open connection.
    ///
    /// # Errors
    /// Returns [`ChatError::NotConnected`] unless the connection is open,
    /// [`ChatError::InvalidInput`] for blank text, and the transport or relay
    /// error when delivery fails; delivery failures are also stored as error
    /// notices.
    pub async fn send(&mut self, command: OutboundCommand) -> ChatResult<()> {
        if self.state != ConnectionState::Open || self.transport.is_none() {
            return Err(ChatError::NotConnected);
        }
        if let OutboundCommand::SendText(content) = &command
            && content.trim().is_empty()
        {
            return Err(ChatError::invalid_input("message must not be empty"));
        }

        let frame = outbound_frame(&command);
        let encoded = serde_json::to_string(&frame)?;
        let delivered = match self.transport.as_ref() {
            Some(transport) => transport.send(encoded),
            None => Err(ChatError::NotConnected),
        };
        if let Err(err) = delivered {
            warn!(error = %err, request_id = frame.request_id(), "failed to send command");
            self.record_failure(format!("Failed to send: {err}"));
            return Err(err);
        }
        debug!(request_id = frame.request_id(), "command sent");

        if let OutboundCommand::DisconnectUser { user_id, .. } = &command {
            if let Err(err) = self.relay.delete_messages_by_user(user_id).await {
                warn!(error = %err, user_id = %user_id, "failed to relay message purge");
                self.record_failure(err.to_string());
                return Err(err);
            }
        }
        Ok(())
    }

    /// Applies one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.set_state(ConnectionState::Open);
                self.store.append(ChatItem::connected());
                self.emit(SessionEvent::Connected);
            }
            TransportEvent::Frame(frame) => self.handle_frame(&frame),
            TransportEvent::Closed { reason } => {
                self.release_connection();
                let reason = describe_close_reason(&reason);
                info!(reason = %reason, "chat connection closed");
                self.set_state(ConnectionState::Closed);
                self.store.append(ChatItem::disconnected(&reason));
                self.emit(SessionEvent::Disconnected { reason });
            }
        }
    }

    /// Applies every transport event already queued, without waiting.
    pub fn drain_transport(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.transport.as_mut().and_then(Transport::try_recv) {
            self.handle_transport_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_frame(&mut self, raw: &str) {
        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "ignoring undecodable frame");
                return;
            }
        };

        match frame {
            InboundFrame::Message {
                id,
                content,
                attributes,
                send_time,
                sender,
                ..
            } => {
                let item = message_item(id, &content, attributes.as_ref(), send_time, &sender);
                debug!(id = %item.id, kind = ?item.kind, author = %item.author_user_id, "message received");
                let kind = item.kind;
                if !self.store.append(item.clone()) {
                    debug!(id = %item.id, "duplicate message ignored");
                    return;
                }
                if kind == ChatItemKind::Sticker {
                    self.emit(SessionEvent::StickerReceived(item));
                } else {
                    self.emit(SessionEvent::MessageReceived(item));
                }
            }
            InboundFrame::Event {
                event_name,
                attributes,
                ..
            } => self.handle_event(&event_name, &attributes.unwrap_or_default()),
            InboundFrame::Error {
                error_code,
                error_message,
                request_id,
                ..
            } => {
                warn!(code = error_code, request_id = ?request_id, message = %error_message, "chat service reported an error");
                self.store
                    .append(ChatItem::service_error(error_code, &error_message));
                self.emit(SessionEvent::ServiceError {
                    code: error_code,
                    message: error_message,
                });
            }
            InboundFrame::Unknown => debug!("ignoring frame of unknown type"),
        }
    }

    fn handle_event(&mut self, event_name: &str, attributes: &Attributes) {
        match event_name {
            DELETE_MESSAGE_EVENT => {
                let Some(id) = attributes.get("MessageID") else {
                    warn!(event_name, "delete event without MessageID");
                    return;
                };
                let removed = self.store.remove_by_id(id);
                info!(id = %id, removed, "message deleted");
                self.emit(SessionEvent::MessageDeleted {
                    id: id.clone(),
                    removed,
                });
            }
            DELETE_BY_USER_EVENT => {
                let Some(user_id) = attributes.get("userId") else {
                    warn!(event_name, "delete-by-user event without userId");
                    return;
                };
                let removed = self.store.remove_by_author(user_id);
                info!(user_id = %user_id, removed, "messages purged");
                self.emit(SessionEvent::UserMessagesPurged {
                    user_id: user_id.clone(),
                    removed,
                });
            }
            DISCONNECT_USER_EVENT => {
                let user_id = attributes.get("UserId").cloned().unwrap_or_default();
                let reason = attributes.get("Reason").cloned().unwrap_or_default();
                info!(user_id = %user_id, reason = %reason, "user disconnected");
                self.emit(SessionEvent::UserDisconnected { user_id, reason });
            }
            other => info!(event_name = other, "ignoring unrecognized event"),
        }
    }

    async fn on_renewal_due(&mut self, generation: u64) {
        if !self.timer.accept(generation) {
            debug!(generation, "ignoring stale renewal");
            return;
        }
        if let Err(err) = self.renew().await {
            warn!(error = %err, "scheduled renewal failed");
        }
    }

    /// Handle commands have no caller to return an error to. Rejections
    /// that happen before any work starts are recorded here; the others
    /// were recorded where they occurred.
    fn report_command_error(&mut self, err: &ChatError) {
        match err {
            ChatError::NotConnected | ChatError::InvalidInput { .. } => {
                warn!(error = %err, "command rejected");
                self.record_failure(err.to_string());
            }
            _ => debug!(error = %err, "command failed"),
        }
    }

    /// Waits for the next transport event, renewal or command and handles
    /// it. Returns `false` once the session has been stopped.
    pub async fn step(&mut self, commands: &mut mpsc::UnboundedReceiver<SessionCommand>) -> bool {
        let wakeup = tokio::select! {
            biased;
            event = next_transport_event(&mut self.transport) => Wakeup::Transport(event),
            Some(generation) = self.renewals_rx.recv() => Wakeup::Renewal(generation),
            command = commands.recv() => Wakeup::Command(command),
        };

        match wakeup {
            Wakeup::Transport(event) => self.handle_transport_event(event),
            Wakeup::Renewal(generation) => self.on_renewal_due(generation).await,
            Wakeup::Command(Some(SessionCommand::Send(command))) => {
                if let Err(err) = self.send(command).await {
                    self.report_command_error(&err);
                }
            }
            Wakeup::Command(Some(SessionCommand::Renew)) => {
                if let Err(err) = self.renew().await {
                    self.report_command_error(&err);
                }
            }
            Wakeup::Command(Some(SessionCommand::Reconnect)) => {
                if let Err(err) = self.connect().await {
                    self.report_command_error(&err);
                }
            }
            Wakeup::Command(Some(SessionCommand::Stop) | None) => {
                self.stop();
                return false;
            }
        }
        true
    }

    /// Drives the session until it is stopped or every handle is dropped.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        while self.step(&mut commands).await {}
        info!("chat session ended");
    }
}

async fn next_transport_event(transport: &mut Option<Transport>) -> TransportEvent {
    match transport {
        Some(transport) => transport
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed {
                reason: String::new(),
            }),
        None => std::future::pending().await,
    }
}

fn outbound_frame(command: &OutboundCommand) -> OutboundFrame {
    let request_id = ids::new_request_id();
    match command {
        OutboundCommand::SendText(content) => OutboundFrame::SendMessage {
            request_id,
            content: text::escape_outbound(content),
            attributes: Attributes::new(),
        },
        OutboundCommand::SendSticker { name, src } => {
            let mut attributes = Attributes::new();
            attributes.insert(MESSAGE_TYPE_ATTRIBUTE.into(), MESSAGE_TYPE_STICKER.into());
            attributes.insert(STICKER_SRC_ATTRIBUTE.into(), src.clone());
            OutboundFrame::SendMessage {
                request_id,
                content: format!("Sticker: {name}"),
                attributes,
            }
        }
        OutboundCommand::DeleteMessage { id, reason } => OutboundFrame::DeleteMessage {
            request_id,
            id: id.clone(),
            reason: reason.clone(),
        },
        OutboundCommand::DisconnectUser { user_id, reason } => OutboundFrame::DisconnectUser {
            request_id,
            user_id: user_id.clone(),
            reason: reason.clone(),
        },
    }
}

fn message_item(
    id: String,
    content: &str,
    attributes: Option<&Attributes>,
    send_time: Option<chrono::DateTime<Utc>>,
    sender: &Sender,
) -> ChatItem {
    let sticker_src = attributes
        .filter(|attributes| {
            attributes.get(MESSAGE_TYPE_ATTRIBUTE).map(String::as_str) == Some(MESSAGE_TYPE_STICKER)
        })
        .map(|attributes| {
            attributes
                .get(STICKER_SRC_ATTRIBUTE)
                .cloned()
                .unwrap_or_default()
        });

    ChatItem {
        kind: if sticker_src.is_some() {
            ChatItemKind::Sticker
        } else {
            ChatItemKind::Text
        },
        id,
        author_user_id: sender.user_id.clone(),
        author_display_name: sender.display_name().to_string(),
        author_avatar: sender.avatar().map(ToOwned::to_owned),
        body: text::sanitize(content),
        sticker_src,
        created_at: send_time.unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use shared::models::{Capability, SendEventResponse};
    use std::{
        collections::BTreeMap,
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use tokio::sync::Notify;

    use crate::transport::TransportPeer;

    struct FakeTokens {
        issued: AtomicUsize,
        fail: AtomicBool,
        lifetime: TimeDelta,
    }

    impl FakeTokens {
        fn new(lifetime: TimeDelta) -> Arc<Self> {
            Arc::new(Self {
                issued: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                lifetime,
            })
        }
    }

    #[async_trait]
    impl TokenProvider for FakeTokens {
        async fn request_token(&self, profile: &Profile) -> ChatResult<Credential> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChatError::auth(Some(500), "upstream unavailable"));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            let now = Utc::now();
            Ok(Credential {
                token: format!("token-{n}"),
                user_id: ids::room_user_id(&profile.username),
                capabilities: Capability::for_role(profile.is_moderator),
                session_expires_at: now + TimeDelta::hours(3),
                token_expires_at: now + self.lifetime,
            })
        }
    }

    #[derive(Default)]
    struct FakeRelay {
        sent: Mutex<Vec<(String, BTreeMap<String, String>)>>,
        fail: AtomicBool,
        held: AtomicBool,
        release: Notify,
    }

    #[async_trait]
    impl EventRelay for FakeRelay {
        async fn send_event(
            &self,
            event_name: &str,
            attributes: BTreeMap<String, String>,
        ) -> ChatResult<SendEventResponse> {
            if self.held.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChatError::relay(Some(500), "relay down"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((event_name.to_string(), attributes));
            Ok(SendEventResponse {
                arn: "arn:room".into(),
                status: "success".into(),
            })
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        peers: Mutex<Vec<TransportPeer>>,
        tokens_seen: Mutex<Vec<String>>,
        refuse: AtomicBool,
    }

    impl FakeConnector {
        fn take_peer(&self) -> TransportPeer {
            self.peers.lock().unwrap().remove(0)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, _endpoint: &Url, token: &str) -> ChatResult<Transport> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ChatError::transport("connection refused"));
            }
            self.tokens_seen.lock().unwrap().push(token.to_string());
            let (transport, peer) = Transport::pair();
            peer.events.send(TransportEvent::Opened).unwrap();
            self.peers.lock().unwrap().push(peer);
            Ok(transport)
        }
    }

    struct Harness {
        manager: SessionManager,
        tokens: Arc<FakeTokens>,
        relay: Arc<FakeRelay>,
        connector: Arc<FakeConnector>,
        events: Arc<Mutex<Vec<SessionEvent>>>,
    }

    fn harness_with(lifetime: TimeDelta) -> Harness {
        let tokens = FakeTokens::new(lifetime);
        let relay = Arc::new(FakeRelay::default());
        let connector = Arc::new(FakeConnector::default());
        let mut manager = SessionManager::new(
            tokens.clone(),
            relay.clone(),
            connector.clone(),
            Url::parse("wss://edge.ivschat.us-east-1.amazonaws.com").unwrap(),
            Duration::from_secs(30),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let events = Arc::clone(&events);
            manager.subscribe(kind, move |event| events.lock().unwrap().push(event.clone()));
        }
        Harness {
            manager,
            tokens,
            relay,
            connector,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(TimeDelta::minutes(55))
    }

    async fn open(harness: &mut Harness, moderator: bool) -> TransportPeer {
        let profile = Profile::new("ann", moderator, "bear").unwrap();
        harness.manager.start(profile).await.unwrap();
        let peer = harness.connector.take_peer();
        harness.manager.drain_transport();
        assert_eq!(harness.manager.state(), ConnectionState::Open);
        peer
    }

    fn message_frame(id: &str, user_id: &str, username: &str, content: &str) -> String {
        serde_json::json!({
            "Type": "MESSAGE",
            "Id": id,
            "Content": content,
            "Sender": {"UserId": user_id, "Attributes": {"username": username}},
        })
        .to_string()
    }

    fn event_frame(name: &str, attributes: serde_json::Value) -> String {
        serde_json::json!({"Type": "EVENT", "Id": "e1", "EventName": name, "Attributes": attributes})
            .to_string()
    }

    fn deliver(harness: &mut Harness, peer: &TransportPeer, frame: String) {
        peer.events.send(TransportEvent::Frame(frame)).unwrap();
        harness.manager.drain_transport();
    }

    fn messages(manager: &SessionManager) -> Vec<&ChatItem> {
        manager
            .store()
            .iter()
            .filter(|item| item.kind.is_message())
            .collect()
    }

    #[tokio::test]
    async fn start_opens_connection_and_records_notice() {
        let mut h = harness();
        let _peer = open(&mut h, false).await;

        assert_eq!(h.connector.tokens_seen.lock().unwrap().as_slice(), ["token-1"]);
        assert!(h.manager.credential().is_some());
        assert!(h.manager.renewal_armed());

        let last = h.manager.store().last().unwrap();
        assert_eq!(last.kind, ChatItemKind::SystemNotice);
        assert_eq!(last.body, "Connected to the chat room.");

        let events = h.events.lock().unwrap();
        assert!(events.contains(&SessionEvent::StateChanged(ConnectionState::Connecting)));
        assert!(events.contains(&SessionEvent::StateChanged(ConnectionState::Open)));
        assert!(events.contains(&SessionEvent::Connected));
    }

    #[tokio::test]
    async fn inbound_message_is_stored_with_author() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        deliver(&mut h, &peer, message_frame("m1", "u1", "Ann", "hi"));

        let stored = messages(&h.manager);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, ChatItemKind::Text);
        assert_eq!(stored[0].body, "hi");
        assert_eq!(stored[0].author_display_name, "Ann");
        assert_eq!(stored[0].author_user_id, "u1");
        assert!(matches!(
            h.events.lock().unwrap().last(),
            Some(SessionEvent::MessageReceived(item)) if item.id == "m1"
        ));
    }

    #[tokio::test]
    async fn inbound_text_is_sanitized_once() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        deliver(&mut h, &peer, message_frame("m1", "u1", "Ann", "<b>hi</b>"));

        assert_eq!(messages(&h.manager)[0].body, "&lt;b&gt;hi&lt;&#x2F;b&gt;");
    }

    #[tokio::test]
    async fn sticker_attribute_classifies_message() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        let frame = serde_json::json!({
            "Type": "MESSAGE",
            "Id": "s1",
            "Content": "Sticker: rocket",
            "Attributes": {"message_type": "STICKER", "sticker_src": "https://cdn/rocket.png"},
            "Sender": {"UserId": "u2"},
        });
        deliver(&mut h, &peer, frame.to_string());

        let stored = messages(&h.manager);
        assert_eq!(stored[0].kind, ChatItemKind::Sticker);
        assert_eq!(stored[0].sticker_src.as_deref(), Some("https://cdn/rocket.png"));
        assert_eq!(stored[0].author_display_name, "u2");
        assert!(matches!(
            h.events.lock().unwrap().last(),
            Some(SessionEvent::StickerReceived(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_message_ids_are_dropped() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        deliver(&mut h, &peer, message_frame("m1", "u1", "Ann", "one"));
        deliver(&mut h, &peer, message_frame("m1", "u1", "Ann", "one again"));

        assert_eq!(messages(&h.manager).len(), 1);
    }

    #[tokio::test]
    async fn delete_event_removes_exactly_one_message() {
        let mut h = harness();
        let peer = open(&mut h, false).await;
        for id in ["m1", "m2", "m3"] {
            deliver(&mut h, &peer, message_frame(id, "u1", "Ann", "hi"));
        }

        deliver(
            &mut h,
            &peer,
            event_frame("aws:DELETE_MESSAGE", serde_json::json!({"MessageID": "m2", "Reason": "spam"})),
        );

        let ids: Vec<_> = messages(&h.manager).iter().map(|item| item.id.clone()).collect();
        assert_eq!(ids, ["m1", "m3"]);
        assert!(h.events.lock().unwrap().contains(&SessionEvent::MessageDeleted {
            id: "m2".into(),
            removed: 1
        }));
    }

    #[tokio::test]
    async fn delete_by_user_event_purges_author() {
        let mut h = harness();
        let peer = open(&mut h, false).await;
        deliver(&mut h, &peer, message_frame("m1", "u1", "Ann", "one"));
        deliver(&mut h, &peer, message_frame("m2", "u2", "Bob", "two"));
        deliver(&mut h, &peer, message_frame("m3", "u1", "Ann", "three"));

        deliver(
            &mut h,
            &peer,
            event_frame("app:DELETE_BY_USER", serde_json::json!({"userId": "u1"})),
        );

        let stored = messages(&h.manager);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].author_user_id, "u2");
    }

    #[tokio::test]
    async fn disconnect_event_is_reported() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        deliver(
            &mut h,
            &peer,
            event_frame(
                "aws:DISCONNECT_USER",
                serde_json::json!({"UserId": "u9", "Reason": "Kicked by moderator"}),
            ),
        );

        assert!(h.events.lock().unwrap().contains(&SessionEvent::UserDisconnected {
            user_id: "u9".into(),
            reason: "Kicked by moderator".into(),
        }));
        assert_eq!(h.manager.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn unknown_events_and_garbage_frames_are_ignored() {
        let mut h = harness();
        let peer = open(&mut h, false).await;
        let before = h.manager.store().len();

        deliver(&mut h, &peer, event_frame("app:CONFETTI", serde_json::json!({})));
        deliver(&mut h, &peer, "not json".into());
        deliver(&mut h, &peer, r#"{"Type":"PING"}"#.into());

        assert_eq!(h.manager.store().len(), before);
        assert_eq!(h.manager.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn error_frame_becomes_error_notice() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        deliver(
            &mut h,
            &peer,
            r#"{"Type":"ERROR","Id":"x","RequestId":"r1","ErrorCode":403,"ErrorMessage":"Forbidden"}"#
                .into(),
        );

        let last = h.manager.store().last().unwrap();
        assert_eq!(last.kind, ChatItemKind::ErrorNotice);
        assert_eq!(last.body, "Error 403: Forbidden");
        assert_eq!(h.manager.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn error_codes_beyond_http_range_are_kept() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        deliver(
            &mut h,
            &peer,
            r#"{"Type":"ERROR","Id":"x","ErrorCode":4294967296,"ErrorMessage":"Throttled"}"#.into(),
        );

        assert_eq!(
            h.manager.store().last().unwrap().body,
            "Error 4294967296: Throttled"
        );
        assert!(h.events.lock().unwrap().contains(&SessionEvent::ServiceError {
            code: 4_294_967_296,
            message: "Throttled".into(),
        }));
    }

    #[tokio::test]
    async fn messages_without_id_are_all_stored() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        for content in ["one", "two"] {
            let frame = serde_json::json!({
                "Type": "MESSAGE",
                "Content": content,
                "Sender": {"UserId": "u1"},
            });
            deliver(&mut h, &peer, frame.to_string());
        }

        let bodies: Vec<_> = messages(&h.manager).iter().map(|item| item.body.clone()).collect();
        assert_eq!(bodies, ["one", "two"]);
    }

    #[tokio::test]
    async fn structured_close_reason_is_decoded() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        peer.events
            .send(TransportEvent::Closed {
                reason: r#"{"ErrorMessage":"token expired"}"#.into(),
            })
            .unwrap();
        h.manager.drain_transport();

        let last = h.manager.store().last().unwrap();
        assert_eq!(last.kind, ChatItemKind::ErrorNotice);
        assert_eq!(last.body, "Connection closed. Reason: token expired");
        assert_eq!(h.manager.state(), ConnectionState::Closed);
        assert!(h.manager.credential().is_none());
        assert!(!h.manager.renewal_armed());
    }

    #[test]
    fn close_reason_falls_back_to_raw_text() {
        assert_eq!(describe_close_reason("Kicked"), "Kicked");
        assert_eq!(describe_close_reason(r#"{"Other":1}"#), r#"{"Other":1}"#);
        assert_eq!(describe_close_reason(""), "Unknown");
        assert_eq!(
            describe_close_reason(r#"{"ErrorMessage":"bye"}"#),
            "bye"
        );
    }

    #[tokio::test]
    async fn commands_require_open_connection() {
        let mut h = harness();
        let result = h.manager.send(OutboundCommand::SendText("hi".into())).await;
        assert!(matches!(result, Err(ChatError::NotConnected)));
        assert!(h.manager.store().is_empty());
    }

    #[tokio::test]
    async fn send_text_escapes_quotes() {
        let mut h = harness();
        let mut peer = open(&mut h, false).await;

        h.manager
            .send(OutboundCommand::SendText(r#"say "hi" \o/"#.into()))
            .await
            .unwrap();

        let sent: serde_json::Value =
            serde_json::from_str(&peer.sent.recv().await.unwrap()).unwrap();
        assert_eq!(sent["Action"], "SEND_MESSAGE");
        assert_eq!(sent["Content"], r#"say \"hi\" \\o/"#);
        assert!(sent["RequestId"].as_str().is_some_and(|id| !id.is_empty()));

        let blank = h.manager.send(OutboundCommand::SendText("  ".into())).await;
        assert!(matches!(blank, Err(ChatError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn send_sticker_carries_kind_and_asset() {
        let mut h = harness();
        let mut peer = open(&mut h, false).await;

        h.manager
            .send(OutboundCommand::SendSticker {
                name: "rocket".into(),
                src: "https://cdn/rocket.png".into(),
            })
            .await
            .unwrap();

        let sent: serde_json::Value =
            serde_json::from_str(&peer.sent.recv().await.unwrap()).unwrap();
        assert_eq!(sent["Content"], "Sticker: rocket");
        assert_eq!(sent["Attributes"]["message_type"], "STICKER");
        assert_eq!(sent["Attributes"]["sticker_src"], "https://cdn/rocket.png");
    }

    #[tokio::test]
    async fn delete_command_waits_for_server_event() {
        let mut h = harness_with(TimeDelta::minutes(55));
        let mut peer = open(&mut h, true).await;
        deliver(&mut h, &peer, message_frame("m1", "u1", "Ann", "hi"));

        h.manager
            .send(OutboundCommand::DeleteMessage {
                id: "m1".into(),
                reason: "spam".into(),
            })
            .await
            .unwrap();

        let sent: serde_json::Value =
            serde_json::from_str(&peer.sent.recv().await.unwrap()).unwrap();
        assert_eq!(sent["Action"], "DELETE_MESSAGE");
        assert_eq!(sent["Id"], "m1");
        assert_eq!(messages(&h.manager).len(), 1);

        deliver(
            &mut h,
            &peer,
            event_frame("aws:DELETE_MESSAGE", serde_json::json!({"MessageID": "m1"})),
        );
        assert!(messages(&h.manager).is_empty());
    }

    #[tokio::test]
    async fn disconnect_user_relays_purge() {
        let mut h = harness();
        let mut peer = open(&mut h, true).await;
        deliver(&mut h, &peer, message_frame("m1", "u1", "Ann", "one"));
        deliver(&mut h, &peer, message_frame("m2", "u2", "Bob", "two"));

        h.manager
            .send(OutboundCommand::DisconnectUser {
                user_id: "u1".into(),
                reason: "Kicked by moderator".into(),
            })
            .await
            .unwrap();

        let sent: serde_json::Value =
            serde_json::from_str(&peer.sent.recv().await.unwrap()).unwrap();
        assert_eq!(sent["Action"], "DISCONNECT_USER");
        assert_eq!(sent["UserId"], "u1");
        {
            let relayed = h.relay.sent.lock().unwrap();
            assert_eq!(relayed.len(), 1);
            assert_eq!(relayed[0].0, "app:DELETE_BY_USER");
            assert_eq!(relayed[0].1.get("userId").map(String::as_str), Some("u1"));
        }

        deliver(
            &mut h,
            &peer,
            event_frame("app:DELETE_BY_USER", serde_json::json!({"userId": "u1"})),
        );
        let stored = messages(&h.manager);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].author_user_id, "u2");
    }

    #[tokio::test]
    async fn frames_arriving_during_relay_call_are_applied_in_order_afterwards() {
        let mut h = harness();
        let peer = open(&mut h, true).await;
        h.relay.held.store(true, Ordering::SeqCst);

        let events = peer.events.clone();
        let relay = Arc::clone(&h.relay);
        let arrivals = tokio::spawn(async move {
            for id in ["m1", "m2"] {
                events
                    .send(TransportEvent::Frame(message_frame(id, "u2", "Bob", id)))
                    .unwrap();
            }
            relay.release.notify_one();
        });

        h.manager
            .send(OutboundCommand::DisconnectUser {
                user_id: "u1".into(),
                reason: "bye".into(),
            })
            .await
            .unwrap();
        arrivals.await.unwrap();

        assert!(messages(&h.manager).is_empty());
        assert_eq!(h.manager.drain_transport(), 2);
        let ids: Vec<_> = messages(&h.manager).iter().map(|item| item.id.clone()).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[tokio::test]
    async fn relay_failure_is_recorded_as_notice() {
        let mut h = harness();
        let _peer = open(&mut h, true).await;
        h.relay.fail.store(true, Ordering::SeqCst);

        let result = h
            .manager
            .send(OutboundCommand::DisconnectUser {
                user_id: "u1".into(),
                reason: "bye".into(),
            })
            .await;

        assert!(matches!(result, Err(ChatError::Relay { .. })));
        let last = h.manager.store().last().unwrap();
        assert_eq!(last.kind, ChatItemKind::ErrorNotice);
        assert_eq!(h.manager.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn send_failure_is_recorded_as_notice() {
        let mut h = harness();
        let peer = open(&mut h, false).await;
        drop(peer);

        let result = h.manager.send(OutboundCommand::SendText("hi".into())).await;

        assert!(matches!(result, Err(ChatError::Transport { .. })));
        let last = h.manager.store().last().unwrap();
        assert_eq!(last.kind, ChatItemKind::ErrorNotice);
        assert!(last.body.starts_with("Failed to send"));
    }

    #[tokio::test]
    async fn auth_failure_leaves_session_idle() {
        let mut h = harness();
        h.tokens.fail.store(true, Ordering::SeqCst);

        let result = h
            .manager
            .start(Profile::new("ann", false, "bear").unwrap())
            .await;

        assert!(matches!(result, Err(ChatError::Auth { status: Some(500), .. })));
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert!(h.connector.tokens_seen.lock().unwrap().is_empty());
        assert!(!h.manager.renewal_armed());
        let last = h.manager.store().last().unwrap();
        assert_eq!(last.kind, ChatItemKind::ErrorNotice);
        assert!(last.body.contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn connect_failure_discards_credential() {
        let mut h = harness();
        h.connector.refuse.store(true, Ordering::SeqCst);

        let result = h
            .manager
            .start(Profile::new("ann", false, "bear").unwrap())
            .await;

        assert!(matches!(result, Err(ChatError::Transport { .. })));
        assert_eq!(h.manager.state(), ConnectionState::Closed);
        assert!(h.manager.credential().is_none());
        assert!(!h.manager.renewal_armed());
    }

    #[tokio::test]
    async fn renew_replaces_transport_and_credential() {
        let mut h = harness();
        let old_peer = open(&mut h, false).await;
        let old_user = h.manager.credential().unwrap().user_id.clone();

        h.manager.renew().await.unwrap();

        assert!(old_peer.shutdown.is_cancelled());
        assert_eq!(h.tokens.issued.load(Ordering::SeqCst), 2);
        assert_ne!(h.manager.credential().unwrap().user_id, old_user);
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
        assert!(h.events.lock().unwrap().contains(&SessionEvent::StateChanged(ConnectionState::Closing)));

        let _new_peer = h.connector.take_peer();
        h.manager.drain_transport();
        assert_eq!(h.manager.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_fires_before_expiry() {
        let mut h = harness_with(TimeDelta::seconds(90));
        let old_peer = open(&mut h, false).await;
        let (_handle, mut commands) = SessionHandle::channel();
        let started = tokio::time::Instant::now();

        assert!(h.manager.step(&mut commands).await);

        let waited = started.elapsed();
        assert!(waited <= Duration::from_secs(60));
        assert!(waited >= Duration::from_secs(59));
        assert_eq!(h.tokens.issued.load(Ordering::SeqCst), 2);
        assert!(old_peer.shutdown.is_cancelled());
        assert!(h.manager.renewal_armed());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_cancels_everything() {
        let mut h = harness();
        let peer = open(&mut h, false).await;

        h.manager.stop();
        assert!(peer.shutdown.is_cancelled());
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert!(h.manager.credential().is_none());
        assert!(!h.manager.renewal_armed());

        let transitions = h.events.lock().unwrap().len();
        h.manager.stop();
        assert_eq!(h.events.lock().unwrap().len(), transitions);
        assert!(matches!(
            h.manager.send(OutboundCommand::SendText("hi".into())).await,
            Err(ChatError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn run_handles_commands_until_stopped() {
        let mut h = harness();
        let mut peer = open(&mut h, false).await;
        let (handle, commands) = SessionHandle::channel();

        handle.send(OutboundCommand::SendText("hello".into())).unwrap();
        handle.stop().unwrap();
        h.manager.run(commands).await;

        let sent: serde_json::Value =
            serde_json::from_str(&peer.sent.recv().await.unwrap()).unwrap();
        assert_eq!(sent["Content"], "hello");
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert!(matches!(handle.renew(), Err(ChatError::NotConnected)));
    }

    #[tokio::test]
    async fn send_command_after_close_is_recorded() {
        let mut h = harness();
        let peer = open(&mut h, false).await;
        peer.events
            .send(TransportEvent::Closed {
                reason: "Kicked".into(),
            })
            .unwrap();
        h.manager.drain_transport();
        let (handle, commands) = SessionHandle::channel();

        handle.send(OutboundCommand::SendText("hello".into())).unwrap();
        handle.stop().unwrap();
        h.manager.run(commands).await;

        assert!(h.manager.store().iter().any(|item| {
            item.kind == ChatItemKind::ErrorNotice && item.body == "Not connected to the chat room"
        }));
        assert!(h.events.lock().unwrap().contains(&SessionEvent::CommandFailed {
            message: "Not connected to the chat room".into(),
        }));
    }

    #[tokio::test]
    async fn renew_command_without_profile_is_recorded() {
        let mut h = harness();
        let (handle, commands) = SessionHandle::channel();

        handle.renew().unwrap();
        handle.stop().unwrap();
        h.manager.run(commands).await;

        let last = h.manager.store().last().unwrap();
        assert_eq!(last.kind, ChatItemKind::ErrorNotice);
        assert!(last.body.contains("no profile"));
        assert!(h.events.lock().unwrap().iter().any(|event| matches!(
            event,
            SessionEvent::CommandFailed { message } if message.contains("no profile")
        )));
    }

    #[tokio::test]
    async fn unsubscribed_listener_stops_receiving() {
        let mut h = harness();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let subscription = h.manager.subscribe(EventKind::Connected, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(h.manager.unsubscribe(subscription));

        let _peer = open(&mut h, false).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}

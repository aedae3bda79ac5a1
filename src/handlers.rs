//! Interaction handlers.
//!
//! Every interaction is first mapped to a [`Route`]; the three control
//! buttons share one handler parameterised by [`ServerAction`]. Rendering is
//! kept in plain functions so replies can be checked without Discord.
//! Routes that call Crafty acknowledge with a deferred response first.

use serde_json::Value;
use tracing::{info, warn};

use crate::bot::Bot;
use crate::config::DisplayConfig;
use crate::crafty::{ActionOutcome, CraftySession, ServerInfo};
use crate::http::{HttpError, InteractionReplies};
use crate::types::*;

pub const SERVERINFO: &str = "serverinfo";
pub const FETCH_FAILED: &str = "❌ Failed to fetch server info from Crafty.";
const FOOTER: &str = "Powered by Crafty Controller";

// ---------------------------------------------------------------------------
// Slash commands
// ---------------------------------------------------------------------------

pub fn slash_commands() -> Vec<ApplicationCommand> {
    vec![ApplicationCommand::chat_input(
        SERVERINFO,
        "Show server info and control buttons.",
    )]
}

// ---------------------------------------------------------------------------
// Control actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    Start,
    Stop,
    Restart,
}

impl ServerAction {
    /// Panel order.
    pub const ALL: [ServerAction; 3] = [Self::Start, Self::Stop, Self::Restart];

    /// Button `custom_id`.
    pub fn custom_id(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    /// Crafty action path segment.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Start => "start_server",
            Self::Stop => "stop_server",
            Self::Restart => "restart_server",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Restart => "Restart",
        }
    }

    fn style(self) -> ButtonStyle {
        match self {
            Self::Start => ButtonStyle::Success,
            Self::Stop => ButtonStyle::Danger,
            Self::Restart => ButtonStyle::Primary,
        }
    }

    pub fn from_custom_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.custom_id() == id)
    }

    pub fn button(self) -> Component {
        Component::button(self.style(), self.label(), self.custom_id())
    }
}

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Ping,
    ServerInfo,
    Control(ServerAction),
    /// Logged and left unanswered.
    Unhandled(String),
}

pub fn route(interaction: &Interaction) -> Route {
    let data = interaction.data.as_ref();
    match interaction.kind {
        InteractionType::Ping => Route::Ping,
        InteractionType::ApplicationCommand => match data.and_then(|d| d.name.as_deref()) {
            Some(SERVERINFO) => Route::ServerInfo,
            other => Route::Unhandled(format!("command {:?}", other)),
        },
        InteractionType::MessageComponent => {
            let custom_id = data.and_then(|d| d.custom_id.as_deref());
            match custom_id.and_then(ServerAction::from_custom_id) {
                Some(action) => Route::Control(action),
                None => Route::Unhandled(format!("component {:?}", custom_id)),
            }
        }
        other => Route::Unhandled(format!("interaction type {:?}", other)),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Called on READY: log in to Crafty and register the slash commands once.
pub async fn on_ready(bot: &Bot, ready: ReadyEvent) {
    info!(user = %ready.user.tag(), guilds = ready.guilds.len(), "bot is ready!");

    if !bot.crafty.login().await {
        warn!("initial Crafty login failed; will retry on first use");
    }

    if !bot.claim_command_registration() {
        return;
    }
    match bot
        .http
        .bulk_overwrite_global_commands(&ready.application.id, &slash_commands())
        .await
    {
        Ok(registered) => info!(count = registered.len(), "registered global slash commands"),
        Err(e) => {
            warn!(error = %e, "failed to register global commands");
            bot.release_command_registration();
        }
    }
}

pub async fn on_interaction(bot: &Bot, interaction: &Interaction) -> Result<(), HttpError> {
    respond(&bot.http, &bot.crafty, &bot.config.display, interaction).await
}

/// Answer one interaction.
///
/// Crafty calls can outlast Discord's three second callback window, so
/// anything that touches Crafty is deferred first and completed afterwards.
pub async fn respond(
    replies: &dyn InteractionReplies,
    crafty: &CraftySession,
    display: &DisplayConfig,
    interaction: &Interaction,
) -> Result<(), HttpError> {
    let user = interaction.author().map(|u| u.tag()).unwrap_or_default();

    match route(interaction) {
        Route::Ping => {
            replies
                .create_interaction_response(&interaction.id, &interaction.token, &InteractionResponse::pong())
                .await
        }
        Route::ServerInfo => {
            info!(%user, "serverinfo requested");
            defer(replies, interaction, false).await?;
            let body = crafty.get_server_info().await;
            deliver(replies, interaction, serverinfo_reply(body.as_ref(), display)).await
        }
        Route::Control(action) => {
            info!(%user, verb = action.verb(), "control button pressed");
            defer(replies, interaction, true).await?;
            let outcome = crafty.send_action(action.verb()).await;
            deliver(replies, interaction, Reply::Edit(control_reply(&outcome))).await
        }
        Route::Unhandled(what) => {
            info!(%user, %what, "unhandled interaction");
            Ok(())
        }
    }
}

async fn defer(
    replies: &dyn InteractionReplies,
    interaction: &Interaction,
    ephemeral: bool,
) -> Result<(), HttpError> {
    replies
        .create_interaction_response(
            &interaction.id,
            &interaction.token,
            &InteractionResponse::deferred(ephemeral),
        )
        .await
}

async fn deliver(replies: &dyn InteractionReplies, interaction: &Interaction, reply: Reply) -> Result<(), HttpError> {
    let app = interaction.application_id.as_str();
    let token = interaction.token.as_str();
    match reply {
        Reply::Edit(data) => replies.edit_original_interaction_response(app, token, &data).await,
        Reply::Private(data) => {
            // An edit cannot make a public placeholder ephemeral.
            replies.delete_original_interaction_response(app, token).await?;
            replies.create_followup_message(app, token, &data).await
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// How a deferred interaction is completed.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Fill in the deferred placeholder; it keeps the deferral's visibility.
    Edit(InteractionCallbackData),
    /// Replace a public placeholder with a message only the user sees.
    Private(InteractionCallbackData),
}

/// The status panel, or an ephemeral failure when no info is available.
pub fn serverinfo_reply(body: Option<&Value>, display: &DisplayConfig) -> Reply {
    match body.and_then(|b| ServerInfo::from_response(b, display)) {
        Some(info) => Reply::Edit(status_panel(&info)),
        None => Reply::Private(InteractionCallbackData::text(FETCH_FAILED).ephemeral()),
    }
}

pub fn status_panel(info: &ServerInfo) -> InteractionCallbackData {
    let embed = Embed::new()
        .title(&info.name)
        .color(colors::GREEN)
        .field("IP Address", &info.ip, false)
        .field("Type", &info.kind, false)
        .field("Version", info.version(), false)
        .footer(FOOTER)
        .timestamp(chrono::Utc::now().to_rfc3339());

    InteractionCallbackData {
        embeds: Some(vec![embed]),
        components: Some(vec![control_row()]),
        ..Default::default()
    }
}

pub fn control_row() -> Component {
    Component::action_row(ServerAction::ALL.into_iter().map(ServerAction::button).collect())
}

/// Content for a button press. The ephemeral deferral keeps it private.
pub fn control_reply(outcome: &ActionOutcome) -> InteractionCallbackData {
    InteractionCallbackData::text(&outcome.message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CraftyConfig;
    use crate::crafty::scripted::*;
    use crate::crafty::{ApiResponse, TransportError};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn display() -> DisplayConfig {
        DisplayConfig {
            server_url: "play.example.net".into(),
            server_type: "Paper".into(),
        }
    }

    fn interaction(kind: u8, data: Value) -> Interaction {
        serde_json::from_value(json!({
            "id": "100",
            "application_id": "200",
            "type": kind,
            "token": "tok",
            "data": data,
            "user": { "id": "9", "username": "alice" },
        }))
        .expect("valid interaction JSON")
    }

    // -- slash_commands() --------------------------------------------------

    #[test]
    fn only_serverinfo_is_registered() {
        let cmds = slash_commands();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "serverinfo");
        assert!(!cmds[0].description.is_empty());
    }

    // -- ServerAction ------------------------------------------------------

    #[test]
    fn buttons_map_to_crafty_verbs() {
        assert_eq!(ServerAction::from_custom_id("start").map(ServerAction::verb), Some("start_server"));
        assert_eq!(ServerAction::from_custom_id("stop").map(ServerAction::verb), Some("stop_server"));
        assert_eq!(
            ServerAction::from_custom_id("restart").map(ServerAction::verb),
            Some("restart_server")
        );
        assert_eq!(ServerAction::from_custom_id("reboot"), None);
    }

    #[test]
    fn control_row_has_three_styled_buttons() {
        let row = control_row();
        assert_eq!(row.kind, ComponentType::ActionRow);
        let buttons: Vec<_> = row
            .components
            .iter()
            .map(|b| (b.label.as_deref().unwrap(), b.custom_id.as_deref().unwrap(), b.style.unwrap()))
            .collect();
        assert_eq!(
            buttons,
            vec![
                ("Start", "start", ButtonStyle::Success),
                ("Stop", "stop", ButtonStyle::Danger),
                ("Restart", "restart", ButtonStyle::Primary),
            ]
        );
    }

    // -- route() -----------------------------------------------------------

    #[test]
    fn routes_serverinfo_command() {
        let i = interaction(2, json!({ "id": "1", "name": "serverinfo" }));
        assert_eq!(route(&i), Route::ServerInfo);
    }

    #[test]
    fn routes_each_button_to_one_control_handler() {
        for action in ServerAction::ALL {
            let i = interaction(3, json!({ "custom_id": action.custom_id(), "component_type": 2 }));
            assert_eq!(route(&i), Route::Control(action));
        }
    }

    #[test]
    fn unknown_command_and_component_are_unhandled() {
        let cmd = interaction(2, json!({ "name": "ping" }));
        assert!(matches!(route(&cmd), Route::Unhandled(_)));

        let comp = interaction(3, json!({ "custom_id": "reroll:6", "component_type": 2 }));
        assert!(matches!(route(&comp), Route::Unhandled(_)));

        let modal = interaction(5, json!({ "custom_id": "x" }));
        assert!(matches!(route(&modal), Route::Unhandled(_)));
    }

    #[test]
    fn ping_routes_to_pong() {
        let i = interaction(1, Value::Null);
        assert_eq!(route(&i), Route::Ping);
    }

    // -- serverinfo_reply() ------------------------------------------------

    #[test]
    fn panel_shows_name_labels_and_version() {
        let body = json!({
            "status": "ok",
            "data": { "server_name": "Survival", "executable": "server-1.20.1.jar" }
        });
        let Reply::Edit(data) = serverinfo_reply(Some(&body), &display()) else {
            panic!("panel should fill in the public placeholder");
        };
        assert!(!data.is_ephemeral());
        let embed = &data.embeds.as_ref().expect("embed")[0];
        assert_eq!(embed.title.as_deref(), Some("Survival"));
        assert_eq!(embed.field_value("IP Address"), Some("play.example.net"));
        assert_eq!(embed.field_value("Type"), Some("Paper"));
        assert_eq!(embed.field_value("Version"), Some("1.20.1"));
        assert!(embed.fields.iter().all(|f| !f.inline));
        assert_eq!(embed.footer.as_ref().map(|f| f.text.as_str()), Some(FOOTER));
        assert_eq!(data.components.as_ref().map(|c| c[0].components.len()), Some(3));
    }

    #[test]
    fn missing_info_is_an_ephemeral_failure() {
        for body in [None, Some(json!({ "status": "error" }))] {
            let Reply::Private(data) = serverinfo_reply(body.as_ref(), &display()) else {
                panic!("failure should only be shown to the user");
            };
            assert_eq!(data.content.as_deref(), Some(FETCH_FAILED));
            assert!(data.is_ephemeral());
            assert!(data.embeds.is_none());
            assert!(data.components.is_none());
        }
    }

    // -- control_reply() ---------------------------------------------------

    #[test]
    fn control_reply_is_outcome_message() {
        let outcome = ActionOutcome {
            success: false,
            message: "❌ Error sending stop_server command: boom".into(),
        };
        let data = control_reply(&outcome);
        assert_eq!(data.content.as_deref(), Some(outcome.message.as_str()));
        assert!(data.flags.is_none());
    }

    // -- respond() ---------------------------------------------------------

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        /// Callback type, ephemeral flag, and Crafty requests made before it.
        Callback(InteractionCallbackType, bool, usize),
        Edit(InteractionCallbackData),
        Delete,
        Followup(InteractionCallbackData),
    }

    struct RecordingReplies {
        crafty: Arc<ScriptedTransport>,
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingReplies {
        fn new(crafty: Arc<ScriptedTransport>) -> Self {
            Self {
                crafty,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl InteractionReplies for RecordingReplies {
        async fn create_interaction_response(
            &self,
            interaction_id: &str,
            interaction_token: &str,
            response: &InteractionResponse,
        ) -> Result<(), HttpError> {
            assert_eq!((interaction_id, interaction_token), ("100", "tok"));
            let ephemeral = response.data.as_ref().is_some_and(|d| d.is_ephemeral());
            let seen = self.crafty.requests().len();
            self.sent.lock().unwrap().push(Sent::Callback(response.kind, ephemeral, seen));
            Ok(())
        }

        async fn edit_original_interaction_response(
            &self,
            application_id: &str,
            interaction_token: &str,
            data: &InteractionCallbackData,
        ) -> Result<(), HttpError> {
            assert_eq!((application_id, interaction_token), ("200", "tok"));
            self.sent.lock().unwrap().push(Sent::Edit(data.clone()));
            Ok(())
        }

        async fn delete_original_interaction_response(
            &self,
            application_id: &str,
            interaction_token: &str,
        ) -> Result<(), HttpError> {
            assert_eq!((application_id, interaction_token), ("200", "tok"));
            self.sent.lock().unwrap().push(Sent::Delete);
            Ok(())
        }

        async fn create_followup_message(
            &self,
            application_id: &str,
            interaction_token: &str,
            data: &InteractionCallbackData,
        ) -> Result<(), HttpError> {
            assert_eq!((application_id, interaction_token), ("200", "tok"));
            self.sent.lock().unwrap().push(Sent::Followup(data.clone()));
            Ok(())
        }
    }

    fn crafty(replies: Vec<Result<ApiResponse, TransportError>>) -> (CraftySession, Arc<ScriptedTransport>) {
        let transport = ScriptedTransport::new(replies);
        let config = CraftyConfig {
            base_url: "https://crafty.local".into(),
            username: "admin".into(),
            password: "secret".into(),
            server_id: "42".into(),
            accept_invalid_certs: false,
        };
        (CraftySession::with_transport(&config, transport.clone()), transport)
    }

    const DEFERRED: InteractionCallbackType = InteractionCallbackType::DeferredChannelMessageWithSource;

    #[tokio::test]
    async fn button_is_deferred_privately_before_crafty_is_called() {
        let (session, transport) = crafty(vec![login_ok("T1"), empty(200)]);
        let replies = RecordingReplies::new(transport.clone());
        let press = interaction(3, json!({ "custom_id": "start", "component_type": 2 }));

        respond(&replies, &session, &display(), &press).await.expect("handled");

        assert_eq!(
            replies.sent(),
            vec![
                Sent::Callback(DEFERRED, true, 0),
                Sent::Edit(InteractionCallbackData::text("✅ Start server command sent successfully!")),
            ]
        );
        assert_eq!(transport.count("/action/start_server"), 1);
    }

    #[tokio::test]
    async fn failed_action_still_reaches_the_user() {
        let (session, transport) = crafty(vec![login_ok("T1"), empty(500)]);
        let replies = RecordingReplies::new(transport);
        let press = interaction(3, json!({ "custom_id": "stop", "component_type": 2 }));

        respond(&replies, &session, &display(), &press).await.expect("handled");

        let sent = replies.sent();
        assert_eq!(sent[0], Sent::Callback(DEFERRED, true, 0));
        let Sent::Edit(data) = &sent[1] else {
            panic!("expected the outcome edit, got {:?}", sent[1]);
        };
        assert!(data.content.as_deref().unwrap().starts_with("❌ Error sending stop_server command:"));
    }

    #[tokio::test]
    async fn serverinfo_defers_publicly_then_fills_in_the_panel() {
        let body = json!({ "data": { "server_name": "Survival", "executable": "paper-1.20.4.jar" } });
        let (session, transport) = crafty(vec![login_ok("T1"), reply(200, body)]);
        let replies = RecordingReplies::new(transport);
        let command = interaction(2, json!({ "name": "serverinfo" }));

        respond(&replies, &session, &display(), &command).await.expect("handled");

        let sent = replies.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Sent::Callback(DEFERRED, false, 0));
        let Sent::Edit(panel) = &sent[1] else {
            panic!("expected the panel edit, got {:?}", sent[1]);
        };
        let embed = &panel.embeds.as_ref().expect("embed")[0];
        assert_eq!(embed.field_value("Version"), Some("1.20.4"));
    }

    #[tokio::test]
    async fn serverinfo_failure_replaces_placeholder_with_private_message() {
        let (session, transport) = crafty(vec![unreachable(), unreachable(), unreachable()]);
        let replies = RecordingReplies::new(transport);
        let command = interaction(2, json!({ "name": "serverinfo" }));

        respond(&replies, &session, &display(), &command).await.expect("handled");

        assert_eq!(
            replies.sent(),
            vec![
                Sent::Callback(DEFERRED, false, 0),
                Sent::Delete,
                Sent::Followup(InteractionCallbackData::text(FETCH_FAILED).ephemeral()),
            ]
        );
    }

    #[tokio::test]
    async fn ping_is_answered_without_crafty() {
        let (session, transport) = crafty(Vec::new());
        let replies = RecordingReplies::new(transport.clone());

        respond(&replies, &session, &display(), &interaction(1, Value::Null))
            .await
            .expect("handled");

        assert_eq!(
            replies.sent(),
            vec![Sent::Callback(InteractionCallbackType::Pong, false, 0)]
        );
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn unhandled_interaction_gets_no_reply() {
        let (session, transport) = crafty(Vec::new());
        let replies = RecordingReplies::new(transport.clone());
        let comp = interaction(3, json!({ "custom_id": "reroll:6", "component_type": 2 }));

        respond(&replies, &session, &display(), &comp).await.expect("handled");

        assert!(replies.sent().is_empty());
        assert!(transport.requests().is_empty());
    }
}

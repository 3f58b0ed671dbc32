//! Discord bot platform driver, built on `serenity`.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{
    ChannelId, CreateAttachment, CreateMessage, EditMessage, GatewayIntents, GetMessages, GuildId, Http,
    MessageId as SerenityMessageId, ReactionType as SerenityReactionType,
};
use serenity::all::{Context, EventHandler, Message, Ready};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, RwLock};

use crate::error::{PlatformError, Result};
use crate::platform::{HistoryPage, PlatformDriver, SendMessageRequest};

/// Raw gateway events the Discord incoming handler translates into core events.
pub enum DiscordRawEvent {
    NewMessage(Message),
    MessageUpdate(Message),
    MessageDelete { guild_id: Option<GuildId>, channel_id: ChannelId, message_id: SerenityMessageId },
    ReactionAdd(serenity::all::Reaction),
    ReactionRemove(serenity::all::Reaction),
}

/// Discord's platform-native identity for a channel: `{guild_id}/{channel_id}`
/// for guild channels, the bare channel id for DMs (which have no guild).
/// Kept for round-tripping to serenity, since the wire-facing `conversation_id`
/// below is a one-way hash of this.
pub fn platform_conversation_id(guild_id: Option<GuildId>, channel_id: ChannelId) -> String {
    match guild_id {
        Some(guild_id) => format!("{guild_id}/{channel_id}"),
        None => channel_id.to_string(),
    }
}

/// Discord's `conversation_id` is a deterministic hash of the platform
/// conversation id, so a guild/channel pair is never exposed over the wire.
pub fn conversation_id_for(platform_conversation_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(platform_conversation_id.as_bytes());
    hex::encode(hasher.finalize())
}

struct ForwardingHandler {
    tx: mpsc::Sender<DiscordRawEvent>,
}

#[async_trait]
impl EventHandler for ForwardingHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(bot = %ready.user.name, "discord gateway connected");
    }

    async fn message(&self, _ctx: Context, new_message: Message) {
        let _ = self.tx.send(DiscordRawEvent::NewMessage(new_message)).await;
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old: Option<Message>,
        _new: Option<Message>,
        event: serenity::all::MessageUpdateEvent,
    ) {
        if let Ok(message) = event.channel_id.message(&ctx.http, event.id).await {
            let _ = self.tx.send(DiscordRawEvent::MessageUpdate(message)).await;
        }
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: SerenityMessageId,
        guild_id: Option<GuildId>,
    ) {
        let _ = self
            .tx
            .send(DiscordRawEvent::MessageDelete {
                guild_id,
                channel_id,
                message_id: deleted_message_id,
            })
            .await;
    }

    async fn reaction_add(&self, _ctx: Context, reaction: serenity::all::Reaction) {
        let _ = self.tx.send(DiscordRawEvent::ReactionAdd(reaction)).await;
    }

    async fn reaction_remove(&self, _ctx: Context, reaction: serenity::all::Reaction) {
        let _ = self.tx.send(DiscordRawEvent::ReactionRemove(reaction)).await;
    }
}

pub struct DiscordAdapter {
    token: String,
    http: RwLock<Option<Arc<Http>>>,
}

impl DiscordAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            http: RwLock::new(None),
        }
    }

    /// Start the gateway client, forwarding raw events to `tx`. Returns once
    /// the REST `Http` handle is available for the driver's own calls.
    pub async fn connect(&self, tx: mpsc::Sender<DiscordRawEvent>) -> Result<()> {
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::GUILD_MESSAGE_REACTIONS
            | GatewayIntents::DIRECT_MESSAGE_REACTIONS
            | GatewayIntents::GUILDS;

        let mut client = serenity::Client::builder(&self.token, intents)
            .event_handler(ForwardingHandler { tx })
            .await
            .map_err(|e| PlatformError::Internal(format!("failed to build discord client: {e}")))?;

        *self.http.write().await = Some(client.http.clone());

        tokio::spawn(async move {
            if let Err(error) = client.start().await {
                tracing::error!(%error, "discord gateway error");
            }
        });
        Ok(())
    }

    async fn http(&self) -> Result<Arc<Http>> {
        self.http
            .read()
            .await
            .clone()
            .ok_or_else(|| PlatformError::Internal("discord gateway not yet connected".into()).into())
    }

    /// Parse a `platform_conversation_id` (`"{guild}/{channel}"` or a bare
    /// DM channel id) into the channel snowflake serenity needs. Callers
    /// pass the resolved platform id, not the wire-facing hashed
    /// `conversation_id`.
    fn channel_id(platform_conversation_id: &str) -> Result<ChannelId> {
        let channel_part = platform_conversation_id.rsplit('/').next().unwrap_or(platform_conversation_id);
        channel_part.parse::<u64>().map(ChannelId::new).map_err(|_| {
            PlatformError::InvalidRequest(format!("not a discord channel id: {platform_conversation_id}")).into()
        })
    }

    fn message_id(message_id: &str) -> Result<SerenityMessageId> {
        message_id
            .parse::<u64>()
            .map(SerenityMessageId::new)
            .map_err(|_| PlatformError::InvalidRequest(format!("not a discord message id: {message_id}")).into())
    }
}

#[async_trait]
impl PlatformDriver for DiscordAdapter {
    fn adapter_type(&self) -> &'static str {
        "discord"
    }

    fn max_message_length(&self) -> usize {
        2000
    }

    fn max_attachments_per_message(&self) -> usize {
        10
    }

    async fn connection_exists(&self) -> bool {
        match self.http().await {
            Ok(http) => http.get_current_user().await.is_ok(),
            Err(_) => false,
        }
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<Vec<String>> {
        let http = self.http().await?;
        let channel_id = Self::channel_id(&request.conversation_id)?;

        let mut builder = CreateMessage::new().content(&request.text);
        for path in &request.attachment_paths {
            builder = builder.add_file(CreateAttachment::path(path).await.map_err(|e| {
                PlatformError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?);
        }
        let sent = channel_id
            .send_message(&http, builder)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(vec![sent.id.to_string()])
    }

    async fn edit_message(&self, conversation_id: &str, message_id: &str, text: &str) -> Result<()> {
        let http = self.http().await?;
        Self::channel_id(conversation_id)?
            .edit_message(&http, Self::message_id(message_id)?, EditMessage::new().content(text))
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let http = self.http().await?;
        Self::channel_id(conversation_id)?
            .delete_message(&http, Self::message_id(message_id)?)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn add_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let http = self.http().await?;
        let glyph = crate::emoji::glyph_for(emoji).ok_or_else(|| PlatformError::UnknownEmoji(emoji.to_string()))?;
        Self::channel_id(conversation_id)?
            .create_reaction(&http, Self::message_id(message_id)?, SerenityReactionType::Unicode(glyph.to_string()))
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn remove_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let http = self.http().await?;
        let glyph = crate::emoji::glyph_for(emoji).ok_or_else(|| PlatformError::UnknownEmoji(emoji.to_string()))?;
        Self::channel_id(conversation_id)?
            .delete_reaction_emoji(&http, Self::message_id(message_id)?, SerenityReactionType::Unicode(glyph.to_string()))
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn pin_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let http = self.http().await?;
        Self::channel_id(conversation_id)?
            .pin(&http, Self::message_id(message_id)?)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn unpin_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let http = self.http().await?;
        Self::channel_id(conversation_id)?
            .unpin(&http, Self::message_id(message_id)?)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn fetch_history_page(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        after: Option<i64>,
        limit: u32,
    ) -> Result<HistoryPage> {
        let http = self.http().await?;
        let channel_id = Self::channel_id(conversation_id)?;

        let mut builder = GetMessages::new().limit(limit.min(100) as u8);
        if let Some(before) = before {
            builder = builder.before(snowflake_for_timestamp_ms(before));
        }
        if let Some(after) = after {
            builder = builder.after(snowflake_for_timestamp_ms(after));
        }

        let messages = channel_id
            .messages(&http, builder)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;

        let has_more = messages.len() as u32 >= limit;
        let messages = messages.into_iter().map(discord_message_to_dto).collect();
        Ok(HistoryPage { messages, has_more })
    }

    async fn fetch_attachment(&self, attachment_id: &str) -> Result<Vec<u8>> {
        Err(PlatformError::Unsupported(format!(
            "discord attachments are fetched by URL, not id ({attachment_id})"
        ))
        .into())
    }
}

/// Discord snowflakes encode a millisecond timestamp in their high bits;
/// used to translate `before`/`after` epoch-ms bounds into message ids for
/// `GetMessages`.
fn snowflake_for_timestamp_ms(timestamp_ms: i64) -> SerenityMessageId {
    const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
    let relative = (timestamp_ms - DISCORD_EPOCH_MS).max(0) as u64;
    SerenityMessageId::new(relative << 22)
}

fn discord_message_to_dto(message: Message) -> crate::conversation::message_builder::NewMessageInput {
    use crate::conversation::message_builder::NewMessageInput;
    use std::collections::HashMap;

    let mut reactions = HashMap::new();
    for reaction in &message.reactions {
        let canonical = crate::emoji::canonicalize(&reaction.reaction_type.to_string());
        reactions.insert(canonical, reaction.count as u32);
    }

    NewMessageInput {
        message_id: message.id.to_string(),
        sender: message.author.id.to_string(),
        sender_name: message.author.name.clone(),
        is_from_bot: message.author.bot,
        text: message.content.clone(),
        timestamp: message.timestamp.timestamp() * 1000,
        reply_to_message_id: message.referenced_message.as_ref().map(|m| m.id.to_string()),
        is_pinned: message.pinned,
        reactions,
        attachment_ids: Vec::new(),
        mentioned_user_ids: message.mentions.iter().map(|u| u.id.to_string()).collect(),
        mentions_all: message.mention_everyone,
    }
}

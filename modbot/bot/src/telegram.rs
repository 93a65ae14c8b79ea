use std::{fmt, time::Duration};

use async_trait::async_trait;
use modbot_moderation::{ChatInfo, ChatPlatform, InboundMessage, PlatformError, UserProfile};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

const API_ROOT: &str = "https://api.telegram.org";

/// One entry of a `getUpdates` answer.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
            language_code: user.language_code,
        }
    }
}

impl From<Message> for InboundMessage {
    fn from(message: Message) -> Self {
        Self {
            chat_id: message.chat.id,
            message_id: message.message_id,
            from: message.from.map(UserProfile::from),
            text: message.text.or(message.caption),
            reply_to: message
                .reply_to_message
                .map(|reply| Box::new(Self::from(*reply))),
        }
    }
}

impl Update {
    /// The message carried by this update, if it is a new message.
    #[must_use]
    pub fn into_inbound(self) -> Option<InboundMessage> {
        self.message.map(InboundMessage::from)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

/// Decodes a Bot API `{ ok, result, description, error_code }` envelope.
fn decode_envelope<T: DeserializeOwned>(
    method: &'static str,
    body: &[u8],
) -> Result<T, PlatformError> {
    let envelope: Envelope<T> =
        serde_json::from_slice(body).map_err(|err| PlatformError::Decode {
            method,
            reason: err.to_string(),
        })?;
    match envelope {
        Envelope {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        Envelope { ok: true, .. } => Err(PlatformError::Decode {
            method,
            reason: "missing result".into(),
        }),
        Envelope {
            description,
            error_code,
            ..
        } => Err(PlatformError::Api {
            method,
            code: error_code.unwrap_or_default(),
            description: description.unwrap_or_else(|| "no description".into()),
        }),
    }
}

/// Source of inbound updates.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Long-polls for updates with an id of at least `offset`.
    async fn updates(&self, offset: i64, wait: Duration) -> Result<Vec<Update>, PlatformError>;
}

/// Bot API client over HTTPS.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    base: String,
    call_timeout: Duration,
}

impl fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient")
            .field("token", &"Set")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// Builds a client for `token`; each request is bounded by `call_timeout`.
    pub fn new(token: &str, call_timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            base: format!("{API_ROOT}/bot{token}"),
            call_timeout,
        })
    }

    async fn call<P, T>(
        &self,
        method: &'static str,
        params: &P,
        budget: Duration,
    ) -> Result<T, PlatformError>
    where
        P: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let transport = |err: reqwest::Error| {
            if err.is_timeout() {
                PlatformError::Timeout {
                    method,
                    after: budget,
                }
            } else {
                // reqwest errors carry the URL, which contains the token
                PlatformError::Transport {
                    method,
                    reason: err.without_url().to_string(),
                }
            }
        };
        let body = self
            .http
            .post(format!("{}/{method}", self.base))
            .timeout(budget)
            .json(params)
            .send()
            .await
            .map_err(transport)?
            .bytes()
            .await
            .map_err(transport)?;
        decode_envelope(method, &body)
    }

    /// The bot's own account; its username is what `/cmd@name` addresses.
    pub async fn get_me(&self) -> Result<User, PlatformError> {
        self.call("getMe", &json!({}), self.call_timeout).await
    }

    /// Registers `url` as the update webhook. Telegram echoes `secret` in the
    /// `X-Telegram-Bot-Api-Secret-Token` header of every delivery.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), PlatformError> {
        let mut params = json!({ "url": url, "allowed_updates": ["message"] });
        if let Some(secret) = secret {
            params["secret_token"] = json!(secret);
        }
        let _: bool = self.call("setWebhook", &params, self.call_timeout).await?;
        Ok(())
    }

    /// Removes any webhook; `getUpdates` is refused while one is set.
    pub async fn delete_webhook(&self) -> Result<(), PlatformError> {
        let _: bool = self
            .call("deleteWebhook", &json!({}), self.call_timeout)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn get_chat(&self, chat_id: i64) -> Result<ChatInfo, PlatformError> {
        let chat: Chat = self
            .call("getChat", &json!({ "chat_id": chat_id }), self.call_timeout)
            .await
            .map_err(|err| match err {
                PlatformError::Api { description, .. } => PlatformError::ChatLookup {
                    chat_id,
                    reason: description,
                },
                other => other,
            })?;
        Ok(ChatInfo {
            id: chat.id,
            title: chat.title,
        })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id, "message_id": message_id }),
                self.call_timeout,
            )
            .await?;
        Ok(())
    }

    async fn ban_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        revoke_messages: bool,
    ) -> Result<(), PlatformError> {
        let _: bool = self
            .call(
                "banChatMember",
                &json!({
                    "chat_id": chat_id,
                    "user_id": user_id,
                    "revoke_messages": revoke_messages,
                }),
                self.call_timeout,
            )
            .await?;
        Ok(())
    }

    async fn send_reply(
        &self,
        chat_id: i64,
        reply_to_message_id: i64,
        text: &str,
    ) -> Result<(), PlatformError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &json!({
                    "chat_id": chat_id,
                    "text": text,
                    "reply_parameters": {
                        "message_id": reply_to_message_id,
                        "allow_sending_without_reply": true,
                    },
                }),
                self.call_timeout,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn updates(&self, offset: i64, wait: Duration) -> Result<Vec<Update>, PlatformError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": wait.as_secs(),
                "allowed_updates": ["message"],
            }),
            wait + self.call_timeout,
        )
        .await
    }
}

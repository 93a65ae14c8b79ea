const MAX_COMMAND_LEN: usize = 32;

/// Commands the bot understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// `/start`: greeting.
    Start,
    /// `/user_id`: profile of the replied-to user.
    UserId,
    /// `/user_is_join`: groups the replied-to user posted in (admin only).
    UserIsJoin,
    /// `/banall`: ban the replied-to user everywhere (admin only).
    BanAll,
    /// Any other command name.
    Other(String),
}

impl BotCommand {
    fn from_name(name: &str) -> Self {
        match name {
            "start" => Self::Start,
            "user_id" => Self::UserId,
            "user_is_join" => Self::UserIsJoin,
            "banall" => Self::BanAll,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether only administrators may run the command.
    #[must_use]
    pub const fn requires_admin(&self) -> bool {
        matches!(self, Self::UserIsJoin | Self::BanAll)
    }
}

/// A parsed `/command[@bot] args` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Command.
    pub command: BotCommand,
    /// Bot the command was addressed to with `@name`, if any.
    pub addressed_to: Option<String>,
    /// Text after the command, trimmed.
    pub args: String,
}

impl CommandInvocation {
    /// Parses message text, returning `None` for ordinary messages.
    ///
    /// Command names are matched case-insensitively and may be at most 32
    /// characters of ASCII letters, digits and underscores.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix('/')?;
        let (head, args) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(head, args)| (head, args.trim()));
        let (name, addressed_to) = match head.split_once('@') {
            Some((name, bot)) if !bot.is_empty() => (name, Some(bot.to_string())),
            Some(_) => return None,
            None => (head, None),
        };
        let valid = !name.is_empty()
            && name.len() <= MAX_COMMAND_LEN
            && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !valid {
            return None;
        }
        Some(Self {
            command: BotCommand::from_name(&name.to_ascii_lowercase()),
            addressed_to,
            args: args.to_string(),
        })
    }

    /// Whether this bot should act on the command.
    ///
    /// Commands without `@name` are for every bot in the chat. When the own
    /// username is unknown an addressed command is accepted as well.
    #[must_use]
    pub fn is_for(&self, bot_username: Option<&str>) -> bool {
        match (&self.addressed_to, bot_username) {
            (Some(target), Some(own)) => target.eq_ignore_ascii_case(own.trim_start_matches('@')),
            (None, _) | (Some(_), None) => true,
        }
    }
}

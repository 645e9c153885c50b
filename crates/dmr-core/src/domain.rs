/// Platform user id (numeric snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub u64);

/// Platform channel id (numeric snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Platform webhook id (numeric snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WebhookId(pub u64);

/// Platform guild id (numeric snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GuildId(pub u64);

pub mod message;
pub mod user;

pub type UserId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;

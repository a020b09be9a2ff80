pub mod agent_schema;
pub mod capabilities;
pub mod chat;
pub mod conversation;
pub mod dispatch;
pub mod events;
pub mod ui;

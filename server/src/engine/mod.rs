pub mod alerts;
pub mod chat_engine;
pub mod error;
pub mod events;
pub mod fanout;
pub mod graph;
pub mod permissions;
pub mod relations;
pub mod validation;

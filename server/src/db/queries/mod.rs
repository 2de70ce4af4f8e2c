pub mod channels;
pub mod emotes;
pub mod invites;
pub mod messages;
pub mod relations;
pub mod servers;
pub mod users;

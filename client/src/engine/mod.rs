pub mod events;
pub mod permissions;
pub mod reconciler;
pub mod server;
pub mod validation;

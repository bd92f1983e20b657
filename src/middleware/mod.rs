pub mod authentication;
pub mod context;
pub mod guard;
pub mod permissions;

pub mod auth;
pub mod invite_code;
pub mod registration;
pub mod states;

pub mod api;
pub mod invite_code;
pub mod invite_code_usage;
pub mod token;
pub mod users;

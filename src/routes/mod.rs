mod auth;

pub use auth::{login, logout, logout_all, me, refresh, register};
pub use auth::{LoginRequest, MessageResponse, RegisterRequest};

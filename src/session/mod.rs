pub mod dto;
pub mod http;
pub mod manager;
pub mod urls;
pub mod wqb_session;

pub use manager::SessionManager;
pub use wqb_session::WQBSession;

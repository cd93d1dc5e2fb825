//! Session authentication against the account backend's signed cookie.

mod session;

pub use session::{session_cookie_value, session_user};

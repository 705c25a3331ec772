//! Database repository layer for PeakSelf
//!
//! Every query against `users` and `sessions` lives here so the auth guard,
//! the services and the session sweeper share one set of SQL statements.

pub mod session;
pub mod user;
pub mod utils;

pub use session::SessionRepository;
pub use user::UserRepository;

//! Recording: capturing live exchanges and persisting them at shutdown

mod capture;
mod guard;

pub use capture::capture;
pub use guard::PersistGuard;

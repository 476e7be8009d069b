mod role;
mod status;

pub use role::PairRole;
pub use status::PairStatus;

mod notification;
mod project;
mod subscription;
mod transaction;

pub use notification::*;
pub use project::*;
pub use subscription::*;
pub use transaction::*;

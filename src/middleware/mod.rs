mod project_auth;

pub use project_auth::{project_auth, ProjectContext};

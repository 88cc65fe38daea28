pub mod janitor;
pub mod manager;

pub use manager::{Workspace, WorkspaceManager};

//! Test harness: isolated workspaces with tracked-edit drivers.

mod workspace;

pub use workspace::TestWorkspace;

//! Kubernetes plumbing shared by every resource type

pub mod client;
pub mod discovery;
pub mod errors;
pub mod ids;
pub mod patch;
#[cfg(test)]
pub(crate) mod testing;
pub mod wait;

pub use client::create_client;
pub use patch::{PatchOp, diff as patch_diff, to_json_patch};
pub use wait::{PollStatus, poll_until, retry, wait_for_deletion};

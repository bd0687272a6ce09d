//! Deployment orchestrator
//!
//! The state machine that sequences a deployment:
//! acquire lock → snapshot → maintenance on → apply in bounded chunks →
//! record outcome → maintenance off → release lock, restoring from the
//! snapshot when the apply fails. This module is the single writer of
//! deployment records and progress state, and the only layer that logs.

mod options;
mod result;
mod use_case;


pub use options::DeployOptions;
pub use result::{DeployOutcome, DeployPlan, DeployStatus};
pub use use_case::{Orchestrator, LAST_COMMIT_KEY, PROGRESS_KEY};

//! Warden Types - Domain model for the access-request governance engine
//!
//! Users **appeal** for time-boxed or permanent access to resources managed
//! by external providers. An appeal carries an ordered chain of **approvals**
//! expanded from a versioned **policy**; once every step resolves, access is
//! granted, and it is revoked again on expiry or on demand.
//!
//! # Key Concepts
//!
//! - **Appeal**: a single access request tracked through its approval chain.
//! - **Approval**: one step instance of an appeal, bound to a policy step.
//! - **Policy**: versioned governance configuration (steps, eligibility
//!   rules, requirements).
//! - **Provider / Resource**: read-mostly reference data owned by external
//!   collaborators; the engine only looks them up.
//! - **Notification**: typed messages fanned out to requesters and approvers.

#![deny(unsafe_code)]

mod appeal;
mod approval;
mod duration;
mod notification;
mod policy;
mod provider;
mod resource;

pub use appeal::*;
pub use approval::*;
pub use duration::*;
pub use notification::*;
pub use policy::*;
pub use provider::*;
pub use resource::*;

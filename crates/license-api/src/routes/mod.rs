//! HTTP route modules, one per resource, merged into a single router in
//! [`crate::app`].

pub mod cml;
pub mod keys;
pub mod ledger;
pub mod licenses;
pub mod manifests;
pub mod orgs;
pub mod sites;
pub mod validate;

//! Sitehost CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the site controller and
//! the content sync engine, plus the naming rules for generated resources.

pub mod conditions;
pub mod naming;
pub mod static_site;

pub use conditions::*;
pub use static_site::*;

//! Built-in PKI plugins
//!
//! `pki-backend` installs a certificate issuing secrets engine; `pki-monitor`
//! installs the policy enforcing variant. Both share the credential and role
//! entities in [`entities`].

pub mod backend;
pub mod certificate;
pub mod entities;
pub mod monitor;

pub use backend::PkiBackend;
pub use certificate::{CertificateProvider, ControlPlaneIssuer, IssuedCertificate};
pub use entities::{PolicySpec, RoleSpec, SecretSpec};
pub use monitor::PkiMonitor;

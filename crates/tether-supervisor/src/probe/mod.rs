mod backoff;
mod http;
mod startup;

pub use backoff::LinearBackoff;
pub use http::{probe_once, HttpProbe, ProbeFailure, ReqwestProbe};
pub use startup::StartupProber;

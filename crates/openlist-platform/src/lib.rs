//! Host-facing helpers for the OpenList updater: where files live and which
//! CPU architecture the router reports.

mod host;
mod paths;

pub use host::{detect_host_arch, parse_uname_output};
pub use paths::{AppPaths, AppPathsError, HOME_OVERRIDE_ENV};

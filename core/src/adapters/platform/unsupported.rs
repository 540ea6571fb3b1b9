//! Placeholder backend for targets without socket introspection.

use std::convert::Infallible;

use crate::domain::{CorrelationKey, Resolution, SocketEntry};
use crate::error::{Error, Result};
use crate::ports::{Platform, ResolvePass};

/// Cannot be constructed; [`UnsupportedPlatform::detect`] always fails.
pub struct UnsupportedPlatform {
    _never: Infallible,
}

impl UnsupportedPlatform {
    pub fn detect() -> Result<Self> {
        Err(Error::PlatformUnsupported(std::env::consts::OS.to_string()))
    }
}

pub struct NoPass;

impl ResolvePass for NoPass {
    fn resolve(&mut self, _key: &CorrelationKey) -> Resolution {
        Resolution::NotFound
    }
}

impl Platform for UnsupportedPlatform {
    type Pass = NoPass;

    fn name(&self) -> &'static str {
        "unsupported"
    }

    async fn enumerate_sockets(&self, _include_non_listening: bool) -> Result<Vec<SocketEntry>> {
        match self._never {}
    }

    async fn begin_pass(&self) -> NoPass {
        NoPass
    }
}

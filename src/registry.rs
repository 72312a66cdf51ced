//! Process-scoped registry of installed capture engines.
//!
//! A page context (a tab, a window, a CLI session) gets at most one engine.
//! `install` is a check-and-set under a single lock, so concurrent or repeated
//! installs for the same context observe the same engine and the factory runs
//! once.

use crate::pipeline::CaptureEngine;
use crate::Result;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

static ENGINES: OnceLock<Mutex<HashMap<String, Arc<CaptureEngine>>>> = OnceLock::new();

fn engines() -> MutexGuard<'static, HashMap<String, Arc<CaptureEngine>>> {
    ENGINES
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// What `install` found
#[derive(Debug, Clone)]
pub enum Installation {
    /// The factory ran and its engine is now registered
    Installed(Arc<CaptureEngine>),
    /// An engine was already registered; the factory did not run
    AlreadyInstalled(Arc<CaptureEngine>),
}

impl Installation {
    pub fn engine(&self) -> &Arc<CaptureEngine> {
        match self {
            Installation::Installed(e) | Installation::AlreadyInstalled(e) => e,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Installation::Installed(_))
    }
}

/// Install an engine for `context` unless one is already present.
///
/// A failing factory leaves the context empty.
pub fn install<F>(context: &str, factory: F) -> Result<Installation>
where
    F: FnOnce() -> Result<CaptureEngine>,
{
    let mut map = engines();
    if let Some(existing) = map.get(context) {
        debug!("engine already installed for {}", context);
        return Ok(Installation::AlreadyInstalled(existing.clone()));
    }
    let engine = Arc::new(factory()?);
    map.insert(context.to_string(), engine.clone());
    debug!("installed engine for {}", context);
    Ok(Installation::Installed(engine))
}

pub fn lookup(context: &str) -> Option<Arc<CaptureEngine>> {
    engines().get(context).cloned()
}

/// Remove the engine for `context`, e.g. when the page goes away.
pub fn uninstall(context: &str) -> Option<Arc<CaptureEngine>> {
    engines().remove(context)
}

//! Instrumentation hook

use super::TaskRuntime;
use crate::applet::Applet;

/// Side channel notified as applets are visited
///
/// Every evaluated applet gets `on_applet_started` followed by
/// `on_applet_terminated`; applets passed over by short-circuiting or branch
/// selection only get `on_applet_skipped`. Observers must not influence the
/// outcome.
pub trait Observer: Send + Sync {
    fn on_applet_started(&self, _victim: &Applet, _runtime: &TaskRuntime) {}

    fn on_applet_terminated(&self, _victim: &Applet, _runtime: &TaskRuntime) {}

    fn on_applet_skipped(&self, _victim: &Applet, _runtime: &TaskRuntime) {}
}

//! Resize controller: applies client geometry changes to the live pty.

use protocol::TerminalGeometry;

use crate::session::PtyResize;

/// Holds the pty resize capability and the last geometry applied.
pub struct ResizeController {
    resizer: Box<dyn PtyResize>,
    current: TerminalGeometry,
    applied: u64,
}

impl ResizeController {
    pub fn new(resizer: Box<dyn PtyResize>, initial: TerminalGeometry) -> Self {
        Self {
            resizer,
            current: initial,
            applied: 0,
        }
    }

    /// Sends a window-change request.
    ///
    /// Failures are logged and swallowed; the session keeps running with
    /// its previous geometry. Returns whether the request went through.
    pub async fn apply(&mut self, geometry: TerminalGeometry) -> bool {
        match self.resizer.resize(geometry).await {
            Ok(()) => {
                tracing::debug!(rows = geometry.rows, cols = geometry.cols, "Resized pty");
                self.current = geometry;
                self.applied += 1;
                true
            }
            Err(e) => {
                tracing::warn!(
                    rows = geometry.rows,
                    cols = geometry.cols,
                    kept_rows = self.current.rows,
                    kept_cols = self.current.cols,
                    error = %e,
                    "Cannot resize ssh session terminal"
                );
                false
            }
        }
    }

    /// Geometry of the last successful resize, or the initial pty size.
    pub fn current(&self) -> TerminalGeometry {
        self.current
    }

    /// Number of successful resizes.
    pub fn applied(&self) -> u64 {
        self.applied
    }
}

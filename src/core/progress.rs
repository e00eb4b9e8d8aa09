/*
 * Progress reporting shared by the long-running operations (dataset loading,
 * iEEG side-table loading and export). Each step calls the caller's callback
 * with `(current, total, message)`; the callback answers whether the operation
 * should continue. Operations stop at the next step boundary after a
 * `Cancel` answer and report cancellation as an error.
 */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    Continue,
    Cancel,
}

/*
 * Wraps an optional caller-supplied callback. A reporter without a callback
 * always continues.
 */
pub struct ProgressReporter<'a> {
    callback: Option<&'a mut dyn FnMut(usize, usize, &str) -> ProgressAction>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: &'a mut dyn FnMut(usize, usize, &str) -> ProgressAction) -> Self {
        ProgressReporter {
            callback: Some(callback),
        }
    }

    pub fn silent() -> Self {
        ProgressReporter { callback: None }
    }

    pub fn report(&mut self, current: usize, total: usize, message: &str) -> ProgressAction {
        match self.callback.as_mut() {
            Some(callback) => {
                let action = callback(current, total, message);
                if action == ProgressAction::Cancel {
                    log::debug!("ProgressReporter: Cancel requested at step {current}/{total}");
                }
                action
            }
            None => ProgressAction::Continue,
        }
    }
}

impl Default for ProgressReporter<'_> {
    fn default() -> Self {
        Self::silent()
    }
}

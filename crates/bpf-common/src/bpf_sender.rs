//! The [`BpfSender`] trait is used by [`crate::Program`] to deliver
//! termination records and errors to userspace consumers.
//!
//! [`BpfSender::send`] must not block since it is called from async contexts.

use tokio::sync::mpsc;

use crate::ProgramError;

pub trait BpfSender<T>: Clone + Send + 'static {
    /// Must not block since it can be used in async contexts
    fn send(&mut self, data: Result<T, ProgramError>);
}

/// Simple implementation for tokio::mpsc bounded channels.
/// Sending with a full channel will drop messages: reporting is best
/// effort, the enforcement decision already happened in the kernel.
impl<T: 'static + Send> BpfSender<T> for mpsc::Sender<Result<T, ProgramError>> {
    fn send(&mut self, data: Result<T, ProgramError>) {
        if self.try_send(data).is_err() {
            log::warn!("dropping msg");
        }
    }
}

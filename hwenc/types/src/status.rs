/*!
    Caller-visible status codes.
*/

use crate::Result;

/**
    Status reported synchronously by every public encoder operation.

    Callers observe failures purely through these codes and through the
    presence or absence of encoded frame callbacks.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecStatus {
    /**
        The operation succeeded.

        A frame dropped for flow control also reports `Ok`.
    */
    Ok,
    /// The operation failed.
    Error,
    /// The encoder has no running session.
    Uninitialized,
    /// Releasing the encoder did not finish in time.
    Timeout,
    /**
        The hardware codec became unusable.

        The caller should switch to a software encoder.
    */
    FallbackSoftware,
}

impl CodecStatus {
    /**
        Returns the status a result is reported as.
    */
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => e.status(),
        }
    }

    /**
        Returns true if this is [`CodecStatus::Ok`].
    */
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/*!
    Output thread handle and bounded shutdown.

    The running flag is the only state the submitting thread shares with the
    output thread. Clearing it asks the loop to finish its current poll and
    release the device; the release outcome comes back over a channel so the
    wait can be bounded.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use tracing::{debug, error};

use hwenc_types::{Error, Result};

use crate::output::OutputLoop;

const OUTPUT_THREAD_NAME: &str = "hwenc-output";

/**
    Handle to a running output thread.
*/
pub(crate) struct OutputThread {
    running: Arc<AtomicBool>,
    result: Receiver<Result<()>>,
    handle: Option<JoinHandle<()>>,
}

impl OutputThread {
    /**
        Start the output loop on a dedicated thread.
    */
    pub(crate) fn spawn(output: OutputLoop) -> Result<Self> {
        let running = Arc::clone(&output.running);
        let (tx, rx) = bounded(1);

        let handle = thread::Builder::new()
            .name(OUTPUT_THREAD_NAME.to_string())
            .spawn(move || {
                let result = output.run();
                // Release may have timed out and dropped the receiver
                let _ = tx.send(result);
            })?;

        Ok(Self {
            running,
            result: rx,
            handle: Some(handle),
        })
    }

    /**
        Stop the loop and wait up to `timeout` for it to release the device.

        On timeout the thread is detached and keeps running until its
        current device call returns.
    */
    pub(crate) fn shutdown(mut self, timeout: Duration) -> Result<()> {
        self.running.store(false, Ordering::Release);

        match self.result.recv_timeout(timeout) {
            Ok(result) => {
                self.join();
                if let Err(e) = &result {
                    error!("codec release on output thread failed: {e}");
                }
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                error!("output thread did not stop within {timeout:?}");
                Err(Error::Timeout { waited: timeout })
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Err(Error::shutdown("output thread exited without releasing the codec"))
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("output thread panicked");
            }
        }
        debug!("output thread joined");
    }
}

use crate::error::capture_stack;
use crate::logging::LogContext;
use axum::body::Bytes;
use facematch_core::{FaceRecognition, MatchError};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

thread_local! {
    static ON_ENGINE_THREAD: Cell<bool> = const { Cell::new(false) };
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Failures are tagged with the engine thread's stack where they happened.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("face matching failed")]
    Match {
        #[source]
        source: MatchError,
        stack: String,
    },
    #[error("face matching panicked: {message}")]
    Panicked { message: String, stack: String },
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl EngineError {
    /// Stack captured on the engine thread, if the failure happened there.
    pub fn stack(&self) -> Option<&str> {
        match self {
            EngineError::Match { stack, .. } | EngineError::Panicked { stack, .. } => Some(stack),
            EngineError::ChannelClosed | EngineError::Spawn(_) => None,
        }
    }
}

impl From<MatchError> for EngineError {
    fn from(source: MatchError) -> Self {
        EngineError::Match {
            source,
            stack: capture_stack(),
        }
    }
}

/// One uploaded file part, owned by the request that carried it.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Compare {
        first: UploadedImage,
        second: UploadedImage,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode both uploads, encode the first face of each, compare.
    pub async fn compare(
        &self,
        first: UploadedImage,
        second: UploadedImage,
    ) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Compare {
                first,
                second,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns `recognition` and serves requests one at a time until
/// every handle is dropped. Events on the thread go to `log`.
pub fn spawn_engine(
    mut recognition: Box<dyn FaceRecognition>,
    queue_depth: usize,
    log: LogContext,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));
    install_panic_hook();

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            ON_ENGINE_THREAD.set(true);
            let _log_guard = tracing::dispatcher::set_default(log.dispatch());
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Compare {
                        first,
                        second,
                        reply,
                    } => {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            run_compare(recognition.as_mut(), &first, &second)
                        }))
                        .unwrap_or_else(|payload| {
                            Err(EngineError::Panicked {
                                message: panic_message(&*payload),
                                stack: PANIC_STACK.take().unwrap_or_else(capture_stack),
                            })
                        });
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Decode, encode and compare, strictly in that order.
fn run_compare(
    recognition: &mut dyn FaceRecognition,
    first: &UploadedImage,
    second: &UploadedImage,
) -> Result<bool, EngineError> {
    tracing::debug!(
        first_bytes = first.bytes.len(),
        first_type = ?first.content_type,
        second_bytes = second.bytes.len(),
        second_type = ?second.content_type,
        "compare: decoding uploads"
    );

    let image1 = recognition.decode_image(&first.bytes)?;
    let image2 = recognition.decode_image(&second.bytes)?;

    let encoding1 = recognition.extract_face_encoding(&image1)?;
    let encoding2 = recognition.extract_face_encoding(&image2)?;

    Ok(recognition.compare_encodings(&encoding1, &encoding2))
}

/// Chain a hook that records the panicking stack on engine threads.
///
/// The previous hook still runs, so stderr output is unchanged.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if ON_ENGINE_THREAD.get() {
                PANIC_STACK.set(Some(capture_stack()));
            }
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

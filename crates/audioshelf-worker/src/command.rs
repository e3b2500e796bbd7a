//! Operation bodies.
//!
//! Every kind of background work implements [`Command`]. The scheduler
//! never looks inside a command; it only runs it on a worker with a
//! cancellation token and a [`ProgressReporter`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use audioshelf_core::error::AppError;

use crate::reporter::ProgressReporter;

/// Error returned by an operation body.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The body failed. The message is recorded verbatim.
    #[error("{0}")]
    Failed(String),

    /// The body observed cancellation and stopped early.
    #[error("operation canceled")]
    Canceled,

    /// A collaborator the body depends on failed.
    #[error(transparent)]
    Internal(#[from] AppError),
}

impl CommandError {
    /// Shorthand for [`CommandError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A unit of background work.
#[async_trait]
pub trait Command: Send + Sync + fmt::Debug {
    /// Short tag identifying the business logic (e.g. `"scan"`).
    fn operation_type(&self) -> &str;

    /// Optional display-only description of what the command targets.
    fn subject(&self) -> Option<String> {
        None
    }

    /// Run the body to completion.
    ///
    /// Bodies should check `reporter.is_canceled()` at natural checkpoints
    /// and return promptly once it is true.
    async fn execute(
        &self,
        cancel: CancellationToken,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<(), CommandError>;
}

type BoxedBody = Box<
    dyn Fn(
            CancellationToken,
            Arc<dyn ProgressReporter>,
        ) -> futures::future::BoxFuture<'static, Result<(), CommandError>>
        + Send
        + Sync,
>;

/// A [`Command`] built from an async closure.
///
/// Handy for one-off operations that do not warrant their own type.
pub struct FnCommand {
    operation_type: String,
    subject: Option<String>,
    body: BoxedBody,
}

impl FnCommand {
    /// Wrap `body` as a command of the given type.
    pub fn new<F, Fut>(operation_type: impl Into<String>, body: F) -> Self
    where
        F: Fn(CancellationToken, Arc<dyn ProgressReporter>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        Self {
            operation_type: operation_type.into(),
            subject: None,
            body: Box::new(move |cancel, reporter| Box::pin(body(cancel, reporter))),
        }
    }

    /// Attach a subject description.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Debug for FnCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCommand")
            .field("operation_type", &self.operation_type)
            .field("subject", &self.subject)
            .finish()
    }
}

#[async_trait]
impl Command for FnCommand {
    fn operation_type(&self) -> &str {
        &self.operation_type
    }

    fn subject(&self) -> Option<String> {
        self.subject.clone()
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<(), CommandError> {
        (self.body)(cancel, reporter).await
    }
}

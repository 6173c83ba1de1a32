//! View subscriptions.
//!
//! A subscription is a forwarder task draining the bus for one
//! conversation's invalidations into a callback. Cancelling it stops the
//! callbacks but leaves the conversation and its timeline alone.

use hanashi_timeline::Invalidation;
use hanashi_types::ConversationId;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::flows::{Subscription, TimelineFlow};

/// Handle to a live view subscription. Dropping it cancels the subscription.
#[derive(Debug)]
pub struct ViewHandle {
    conversation: ConversationId,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ViewHandle {
    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    /// Stop delivering invalidations. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait until the callback can no longer run.
    pub async fn close(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(conversation = %self.conversation, "view forwarder ended abnormally: {e}");
            }
        }
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn views_of(flow: &TimelineFlow) -> Invalidation {
    match flow {
        TimelineFlow::Invalidated { views, .. } => *views,
        TimelineFlow::Signal(_) => Invalidation::empty(),
    }
}

pub(crate) fn spawn_view<F>(
    runtime: &Handle,
    conversation: ConversationId,
    mut sub: Subscription<TimelineFlow>,
    token: CancellationToken,
    mut callback: F,
) -> ViewHandle
where
    F: FnMut(Invalidation) + Send + 'static,
{
    let task_token = token.clone();
    let task = runtime.spawn(async move {
        loop {
            let first = tokio::select! {
                biased;
                _ = task_token.cancelled() => break,
                msg = sub.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            // Coalesce what queued up behind it into one recompute.
            let mut views = views_of(&first.payload);
            while let Some(more) = sub.try_recv() {
                views |= views_of(&more.payload);
            }

            if task_token.is_cancelled() {
                break;
            }
            if !views.is_empty() {
                callback(views);
            }
        }
        debug!(conversation = %conversation, "view forwarder stopped");
    });

    ViewHandle {
        conversation,
        token,
        task: Some(task),
    }
}

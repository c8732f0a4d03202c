//! Exclusive lease over the capture source.
//!
//! Polling and voice streaming both read frames from the same source. Only
//! the current lease holder's task may run; granting the lease to someone
//! else cancels the previous task and waits for it to finish first.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseHolder {
    Polling,
    Streaming,
}

impl LeaseHolder {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseHolder::Polling => "polling",
            LeaseHolder::Streaming => "streaming",
        }
    }
}

struct Grant {
    holder: LeaseHolder,
    generation: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct CaptureLease {
    current: Option<Grant>,
    generation: u64,
}

impl CaptureLease {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self) -> Option<LeaseHolder> {
        self.current.as_ref().map(|grant| grant.holder)
    }

    /// Generation of the outstanding grant. Every grant gets a fresh one.
    pub fn generation(&self) -> Option<u64> {
        self.current.as_ref().map(|grant| grant.generation)
    }

    /// Number of grants handed out so far.
    pub fn grants_issued(&self) -> u64 {
        self.generation
    }

    /// Cancel the outstanding grant and wait until its task has exited.
    pub async fn revoke(&mut self) -> Option<LeaseHolder> {
        let grant = self.current.take()?;
        debug!(
            "Revoking {} lease (generation {})",
            grant.holder.as_str(),
            grant.generation
        );
        grant.token.cancel();

        if let Err(e) = grant.task.await {
            if e.is_panic() {
                warn!("{} task panicked: {}", grant.holder.as_str(), e);
            }
        }

        Some(grant.holder)
    }

    /// Hand the lease to `holder`.
    ///
    /// The previous holder is revoked and awaited before `start` runs. `start`
    /// receives the new grant's cancellation token and generation and must
    /// return the task that consumes the source.
    pub async fn grant<F>(&mut self, holder: LeaseHolder, start: F) -> Option<LeaseHolder>
    where
        F: FnOnce(CancellationToken, u64) -> JoinHandle<()>,
    {
        let previous = self.revoke().await;

        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();
        let task = start(token.clone(), generation);

        debug!(
            "Granted {} lease (generation {})",
            holder.as_str(),
            generation
        );
        self.current = Some(Grant {
            holder,
            generation,
            token,
            task,
        });

        previous
    }
}

use std::fmt;

/// Aggregates the errors from closing several owned sub-components (a room
/// supervisor's recorders, a server supervisor's rooms) into one error,
/// mirroring the Go original's `errors.Join`: one failing sub-component
/// never prevents the others from being closed.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<anyhow::Error>,
}

impl MultiError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: anyhow::Result<()>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    /// Collapse into `Ok(())` if nothing failed, `Err(self)` otherwise.
    pub fn into_result(self) -> anyhow::Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::Error::new(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred during close:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  - {err:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("failed to connect to janus gateway: {0}")]
    Connect(#[source] anyhow::Error),
    #[error("keep-alive failed, session is presumed dead: {0}")]
    KeepAliveFailed(#[source] anyhow::Error),
    #[error("request failed: {0}")]
    Request(#[source] anyhow::Error),
    #[error("transaction channel closed before a response arrived")]
    TransactionDropped,
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("failed to attach video-room handle: {0}")]
    Attach(#[source] anyhow::Error),
    #[error("join request did not yield an SDP offer: {0}")]
    NoOffer(String),
    #[error("peer connection setup failed: {0}")]
    PeerConnection(#[source] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("no valid emails")]
    NoValidRecipients { failed: Vec<String> },
    #[error("smtp send failed: {0}")]
    Send(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_multi_error_is_ok() {
        assert!(MultiError::new().into_result().is_ok());
    }

    #[test]
    fn multi_error_aggregates_failures() {
        let mut errs = MultiError::new();
        errs.push(Ok(()));
        errs.push(Err(anyhow::anyhow!("first")));
        errs.push(Err(anyhow::anyhow!("second")));
        let err = errs.into_result().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }
}

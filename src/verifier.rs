//! Clock-skew tolerant verification of signed envelopes.
//!
//! Devices and servers rarely agree on the time. A [`SkewTolerantVerifier`]
//! first checks an envelope at `now + max_skew`; when that fails only because
//! the instant lies outside a certificate validity window, it checks once more
//! at `now - max_skew`. Every other failure is final.

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::cert::Certificate;
use crate::error::VerificationError;
use crate::pkcs7::SignedEnvelope;

/// How far the local clock may drift from the signer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Builder, Serialize, Deserialize)]
pub struct SkewPolicy {
    #[builder(default)]
    #[serde(default)]
    pub max_skew: Duration,
}

impl SkewPolicy {
    pub fn new(max_skew: Duration) -> Self {
        Self { max_skew }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SkewTolerantVerifier {
    policy: SkewPolicy,
}

impl SkewTolerantVerifier {
    pub fn new(policy: SkewPolicy) -> Self {
        Self { policy }
    }

    /// Shorthand for a verifier allowing `max_skew` either way.
    pub fn with_max_skew(max_skew: Duration) -> Self {
        Self::new(SkewPolicy::new(max_skew))
    }

    pub fn policy(&self) -> &SkewPolicy {
        &self.policy
    }

    /// Verifies `envelope` against the current system time.
    pub fn verify<E: SignedEnvelope + ?Sized>(
        &self,
        envelope: &E,
        trust_anchors: Option<&[Certificate]>,
    ) -> Result<(), VerificationError> {
        self.verify_at(envelope, trust_anchors, OffsetDateTime::now_utc())
    }

    /// Verifies `envelope` as if the local clock read `now`.
    ///
    /// The envelope is checked at most twice. The second attempt is made
    /// even with a zero skew, in which case both instants coincide.
    pub fn verify_at<E: SignedEnvelope + ?Sized>(
        &self,
        envelope: &E,
        trust_anchors: Option<&[Certificate]>,
        now: OffsetDateTime,
    ) -> Result<(), VerificationError> {
        let ahead = now.saturating_add(self.skew());
        let err = match envelope.verify_at(ahead, trust_anchors) {
            Ok(()) => return Ok(()),
            Err(err) if err.is_validity_window() => err,
            Err(err) => return Err(err),
        };

        let behind = now.saturating_sub(self.skew());
        debug!(
            max_skew = ?self.policy.max_skew,
            %ahead,
            %behind,
            error = %err,
            "validity check failed ahead of local clock, retrying behind it"
        );
        envelope.verify_at(behind, trust_anchors)
    }

    fn skew(&self) -> time::Duration {
        time::Duration::try_from(self.policy.max_skew).unwrap_or(time::Duration::MAX)
    }
}

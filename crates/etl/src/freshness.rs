//! Deciding whether a cached file must be fetched again.
//!
//! The rules are evaluated in order, the first one that applies wins:
//!
//! 1. forced → [`Decision::ForceFetch`]
//! 2. never fetched → fetch
//! 3. local artifact missing → fetch
//! 4. `max_age` configured and elapsed → fetch
//! 5. remote size known and different from the recorded size → fetch
//! 6. remote size unknown → skip if a `max_age` is configured, fetch otherwise
//! 7. otherwise → [`Decision::Skip`]
//!
//! Rules 1 to 4 only look at what is already known ([`Freshness::check`]).
//! The remaining rules need the current size of the remote resource, which
//! costs a metadata request ([`Freshness::evaluate`]).

use ketl_model::{CachedFile, Fingerprint};
use std::fmt::{Display, Formatter, Result as FmtResult};
use time::{Duration, UtcDateTime};

/// Outcome of the freshness rules for one cached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The recorded fingerprint still describes the remote resource; the
    /// existing expected files remain valid.
    Skip,
    Fetch(Reason),
    /// Fetch regardless of what is recorded.
    ForceFetch,
}

impl Decision {
    pub fn needs_fetch(&self) -> bool {
        !matches!(self, Decision::Skip)
    }
}

impl Display for Decision {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Decision::Skip => f.write_str("skip"),
            Decision::Fetch(reason) => write!(f, "fetch ({reason})"),
            Decision::ForceFetch => f.write_str("force-fetch"),
        }
    }
}

/// Why a cached file is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    NeverFetched,
    MissingLocally,
    Expired,
    SizeChanged { recorded: u64, current: u64 },
    /// The remote does not report a size and nothing else bounds how long
    /// the recorded copy may be trusted.
    SizeUnknown,
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Reason::NeverFetched => f.write_str("never fetched"),
            Reason::MissingLocally => f.write_str("missing locally"),
            Reason::Expired => f.write_str("max age elapsed"),
            Reason::SizeChanged { recorded, current } => write!(f, "size changed from {recorded} to {current}"),
            Reason::SizeUnknown => f.write_str("remote size unknown"),
        }
    }
}

/// Inputs of the freshness rules.
#[derive(Debug, Clone, Copy)]
pub struct Freshness<'a> {
    pub fingerprint: Option<&'a Fingerprint>,
    pub force: bool,
    pub max_age: Option<Duration>,
    pub now: UtcDateTime,
    /// Whether the artifacts of the last fetch are still on disk.
    pub local_present: bool,
}

impl<'a> Freshness<'a> {
    /// Freshness of `file` right now, using `default_max_age` when the file
    /// does not set its own.
    pub fn new(file: &'a CachedFile, default_max_age: Option<Duration>) -> Self {
        Self {
            fingerprint: file.fingerprint.as_ref(),
            force: false,
            max_age: file.max_age_or(default_max_age),
            now: UtcDateTime::now(),
            local_present: true,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn local_present(mut self, present: bool) -> Self {
        self.local_present = present;
        self
    }

    pub fn at(mut self, now: UtcDateTime) -> Self {
        self.now = now;
        self
    }

    /// Apply the rules that need nothing from the remote resource.
    ///
    /// `None` means the decision depends on the current remote size.
    pub fn check(&self) -> Option<Decision> {
        if self.force {
            return Some(Decision::ForceFetch);
        }
        let Some(fingerprint) = self.fingerprint else {
            return Some(Decision::Fetch(Reason::NeverFetched));
        };
        if !self.local_present {
            return Some(Decision::Fetch(Reason::MissingLocally));
        }
        if let Some(max_age) = self.max_age
            && self.now - fingerprint.fetched_at > max_age
        {
            return Some(Decision::Fetch(Reason::Expired));
        }
        None
    }

    /// Apply every rule, given the size currently reported by the remote.
    pub fn evaluate(&self, current_size: Option<u64>) -> Decision {
        if let Some(decision) = self.check() {
            return decision;
        }
        // check() only returns None for a fetched file.
        let recorded = self.fingerprint.map(|f| f.size).unwrap_or_default();
        match current_size {
            Some(current) if current != recorded => Decision::Fetch(Reason::SizeChanged { recorded, current }),
            Some(_) => Decision::Skip,
            None if self.max_age.is_some() => Decision::Skip,
            None => Decision::Fetch(Reason::SizeUnknown),
        }
    }
}

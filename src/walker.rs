//! Drives each candidate through Discovered -> Canonicalized ->
//! Verified/Unresolved, re-entering discovery when a rewrite lands on
//! another backend's pattern, bounded by the hop budget.

use chrono::Utc;

use crate::cache::{CacheEntry, CacheOutcome, CacheStore};
use crate::canonical::{canonicalize, matches_file_share};
use crate::domain::{
    BackendKind, CandidateResource, ContentKind, ResolvedResource, UnresolvedResource,
    kind_from_extension,
};
use crate::net::Prober;
use crate::sniff::classify;

#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub resolved: Vec<ResolvedResource>,
    pub unresolved: Vec<UnresolvedResource>,
}

pub struct LinkChainWalker<'a, P: Prober> {
    prober: &'a P,
    cache: &'a CacheStore,
    max_hops: u8,
    use_cache: bool,
}

impl<'a, P: Prober> LinkChainWalker<'a, P> {
    pub fn new(prober: &'a P, cache: &'a CacheStore, max_hops: u8) -> Self {
        Self {
            prober,
            cache,
            max_hops,
            use_cache: true,
        }
    }

    /// Bypasses cached outcomes; fresh ones are still recorded.
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Deduplicates by identity; one candidate's failure never blocks
    /// the rest.
    pub fn resolve_all(&self, candidates: Vec<CandidateResource>) -> WalkOutcome {
        let mut seen = std::collections::HashSet::new();
        let mut outcome = WalkOutcome::default();
        for candidate in candidates {
            if !seen.insert(candidate.identity.clone()) {
                continue;
            }
            match self.resolve_one(candidate) {
                Ok(resolved) => outcome.resolved.push(resolved),
                Err(unresolved) => {
                    tracing::debug!(
                        identity = %unresolved.candidate.identity,
                        reason = %unresolved.reason,
                        "candidate unresolved"
                    );
                    outcome.unresolved.push(unresolved);
                }
            }
        }
        outcome
    }

    fn resolve_one(
        &self,
        candidate: CandidateResource,
    ) -> Result<ResolvedResource, UnresolvedResource> {
        if self.use_cache {
            if let Some(entry) = self.cache.get(&candidate.identity) {
                match entry.outcome {
                    CacheOutcome::Resolved { resource } => return Ok(resource),
                    CacheOutcome::Unresolved { reason } => {
                        return Err(UnresolvedResource {
                            terminal_url: candidate.announced_url.clone(),
                            candidate,
                            last_kind: ContentKind::Unknown,
                            reason: format!("cached: {reason}"),
                        });
                    }
                }
            }
        }

        let mut url = candidate.announced_url.clone();
        let mut backend = candidate.backend;
        let mut depth = candidate.depth;

        loop {
            let canonical = canonicalize(&url, backend);
            let changed = canonical != url;
            url = canonical;

            // Re-entry: the rewrite landed on a re-entrant backend's
            // pattern. Bounded by the hop budget; at the budget the
            // URL falls through to a verification attempt instead.
            if changed
                && backend != BackendKind::FileShare
                && matches_file_share(&url)
                && depth < self.max_hops
            {
                depth += 1;
                backend = BackendKind::FileShare;
                tracing::debug!(url = %url, depth, "re-entering resolution");
                continue;
            }

            if depth >= self.max_hops && changed && matches_file_share(&url) {
                return Err(self.record_unresolved(
                    candidate,
                    url,
                    ContentKind::Unknown,
                    "max hop count exhausted".to_string(),
                ));
            }

            return self.verify(candidate, url, backend, depth);
        }
    }

    fn verify(
        &self,
        candidate: CandidateResource,
        url: String,
        backend: BackendKind,
        depth: u8,
    ) -> Result<ResolvedResource, UnresolvedResource> {
        // Trusted backends declare size/checksum themselves; the API's
        // word substitutes for the probe.
        if candidate.trusted {
            let kind = kind_from_extension(&candidate.file_name());
            return Ok(self.record_resolved(candidate, url, backend, depth, kind));
        }

        let head = match self.prober.probe(&url) {
            Ok(head) => head,
            Err(err) => {
                return Err(self.record_unresolved(
                    candidate,
                    url,
                    ContentKind::Unknown,
                    format!("probe failed: {err}"),
                ));
            }
        };

        let mut candidate = candidate;
        if candidate.meta.name.is_none() {
            candidate.meta.name = head.attachment_name();
        }

        let kind = classify(&head);
        if kind.is_payload() {
            return Ok(self.record_resolved(candidate, url, backend, depth, kind));
        }

        let reason = match kind {
            ContentKind::LandingPage => "terminal URL is a landing page".to_string(),
            _ => "content kind not verifiable".to_string(),
        };
        Err(self.record_unresolved(candidate, url, kind, reason))
    }

    fn record_resolved(
        &self,
        candidate: CandidateResource,
        url: String,
        backend: BackendKind,
        depth: u8,
        kind: ContentKind,
    ) -> ResolvedResource {
        let mut final_candidate = candidate;
        final_candidate.backend = backend;
        final_candidate.depth = depth;
        let resolved = ResolvedResource {
            candidate: final_candidate,
            fetchable_url: url,
            content_kind: kind,
            verified_at: Utc::now().to_rfc3339(),
        };
        if let Err(err) = self
            .cache
            .put(CacheEntry::resolved(resolved.clone(), self.cache.expiry()))
        {
            tracing::warn!(error = %err, "cache write failed");
        }
        resolved
    }

    fn record_unresolved(
        &self,
        candidate: CandidateResource,
        terminal_url: String,
        last_kind: ContentKind,
        reason: String,
    ) -> UnresolvedResource {
        if let Err(err) = self.cache.put(CacheEntry::unresolved(
            candidate.identity.clone(),
            reason.clone(),
            self.cache.expiry(),
        )) {
            tracing::warn!(error = %err, "cache write failed");
        }
        UnresolvedResource {
            candidate,
            terminal_url,
            last_kind,
            reason,
        }
    }
}

//! Authentication and authorization.
//!
//! Authentication resolves a request to a subject name: the common name of
//! the client's mTLS certificate, or the anonymous subject `""` for
//! connections without client certificates. The [`authenticate`] interceptor
//! runs before every RPC and stashes the subject in request extensions.
//!
//! Authorization consults an [`Authorizer`]: a policy table of
//! `(subject, object, action)` rules with `*` wildcards, loaded from a CSV
//! policy file. The engine behind the table is deliberately simple; the
//! service only depends on the `authorize` contract.

use std::io;
use std::path::Path;

use tonic::{Request, Status};

/// Identity extracted from the client's credentials, stored in request
/// extensions by [`authenticate`].
#[derive(Debug, Clone)]
pub struct Subject(pub String);

/// Interceptor resolving the caller's subject from its mTLS certificate.
///
/// Never rejects: a connection without verifiable client certificates gets
/// the anonymous subject, and the policy decides what anonymous callers may
/// do.
pub fn authenticate(mut request: Request<()>) -> Result<Request<()>, Status> {
    let subject = request
        .peer_certs()
        .and_then(|certs| {
            certs
                .first()
                .and_then(|cert| common_name(&cert.clone().into_inner()))
        })
        .unwrap_or_default();
    request.extensions_mut().insert(Subject(subject));
    Ok(request)
}

/// Extracts the subject common name from a DER-encoded certificate.
fn common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    name
}

/// Policy-table authorizer.
#[derive(Debug, Clone)]
pub struct Authorizer {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
struct Rule {
    subject: String,
    object: String,
    action: String,
}

impl Authorizer {
    /// An authorizer that permits every subject every action. Useful for
    /// development and single-tenant deployments.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::from_policy("p, *, *, *")
    }

    /// Loads rules from a CSV policy file; see [`Authorizer::from_policy`].
    pub fn from_policy_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_policy(&std::fs::read_to_string(path)?))
    }

    /// Parses rules from CSV text, one `subject, object, action` rule per
    /// line. A leading `p` field (the usual policy-file marker) is accepted
    /// and ignored, as are blank lines and `#` comments. Malformed lines are
    /// skipped.
    #[must_use]
    pub fn from_policy(text: &str) -> Self {
        let mut rules = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.first() == Some(&"p") {
                fields.remove(0);
            }
            if let [subject, object, action] = fields.as_slice() {
                rules.push(Rule {
                    subject: (*subject).to_string(),
                    object: (*object).to_string(),
                    action: (*action).to_string(),
                });
            }
        }
        Self { rules }
    }

    /// Returns whether `subject` may run `action` on `object`, as a status
    /// suitable for returning straight to the caller.
    pub fn authorize(&self, subject: &str, object: &str, action: &str) -> Result<(), Status> {
        let permitted = self.rules.iter().any(|rule| {
            pattern_matches(&rule.subject, subject)
                && pattern_matches(&rule.object, object)
                && pattern_matches(&rule.action, action)
        });
        if permitted {
            Ok(())
        } else {
            Err(Status::permission_denied(format!(
                "{subject} not permitted to {action} to {object}"
            )))
        }
    }
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

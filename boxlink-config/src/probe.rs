//! Schema probing
//!
//! A rewrite that only some engine revisions accept is expressed as an
//! ordered list of [`Rewrite`] candidates. [`probe`] applies each one to a
//! fresh copy of the document and trial-parses the result. A rejection that
//! names one of the candidate's own fields moves on to the next candidate;
//! any other rejection stops probing, since later candidates would hit the
//! same problem.

use crate::document::ConfigDocument;
use crate::error::Result;
use crate::schema::SchemaError;

/// One candidate rewrite of a configuration document
pub trait Rewrite {
    /// Short label used in diagnostics, e.g. `platform.fd`
    fn describe(&self) -> String;

    /// Field names this rewrite introduces
    fn fields(&self) -> Vec<&str>;

    /// Apply the rewrite in place
    fn apply(&self, document: &mut ConfigDocument) -> Result<()>;
}

/// A rejected candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub variant: String,
    pub error: SchemaError,
}

/// Result of probing a candidate list
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// A candidate was accepted by the trial parse
    Accepted {
        text: String,
        variant: String,
        attempts: Vec<Attempt>,
    },
    /// Every candidate was rejected for one of its own fields
    Exhausted { attempts: Vec<Attempt> },
    /// A candidate was rejected for an unrelated reason
    Aborted {
        attempts: Vec<Attempt>,
        error: SchemaError,
    },
}

impl ProbeOutcome {
    /// The accepted text, if any
    pub fn accepted(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Accepted { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Accepted text, or `original` when no candidate was accepted
    pub fn into_text_or(self, original: &str) -> String {
        match self {
            ProbeOutcome::Accepted { text, .. } => text,
            _ => original.to_string(),
        }
    }

    pub fn attempts(&self) -> &[Attempt] {
        match self {
            ProbeOutcome::Accepted { attempts, .. }
            | ProbeOutcome::Exhausted { attempts }
            | ProbeOutcome::Aborted { attempts, .. } => attempts,
        }
    }
}

/// Try `candidates` in order against `trial`.
///
/// Fails only when `text` itself cannot be read as a document.
pub fn probe<R, F>(text: &str, candidates: &[R], mut trial: F) -> Result<ProbeOutcome>
where
    R: Rewrite,
    F: FnMut(&str) -> std::result::Result<(), SchemaError>,
{
    let original = ConfigDocument::parse(text)?;
    let mut attempts = Vec::new();

    for candidate in candidates {
        let variant = candidate.describe();
        let mut document = original.clone();
        candidate.apply(&mut document)?;
        let rewritten = document.to_text()?;

        match trial(&rewritten) {
            Ok(()) => {
                log::debug!("schema accepted {}", variant);
                return Ok(ProbeOutcome::Accepted {
                    text: rewritten,
                    variant,
                    attempts,
                });
            }
            Err(error) => {
                let own_field = candidate
                    .fields()
                    .iter()
                    .any(|field| error.rejects_field(field));
                log::debug!("schema rejected {}: {}", variant, error);
                if !own_field {
                    return Ok(ProbeOutcome::Aborted { attempts, error });
                }
                attempts.push(Attempt { variant, error });
            }
        }
    }

    Ok(ProbeOutcome::Exhausted { attempts })
}

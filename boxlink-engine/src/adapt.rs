//! Platform pre-processing of configuration text
//!
//! Runs before a start or replace. Each rewrite is probed against the
//! engine's own parser; a rewrite nothing accepts is skipped with a
//! diagnostic and the start carries on with the text as it was.

use boxlink_config::inject::tun_inbound_snippet;
use boxlink_config::{probe, InjectDescriptor, ProbeOutcome, Rewrite, SchemaError, SuppressAutoDetect};
use boxlink_platform::{Capabilities, TunnelDescriptor};

use crate::diagnostics::Diagnostics;

/// Result of platform pre-processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adaptation {
    pub text: String,
    /// Placement accepted for the tunnel descriptor
    pub descriptor_placement: Option<String>,
    /// Auto-detect variant accepted
    pub auto_detect: Option<String>,
}

/// Apply the rewrites `capabilities` ask for
pub fn adapt_config<F>(
    text: &str,
    capabilities: &Capabilities,
    descriptor: Option<TunnelDescriptor>,
    diagnostics: &Diagnostics,
    mut trial: F,
) -> Adaptation
where
    F: FnMut(&str) -> Result<(), SchemaError>,
{
    let mut adaptation = Adaptation {
        text: text.to_string(),
        descriptor_placement: None,
        auto_detect: None,
    };

    let descriptor = descriptor.filter(|_| capabilities.inject_descriptor);
    if let Some(descriptor) = descriptor {
        let candidates =
            InjectDescriptor::candidates(&capabilities.descriptor_placements, descriptor.raw());
        match run(&adaptation.text, &candidates, &mut trial, diagnostics, "inject") {
            Some((text, variant)) => {
                diagnostics.native(&format!("injected tun {} with key={}", descriptor, variant));
                adaptation.text = text;
                adaptation.descriptor_placement = Some(variant);
            }
            None => diagnostics.native("no schema accepted tun fd, proceed without fd injection"),
        }
    }

    if capabilities.suppress_route_auto_detect {
        match run(
            &adaptation.text,
            &SuppressAutoDetect::candidates(),
            &mut trial,
            diagnostics,
            "route",
        ) {
            Some((text, variant)) => {
                diagnostics.native(&format!("disabled route {}", variant));
                adaptation.text = text;
                adaptation.auto_detect = Some(variant);
            }
            None => diagnostics.native("route auto-detect flags unsupported by schema, keep original"),
        }
    }

    if descriptor.is_some() {
        diagnostics.native(&format!(
            "final: tun inbound = {}",
            tun_inbound_snippet(&adaptation.text)
        ));
    }

    adaptation
}

fn run<R, F>(
    text: &str,
    candidates: &[R],
    trial: &mut F,
    diagnostics: &Diagnostics,
    label: &str,
) -> Option<(String, String)>
where
    R: Rewrite,
    F: FnMut(&str) -> Result<(), SchemaError>,
{
    let outcome = match probe(text, candidates, |candidate| trial(candidate)) {
        Ok(outcome) => outcome,
        Err(err) => {
            diagnostics.native(&format!("{}: document unusable: {}", label, err));
            return None;
        }
    };

    for attempt in outcome.attempts() {
        diagnostics.native(&format!(
            "{}: schema rejected {}, try next",
            label, attempt.variant
        ));
    }

    match outcome {
        ProbeOutcome::Accepted { text, variant, .. } => Some((text, variant)),
        ProbeOutcome::Exhausted { .. } => None,
        ProbeOutcome::Aborted { error, .. } => {
            diagnostics.native(&format!("{}: parse after rewrite failed: {}", label, error));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxlink_config::Schema;
    use boxlink_platform::{adapter_for, TargetOs};

    fn adapt(target: TargetOs, schema: &Schema, text: &str, fd: Option<i32>) -> Adaptation {
        let caps = adapter_for(target).capabilities();
        let diagnostics = Diagnostics::new(true, None);
        let descriptor = fd.map(|fd| TunnelDescriptor::new(fd).unwrap());
        adapt_config(text, &caps, descriptor, &diagnostics, |candidate| {
            schema.parse(candidate).map(|_| ())
        })
    }

    #[test]
    fn test_desktop_is_untouched() {
        let text = r#"{"inbounds":[{"type":"tun","auto_route":true}]}"#;
        let adaptation = adapt(TargetOs::Linux, &Schema::current(), text, Some(3));
        assert_eq!(adaptation.text, text);
        assert!(adaptation.descriptor_placement.is_none());
        assert!(adaptation.auto_detect.is_none());
    }

    #[test]
    fn test_android_current_schema() {
        let adaptation = adapt(TargetOs::Android, &Schema::current(), r#"{"inbounds":[]}"#, Some(8));
        assert_eq!(adaptation.descriptor_placement.as_deref(), Some("file_descriptor"));
        assert_eq!(adaptation.auto_detect.as_deref(), Some("auto-detect v4+v6"));
        let options = Schema::current().parse(&adaptation.text).unwrap();
        assert_eq!(options.tun().unwrap().file_descriptor, Some(8));
        assert_eq!(options.route.auto_detect_interface, Some(false));
        assert_eq!(options.route.auto_detect_interface_ipv6, Some(false));
    }

    #[test]
    fn test_android_without_descriptor_still_suppresses() {
        let adaptation = adapt(TargetOs::Android, &Schema::legacy(), "{}", None);
        assert!(adaptation.descriptor_placement.is_none());
        assert_eq!(adaptation.auto_detect.as_deref(), Some("auto-detect v4 only"));
    }

    #[test]
    fn test_invalid_document_passes_through() {
        let adaptation = adapt(TargetOs::Android, &Schema::current(), "not json", Some(1));
        assert_eq!(adaptation.text, "not json");
    }
}

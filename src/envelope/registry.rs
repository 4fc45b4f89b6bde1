//! Static registry of recognized event type tags.
//!
//! Each row maps a tag pattern to the event variant that decodes it. A
//! pattern is either an exact tag (`compute.libvirt.error`) or a family
//! (`compute.instance.*`, matching any tag under `compute.instance.`).
//! Exact rows win over families; among families the longest prefix wins.
//!
//! Adding a tag means adding a row here.
//!
//! The tag is located with a regular expression over the raw message
//! instead of a first parsing pass. This assumes well-formed JSON whose
//! `event_type` key appears once, at the top level.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// The closed set of event variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ComputeInstance,
    ComputeTask,
    Exception,
    KeyPair,
    Port,
    RbacPolicy,
    SecurityGroup,
    SecurityGroupRule,
    Tag,
    Binding,
    Identity,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::ComputeInstance,
        EventKind::ComputeTask,
        EventKind::Exception,
        EventKind::KeyPair,
        EventKind::Port,
        EventKind::RbacPolicy,
        EventKind::SecurityGroup,
        EventKind::SecurityGroupRule,
        EventKind::Tag,
        EventKind::Binding,
        EventKind::Identity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ComputeInstance => "compute-instance",
            EventKind::ComputeTask => "compute-task",
            EventKind::Exception => "exception",
            EventKind::KeyPair => "keypair",
            EventKind::Port => "port",
            EventKind::RbacPolicy => "rbac-policy",
            EventKind::SecurityGroup => "security-group",
            EventKind::SecurityGroupRule => "security-group-rule",
            EventKind::Tag => "tag",
            EventKind::Binding => "binding",
            EventKind::Identity => "identity",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

use EventKind::*;

/// Every recognized tag pattern.
static TAGS: &[(&str, EventKind)] = &[
    // compute
    ("compute.instance.*", ComputeInstance),
    ("compute_task.*", ComputeTask),
    ("scheduler.select_destinations.*", ComputeTask),
    ("compute.libvirt.error", ComputeTask),
    // exceptions raised by compute manager operations
    ("add_fixed_ip_to_instance", Exception),
    ("attach_interface", Exception),
    ("attach_volume", Exception),
    ("backup_instance", Exception),
    ("build_and_run_instance", Exception),
    ("change_instance_metadata", Exception),
    ("confirm_resize", Exception),
    ("create_key_pair", Exception),
    ("detach_interface", Exception),
    ("detach_volume", Exception),
    ("finish_resize", Exception),
    ("finish_revert_resize", Exception),
    ("live_migration", Exception),
    ("pre_live_migration", Exception),
    ("prep_resize", Exception),
    ("reboot_instance", Exception),
    ("rebuild_instance", Exception),
    ("remove_volume_connection", Exception),
    ("rescue_instance", Exception),
    ("resize_instance", Exception),
    ("revert_resize", Exception),
    ("shelve_instance", Exception),
    ("snapshot_instance", Exception),
    ("start_instance", Exception),
    ("stop_instance", Exception),
    ("swap_volume", Exception),
    ("terminate_instance", Exception),
    ("unshelve_instance", Exception),
    // keypairs
    ("keypair.create.*", KeyPair),
    ("keypair.delete.*", KeyPair),
    ("keypair.import.*", KeyPair),
    // networking
    ("port.create.*", Port),
    ("port.update.*", Port),
    ("port.delete.*", Port),
    ("rbac_policy.create.*", RbacPolicy),
    ("rbac_policy.update.*", RbacPolicy),
    ("rbac_policy.delete.*", RbacPolicy),
    ("security_group.*", SecurityGroup),
    ("security_group_rule.*", SecurityGroupRule),
    ("tag.create.*", Tag),
    ("tag.update.*", Tag),
    ("tag.delete.*", Tag),
    ("tag.delete_all.*", Tag),
    ("binding.create.*", Binding),
    ("binding.delete.*", Binding),
    // identity
    ("identity.*", Identity),
];

struct Registry {
    exact: HashMap<&'static str, EventKind>,
    /// `(prefix including the trailing dot, kind)`, longest prefix first
    families: Vec<(String, EventKind)>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut exact = HashMap::new();
    let mut families = Vec::new();
    for (pattern, kind) in TAGS {
        match pattern.strip_suffix('*') {
            Some(prefix) => families.push((prefix.to_string(), *kind)),
            None => {
                exact.insert(*pattern, *kind);
            }
        }
    }
    families.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    Registry { exact, families }
});

static EVENT_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""event_type"\s*:\s*"([^"\\]*)""#).expect("event type pattern is valid")
});

/// The variant registered for `tag`, if any.
pub fn lookup(tag: &str) -> Option<EventKind> {
    let registry = &*REGISTRY;
    if let Some(kind) = registry.exact.get(tag) {
        return Some(*kind);
    }
    registry
        .families
        .iter()
        .find(|(prefix, _)| tag.len() > prefix.len() && tag.starts_with(prefix.as_str()))
        .map(|(_, kind)| *kind)
}

/// Extract the `event_type` tag from a raw message without parsing it.
pub fn scan_tag(message: &str) -> Option<&str> {
    EVENT_TYPE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Every registered pattern with its variant.
pub fn patterns() -> impl Iterator<Item = (&'static str, EventKind)> {
    TAGS.iter().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_family_lookup() {
        assert_eq!(lookup("compute.libvirt.error"), Some(ComputeTask));
        assert_eq!(lookup("compute.instance.create.end"), Some(ComputeInstance));
        assert_eq!(lookup("compute.instance.volume.attach"), Some(ComputeInstance));
        assert_eq!(lookup("rebuild_instance"), Some(Exception));
        assert_eq!(lookup("keypair.import.start"), Some(KeyPair));
        assert_eq!(lookup("identity.role_assignment.created"), Some(Identity));
    }

    #[test]
    fn test_family_requires_separator() {
        assert_eq!(lookup("security_group.create.end"), Some(SecurityGroup));
        assert_eq!(lookup("security_group_rule.create.end"), Some(SecurityGroupRule));
        assert_eq!(lookup("identity"), None);
        assert_eq!(lookup("identity."), None);
        assert_eq!(lookup("keypair.rename.end"), None);
    }

    #[test]
    fn test_unknown_tags() {
        assert_eq!(lookup("fleet.rebalance.start"), None);
        assert_eq!(lookup(""), None);
    }

    #[test]
    fn test_every_kind_is_registered() {
        for kind in EventKind::ALL {
            assert!(patterns().any(|(_, k)| k == kind), "{} has no tag", kind);
        }
    }

    #[test]
    fn test_scan_tag() {
        let message = r#"{"priority": "INFO", "event_type" : "port.create.end", "payload": {}}"#;
        assert_eq!(scan_tag(message), Some("port.create.end"));
        assert_eq!(scan_tag(r#"{"payload": {}}"#), None);
    }
}

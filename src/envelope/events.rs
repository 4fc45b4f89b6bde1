//! Typed notification events.
//!
//! Every event is a shared [`Base`] (flattened, so it reads the top-level
//! notification keys) plus an optional variant-specific `payload`. Payload
//! fields are all optional: a notification only fails to decode when a
//! field is present with the wrong type.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::{AckHandle, AckSlot, Acknowledgeable};
use crate::envelope::registry::{self, EventKind};

/// Context fields shared by every notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Base {
    pub event_type: String,

    #[serde(rename = "_unique_id", default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<String>,

    #[serde(rename = "_context_request_id", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(
        rename = "_context_global_request_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub global_request_id: Option<String>,

    #[serde(rename = "_context_user_id", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(rename = "_context_user_name", default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    #[serde(rename = "_context_project_id", default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(
        rename = "_context_project_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub project_name: Option<String>,

    #[serde(rename = "_context_timestamp", default, skip_serializing_if = "Option::is_none")]
    pub context_timestamp: Option<String>,

    #[serde(rename = "_context_roles", default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Acknowledgement capability of the originating delivery
    #[serde(skip)]
    pub ack: AckSlot,
}

macro_rules! event_struct {
    ($(#[$meta:meta])* $name:ident, $payload:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub base: Base,

            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub payload: Option<$payload>,
        }

        impl Acknowledgeable for $name {
            fn ack_handle(&self) -> Option<&AckHandle> {
                self.base.ack.get()
            }

            fn take_ack(&mut self) -> Option<AckHandle> {
                self.base.ack.take()
            }
        }
    };
}

event_struct!(
    /// `compute.instance.*`
    ComputeInstanceEvent,
    ComputeInstancePayload
);
event_struct!(
    /// `compute_task.*`, `scheduler.select_destinations.*`, `compute.libvirt.error`
    ComputeTaskEvent,
    ComputeTaskPayload
);
event_struct!(
    /// Exceptions raised by compute manager operations
    ExceptionEvent,
    ExceptionPayload
);
event_struct!(KeyPairEvent, KeyPairPayload);
event_struct!(PortEvent, PortPayload);
event_struct!(RbacPolicyEvent, RbacPolicyPayload);
event_struct!(SecurityGroupEvent, SecurityGroupPayload);
event_struct!(SecurityGroupRuleEvent, SecurityGroupRulePayload);
event_struct!(TagEvent, TagPayload);
event_struct!(BindingEvent, BindingPayload);
event_struct!(
    /// `identity.*`, both basic and CADF notifications
    IdentityEvent,
    IdentityPayload
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeInstancePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcpus: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_gb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeTaskPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_spec: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyPairPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedIp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Port {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_ips: Vec<FixedIp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Port>,
    /// Set instead of `port` on deletions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RbacPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RbacPolicyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac_policy: Option<RbacPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac_policy_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethertype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_rules: Vec<SecurityGroupRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group: Option<SecurityGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupRulePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_rule: Option<SecurityGroupRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_rule_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vif_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnic_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<Binding>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityPayload {
    /// Basic notifications carry only the affected resource id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_info: Option<String>,
    #[serde(rename = "typeURI", default, skip_serializing_if = "Option::is_none")]
    pub type_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(rename = "eventTime", default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observer: Option<Value>,
}

macro_rules! events {
    ($($variant:ident($ty:ident)),* $(,)?) => {
        /// A decoded notification; one variant per registered family.
        ///
        /// Serializes as the notification itself, without a variant tag.
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(untagged)]
        pub enum Event {
            $($variant($ty)),*
        }

        impl Event {
            /// Parse `message` strictly as the variant for `kind`.
            pub fn parse(kind: EventKind, message: &str) -> serde_json::Result<Self> {
                match kind {
                    $(EventKind::$variant => serde_json::from_str::<$ty>(message).map(Event::$variant)),*
                }
            }

            /// Convert an already parsed notification into the variant for `kind`.
            pub fn from_value(kind: EventKind, value: Value) -> serde_json::Result<Self> {
                match kind {
                    $(EventKind::$variant => serde_json::from_value::<$ty>(value).map(Event::$variant)),*
                }
            }

            pub fn kind(&self) -> EventKind {
                match self {
                    $(Event::$variant(_) => EventKind::$variant),*
                }
            }

            pub fn base(&self) -> &Base {
                match self {
                    $(Event::$variant(event) => &event.base),*
                }
            }

            pub fn base_mut(&mut self) -> &mut Base {
                match self {
                    $(Event::$variant(event) => &mut event.base),*
                }
            }
        }

        $(
            impl From<$ty> for Event {
                fn from(event: $ty) -> Self {
                    Event::$variant(event)
                }
            }
        )*
    };
}

events!(
    ComputeInstance(ComputeInstanceEvent),
    ComputeTask(ComputeTaskEvent),
    Exception(ExceptionEvent),
    KeyPair(KeyPairEvent),
    Port(PortEvent),
    RbacPolicy(RbacPolicyEvent),
    SecurityGroup(SecurityGroupEvent),
    SecurityGroupRule(SecurityGroupRuleEvent),
    Tag(TagEvent),
    Binding(BindingEvent),
    Identity(IdentityEvent),
);

impl Event {
    pub fn event_type(&self) -> &str {
        &self.base().event_type
    }
}

impl Acknowledgeable for Event {
    fn ack_handle(&self) -> Option<&AckHandle> {
        self.base().ack.get()
    }

    fn take_ack(&mut self) -> Option<AckHandle> {
        self.base_mut().ack.take()
    }
}

/// Selects the variant from the registry, like the decoder does.
impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let tag = value
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = registry::lookup(&tag)
            .ok_or_else(|| D::Error::custom(format!("unsupported event type {:?}", tag)))?;
        Event::from_value(kind, value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selects_variant() {
        let message = r#"{"event_type":"port.create.end","_unique_id":"u9",
            "payload":{"port":{"id":"p1","fixed_ips":[{"ip_address":"10.0.0.4"}]}}}"#;
        let event = Event::parse(EventKind::Port, message).unwrap();
        assert_eq!(event.kind(), EventKind::Port);
        assert_eq!(event.base().unique_id.as_deref(), Some("u9"));
        match event {
            Event::Port(port) => {
                let port = port.payload.unwrap().port.unwrap();
                assert_eq!(port.fixed_ips[0].ip_address.as_deref(), Some("10.0.0.4"));
            }
            other => panic!("unexpected variant {:?}", other.kind()),
        }
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let message = r#"{"event_type":"keypair.delete.end","extra":1,
            "payload":{"key_name":"k","fingerprint":"aa:bb"}}"#;
        assert!(Event::parse(EventKind::KeyPair, message).is_ok());
    }

    #[test]
    fn test_type_mismatch_fails() {
        let message = r#"{"event_type":"compute.instance.create.end","payload":{"instance_id":42}}"#;
        assert!(Event::parse(EventKind::ComputeInstance, message).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let message = r#"{"event_type":"identity.authenticate","_context_roles":["admin"],
            "payload":{"typeURI":"http://schemas.dmtf.org/cloud/audit/1.0/event","outcome":"success"}}"#;
        let event = Event::parse(EventKind::Identity, message).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.base().roles, vec!["admin"]);
    }
}

//! The well-known typed payloads carried over the mailslot channel.
//!
//! Each event type has a stable name (the mailslot packet's `name` field)
//! and serialises to JSON for the packet's `value` field — unlike the
//! control region, there's no binary layout contract here, just a name and
//! a JSON shape, so ordinary `serde` derives are enough. Grounded in
//! `GameEvent.cpp`'s `OPENKNEEBOARD_DEFINE_JSON` invocations, which is the
//! supplementary detail the distilled channel description dropped.

use serde::{Deserialize, Serialize};

/// Associates a Rust type with the packet name it's sent under.
pub trait NamedEvent: Serialize + for<'de> Deserialize<'de> {
    const NAME: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrightnessMode {
    Absolute,
    Relative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUserAction {
    pub action: String,
}

impl NamedEvent for RemoteUserAction {
    const NAME: &'static str = "RemoteUserAction";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTabByIdEvent {
    pub id: String,
    pub page_number: Option<u32>,
    pub kneeboard: Option<String>,
}

impl NamedEvent for SetTabByIdEvent {
    const NAME: &'static str = "SetTabByID";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTabByNameEvent {
    pub name: String,
    pub page_number: Option<u32>,
    pub kneeboard: Option<String>,
}

impl NamedEvent for SetTabByNameEvent {
    const NAME: &'static str = "SetTabByName";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTabByIndexEvent {
    pub index: u32,
    pub page_number: Option<u32>,
    pub kneeboard: Option<String>,
}

impl NamedEvent for SetTabByIndexEvent {
    const NAME: &'static str = "SetTabByIndex";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetProfileByIdEvent {
    pub id: String,
}

impl NamedEvent for SetProfileByIdEvent {
    const NAME: &'static str = "SetProfileByID";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetProfileByNameEvent {
    pub name: String,
}

impl NamedEvent for SetProfileByNameEvent {
    const NAME: &'static str = "SetProfileByName";
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetBrightnessEvent {
    pub brightness: f32,
    pub mode: BrightnessMode,
}

impl NamedEvent for SetBrightnessEvent {
    const NAME: &'static str = "SetBrightness";
}

/// A decoded mailslot packet, matched against the well-known names above.
/// Anything else arrives as [`MailslotEvent::Unknown`] rather than being
/// rejected, since a newer producer may send an event an older consumer
/// build doesn't recognize yet.
#[derive(Debug, Clone, PartialEq)]
pub enum MailslotEvent {
    RemoteUserAction(RemoteUserAction),
    SetTabById(SetTabByIdEvent),
    SetTabByName(SetTabByNameEvent),
    SetTabByIndex(SetTabByIndexEvent),
    SetProfileById(SetProfileByIdEvent),
    SetProfileByName(SetProfileByNameEvent),
    SetBrightness(SetBrightnessEvent),
    Unknown { name: String, value: String },
}

impl MailslotEvent {
    /// Decodes a raw `(name, value)` pair into a typed event, falling back
    /// to `Unknown` for an unrecognized name or a name whose JSON doesn't
    /// match the expected shape.
    pub fn decode(name: &str, value: &str) -> Self {
        macro_rules! try_decode {
            ($ty:ty, $variant:ident) => {
                if name == <$ty as NamedEvent>::NAME {
                    if let Ok(event) = serde_json::from_str::<$ty>(value) {
                        return MailslotEvent::$variant(event);
                    }
                }
            };
        }
        try_decode!(RemoteUserAction, RemoteUserAction);
        try_decode!(SetTabByIdEvent, SetTabById);
        try_decode!(SetTabByNameEvent, SetTabByName);
        try_decode!(SetTabByIndexEvent, SetTabByIndex);
        try_decode!(SetProfileByIdEvent, SetProfileById);
        try_decode!(SetProfileByNameEvent, SetProfileByName);
        try_decode!(SetBrightnessEvent, SetBrightness);

        MailslotEvent::Unknown { name: name.to_owned(), value: value.to_owned() }
    }
}

/// A batch of raw `(name, value)` pairs posted atomically as a single
/// mailslot datagram, so a consumer applying several state changes at once
/// (for example, "switch profile and tab") never observes them half-applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MultiEvent(pub Vec<(String, String)>);

impl NamedEvent for MultiEvent {
    const NAME: &'static str = "MultiEvent";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_known_event_by_name() {
        let value = serde_json::to_string(&SetProfileByIdEvent { id: "vfr-1".into() }).unwrap();
        let decoded = MailslotEvent::decode(SetProfileByIdEvent::NAME, &value);
        assert_eq!(decoded, MailslotEvent::SetProfileById(SetProfileByIdEvent { id: "vfr-1".into() }));
    }

    #[test]
    fn unrecognized_name_decodes_as_unknown() {
        let decoded = MailslotEvent::decode("SomethingNew", "{}");
        assert_eq!(decoded, MailslotEvent::Unknown { name: "SomethingNew".into(), value: "{}".into() });
    }

    #[test]
    fn malformed_json_for_known_name_decodes_as_unknown() {
        let decoded = MailslotEvent::decode(SetBrightnessEvent::NAME, "not json");
        assert!(matches!(decoded, MailslotEvent::Unknown { .. }));
    }
}

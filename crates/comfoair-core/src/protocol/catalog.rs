//! Command catalog
//!
//! Static descriptors for every command the ventilation unit understands:
//! request/response pairing, read/write kind and the payload field layout
//! used to decode responses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ProtocolError;

/// Fan stage readout and stage presets
pub const VENTILATION_LEVEL: u16 = 0x00CD;
/// Set the ventilation stage (write, ACK only)
pub const SET_VENTILATION_LEVEL: u16 = 0x0099;
/// Set the comfort temperature (write, ACK only)
pub const SET_COMFORT_TEMPERATURE: u16 = 0x00D3;
/// Temperature sensors
pub const TEMPERATURES: u16 = 0x00D1;
/// Fault codes and filter state
pub const FAULTS: u16 = 0x00D9;
/// Bypass valve state
pub const BYPASS: u16 = 0x00DF;
/// Fan duty and speed
pub const VENTILATION_STATUS: u16 = 0x000B;
/// Operating hour counters
pub const OPERATING_HOURS: u16 = 0x00DD;
/// Preheater and frost protection
pub const PREHEATING: u16 = 0x00E1;

/// Whether a command reads data or writes a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// ACK followed by a response frame
    Read,
    /// ACK only
    Write,
}

/// How a field's raw bytes are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    /// Whole number
    Integer,
    /// Number with a fractional part
    Float,
    /// Non-zero raw value is true
    Boolean,
    /// One byte as a character
    String,
}

/// Conversion applied after the raw value is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Postprocess {
    /// Fan speed: 1875000 / raw, 0 stays 0
    RpmInverse,
    /// Temperature: raw / 2 - 20
    TempHalfMinus20,
}

/// Layout of one value inside a response payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// 1-based offset into the payload
    pub byte_offset: u16,
    /// Number of big-endian bytes (1..=3)
    pub width: u8,
    /// Type of the decoded value
    pub semantic: SemanticType,
    /// Conversion after assembly, if any
    #[serde(default)]
    pub postprocess: Option<Postprocess>,
    /// Name the decoded value is delivered under
    pub destination: String,
}

impl FieldSpec {
    /// Single-byte field
    pub fn new(byte_offset: u16, semantic: SemanticType, destination: impl Into<String>) -> Self {
        Self {
            byte_offset,
            width: 1,
            semantic,
            postprocess: None,
            destination: destination.into(),
        }
    }

    /// Set the byte width
    pub fn width(mut self, width: u8) -> Self {
        self.width = width;
        self
    }

    /// Set the postprocess transform
    pub fn postprocess(mut self, postprocess: Postprocess) -> Self {
        self.postprocess = Some(postprocess);
        self
    }

    /// Zero-based payload range covered by this field
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = (self.byte_offset as usize).saturating_sub(1);
        start..start + self.width as usize
    }
}

/// Descriptor of one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    /// Stable label, also used as the poll group name
    pub label: String,
    /// Free text for humans
    #[serde(default)]
    pub description: String,
    /// Command id of the request frame
    pub request_id: u16,
    /// Response command id, `None` for ACK-only writes
    #[serde(default)]
    pub response_id: Option<u16>,
    /// Read or write
    pub kind: CommandKind,
    /// Included in periodic polling
    #[serde(default)]
    pub pollable: bool,
    /// Values carried by the response
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl CommandDescriptor {
    /// Read command with a response and field layout
    pub fn read(
        label: &str,
        description: &str,
        request_id: u16,
        response_id: u16,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            label: label.to_string(),
            description: description.to_string(),
            request_id,
            response_id: Some(response_id),
            kind: CommandKind::Read,
            pollable: true,
            fields,
        }
    }

    /// Write command answered by ACK only
    pub fn write(label: &str, description: &str, request_id: u16) -> Self {
        Self {
            label: label.to_string(),
            description: description.to_string(),
            request_id,
            response_id: None,
            kind: CommandKind::Write,
            pollable: false,
            fields: Vec::new(),
        }
    }
}

/// Read-only lookup over command descriptors
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    descriptors: Vec<CommandDescriptor>,
    by_request: HashMap<u16, usize>,
    by_response: HashMap<u16, usize>,
}

impl CommandCatalog {
    /// Build a catalog, rejecting duplicate ids and malformed fields
    pub fn new(descriptors: Vec<CommandDescriptor>) -> Result<Self, ProtocolError> {
        let mut seen_request = HashMap::new();
        let mut seen_response = HashMap::new();

        for (idx, desc) in descriptors.iter().enumerate() {
            if seen_request.insert(desc.request_id, idx).is_some() {
                return Err(ProtocolError::InvalidCatalog(format!(
                    "duplicate request id {:#06x}",
                    desc.request_id
                )));
            }
            if let Some(response) = desc.response_id {
                if seen_response.insert(response, idx).is_some() {
                    return Err(ProtocolError::InvalidCatalog(format!(
                        "duplicate response id {:#06x}",
                        response
                    )));
                }
            }
            for field in &desc.fields {
                if field.byte_offset == 0 || !(1..=3).contains(&field.width) {
                    return Err(ProtocolError::InvalidCatalog(format!(
                        "field '{}' of '{}' has offset {} width {}",
                        field.destination, desc.label, field.byte_offset, field.width
                    )));
                }
                // the half-degree scale is defined on one raw byte
                if field.postprocess == Some(Postprocess::TempHalfMinus20) && field.width != 1 {
                    return Err(ProtocolError::InvalidCatalog(format!(
                        "field '{}' of '{}' is a temperature of width {}",
                        field.destination, desc.label, field.width
                    )));
                }
            }
        }

        Ok(Self::indexed(descriptors))
    }

    fn indexed(descriptors: Vec<CommandDescriptor>) -> Self {
        let mut by_request = HashMap::new();
        let mut by_response = HashMap::new();
        for (idx, desc) in descriptors.iter().enumerate() {
            by_request.insert(desc.request_id, idx);
            if let Some(response) = desc.response_id {
                by_response.insert(response, idx);
            }
        }
        Self {
            descriptors,
            by_request,
            by_response,
        }
    }

    /// The ComfoAir command table
    pub fn comfoair() -> Self {
        use Postprocess::*;
        use SemanticType::*;

        let temp = |offset: u16, dest: &str| {
            FieldSpec::new(offset, Float, dest).postprocess(TempHalfMinus20)
        };

        let descriptors = vec![
            CommandDescriptor::read(
                "ventilation_level",
                "Current ventilation stage and per-stage fan presets",
                VENTILATION_LEVEL,
                0x00CE,
                vec![
                    FieldSpec::new(1, Integer, "vsAbluftAbwesend"),
                    FieldSpec::new(2, Integer, "vsAbluftNiedrig"),
                    FieldSpec::new(3, Integer, "vsAbluftMittel"),
                    FieldSpec::new(4, Integer, "vsZuluftAbwesend"),
                    FieldSpec::new(5, Integer, "vsZuluftNiedrig"),
                    FieldSpec::new(6, Integer, "vsZuluftMittel"),
                    FieldSpec::new(7, Integer, "vsAbluftAktuell"),
                    FieldSpec::new(8, Integer, "vsZuluftAktuell"),
                    FieldSpec::new(9, Integer, "vsAktuelleStufe"),
                    FieldSpec::new(10, Boolean, "vsZuluftAktiv"),
                    FieldSpec::new(11, Integer, "vsAbluftHoch"),
                    FieldSpec::new(12, Integer, "vsZuluftHoch"),
                ],
            ),
            CommandDescriptor::write(
                "set_ventilation_level",
                "Set the ventilation stage",
                SET_VENTILATION_LEVEL,
            ),
            CommandDescriptor::write(
                "set_comfort_temperature",
                "Set the comfort temperature",
                SET_COMFORT_TEMPERATURE,
            ),
            CommandDescriptor::read(
                "temperatures",
                "Temperature sensors",
                TEMPERATURES,
                0x00D2,
                vec![
                    temp(1, "teKomfortTemperatur"),
                    temp(2, "teT1_Aussenluft"),
                    temp(3, "teT2_Zuluft"),
                    temp(4, "teT3_Abluft"),
                    temp(5, "teT4_Fortluft"),
                    temp(7, "teEWT"),
                    temp(8, "teNachheizung"),
                    temp(9, "teKuechenhaube"),
                ],
            ),
            CommandDescriptor::read(
                "faults",
                "Fault codes and filter state",
                FAULTS,
                0x00DA,
                vec![
                    FieldSpec::new(1, Integer, "stAktuellerFehlerA"),
                    FieldSpec::new(2, Integer, "stAktuellerFehlerE"),
                    FieldSpec::new(9, Boolean, "stFilterOk"),
                    FieldSpec::new(14, Integer, "stAktuellerFehlerAhigh"),
                ],
            ),
            CommandDescriptor::read(
                "bypass",
                "Bypass control state",
                BYPASS,
                0x00E0,
                vec![
                    FieldSpec::new(4, Integer, "byBypassStufe"),
                    FieldSpec::new(7, Boolean, "bySommermodus"),
                ],
            ),
            CommandDescriptor::read(
                "ventilation_status",
                "Fan duty and fan speed",
                VENTILATION_STATUS,
                0x000C,
                vec![
                    FieldSpec::new(1, Integer, "vstZuluft"),
                    FieldSpec::new(2, Integer, "vstAbluft"),
                    FieldSpec::new(3, Integer, "vstDrehzahlZuluftVent")
                        .width(2)
                        .postprocess(RpmInverse),
                    FieldSpec::new(5, Integer, "vstDrehzahlAbluftVent")
                        .width(2)
                        .postprocess(RpmInverse),
                ],
            ),
            CommandDescriptor::read(
                "operating_hours",
                "Operating hours per stage and component",
                OPERATING_HOURS,
                0x00DE,
                vec![
                    FieldSpec::new(1, Integer, "bsBetriebsstundenAbwesend").width(3),
                    FieldSpec::new(4, Integer, "bsBetriebsstundenNiedrig").width(3),
                    FieldSpec::new(7, Integer, "bsBetriebsstundenMittel").width(3),
                    FieldSpec::new(10, Integer, "bsBetriebsstundenFrostschutz").width(2),
                    FieldSpec::new(12, Integer, "bsBetriebsstundenVorheizung").width(2),
                    FieldSpec::new(14, Integer, "bsBetriebsstundenBypass").width(2),
                    FieldSpec::new(16, Integer, "bsBetriebsstundenFilter").width(2),
                    FieldSpec::new(18, Integer, "bsBetriebsstundenHoch").width(3),
                ],
            ),
            CommandDescriptor::read(
                "preheating",
                "Preheater and frost protection state",
                PREHEATING,
                0x00E2,
                vec![
                    FieldSpec::new(1, Integer, "statusKlappe"),
                    FieldSpec::new(2, Boolean, "frostschutzAktiv"),
                    FieldSpec::new(3, Boolean, "vorheizungAktiv"),
                    FieldSpec::new(4, Integer, "frostminuten").width(2),
                    FieldSpec::new(6, Integer, "frostsicherheit"),
                ],
            ),
        ];

        Self::indexed(descriptors)
    }

    /// Look up a descriptor by its request id
    pub fn find_by_request_id(&self, request_id: u16) -> Option<&CommandDescriptor> {
        self.by_request.get(&request_id).map(|&i| &self.descriptors[i])
    }

    /// Look up the descriptor whose response id matches
    pub fn find_by_response_id(&self, response_id: u16) -> Option<&CommandDescriptor> {
        self.by_response.get(&response_id).map(|&i| &self.descriptors[i])
    }

    /// Look up a descriptor by label
    pub fn find_by_label(&self, label: &str) -> Option<&CommandDescriptor> {
        self.descriptors.iter().find(|d| d.label == label)
    }

    /// Kind of a request id
    pub fn kind_of(&self, request_id: u16) -> Option<CommandKind> {
        self.find_by_request_id(request_id).map(|d| d.kind)
    }

    /// Field layout of a request id's response
    pub fn fields_of(&self, request_id: u16) -> &[FieldSpec] {
        self.find_by_request_id(request_id)
            .map(|d| d.fields.as_slice())
            .unwrap_or(&[])
    }

    /// Descriptors that may be polled periodically
    pub fn pollable(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.descriptors.iter().filter(|d| d.pollable)
    }

    /// All descriptors in table order
    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.descriptors.iter()
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self::comfoair()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_response_pairing() {
        let catalog = CommandCatalog::comfoair();
        let temps = catalog.find_by_request_id(TEMPERATURES).unwrap();
        assert_eq!(temps.response_id, Some(0x00D2));
        assert_eq!(catalog.find_by_response_id(0x00D2).unwrap().request_id, TEMPERATURES);
        assert_eq!(catalog.kind_of(SET_VENTILATION_LEVEL), Some(CommandKind::Write));
        assert_eq!(catalog.kind_of(0x1234), None);
    }

    #[test]
    fn test_builtin_table_is_valid() {
        let builtin: Vec<_> = CommandCatalog::comfoair().iter().cloned().collect();
        assert_eq!(builtin.len(), 9);
        assert!(CommandCatalog::new(builtin).is_ok());
    }

    #[test]
    fn test_writes_are_not_pollable() {
        let catalog = CommandCatalog::comfoair();
        assert_eq!(catalog.pollable().count(), 7);
        assert!(catalog.pollable().all(|d| d.kind == CommandKind::Read));
    }

    #[test]
    fn test_fields_of() {
        let catalog = CommandCatalog::comfoair();
        let fields = catalog.fields_of(VENTILATION_STATUS);
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[2].width, 2);
        assert_eq!(fields[2].postprocess, Some(Postprocess::RpmInverse));
        assert_eq!(fields[2].range(), 2..4);
        assert!(catalog.fields_of(SET_COMFORT_TEMPERATURE).is_empty());
    }

    #[test]
    fn test_duplicate_response_rejected() {
        let err = CommandCatalog::new(vec![
            CommandDescriptor::read("a", "", 0x0001, 0x0002, vec![]),
            CommandDescriptor::read("b", "", 0x0003, 0x0002, vec![]),
        ])
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidCatalog(_)));
    }

    #[test]
    fn test_bad_width_rejected() {
        let field = FieldSpec::new(1, SemanticType::Integer, "x").width(4);
        let err = CommandCatalog::new(vec![CommandDescriptor::read("a", "", 1, 2, vec![field])]);
        assert!(err.is_err());
    }

    #[test]
    fn test_wide_temperature_rejected() {
        let field = FieldSpec::new(1, SemanticType::Float, "t")
            .width(2)
            .postprocess(Postprocess::TempHalfMinus20);
        let err = CommandCatalog::new(vec![CommandDescriptor::read("a", "", 1, 2, vec![field])])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidCatalog(_)));

        let narrow = FieldSpec::new(1, SemanticType::Float, "t").postprocess(Postprocess::TempHalfMinus20);
        assert!(CommandCatalog::new(vec![CommandDescriptor::read("a", "", 1, 2, vec![narrow])]).is_ok());
    }

    #[test]
    fn test_descriptor_from_json() {
        let json = r#"{
            "label": "custom",
            "request_id": 105,
            "response_id": 106,
            "kind": "read",
            "fields": [
                { "byte_offset": 1, "width": 1, "semantic": "string", "destination": "typ" }
            ]
        }"#;
        let desc: CommandDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.request_id, 0x0069);
        assert!(!desc.pollable);
        assert_eq!(desc.fields[0].semantic, SemanticType::String);
        assert_eq!(desc.fields[0].postprocess, None);
    }
}

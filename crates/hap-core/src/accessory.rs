//! Accessory, service and characteristic model from the `/accessories` listing.

use crate::error::{ParseError, Result};
use serde::Deserialize;
use serde_json::Value;

/// Short type of the accessory information service.
pub const ACCESSORY_INFORMATION_SERVICE: &str = "3E";

const MANUFACTURER: &str = "20";
const MODEL: &str = "21";
const NAME: &str = "23";
const SERIAL_NUMBER: &str = "30";
const FIRMWARE_REVISION: &str = "52";

/// Suffix shared by every Apple-defined HAP type UUID.
const HAP_BASE_UUID_SUFFIX: &str = "-0000-1000-8000-0026BB765291";

/// Parsed accessory listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessoryDatabase {
    pub accessories: Vec<Accessory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Accessory {
    pub aid: u64,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    pub iid: u64,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Characteristic {
    /// Owning accessory, filled in from the enclosing [`Accessory`].
    #[serde(default)]
    pub aid: u64,
    pub iid: u64,
    #[serde(rename = "type")]
    pub characteristic_type: String,
    #[serde(default)]
    pub perms: Vec<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Identity strings read from the accessory information service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessoryInfo {
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    pub serial_number: String,
    pub firmware_revision: String,
}

/// A single characteristic change pushed by the accessory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CharacteristicEvent {
    pub aid: u64,
    pub iid: u64,
    #[serde(default)]
    pub value: Value,
}

#[derive(Deserialize)]
struct EventBody {
    characteristics: Vec<CharacteristicEvent>,
}

impl Characteristic {
    pub fn is_evented(&self) -> bool {
        self.perms.iter().any(|p| p == "ev")
    }

    pub fn is_writable(&self) -> bool {
        self.perms.iter().any(|p| p == "pw")
    }
}

impl AccessoryDatabase {
    /// Parse a `/accessories` response body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let mut db: AccessoryDatabase = serde_json::from_slice(body)?;
        for accessory in &mut db.accessories {
            let aid = accessory.aid;
            for service in &mut accessory.services {
                for characteristic in &mut service.characteristics {
                    characteristic.aid = aid;
                }
            }
        }
        Ok(db)
    }

    pub fn accessory(&self, aid: u64) -> Option<&Accessory> {
        self.accessories.iter().find(|a| a.aid == aid)
    }

    pub fn characteristic(&self, aid: u64, iid: u64) -> Option<&Characteristic> {
        self.accessory(aid)?
            .services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.iid == iid)
    }

    /// First characteristic of `characteristic_type` inside a service of `service_type`.
    pub fn find(&self, service_type: &str, characteristic_type: &str) -> Option<&Characteristic> {
        self.accessories
            .iter()
            .flat_map(|a| a.services.iter())
            .filter(|s| same_type(&s.service_type, service_type))
            .flat_map(|s| s.characteristics.iter())
            .find(|c| same_type(&c.characteristic_type, characteristic_type))
    }

    /// Short service and characteristic types of characteristic `iid` on
    /// accessory `aid`; the reverse of [`find`](Self::find).
    pub fn types_of(&self, aid: u64, iid: u64) -> Option<(String, String)> {
        self.accessory(aid)?.services.iter().find_map(|s| {
            s.characteristics
                .iter()
                .find(|c| c.iid == iid)
                .map(|c| (short_type(&s.service_type), short_type(&c.characteristic_type)))
        })
    }

    /// Characteristics that accept event subscriptions.
    pub fn evented(&self) -> Vec<&Characteristic> {
        self.accessories
            .iter()
            .flat_map(|a| a.services.iter())
            .flat_map(|s| s.characteristics.iter())
            .filter(|c| c.is_evented())
            .collect()
    }

    /// Information-service strings for accessory `aid`.
    pub fn info(&self, aid: u64) -> Option<AccessoryInfo> {
        let service = self
            .accessory(aid)?
            .services
            .iter()
            .find(|s| same_type(&s.service_type, ACCESSORY_INFORMATION_SERVICE))?;

        let mut info = AccessoryInfo::default();
        for c in &service.characteristics {
            let text = match c.value.as_ref().and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => continue,
            };
            let short = short_type(&c.characteristic_type);
            match short.as_str() {
                MANUFACTURER => info.manufacturer = text,
                MODEL => info.model = text,
                NAME => info.name = text,
                SERIAL_NUMBER => info.serial_number = text,
                FIRMWARE_REVISION => info.firmware_revision = text,
                _ => {}
            }
        }
        Some(info)
    }

    /// Record a new value. Returns false when the characteristic is unknown.
    pub fn apply_update(&mut self, aid: u64, iid: u64, value: Value) -> bool {
        let target = self
            .accessories
            .iter_mut()
            .filter(|a| a.aid == aid)
            .flat_map(|a| a.services.iter_mut())
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.iid == iid);

        match target {
            Some(c) => {
                c.value = Some(value);
                true
            }
            None => false,
        }
    }
}

/// Parse an event push body: `{"characteristics":[{"aid":..,"iid":..,"value":..}]}`.
pub fn parse_events(body: &[u8]) -> Result<Vec<CharacteristicEvent>> {
    let body: EventBody = serde_json::from_slice(body)?;
    Ok(body.characteristics)
}

/// Reduce a HAP type to its short uppercase form.
///
/// `0000003E-0000-1000-8000-0026BB765291` and `3e` both become `3E`.
pub fn short_type(type_str: &str) -> String {
    let upper = type_str.trim().to_ascii_uppercase();
    let head = match upper.strip_suffix(HAP_BASE_UUID_SUFFIX) {
        Some(head) => head,
        None => upper.as_str(),
    };
    let trimmed = head.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn same_type(a: &str, b: &str) -> bool {
    short_type(a) == short_type(b)
}

/// Validate a setup code of the form `XXX-XX-XXX`.
pub fn validate_setup_code(code: &str) -> std::result::Result<(), ParseError> {
    let groups: Vec<&str> = code.split('-').collect();
    let shape_ok = groups.len() == 3
        && groups[0].len() == 3
        && groups[1].len() == 2
        && groups[2].len() == 3;
    if shape_ok && groups.iter().all(|g| g.chars().all(|c| c.is_ascii_digit())) {
        Ok(())
    } else {
        Err(ParseError::InvalidFormat(format!(
            "setup code must look like XXX-XX-XXX, got {:?}",
            code
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<u8> {
        json!({
            "accessories": [{
                "aid": 1,
                "services": [
                    {
                        "iid": 1,
                        "type": "3E",
                        "characteristics": [
                            {"iid": 2, "type": "20", "perms": ["pr"], "format": "string", "value": "Acme"},
                            {"iid": 3, "type": "21", "perms": ["pr"], "format": "string", "value": "Lamp 1"},
                            {"iid": 4, "type": "23", "perms": ["pr"], "format": "string", "value": "Desk Lamp"},
                            {"iid": 5, "type": "30", "perms": ["pr"], "format": "string", "value": "SN123"},
                            {"iid": 6, "type": "52", "perms": ["pr"], "format": "string", "value": "1.0.2"},
                            {"iid": 7, "type": "14", "perms": ["pw"], "format": "bool"}
                        ]
                    },
                    {
                        "iid": 9,
                        "type": "00000043-0000-1000-8000-0026BB765291",
                        "characteristics": [
                            {"iid": 10, "type": "00000025-0000-1000-8000-0026BB765291",
                             "perms": ["pr", "pw", "ev"], "format": "bool", "value": false}
                        ]
                    }
                ]
            }]
        })
        .to_string()
        .into_bytes()
    }

    mod parsing {
        use super::*;

        #[test]
        fn parses_accessories_and_fills_aid() {
            let db = AccessoryDatabase::from_json(&sample()).unwrap();
            assert_eq!(db.accessories.len(), 1);
            let c = db.characteristic(1, 10).unwrap();
            assert_eq!(c.aid, 1);
            assert_eq!(c.value, Some(json!(false)));
        }

        #[test]
        fn missing_value_is_none() {
            let db = AccessoryDatabase::from_json(&sample()).unwrap();
            let identify = db.characteristic(1, 7).unwrap();
            assert!(identify.value.is_none());
            assert!(identify.is_writable());
        }

        #[test]
        fn rejects_invalid_json() {
            let result = AccessoryDatabase::from_json(b"{not json");
            assert!(matches!(result, Err(crate::Error::Json(_))));
        }

        #[test]
        fn parses_event_body() {
            let body = br#"{"characteristics":[{"aid":1,"iid":10,"value":true}]}"#;
            let events = parse_events(body).unwrap();
            assert_eq!(
                events,
                vec![CharacteristicEvent {
                    aid: 1,
                    iid: 10,
                    value: json!(true)
                }]
            );
        }
    }

    mod queries {
        use super::*;

        #[test]
        fn info_reads_information_service() {
            let db = AccessoryDatabase::from_json(&sample()).unwrap();
            let info = db.info(1).unwrap();
            assert_eq!(info.manufacturer, "Acme");
            assert_eq!(info.model, "Lamp 1");
            assert_eq!(info.name, "Desk Lamp");
            assert_eq!(info.serial_number, "SN123");
            assert_eq!(info.firmware_revision, "1.0.2");
        }

        #[test]
        fn info_for_unknown_accessory_is_none() {
            let db = AccessoryDatabase::from_json(&sample()).unwrap();
            assert!(db.info(2).is_none());
        }

        #[test]
        fn find_matches_short_and_long_types() {
            let db = AccessoryDatabase::from_json(&sample()).unwrap();
            let on = db.find("43", "25").unwrap();
            assert_eq!(on.iid, 10);
            assert!(db.find("3E", "25").is_none());
        }

        #[test]
        fn types_of_reports_short_types() {
            let db = AccessoryDatabase::from_json(&sample()).unwrap();
            assert_eq!(db.types_of(1, 4), Some(("3E".to_string(), "23".to_string())));

            let (service, characteristic) = db.types_of(1, 10).unwrap();
            assert_eq!((service.as_str(), characteristic.as_str()), ("43", "25"));
            assert_eq!(db.find(&service, &characteristic).unwrap().iid, 10);
        }

        #[test]
        fn types_of_unknown_ids_is_none() {
            let db = AccessoryDatabase::from_json(&sample()).unwrap();
            assert!(db.types_of(1, 99).is_none());
            assert!(db.types_of(2, 10).is_none());
        }

        #[test]
        fn evented_lists_ev_characteristics() {
            let db = AccessoryDatabase::from_json(&sample()).unwrap();
            let evented = db.evented();
            assert_eq!(evented.len(), 1);
            assert_eq!(evented[0].iid, 10);
        }

        #[test]
        fn apply_update_changes_value() {
            let mut db = AccessoryDatabase::from_json(&sample()).unwrap();
            assert!(db.apply_update(1, 10, json!(true)));
            assert_eq!(db.characteristic(1, 10).unwrap().value, Some(json!(true)));
            assert!(!db.apply_update(1, 99, json!(true)));
        }
    }

    mod types {
        use super::*;

        #[test]
        fn short_type_normalizes() {
            assert_eq!(short_type("3e"), "3E");
            assert_eq!(short_type("0000003E-0000-1000-8000-0026BB765291"), "3E");
            assert_eq!(short_type("00000025-0000-1000-8000-0026bb765291"), "25");
        }

        #[test]
        fn custom_uuid_is_kept() {
            let custom = "E863F10A-079E-48FF-8F27-9C2605A29F52";
            assert_eq!(short_type(custom), custom);
        }

        #[test]
        fn setup_code_validation() {
            assert!(validate_setup_code("111-11-111").is_ok());
            assert!(validate_setup_code("031-45-154").is_ok());
            assert!(validate_setup_code("11111111").is_err());
            assert!(validate_setup_code("111-11-11a").is_err());
            assert!(validate_setup_code("1111-1-111").is_err());
        }
    }
}

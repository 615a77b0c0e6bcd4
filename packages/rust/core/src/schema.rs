//! Record schema side effects of the geocoding step.

use geoenrich_shared::{AddressFields, LOCATION_FIELD, StageOptions};
use serde::Serialize;

/// Kind of a declared output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    GeoPoint,
    Object,
}

/// An output field schema-aware consumers can render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDeclaration {
    pub name: String,
    pub kind: FieldKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Fields the pipeline adds for `options`: `location` and `<address>_full`.
///
/// Declared only; nothing here enforces them on records.
pub fn declared_fields(options: &StageOptions) -> Vec<FieldDeclaration> {
    let fields = AddressFields::new(options.address.as_str());
    vec![
        FieldDeclaration {
            name: LOCATION_FIELD.to_string(),
            kind: FieldKind::GeoPoint,
            label: Some("Location".to_string()),
        },
        FieldDeclaration {
            name: fields.full().to_string(),
            kind: FieldKind::Object,
            label: None,
        },
    ]
}

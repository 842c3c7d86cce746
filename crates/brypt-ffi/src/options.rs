//! C-friendly option structs, translated into `brypt_core::options` values.
//! The JSON config parser itself is out of scope for this crate; a caller
//! builds one of these directly or deserializes it from whatever config
//! format it owns and hands it to `service_create`.

use brypt_core::options::{ConnectionOptions, IdentifierPersistence, SupportedAlgorithms};

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub connection: ConnectionOptions,
    pub algorithms: SupportedAlgorithms,
    pub identifier_persistence: IdentifierPersistence,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            algorithms: SupportedAlgorithms::default(),
            identifier_persistence: IdentifierPersistence::default(),
        }
    }
}

/// Parses a `ServiceOptions` from the JSON shape an external config layer
/// would already have on hand. `brypt-ffi` does not read the file itself —
/// it only turns an owned JSON string into the typed struct the core wants.
pub fn options_from_json(json: &str) -> Result<ServiceOptions, brypt_core::Error> {
    #[derive(serde::Deserialize)]
    struct Raw {
        connection: Option<ConnectionOptions>,
        algorithms: Option<SupportedAlgorithms>,
        identifier_persistence: Option<IdentifierPersistence>,
    }
    let raw: Raw = serde_json::from_str(json)
        .map_err(|e| brypt_core::Error::InvalidConfig(e.to_string()))?;
    Ok(ServiceOptions {
        connection: raw.connection.unwrap_or_default(),
        algorithms: raw.algorithms.unwrap_or_default(),
        identifier_persistence: raw.identifier_persistence.unwrap_or_default(),
    })
}

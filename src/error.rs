//! Unified error type for the control plane.
//!
//! `AppError` is the single error type surfaced across RPC handlers, the
//! supervisor, and config loading. It serializes as `{ "kind": "...",
//! "message": "..." }` so `callback-error` replies let operator dashboards
//! programmatically distinguish error categories.

use serde::ser::SerializeStruct;

/// Application-level error.
///
/// Each variant maps to a distinct failure domain from the error-handling
/// design: most are surfaced to an RPC caller via `callback-error`; a few
/// (`Config`, `KernelAttach`) are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Config file load/parse/save failures.
    #[error("{0}")]
    Config(String),

    /// XDP program load or attach failure (all three modes exhausted).
    #[error("{0}")]
    KernelAttach(String),

    /// Ring-buffer read failure.
    #[error("{0}")]
    RingRead(String),

    /// Individual wire-record decode failure.
    #[error("{0}")]
    Decode(String),

    /// RPC payload failed validation (bad predicate, bad address, etc.).
    #[error("{0}")]
    RpcValidation(String),

    /// Kernel map insert/delete failure from the blacklist synchronizer.
    #[error("{0}")]
    Sync(String),

    /// Client write failure (socket closed, serialize error).
    #[error("{0}")]
    ClientWrite(String),

    /// GeoIP database open/lookup failure.
    #[error("{0}")]
    GeoIp(String),

    /// I/O and OS-level errors.
    #[error("{0}")]
    Io(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "Config",
            AppError::KernelAttach(_) => "KernelAttach",
            AppError::RingRead(_) => "RingRead",
            AppError::Decode(_) => "Decode",
            AppError::RpcValidation(_) => "RpcValidation",
            AppError::Sync(_) => "Sync",
            AppError::ClientWrite(_) => "ClientWrite",
            AppError::GeoIp(_) => "GeoIp",
            AppError::Io(_) => "Io",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }` for the wire.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_correct_variant_name() {
        assert_eq!(AppError::Config("bad".into()).kind(), "Config");
        assert_eq!(AppError::KernelAttach("bad".into()).kind(), "KernelAttach");
        assert_eq!(AppError::RpcValidation("bad".into()).kind(), "RpcValidation");
        assert_eq!(AppError::Io("bad".into()).kind(), "Io");
    }

    #[test]
    fn test_error_display_shows_message() {
        let err = AppError::Sync("map update failed".into());
        assert_eq!(err.to_string(), "map update failed");
    }

    #[test]
    fn test_error_serializes_as_kind_and_message() {
        let err = AppError::RpcValidation("ipv4 address validation failed".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "RpcValidation");
        assert_eq!(json["message"], "ipv4 address validation failed");
    }

    #[test]
    fn test_all_variants_serialize_with_two_fields() {
        let variants: Vec<AppError> = vec![
            AppError::Config("a".into()),
            AppError::KernelAttach("b".into()),
            AppError::RingRead("c".into()),
            AppError::Decode("d".into()),
            AppError::RpcValidation("e".into()),
            AppError::Sync("f".into()),
            AppError::ClientWrite("g".into()),
            AppError::GeoIp("h".into()),
            AppError::Io("i".into()),
        ];
        for err in variants {
            let json = serde_json::to_value(&err).unwrap();
            let obj = json.as_object().unwrap();
            assert_eq!(obj.len(), 2, "Expected exactly 2 fields for {err:?}");
            assert!(obj.contains_key("kind"));
            assert!(obj.contains_key("message"));
        }
    }
}

//! Default entries seeded at startup
//!
//! Defaults live under `default:<key>` and back the resolver's fallback
//! tier. Runtime traffic never writes them; only seeding does.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use hearth_core::{is_secret_key, Error, Key, Namespace, Result};
use hearth_storage::Store;

/// Built-in telemetry defaults
pub const BUILTIN_DEFAULTS: &[(&str, &str)] = &[
    ("tHome", "37.4919392,-121.9469367"),
    ("tHomeRadiusFt", "100"),
    ("tWork", "37.4919392,-121.9469367"),
    ("tWorkRadiusFt", "100"),
    ("tChargeRangeFull", "270"),
    ("tChargeRangeMedium", "100"),
    ("tChargeRangeLow", "30"),
    ("eIHIP", "fill"),
    ("eIHNP", "fill"),
    ("eIHNPBCRM", "fill"),
    ("eNH", "rainbow"),
    ("cIHIP", "0,0,0,255"),
    ("cIHNP", "0,0,0,255"),
    ("cIHNPBCRM", "0,0,0,255"),
    ("cNH", "0,0,0,255"),
    ("tGetStateInterval", "14400"),
    ("tSoftStateInterval", "600"),
    ("tGetStateIntervalDriving", "30"),
    ("tGetStateIntervalCharging", "60"),
    ("tVehicle", "0"),
];

/// When to write defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeedMode {
    /// Write only defaults that are not stored yet
    #[default]
    IfAbsent,
    /// Overwrite every default on each start
    Reset,
}

/// Outcome of a seeding run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Defaults written
    pub written: usize,
    /// Defaults left as they were
    pub kept: usize,
}

/// Built-in defaults with `overrides` merged on top
pub fn merged_defaults(overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut defaults: BTreeMap<String, String> = BUILTIN_DEFAULTS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    defaults.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    defaults
}

/// Check that every default key is a plain general key
pub fn validate_defaults(defaults: &BTreeMap<String, String>) -> Result<()> {
    for key in defaults.keys() {
        let bytes = key.as_bytes();
        if is_secret_key(bytes) || Namespace::of(bytes) == Namespace::Default {
            return Err(Error::invalid_input(format!(
                "default '{}' must be a general key",
                key
            )));
        }
        Key::new(bytes).default_for().validate()?;
    }
    Ok(())
}

/// Write `defaults` under their `default:` keys
pub fn seed_defaults(
    store: &Store,
    defaults: &BTreeMap<String, String>,
    mode: SeedMode,
) -> Result<SeedReport> {
    validate_defaults(defaults)?;

    let mut report = SeedReport::default();
    for (key, value) in defaults {
        let default_key = Key::new(key.as_bytes()).default_for();
        if mode == SeedMode::IfAbsent && store.get(default_key.as_bytes())?.is_some() {
            report.kept += 1;
            continue;
        }
        store.put(default_key.as_bytes(), value.as_bytes())?;
        report.written += 1;
    }

    info!(
        target: "hearth::defaults",
        written = report.written,
        kept = report.kept,
        mode = ?mode,
        "Defaults seeded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> BTreeMap<String, String> {
        merged_defaults(&BTreeMap::new())
    }

    #[test]
    fn test_builtin_defaults_complete() {
        let defaults = builtin();
        assert_eq!(defaults.len(), 20);
        assert_eq!(defaults["tHomeRadiusFt"], "100");
        assert_eq!(defaults["eNH"], "rainbow");
        assert_eq!(defaults["tGetStateInterval"], "14400");
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let mut overrides = BTreeMap::new();
        overrides.insert("tHomeRadiusFt".to_string(), "250".to_string());
        overrides.insert("tGarage".to_string(), "1".to_string());
        let defaults = merged_defaults(&overrides);
        assert_eq!(defaults["tHomeRadiusFt"], "250");
        assert_eq!(defaults["tGarage"], "1");
        assert_eq!(defaults.len(), 21);
    }

    #[test]
    fn test_seed_if_absent_keeps_existing() {
        let store = Store::in_memory();
        store.put(b"default:tVehicle", b"7").unwrap();

        let report = seed_defaults(&store, &builtin(), SeedMode::IfAbsent).unwrap();
        assert_eq!(report, SeedReport { written: 19, kept: 1 });
        assert_eq!(store.get(b"default:tVehicle").unwrap().unwrap().value, b"7".to_vec());

        let again = seed_defaults(&store, &builtin(), SeedMode::IfAbsent).unwrap();
        assert_eq!(again, SeedReport { written: 0, kept: 20 });
    }

    #[test]
    fn test_seed_reset_overwrites() {
        let store = Store::in_memory();
        store.put(b"default:tVehicle", b"7").unwrap();
        let report = seed_defaults(&store, &builtin(), SeedMode::Reset).unwrap();
        assert_eq!(report.written, 20);
        assert_eq!(store.get(b"default:tVehicle").unwrap().unwrap().value, b"0".to_vec());
    }

    #[test]
    fn test_secret_default_rejected() {
        let store = Store::in_memory();
        let mut defaults = BTreeMap::new();
        defaults.insert("secret:apiToken".to_string(), "x".to_string());
        let err = seed_defaults(&store, &defaults, SeedMode::Reset).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.current_version(), 0);
    }

    #[test]
    fn test_seed_mode_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: SeedMode,
        }
        let w: Wrapper = toml::from_str("mode = \"if-absent\"").unwrap();
        assert_eq!(w.mode, SeedMode::IfAbsent);
        let w: Wrapper = toml::from_str("mode = \"reset\"").unwrap();
        assert_eq!(w.mode, SeedMode::Reset);
    }
}
